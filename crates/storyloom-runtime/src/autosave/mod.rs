#![forbid(unsafe_code)]

//! Debounced and periodic auto-save.
//!
//! Two layers:
//!
//! - [`AutoSaveScheduler`] is a deterministic, I/O-free state machine. It is
//!   fed values and explicit [`Instant`]s and answers "should a save start
//!   now, and with what snapshot?".
//! - [`AutoSaver`] owns a worker thread that drives a scheduler against the
//!   wall clock and calls a [`Persist`](crate::storage::Persist) backend.
//!
//! ```text
//!  update(v) ──► observe ──► debounce deadline = now + debounce
//!                             │
//!  interval tick ─────────────┤
//!  save_now()  ───────────────┤
//!                             ▼
//!                        begin_save ──► Persist::save ──► finish_save
//!                  (skip if unchanged                     (record marker
//!                    and not forced)                       or error)
//! ```
//!
//! Failures never reach the editing thread. They are stored in
//! [`AutoSaveStatus::error`], logged, and forwarded to the optional notifier.

mod scheduler;
mod worker;

pub use scheduler::{AutoSaveScheduler, SaveTicket};
pub use worker::AutoSaver;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use web_time::Duration;

/// Default periodic save interval.
pub const DEFAULT_INTERVAL: Duration = Duration::from_millis(30_000);

/// Default quiet period after the last change before saving.
pub const DEFAULT_DEBOUNCE: Duration = Duration::from_millis(2_000);

/// Default upper bound on the final save at teardown.
pub const DEFAULT_FINAL_SAVE_TIMEOUT: Duration = Duration::from_millis(5_000);

/// Auto-save timing configuration.
///
/// Durations are (de)serialized as integer milliseconds:
///
/// ```toml
/// [autosave]
/// enabled = true
/// interval_ms = 30000
/// debounce_ms = 2000
/// final_save_timeout_ms = 5000
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AutoSaveConfig {
    /// Master switch. When false no timers run and teardown does not save.
    pub enabled: bool,

    /// Period of the unconditional "save if changed" tick. Zero disables it.
    #[serde(rename = "interval_ms", with = "duration_ms")]
    pub interval: Duration,

    /// Quiet period after the last change before a save.
    #[serde(rename = "debounce_ms", with = "duration_ms")]
    pub debounce: Duration,

    /// How long teardown waits for the final save before detaching.
    #[serde(rename = "final_save_timeout_ms", with = "duration_ms")]
    pub final_save_timeout: Duration,
}

impl Default for AutoSaveConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            interval: DEFAULT_INTERVAL,
            debounce: DEFAULT_DEBOUNCE,
            final_save_timeout: DEFAULT_FINAL_SAVE_TIMEOUT,
        }
    }
}

impl AutoSaveConfig {
    /// Set the periodic interval.
    #[must_use]
    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    /// Set the debounce delay.
    #[must_use]
    pub fn with_debounce(mut self, debounce: Duration) -> Self {
        self.debounce = debounce;
        self
    }

    /// Set the teardown wait bound.
    #[must_use]
    pub fn with_final_save_timeout(mut self, timeout: Duration) -> Self {
        self.final_save_timeout = timeout;
        self
    }

    /// Enable or disable auto-save.
    #[must_use]
    pub fn with_enabled(mut self, enabled: bool) -> Self {
        self.enabled = enabled;
        self
    }

    /// A disabled configuration.
    #[must_use]
    pub fn disabled() -> Self {
        Self::default().with_enabled(false)
    }
}

/// Why a save was started.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SaveTrigger {
    /// The debounce quiet period elapsed after a change.
    Debounce,
    /// The periodic interval elapsed.
    Interval,
    /// The caller asked to persist pending changes now.
    Flush,
    /// Explicit user save (save chord). Always persists.
    Manual,
    /// Final save while shutting down. Always persists.
    Teardown,
}

impl SaveTrigger {
    /// Whether this trigger bypasses the "unchanged since last save" check.
    #[must_use]
    pub const fn is_forced(self) -> bool {
        matches!(self, Self::Manual | Self::Teardown)
    }

    /// Stable lowercase name for logs.
    #[must_use]
    pub const fn label(self) -> &'static str {
        match self {
            Self::Debounce => "debounce",
            Self::Interval => "interval",
            Self::Flush => "flush",
            Self::Manual => "manual",
            Self::Teardown => "teardown",
        }
    }
}

/// Snapshot of auto-save state for display.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct AutoSaveStatus {
    /// A backend call is in flight.
    pub is_saving: bool,
    /// Completion time of the last successful save in this session.
    pub last_saved: Option<DateTime<Utc>>,
    /// Message of the most recent failure, cleared when a save starts.
    pub error: Option<String>,
    /// The observed value differs from the last successfully saved one.
    pub has_unsaved_changes: bool,
    /// Successful backend calls.
    pub saves_succeeded: u64,
    /// Failed backend calls.
    pub saves_failed: u64,
}

/// Outcome of one backend call, passed to the notifier.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SaveNotice {
    /// What started the save.
    pub trigger: SaveTrigger,
    /// Whether the backend reported success.
    pub success: bool,
    /// Human-readable summary.
    pub message: String,
    /// When the save finished.
    pub at: DateTime<Utc>,
}

/// Serde adapter for `Duration` as integer milliseconds.
pub(crate) mod duration_ms {
    use serde::{Deserialize, Deserializer, Serializer};
    use web_time::Duration;

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        let ms = u64::try_from(value.as_millis()).unwrap_or(u64::MAX);
        serializer.serialize_u64(ms)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        u64::deserialize(deserializer).map(Duration::from_millis)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn config_defaults() {
        let config = AutoSaveConfig::default();
        assert!(config.enabled);
        assert_eq!(config.interval, Duration::from_secs(30));
        assert_eq!(config.debounce, Duration::from_secs(2));
        assert_eq!(config.final_save_timeout, Duration::from_secs(5));
    }

    #[test]
    fn config_builders() {
        let config = AutoSaveConfig::default()
            .with_interval(Duration::from_millis(100))
            .with_debounce(Duration::from_millis(10))
            .with_final_save_timeout(Duration::from_millis(50))
            .with_enabled(false);
        assert!(!config.enabled);
        assert_eq!(config.interval.as_millis(), 100);
        assert_eq!(config.debounce.as_millis(), 10);
        assert_eq!(config.final_save_timeout.as_millis(), 50);
        assert!(!AutoSaveConfig::disabled().enabled);
    }

    #[test]
    fn config_serializes_milliseconds() {
        let json = serde_json::to_value(AutoSaveConfig::default()).unwrap();
        assert_eq!(json["interval_ms"], 30_000);
        assert_eq!(json["debounce_ms"], 2_000);
        assert_eq!(json["final_save_timeout_ms"], 5_000);
        assert_eq!(json["enabled"], true);
    }

    #[test]
    fn config_partial_json_keeps_defaults() {
        let config: AutoSaveConfig = serde_json::from_str(r#"{"debounce_ms": 750}"#).unwrap();
        assert_eq!(config.debounce, Duration::from_millis(750));
        assert_eq!(config.interval, DEFAULT_INTERVAL);
    }

    #[test]
    fn forced_triggers() {
        assert!(SaveTrigger::Manual.is_forced());
        assert!(SaveTrigger::Teardown.is_forced());
        assert!(!SaveTrigger::Debounce.is_forced());
        assert!(!SaveTrigger::Interval.is_forced());
        assert!(!SaveTrigger::Flush.is_forced());
    }

    #[test]
    fn trigger_labels_are_distinct() {
        let labels = [
            SaveTrigger::Debounce,
            SaveTrigger::Interval,
            SaveTrigger::Flush,
            SaveTrigger::Manual,
            SaveTrigger::Teardown,
        ]
        .map(SaveTrigger::label);
        let unique: std::collections::HashSet<_> = labels.iter().collect();
        assert_eq!(unique.len(), labels.len());
    }
}
