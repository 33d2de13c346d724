#![forbid(unsafe_code)]

//! Editor configuration loaded from TOML, JSON, or the environment.
//!
//! Groups every tunable of the editing core into a single [`EditorConfig`]
//! so hosts can ship it as data instead of recompiling.
//!
//! # Loading
//!
//! ```toml
//! # storyloom.toml
//! [history]
//! max_history = 100
//!
//! [autosave]
//! interval_ms = 60000
//! debounce_ms = 1500
//!
//! [keymap]
//! primary = "super"
//!
//! [detector]
//! length_ratio = 0.25
//! extra_keywords = ["unicorn", "lighthouse"]
//! ```
//!
//! ```rust,ignore
//! let config = EditorConfig::from_toml_file("storyloom.toml")?.with_env_overrides();
//! ```
//!
//! # Environment Variables
//!
//! | Variable | Type | Field |
//! |----------|------|-------|
//! | `STORYLOOM_MAX_HISTORY` | usize | `history.max_history` |
//! | `STORYLOOM_AUTOSAVE_INTERVAL_MS` | u64 | `autosave.interval` |
//! | `STORYLOOM_AUTOSAVE_DEBOUNCE_MS` | u64 | `autosave.debounce` |
//! | `STORYLOOM_AUTOSAVE_ENABLED` | bool | `autosave.enabled` |
//! | `STORYLOOM_PRIMARY_MODIFIER` | string | `keymap.primary` |
//! | `STORYLOOM_REDO_CTRL_Y` | bool | `keymap.redo_with_y` |
//!
//! Unparsable values are ignored and logged.
//!
//! # Defaults
//!
//! Every field defaults to the component's own default, so
//! `EditorConfig::default()` behaves exactly like constructing each
//! component directly.

use std::path::Path;

use serde::{Deserialize, Serialize};
use web_time::Duration;

use storyloom_core::keybinding::{VAR_PRIMARY_MODIFIER, VAR_REDO_CTRL_Y, parse_bool};
use storyloom_core::{ChangeDetector, KeymapConfig, Lexicon};
use storyloom_core::significance::DEFAULT_LENGTH_RATIO;

use crate::autosave::AutoSaveConfig;
use crate::history::HistoryConfig;

/// Largest accepted undo depth.
pub const MAX_HISTORY_LIMIT: usize = 10_000;

/// Largest accepted magnitude ratio.
pub const MAX_LENGTH_RATIO: f64 = 10.0;

/// Largest accepted auto-save interval, debounce, or teardown wait (24 h).
pub const MAX_TIMER: Duration = Duration::from_secs(24 * 60 * 60);

// ---------------------------------------------------------------------------
// Top-level EditorConfig
// ---------------------------------------------------------------------------

/// Top-level configuration for an editing session.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EditorConfig {
    /// Undo history bound.
    pub history: HistoryConfig,

    /// Auto-save timers.
    pub autosave: AutoSaveConfig,

    /// Undo/redo/save chords.
    pub keymap: KeymapConfig,

    /// Illustration staleness detection.
    pub detector: DetectorConfig,
}

/// Change detector settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DetectorConfig {
    /// Fractional length change that counts as significant.
    pub length_ratio: f64,

    /// Words added to the keyword lexicon.
    pub extra_keywords: Vec<String>,

    /// Start from an empty lexicon instead of the built-in tables.
    pub replace_lexicon: bool,
}

impl Default for DetectorConfig {
    fn default() -> Self {
        Self {
            length_ratio: DEFAULT_LENGTH_RATIO,
            extra_keywords: Vec::new(),
            replace_lexicon: false,
        }
    }
}

impl DetectorConfig {
    /// Build the configured detector.
    #[must_use]
    pub fn build(&self) -> ChangeDetector {
        let base = if self.replace_lexicon {
            Lexicon::empty()
        } else {
            Lexicon::default()
        };
        ChangeDetector::new(base.with_words(&self.extra_keywords))
            .with_length_ratio(self.length_ratio)
    }
}

impl EditorConfig {
    /// Load from a TOML string.
    pub fn from_toml_str(s: &str) -> Result<Self, ConfigError> {
        toml::from_str(s).map_err(ConfigError::Toml)
    }

    /// Load from a TOML file on disk.
    pub fn from_toml_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path.as_ref())?;
        Self::from_toml_str(&content)
    }

    /// Load from a JSON string.
    pub fn from_json_str(s: &str) -> Result<Self, ConfigError> {
        serde_json::from_str(s).map_err(ConfigError::Json)
    }

    /// Load from a JSON file on disk.
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path.as_ref())?;
        Self::from_json_str(&content)
    }

    /// Render as TOML.
    pub fn to_toml_string(&self) -> Result<String, ConfigError> {
        toml::to_string_pretty(self).map_err(ConfigError::TomlSerialize)
    }

    /// Defaults overridden by the process environment.
    #[must_use]
    pub fn from_env() -> Self {
        Self::default().with_env_overrides()
    }

    /// Apply overrides from the process environment.
    #[must_use]
    pub fn with_env_overrides(self) -> Self {
        self.with_overrides_from(|key| std::env::var(key).ok())
    }

    /// Apply overrides through an arbitrary variable lookup.
    #[must_use]
    pub fn with_overrides_from(mut self, lookup: impl Fn(&str) -> Option<String>) -> Self {
        if let Some(v) = parse_var::<usize>(&lookup, "STORYLOOM_MAX_HISTORY") {
            self.history.max_history = v;
        }
        if let Some(v) = parse_var::<u64>(&lookup, "STORYLOOM_AUTOSAVE_INTERVAL_MS") {
            self.autosave.interval = Duration::from_millis(v);
        }
        if let Some(v) = parse_var::<u64>(&lookup, "STORYLOOM_AUTOSAVE_DEBOUNCE_MS") {
            self.autosave.debounce = Duration::from_millis(v);
        }
        if let Some(raw) = lookup("STORYLOOM_AUTOSAVE_ENABLED") {
            match parse_bool(&raw) {
                Some(v) => self.autosave.enabled = v,
                None => tracing::warn!(var = "STORYLOOM_AUTOSAVE_ENABLED", value = %raw, "ignoring unparsable override"),
            }
        }
        for var in [VAR_PRIMARY_MODIFIER, VAR_REDO_CTRL_Y] {
            if let Some(raw) = lookup(var)
                && !KeymapConfig::is_valid_override(var, &raw)
            {
                tracing::warn!(var, value = %raw, "ignoring unparsable override");
            }
        }
        self.keymap = self.keymap.with_overrides_from(&lookup);
        self
    }

    /// Validate all parameters are within acceptable ranges.
    ///
    /// Returns a list of validation errors. An empty list means the config
    /// is valid.
    #[must_use]
    pub fn validate(&self) -> Vec<String> {
        let mut errors = Vec::new();

        if self.history.max_history > MAX_HISTORY_LIMIT {
            errors.push(format!(
                "history.max_history must be <= {MAX_HISTORY_LIMIT}, got {}",
                self.history.max_history
            ));
        }

        let autosave = &self.autosave;
        if autosave.enabled && autosave.interval.is_zero() && autosave.debounce.is_zero() {
            errors.push(
                "autosave: interval_ms and debounce_ms cannot both be 0 when enabled".to_string(),
            );
        }
        if !autosave.interval.is_zero() && autosave.debounce > autosave.interval {
            errors.push(format!(
                "autosave.debounce_ms ({}) must not exceed autosave.interval_ms ({})",
                autosave.debounce.as_millis(),
                autosave.interval.as_millis()
            ));
        }
        if autosave.final_save_timeout.is_zero() {
            errors.push("autosave.final_save_timeout_ms must be > 0".to_string());
        }
        for (name, value) in [
            ("interval_ms", autosave.interval),
            ("debounce_ms", autosave.debounce),
            ("final_save_timeout_ms", autosave.final_save_timeout),
        ] {
            if value > MAX_TIMER {
                errors.push(format!(
                    "autosave.{name} must be <= {}, got {}",
                    MAX_TIMER.as_millis(),
                    value.as_millis()
                ));
            }
        }

        let ratio = self.detector.length_ratio;
        if !ratio.is_finite() || !(0.0..=MAX_LENGTH_RATIO).contains(&ratio) {
            errors.push(format!(
                "detector.length_ratio must be in [0, {MAX_LENGTH_RATIO}], got {ratio}"
            ));
        }
        for word in &self.detector.extra_keywords {
            if !has_word(word) {
                errors.push(format!(
                    "detector.extra_keywords entry {word:?} contains no letters or digits"
                ));
            }
        }

        errors
    }

    /// Return `self` if valid, otherwise every validation message.
    pub fn validated(self) -> Result<Self, ConfigError> {
        let errors = self.validate();
        if errors.is_empty() {
            Ok(self)
        } else {
            Err(ConfigError::Validation(errors))
        }
    }

    /// Clamp out-of-range values to the nearest accepted value.
    #[must_use]
    pub fn clamped(mut self) -> Self {
        self.history.max_history = self.history.max_history.min(MAX_HISTORY_LIMIT);
        let autosave = &mut self.autosave;
        autosave.interval = autosave.interval.min(MAX_TIMER);
        autosave.debounce = autosave.debounce.min(MAX_TIMER);
        autosave.final_save_timeout = autosave.final_save_timeout.min(MAX_TIMER);
        if !autosave.interval.is_zero() && autosave.debounce > autosave.interval {
            autosave.debounce = autosave.interval;
        }
        if autosave.final_save_timeout.is_zero() {
            autosave.final_save_timeout = crate::autosave::DEFAULT_FINAL_SAVE_TIMEOUT;
        }
        let ratio = self.detector.length_ratio;
        self.detector.length_ratio = if ratio.is_finite() {
            ratio.clamp(0.0, MAX_LENGTH_RATIO)
        } else {
            DEFAULT_LENGTH_RATIO
        };
        self.detector
            .extra_keywords
            .retain(|w| has_word(w));
        self
    }
}

/// Lexicon entries need at least one alphanumeric word to ever match.
fn has_word(entry: &str) -> bool {
    entry.chars().any(char::is_alphanumeric)
}

fn parse_var<V: std::str::FromStr>(
    lookup: &impl Fn(&str) -> Option<String>,
    key: &str,
) -> Option<V> {
    let raw = lookup(key)?;
    match raw.trim().parse() {
        Ok(v) => Some(v),
        Err(_) => {
            tracing::warn!(var = key, value = %raw, "ignoring unparsable override");
            None
        }
    }
}


// ---------------------------------------------------------------------------
// Error type
// ---------------------------------------------------------------------------

/// Errors that can occur when loading a configuration.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// I/O error reading a file.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    /// TOML parse error.
    #[error("TOML parse error: {0}")]
    Toml(#[source] toml::de::Error),
    /// TOML render error.
    #[error("TOML serialize error: {0}")]
    TomlSerialize(#[source] toml::ser::Error),
    /// JSON parse error.
    #[error("JSON parse error: {0}")]
    Json(#[source] serde_json::Error),
    /// Validation errors.
    #[error("validation errors: {}", .0.join("; "))]
    Validation(Vec<String>),
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
