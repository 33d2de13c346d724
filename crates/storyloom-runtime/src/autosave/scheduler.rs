#![forbid(unsafe_code)]

//! Deterministic auto-save state machine.
//!
//! The scheduler never reads the clock and never performs I/O. Callers pass
//! `now` explicitly, which makes debounce and periodic behavior testable
//! with synthetic instants.
//!
//! # Invariants
//!
//! 1. At most one save is in flight. A save requested meanwhile is queued
//!    (forced wins over unforced) and handed back by [`take_queued`].
//! 2. A non-forced save starts only if the observed value differs from the
//!    last successfully saved one.
//! 3. A failed save leaves the saved marker untouched, so the next natural
//!    trigger retries.
//! 4. The periodic deadline always lies in the future after a poll; missed
//!    ticks are skipped, not replayed.
//!
//! [`take_queued`]: AutoSaveScheduler::take_queued

use std::fmt;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use web_time::Instant;

use super::{AutoSaveConfig, AutoSaveStatus, SaveNotice, SaveTrigger};

/// Permission to run one backend call, carrying the snapshot to persist.
#[derive(Debug, Clone)]
pub struct SaveTicket<T> {
    id: u64,
    trigger: SaveTrigger,
    snapshot: Arc<T>,
}

impl<T> SaveTicket<T> {
    /// The value to persist.
    #[must_use]
    pub fn data(&self) -> &T {
        &self.snapshot
    }

    /// The shared snapshot.
    #[must_use]
    pub fn snapshot(&self) -> &Arc<T> {
        &self.snapshot
    }

    /// What started this save.
    #[must_use]
    pub fn trigger(&self) -> SaveTrigger {
        self.trigger
    }

    /// Monotonic ticket number.
    #[must_use]
    pub fn id(&self) -> u64 {
        self.id
    }
}

/// Auto-save bookkeeping driven by explicit instants.
pub struct AutoSaveScheduler<T> {
    config: AutoSaveConfig,
    /// Latest observed value.
    current: Arc<T>,
    /// Value as of the last successful save (initially the baseline).
    saved: Arc<T>,
    debounce_deadline: Option<Instant>,
    interval_deadline: Option<Instant>,
    in_flight: Option<u64>,
    queued: Option<SaveTrigger>,
    next_ticket: u64,
    last_saved: Option<DateTime<Utc>>,
    error: Option<String>,
    saves_succeeded: u64,
    saves_failed: u64,
}

impl<T> fmt::Debug for AutoSaveScheduler<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AutoSaveScheduler")
            .field("config", &self.config)
            .field("debounce_deadline", &self.debounce_deadline)
            .field("interval_deadline", &self.interval_deadline)
            .field("in_flight", &self.in_flight)
            .field("queued", &self.queued)
            .field("error", &self.error)
            .finish_non_exhaustive()
    }
}

impl<T: PartialEq> AutoSaveScheduler<T> {
    /// Create a scheduler whose baseline (the "already saved" value) is
    /// `initial`. The periodic clock starts at `now`.
    #[must_use]
    pub fn new(config: AutoSaveConfig, initial: Arc<T>, now: Instant) -> Self {
        let mut scheduler = Self {
            config,
            current: Arc::clone(&initial),
            saved: initial,
            debounce_deadline: None,
            interval_deadline: None,
            in_flight: None,
            queued: None,
            next_ticket: 1,
            last_saved: None,
            error: None,
            saves_succeeded: 0,
            saves_failed: 0,
        };
        scheduler.arm_interval(now);
        scheduler
    }

    // ====================================================================
    // Inputs
    // ====================================================================

    /// Record a new value. Re-arms the debounce deadline if it changed.
    ///
    /// Returns whether the value differed from the last observed one.
    pub fn observe(&mut self, data: Arc<T>, now: Instant) -> bool {
        if *data == *self.current {
            return false;
        }
        self.current = data;
        if self.config.enabled {
            self.debounce_deadline = now.checked_add(self.config.debounce);
        }
        true
    }

    /// Treat `data` as already persisted, e.g. after loading a document.
    ///
    /// Disarms the debounce and clears any recorded error.
    pub fn rebaseline(&mut self, data: Arc<T>) {
        self.current = Arc::clone(&data);
        self.saved = data;
        self.debounce_deadline = None;
        self.error = None;
    }

    /// Turn auto-save on or off. Enabling restarts the periodic clock at
    /// `now`; disabling disarms every deadline.
    pub fn set_enabled(&mut self, enabled: bool, now: Instant) {
        if self.config.enabled == enabled {
            return;
        }
        self.config.enabled = enabled;
        if enabled {
            self.arm_interval(now);
            if self.has_unsaved_changes() {
                self.debounce_deadline = now.checked_add(self.config.debounce);
            }
        } else {
            self.debounce_deadline = None;
            self.interval_deadline = None;
        }
        tracing::debug!(enabled, "autosave toggled");
    }

    /// A deadline past the end of the clock stays disarmed.
    fn arm_interval(&mut self, now: Instant) {
        self.interval_deadline = if self.config.enabled && !self.config.interval.is_zero() {
            now.checked_add(self.config.interval)
        } else {
            None
        };
    }

    // ====================================================================
    // Timers
    // ====================================================================

    /// Report a trigger whose deadline has passed.
    ///
    /// Debounce takes precedence. Each call reports at most one trigger;
    /// call again to drain a simultaneous periodic tick.
    pub fn poll(&mut self, now: Instant) -> Option<SaveTrigger> {
        if !self.config.enabled {
            return None;
        }

        if let Some(deadline) = self.debounce_deadline
            && now >= deadline
        {
            self.debounce_deadline = None;
            tracing::debug!(trigger = "debounce", "autosave trigger fired");
            return Some(SaveTrigger::Debounce);
        }

        if let Some(deadline) = self.interval_deadline
            && now >= deadline
        {
            let period = self.config.interval;
            let behind = now.duration_since(deadline);
            let steps = behind.as_nanos() / period.as_nanos() + 1;
            let next = u32::try_from(steps)
                .ok()
                .and_then(|steps| period.checked_mul(steps))
                .and_then(|offset| deadline.checked_add(offset))
                .or_else(|| now.checked_add(period));
            if steps > 1 {
                tracing::debug!(skipped = steps - 1, "autosave skipped missed ticks");
            }
            self.interval_deadline = next;
            tracing::debug!(trigger = "interval", "autosave trigger fired");
            return Some(SaveTrigger::Interval);
        }

        None
    }

    /// Earliest armed deadline, if any.
    #[must_use]
    pub fn next_deadline(&self) -> Option<Instant> {
        match (self.debounce_deadline, self.interval_deadline) {
            (Some(a), Some(b)) => Some(a.min(b)),
            (a, b) => a.or(b),
        }
    }

    // ====================================================================
    // Save lifecycle
    // ====================================================================

    /// Start a save if one is warranted.
    ///
    /// Returns `None` when the value is unchanged since the last successful
    /// save and the trigger is not forced, or when another save is in flight
    /// (the trigger is then queued).
    pub fn begin_save(&mut self, trigger: SaveTrigger) -> Option<SaveTicket<T>> {
        if self.in_flight.is_some() {
            self.queued = Some(match self.queued {
                Some(prev) if prev.is_forced() => prev,
                _ => trigger,
            });
            tracing::debug!(trigger = trigger.label(), "autosave queued behind in-flight save");
            return None;
        }
        if !trigger.is_forced() && !self.has_unsaved_changes() {
            tracing::debug!(trigger = trigger.label(), "autosave skipped, no changes");
            return None;
        }

        let id = self.next_ticket;
        self.next_ticket += 1;
        self.in_flight = Some(id);
        self.error = None;
        Some(SaveTicket {
            id,
            trigger,
            snapshot: Arc::clone(&self.current),
        })
    }

    /// Record the outcome of the backend call for `ticket`.
    pub fn finish_save<E: fmt::Display>(
        &mut self,
        ticket: SaveTicket<T>,
        result: Result<(), E>,
        at: DateTime<Utc>,
    ) -> SaveNotice {
        let trigger = ticket.trigger;
        if self.in_flight != Some(ticket.id) {
            tracing::warn!(ticket = ticket.id, "autosave finished an unknown ticket");
            return SaveNotice {
                trigger,
                success: result.is_ok(),
                message: "Ignored stale save".to_string(),
                at,
            };
        }
        self.in_flight = None;

        match result {
            Ok(()) => {
                self.saved = ticket.snapshot;
                self.last_saved = Some(at);
                self.error = None;
                self.saves_succeeded += 1;
                SaveNotice {
                    trigger,
                    success: true,
                    message: "Saved".to_string(),
                    at,
                }
            }
            Err(err) => {
                let message = err.to_string();
                self.error = Some(message.clone());
                self.saves_failed += 1;
                SaveNotice {
                    trigger,
                    success: false,
                    message: format!("Save failed: {message}"),
                    at,
                }
            }
        }
    }

    /// Take the trigger queued while a save was in flight.
    pub fn take_queued(&mut self) -> Option<SaveTrigger> {
        if self.in_flight.is_some() {
            return None;
        }
        self.queued.take()
    }

    // ====================================================================
    // Query
    // ====================================================================

    /// The observed value differs from the last successfully saved one.
    #[must_use]
    pub fn has_unsaved_changes(&self) -> bool {
        *self.current != *self.saved
    }

    /// A backend call is in flight.
    #[must_use]
    pub fn is_saving(&self) -> bool {
        self.in_flight.is_some()
    }

    /// Current status snapshot.
    #[must_use]
    pub fn status(&self) -> AutoSaveStatus {
        AutoSaveStatus {
            is_saving: self.is_saving(),
            last_saved: self.last_saved,
            error: self.error.clone(),
            has_unsaved_changes: self.has_unsaved_changes(),
            saves_succeeded: self.saves_succeeded,
            saves_failed: self.saves_failed,
        }
    }

    /// Latest observed value.
    #[must_use]
    pub fn current(&self) -> &Arc<T> {
        &self.current
    }

    /// Value as of the last successful save.
    #[must_use]
    pub fn last_saved_value(&self) -> &Arc<T> {
        &self.saved
    }

    /// Active configuration.
    #[must_use]
    pub fn config(&self) -> &AutoSaveConfig {
        &self.config
    }
}
