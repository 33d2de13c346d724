#![forbid(unsafe_code)]

//! Snapshot-based undo/redo history for a document value.
//!
//! [`History`] keeps the authoritative in-memory copy of a document of type
//! `T` together with the snapshots needed to step back and forth through
//! edits. Every snapshot is an [`Arc<T>`], so handing the present value to
//! the auto-saver is a reference-count bump, not a deep copy.
//!
//! # Architecture
//!
//! ```text
//! set(s3)
//! ┌──────────────────────────────────────────────────┐
//! │ Past:     [Arc(s0), Arc(s1), Arc(s2)]            │
//! │ Present:  Arc(s3)                                 │
//! │ Future:   []                                      │
//! └──────────────────────────────────────────────────┘
//!
//! undo() x2
//! ┌──────────────────────────────────────────────────┐
//! │ Past:     [Arc(s0)]                               │
//! │ Present:  Arc(s1)                                 │
//! │ Future:   [Arc(s2), Arc(s3)]   (front = newest)   │
//! └──────────────────────────────────────────────────┘
//!
//! set(s4) — diverges, clears future
//! ┌──────────────────────────────────────────────────┐
//! │ Past:     [Arc(s0), Arc(s1)]                      │
//! │ Present:  Arc(s4)                                 │
//! │ Future:   []                                      │
//! └──────────────────────────────────────────────────┘
//! ```
//!
//! # Invariants
//!
//! 1. `past.len() <= config.max_history` after any operation.
//! 2. A transition moves exactly one snapshot across the present/past or
//!    present/future boundary.
//! 3. Any `set` that changes the value clears `future` (linear history).
//! 4. Change is decided by `PartialEq`, never by identity. A structurally
//!    equal `set` is a no-op: no push, no redo clear, no notification.
//!
//! # Example
//!
//! ```
//! use storyloom_runtime::history::History;
//!
//! let mut history = History::new(String::from("Once"));
//! history.set(String::from("Once upon"));
//! history.update(|prev| format!("{prev} a time"));
//! assert_eq!(history.state(), "Once upon a time");
//!
//! history.undo();
//! assert_eq!(history.state(), "Once upon");
//! history.redo();
//! assert_eq!(history.state(), "Once upon a time");
//! ```

use std::collections::VecDeque;
use std::fmt;
use std::sync::Arc;

/// Default number of undo snapshots retained.
pub const DEFAULT_MAX_HISTORY: usize = 50;

/// Configuration for the history stack.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(default)]
pub struct HistoryConfig {
    /// Maximum number of snapshots kept in `past`. Oldest are evicted
    /// first. Zero disables undo entirely.
    pub max_history: usize,
}

impl Default for HistoryConfig {
    fn default() -> Self {
        Self {
            max_history: DEFAULT_MAX_HISTORY,
        }
    }
}

impl HistoryConfig {
    /// Create a new configuration with the given depth limit.
    #[must_use]
    pub fn new(max_history: usize) -> Self {
        Self { max_history }
    }

    /// Create an unlimited configuration (for testing).
    #[must_use]
    pub fn unlimited() -> Self {
        Self {
            max_history: usize::MAX,
        }
    }
}

type Hook<T> = Box<dyn FnMut(&T) + Send>;

/// Linear undo/redo history over snapshots of `T`.
pub struct History<T> {
    /// Snapshots available for undo (oldest at front).
    past: VecDeque<Arc<T>>,
    /// The current value.
    present: Arc<T>,
    /// Snapshots available for redo (most recently undone at front).
    future: VecDeque<Arc<T>>,
    config: HistoryConfig,
    on_undo: Option<Hook<T>>,
    on_redo: Option<Hook<T>>,
    listeners: Vec<Hook<T>>,
}

impl<T: fmt::Debug> fmt::Debug for History<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("History")
            .field("present", &self.present)
            .field("history_len", &self.past.len())
            .field("future_len", &self.future.len())
            .field("config", &self.config)
            .field("listeners", &self.listeners.len())
            .finish()
    }
}

impl<T: PartialEq> History<T> {
    /// Create a history with the default configuration.
    #[must_use]
    pub fn new(initial: T) -> Self {
        Self::with_config(initial, HistoryConfig::default())
    }

    /// Create a history with the given configuration.
    #[must_use]
    pub fn with_config(initial: T, config: HistoryConfig) -> Self {
        Self {
            past: VecDeque::new(),
            present: Arc::new(initial),
            future: VecDeque::new(),
            config,
            on_undo: None,
            on_redo: None,
            listeners: Vec::new(),
        }
    }

    // ====================================================================
    // Edits
    // ====================================================================

    /// Replace the present value.
    ///
    /// Returns `false` (and changes nothing) if `value == present`.
    pub fn set(&mut self, value: T) -> bool {
        self.commit(Arc::new(value))
    }

    /// Replace the present value with a pre-wrapped snapshot.
    pub fn set_arc(&mut self, value: Arc<T>) -> bool {
        self.commit(value)
    }

    /// Derive the next value from the present one.
    ///
    /// The closure always sees the latest present, so callers never build
    /// on a stale copy they captured earlier.
    pub fn update(&mut self, f: impl FnOnce(&T) -> T) -> bool {
        let next = f(&self.present);
        self.commit(Arc::new(next))
    }

    fn commit(&mut self, next: Arc<T>) -> bool {
        if *next == *self.present {
            return false;
        }
        let previous = std::mem::replace(&mut self.present, next);
        self.past.push_back(previous);
        self.enforce_depth();
        let discarded = self.future.len();
        self.future.clear();
        tracing::debug!(
            history_len = self.past.len(),
            discarded_redo = discarded,
            "history commit"
        );
        self.notify();
        true
    }

    // ====================================================================
    // Navigation
    // ====================================================================

    /// Step back one snapshot. Returns `false` if there is nothing to undo.
    pub fn undo(&mut self) -> bool {
        let Some(previous) = self.past.pop_back() else {
            return false;
        };
        let undone = std::mem::replace(&mut self.present, previous);
        self.future.push_front(undone);
        tracing::debug!(
            history_len = self.past.len(),
            future_len = self.future.len(),
            "history undo"
        );
        if let Some(hook) = self.on_undo.as_mut() {
            hook(&self.present);
        }
        self.notify();
        true
    }

    /// Re-apply the most recently undone snapshot. Returns `false` if there
    /// is nothing to redo.
    pub fn redo(&mut self) -> bool {
        let Some(next) = self.future.pop_front() else {
            return false;
        };
        let previous = std::mem::replace(&mut self.present, next);
        self.past.push_back(previous);
        self.enforce_depth();
        tracing::debug!(
            history_len = self.past.len(),
            future_len = self.future.len(),
            "history redo"
        );
        if let Some(hook) = self.on_redo.as_mut() {
            hook(&self.present);
        }
        self.notify();
        true
    }

    // ====================================================================
    // Maintenance
    // ====================================================================

    /// Discard all history and start over from `value`.
    ///
    /// Listeners are notified even if `value` equals the old present, since
    /// a reset usually means a different document was loaded.
    pub fn reset(&mut self, value: T) {
        self.past.clear();
        self.future.clear();
        self.present = Arc::new(value);
        tracing::debug!("history reset");
        self.notify();
    }

    /// Keep the present value but forget everything undoable or redoable.
    pub fn clear_history(&mut self) {
        tracing::debug!(
            history_len = self.past.len(),
            future_len = self.future.len(),
            "history cleared"
        );
        self.past.clear();
        self.future.clear();
    }

    fn enforce_depth(&mut self) {
        while self.past.len() > self.config.max_history {
            self.past.pop_front();
        }
    }

    fn notify(&mut self) {
        let present = Arc::clone(&self.present);
        for listener in &mut self.listeners {
            listener(&present);
        }
    }
}

impl<T> History<T> {
    // ====================================================================
    // Hooks
    // ====================================================================

    /// Run `hook` with the new present after every successful undo.
    pub fn on_undo(&mut self, hook: impl FnMut(&T) + Send + 'static) {
        self.on_undo = Some(Box::new(hook));
    }

    /// Run `hook` with the new present after every successful redo.
    pub fn on_redo(&mut self, hook: impl FnMut(&T) + Send + 'static) {
        self.on_redo = Some(Box::new(hook));
    }

    /// Register a listener called whenever the present value changes
    /// (set, update, undo, redo, reset).
    pub fn on_change(&mut self, listener: impl FnMut(&T) + Send + 'static) {
        self.listeners.push(Box::new(listener));
    }

    // ====================================================================
    // Query
    // ====================================================================

    /// The present value.
    #[must_use]
    pub fn state(&self) -> &T {
        &self.present
    }

    /// The present snapshot, for sharing without a copy.
    #[must_use]
    pub fn state_arc(&self) -> &Arc<T> {
        &self.present
    }

    /// Check if undo is available.
    #[must_use]
    pub fn can_undo(&self) -> bool {
        !self.past.is_empty()
    }

    /// Check if redo is available.
    #[must_use]
    pub fn can_redo(&self) -> bool {
        !self.future.is_empty()
    }

    /// Number of snapshots available for undo.
    #[must_use]
    pub fn history_len(&self) -> usize {
        self.past.len()
    }

    /// Number of snapshots available for redo.
    #[must_use]
    pub fn future_len(&self) -> usize {
        self.future.len()
    }

    /// The value an `undo` would restore.
    #[must_use]
    pub fn peek_undo(&self) -> Option<&T> {
        self.past.back().map(Arc::as_ref)
    }

    /// The value a `redo` would restore.
    #[must_use]
    pub fn peek_redo(&self) -> Option<&T> {
        self.future.front().map(Arc::as_ref)
    }

    /// Maximum number of undo snapshots retained.
    #[must_use]
    pub fn max_history(&self) -> usize {
        self.config.max_history
    }

    /// Get the configuration.
    #[must_use]
    pub fn config(&self) -> &HistoryConfig {
        &self.config
    }
}

impl<T: PartialEq + Default> Default for History<T> {
    fn default() -> Self {
        Self::new(T::default())
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    #[derive(Debug, Clone, PartialEq)]
    struct Page {
        text: String,
        image_outdated: bool,
    }

    fn page(text: &str) -> Page {
        Page {
            text: text.to_string(),
            image_outdated: false,
        }
    }

    #[test]
    fn new_history_is_empty() {
        let history = History::new(0);
        assert!(!history.can_undo());
        assert!(!history.can_redo());
        assert_eq!(history.history_len(), 0);
        assert_eq!(history.future_len(), 0);
        assert_eq!(*history.state(), 0);
        assert_eq!(history.config().max_history, DEFAULT_MAX_HISTORY);
    }

    #[test]
    fn set_pushes_previous_present() {
        let mut history = History::new(1);
        assert!(history.set(2));
        assert_eq!(*history.state(), 2);
        assert_eq!(history.peek_undo(), Some(&1));
        assert!(history.can_undo());
    }

    #[test]
    fn set_same_value_is_noop() {
        let mut history = History::new(page("a"));
        assert!(!history.set(page("a")));
        assert_eq!(history.history_len(), 0);
    }

    #[test]
    fn equal_value_keeps_pending_redo() {
        let mut history = History::new(page("a"));
        history.set(page("b"));
        history.undo();
        assert!(history.can_redo());

        // A distinct instance with the same content.
        assert!(!history.set(page("a")));
        assert!(history.can_redo());
        assert_eq!(history.future_len(), 1);
        assert_eq!(history.history_len(), 0);
    }

    #[test]
    fn update_sees_latest_value() {
        let mut history = History::new(1);
        history.set(5);
        history.update(|prev| prev * 10);
        assert_eq!(*history.state(), 50);
        assert_eq!(history.history_len(), 2);
    }

    #[test]
    fn update_returning_equal_value_is_noop() {
        let mut history = History::new(page("same"));
        assert!(!history.update(|prev| prev.clone()));
        assert_eq!(history.history_len(), 0);
    }

    #[test]
    fn undo_then_redo_restores() {
        let mut history = History::new(page("a"));
        history.set(page("b"));

        assert!(history.undo());
        assert_eq!(history.state(), &page("a"));
        assert_eq!(history.peek_redo(), Some(&page("b")));

        assert!(history.redo());
        assert_eq!(history.state(), &page("b"));
        assert!(!history.can_redo());
    }

    #[test]
    fn undo_on_empty_is_noop() {
        let mut history = History::new(7);
        assert!(!history.undo());
        assert_eq!(*history.state(), 7);
    }

    #[test]
    fn redo_on_empty_is_noop() {
        let mut history = History::new(7);
        history.set(8);
        assert!(!history.redo());
        assert_eq!(*history.state(), 8);
    }

    #[test]
    fn new_edit_clears_redo() {
        let mut history = History::new(0);
        history.set(1);
        history.undo();
        assert!(history.can_redo());

        history.set(2);
        assert!(!history.can_redo());
        assert_eq!(history.future_len(), 0);
        assert_eq!(*history.state(), 2);
    }

    #[test]
    fn future_order_is_most_recent_first() {
        let mut history = History::new(0);
        for v in 1..=3 {
            history.set(v);
        }
        history.undo();
        history.undo();
        assert_eq!(*history.state(), 1);
        assert_eq!(history.peek_redo(), Some(&2));

        history.redo();
        assert_eq!(*history.state(), 2);
        history.redo();
        assert_eq!(*history.state(), 3);
    }

    #[test]
    fn depth_limit_evicts_oldest() {
        let mut history = History::with_config(0, HistoryConfig::new(3));
        for v in 1..=5 {
            history.set(v);
        }
        assert_eq!(history.history_len(), 3);

        while history.undo() {}
        // 0 and 1 were evicted.
        assert_eq!(*history.state(), 2);
    }

    #[test]
    fn redo_respects_depth_limit() {
        let mut history = History::with_config(0, HistoryConfig::new(2));
        history.set(1);
        history.set(2);
        history.undo();
        history.undo();
        assert_eq!(*history.state(), 0);

        history.redo();
        history.redo();
        assert_eq!(history.history_len(), 2);
        assert_eq!(*history.state(), 2);
    }

    #[test]
    fn zero_depth_disables_undo() {
        let mut history = History::with_config(0, HistoryConfig::new(0));
        assert!(history.set(1));
        assert!(!history.can_undo());
        assert!(!history.undo());
        assert_eq!(*history.state(), 1);
    }

    #[test]
    fn reset_discards_everything() {
        let mut history = History::new(0);
        history.set(1);
        history.set(2);
        history.undo();

        history.reset(100);
        assert_eq!(*history.state(), 100);
        assert!(!history.can_undo());
        assert!(!history.can_redo());
    }

    #[test]
    fn clear_history_keeps_present() {
        let mut history = History::new(0);
        history.set(1);
        history.set(2);
        history.undo();

        history.clear_history();
        assert_eq!(*history.state(), 1);
        assert_eq!(history.history_len(), 0);
        assert_eq!(history.future_len(), 0);
    }

    #[test]
    fn hooks_fire_with_new_present() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let mut history = History::new(0);

        let undo_seen = Arc::clone(&seen);
        history.on_undo(move |v| undo_seen.lock().unwrap().push(("undo", *v)));
        let redo_seen = Arc::clone(&seen);
        history.on_redo(move |v| redo_seen.lock().unwrap().push(("redo", *v)));

        history.set(1);
        history.undo();
        history.redo();
        // No-ops do not fire hooks.
        history.redo();

        assert_eq!(*seen.lock().unwrap(), vec![("undo", 0), ("redo", 1)]);
    }

    #[test]
    fn listeners_skip_noop_sets() {
        let count = Arc::new(Mutex::new(0u32));
        let mut history = History::new(page("a"));
        let c = Arc::clone(&count);
        history.on_change(move |_| *c.lock().unwrap() += 1);

        history.set(page("a"));
        assert_eq!(*count.lock().unwrap(), 0);

        history.set(page("b"));
        history.undo();
        history.redo();
        history.clear_history();
        history.reset(page("c"));
        assert_eq!(*count.lock().unwrap(), 4);
    }

    #[test]
    fn state_arc_is_shared_not_copied() {
        let mut history = History::new(page("a"));
        history.set(page("b"));
        let snapshot = Arc::clone(history.state_arc());
        history.undo();
        history.redo();
        assert!(Arc::ptr_eq(&snapshot, history.state_arc()));
    }

    #[test]
    fn debug_impl() {
        let history = History::new(1);
        let debug_str = format!("{history:?}");
        assert!(debug_str.contains("History"));
        assert!(debug_str.contains("history_len"));
    }

    #[test]
    fn config_unlimited() {
        assert_eq!(HistoryConfig::unlimited().max_history, usize::MAX);
    }
}
