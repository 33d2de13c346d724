#![forbid(unsafe_code)]

//! An editing session: history, auto-save, and keybindings wired together.
//!
//! [`EditorSession`] is what a host embeds per open document. Every edit
//! goes through the history; every change of the present value is handed
//! to the auto-saver as a shared snapshot; key events are mapped to undo,
//! redo, and save.
//!
//! ```no_run
//! use storyloom_core::{IllustratedText, KeyCode, KeyEvent, Modifiers};
//! use storyloom_runtime::{EditorConfig, EditorSession, JsonFileStore};
//!
//! let config = EditorConfig::from_env();
//! let store = JsonFileStore::new("story.json");
//! let mut session = EditorSession::new(IllustratedText::new("A fox"), &config, store)?;
//!
//! session.edit(|page, detector| page.clone().with_text("A red fox", detector));
//! session.handle_key(&KeyEvent::new(KeyCode::Char('z')).with_modifiers(Modifiers::CTRL));
//! assert_eq!(session.state().text, "A fox");
//! # Ok::<(), std::io::Error>(())
//! ```

use std::fmt;
use std::io;
use std::sync::Arc;

use web_time::Duration;

use storyloom_core::{ActionMapper, ChangeDetector, EditorAction, KeyEvent};

use crate::autosave::{AutoSaveStatus, AutoSaver, SaveNotice};
use crate::config::EditorConfig;
use crate::history::History;
use crate::storage::Persist;

/// One open document with undo/redo and background auto-save.
pub struct EditorSession<T> {
    history: History<T>,
    autosaver: AutoSaver<T>,
    mapper: ActionMapper,
    detector: ChangeDetector,
}

impl<T: fmt::Debug> fmt::Debug for EditorSession<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EditorSession")
            .field("history", &self.history)
            .field("autosaver", &self.autosaver)
            .field("mapper", &self.mapper)
            .finish_non_exhaustive()
    }
}

impl<T> EditorSession<T>
where
    T: PartialEq + Send + Sync + 'static,
{
    /// Open a session on `initial`, treated as already saved.
    pub fn new<P>(initial: T, config: &EditorConfig, persist: P) -> io::Result<Self>
    where
        P: Persist<T> + Send + 'static,
    {
        let history = History::with_config(initial, config.history.clone());
        let autosaver = AutoSaver::spawn(
            Arc::clone(history.state_arc()),
            config.autosave.clone(),
            persist,
        )?;
        Ok(Self::assemble(history, autosaver, config))
    }

    /// Like [`new`](Self::new), reporting save outcomes to `notifier`.
    pub fn with_notifier<P, N>(
        initial: T,
        config: &EditorConfig,
        persist: P,
        notifier: N,
    ) -> io::Result<Self>
    where
        P: Persist<T> + Send + 'static,
        N: Fn(&SaveNotice) + Send + Sync + 'static,
    {
        let history = History::with_config(initial, config.history.clone());
        let autosaver = AutoSaver::spawn_with_notifier(
            Arc::clone(history.state_arc()),
            config.autosave.clone(),
            persist,
            notifier,
        )?;
        Ok(Self::assemble(history, autosaver, config))
    }

    fn assemble(history: History<T>, autosaver: AutoSaver<T>, config: &EditorConfig) -> Self {
        Self {
            history,
            autosaver,
            mapper: ActionMapper::new(config.keymap.clone()),
            detector: config.detector.build(),
        }
    }

    // ====================================================================
    // Edits
    // ====================================================================

    /// Replace the document.
    pub fn set(&mut self, value: T) -> bool {
        let changed = self.history.set(value);
        self.after_transition(changed)
    }

    /// Derive the next document from the present one.
    pub fn update(&mut self, f: impl FnOnce(&T) -> T) -> bool {
        let changed = self.history.update(f);
        self.after_transition(changed)
    }

    /// Like [`update`](Self::update), with the session's change detector
    /// available for annotating the new value.
    pub fn edit(&mut self, f: impl FnOnce(&T, &ChangeDetector) -> T) -> bool {
        let detector = &self.detector;
        let changed = self.history.update(|prev| f(prev, detector));
        self.after_transition(changed)
    }

    /// Step back one edit.
    pub fn undo(&mut self) -> bool {
        let changed = self.history.undo();
        self.after_transition(changed)
    }

    /// Re-apply the most recently undone edit.
    pub fn redo(&mut self) -> bool {
        let changed = self.history.redo();
        self.after_transition(changed)
    }

    /// Replace the document and forget all history, e.g. after loading.
    /// The new value counts as saved.
    pub fn reset(&mut self, value: T) {
        self.history.reset(value);
        self.autosaver
            .rebaseline(Arc::clone(self.history.state_arc()));
    }

    /// Forget undo/redo history, keeping the document.
    pub fn clear_history(&mut self) {
        self.history.clear_history();
    }

    fn after_transition(&self, changed: bool) -> bool {
        if changed {
            self.autosaver
                .update(Arc::clone(self.history.state_arc()));
        }
        changed
    }

    // ====================================================================
    // Saving
    // ====================================================================

    /// Request an immediate forced save. Does not wait.
    pub fn save(&self) {
        self.autosaver.save_now();
    }

    /// Persist pending changes and wait up to `timeout`.
    pub fn flush(&self, timeout: Duration) -> bool {
        self.autosaver.flush(timeout)
    }

    /// Turn auto-save on or off.
    pub fn set_autosave_enabled(&self, enabled: bool) {
        self.autosaver.set_enabled(enabled);
    }

    /// Auto-save status for display.
    #[must_use]
    pub fn autosave_status(&self) -> AutoSaveStatus {
        self.autosaver.status()
    }

    /// The document differs from what was last saved.
    #[must_use]
    pub fn has_unsaved_changes(&self) -> bool {
        self.autosaver.has_unsaved_changes()
    }

    // ====================================================================
    // Keybindings
    // ====================================================================

    /// Dispatch a key event. Returns the action it mapped to, if any.
    ///
    /// An action is returned even when it was a no-op (undo with empty
    /// history), so hosts can still suppress the platform default.
    pub fn handle_key(&mut self, event: &KeyEvent) -> Option<EditorAction> {
        let action = self.mapper.map(event)?;
        match action {
            EditorAction::Undo => {
                self.undo();
            }
            EditorAction::Redo => {
                self.redo();
            }
            EditorAction::Save => self.save(),
        }
        tracing::debug!(action = action.label(), "key dispatched");
        Some(action)
    }

    /// Stop auto-saving, running the final save. Returns `true` if it
    /// finished within the configured timeout.
    pub fn close(self) -> bool {
        self.autosaver.shutdown()
    }
}

impl<T> EditorSession<T> {
    /// The present document.
    #[must_use]
    pub fn state(&self) -> &T {
        self.history.state()
    }

    /// The undo/redo history.
    #[must_use]
    pub fn history(&self) -> &History<T> {
        &self.history
    }

    /// The change detector built from configuration.
    #[must_use]
    pub fn detector(&self) -> &ChangeDetector {
        &self.detector
    }

    /// The keybinding mapper.
    #[must_use]
    pub fn mapper(&self) -> &ActionMapper {
        &self.mapper
    }

    /// Whether undo is available.
    #[must_use]
    pub fn can_undo(&self) -> bool {
        self.history.can_undo()
    }

    /// Whether redo is available.
    #[must_use]
    pub fn can_redo(&self) -> bool {
        self.history.can_redo()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::autosave::AutoSaveConfig;
    use crate::storage::MemoryStore;
    use storyloom_core::{IllustratedText, KeyCode, KeyEventKind, Modifiers};

    const WAIT: Duration = Duration::from_secs(5);

    fn quiet() -> EditorConfig {
        EditorConfig {
            autosave: AutoSaveConfig::default()
                .with_debounce(Duration::from_secs(3_600))
                .with_interval(Duration::from_secs(3_600)),
            ..EditorConfig::default()
        }
    }

    fn chord(c: char, modifiers: Modifiers) -> KeyEvent {
        KeyEvent::new(KeyCode::Char(c)).with_modifiers(modifiers)
    }

    #[test]
    fn edits_feed_autosaver() {
        let store = MemoryStore::new();
        let mut session = EditorSession::new(String::from("a"), &quiet(), store.clone()).unwrap();
        assert!(!session.has_unsaved_changes());

        assert!(session.set("b".to_string()));
        assert!(session.has_unsaved_changes());
        assert!(session.flush(WAIT));
        assert_eq!(store.latest().as_deref(), Some("b"));

        assert!(session.undo());
        assert!(session.has_unsaved_changes());
        assert!(session.flush(WAIT));
        assert_eq!(store.latest().as_deref(), Some("a"));
    }

    #[test]
    fn noop_set_does_not_dirty() {
        let mut session =
            EditorSession::new(7u32, &quiet(), MemoryStore::new()).unwrap();
        assert!(!session.set(7));
        assert!(!session.has_unsaved_changes());
        assert!(!session.undo());
    }

    #[test]
    fn edit_marks_illustration_outdated() {
        let mut page = IllustratedText::new("A fox in the woods");
        page.attach_image("https://img.example/fox.png");
        let mut session = EditorSession::new(page, &quiet(), MemoryStore::new()).unwrap();

        session.edit(|page, detector| page.clone().with_text("A red fox in the woods", detector));
        assert!(session.state().is_image_outdated);

        session.undo();
        assert!(!session.state().is_image_outdated);
    }

    #[test]
    fn keys_drive_history() {
        let mut session = EditorSession::new(0u32, &quiet(), MemoryStore::new()).unwrap();
        session.set(1);
        session.set(2);

        assert_eq!(
            session.handle_key(&chord('z', Modifiers::CTRL)),
            Some(EditorAction::Undo)
        );
        assert_eq!(*session.state(), 1);

        assert_eq!(
            session.handle_key(&chord('Z', Modifiers::SUPER | Modifiers::SHIFT)),
            Some(EditorAction::Redo)
        );
        assert_eq!(*session.state(), 2);

        session.undo();
        assert_eq!(
            session.handle_key(&chord('y', Modifiers::CTRL)),
            Some(EditorAction::Redo)
        );
        assert_eq!(*session.state(), 2);

        let release = chord('z', Modifiers::CTRL).with_kind(KeyEventKind::Release);
        assert_eq!(session.handle_key(&release), None);
        assert_eq!(session.handle_key(&chord('z', Modifiers::NONE)), None);
        assert_eq!(*session.state(), 2);
    }

    #[test]
    fn save_key_forces_write() {
        let store = MemoryStore::new();
        let mut session = EditorSession::new(3u32, &quiet(), store.clone()).unwrap();
        assert_eq!(
            session.handle_key(&chord('s', Modifiers::CTRL)),
            Some(EditorAction::Save)
        );
        assert!(session.flush(WAIT));
        assert_eq!(store.saves(), vec![3]);
    }

    #[test]
    fn reset_rebaselines() {
        let store = MemoryStore::new();
        let mut session = EditorSession::new(0u32, &quiet(), store.clone()).unwrap();
        session.set(1);
        session.reset(42);
        assert!(!session.has_unsaved_changes());
        assert!(!session.can_undo());
        assert!(session.flush(WAIT));
        assert_eq!(store.save_count(), 0);
    }

    #[test]
    fn close_runs_final_save() {
        let store = MemoryStore::new();
        let mut session = EditorSession::new(0u32, &quiet(), store.clone()).unwrap();
        session.set(5);
        assert!(session.close());
        assert_eq!(store.latest(), Some(5));
    }

    #[test]
    fn history_limit_comes_from_config() {
        let mut config = quiet();
        config.history.max_history = 2;
        let mut session = EditorSession::new(0u32, &config, MemoryStore::new()).unwrap();
        for v in 1..=5 {
            session.set(v);
        }
        assert_eq!(session.history().history_len(), 2);
    }
}
