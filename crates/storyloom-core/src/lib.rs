#![forbid(unsafe_code)]

//! Core: key events, the editor keybinding bridge, and edit-significance
//! detection.
//!
//! # Role in Storyloom
//! `storyloom-core` holds the pure, I/O-free pieces of the editing core.
//! Nothing here owns state across calls or touches the clock.
//!
//! # Primary responsibilities
//! - **Event**: normalized key events and modifier flags.
//! - **Keybinding**: undo/redo/save chords mapped to [`EditorAction`].
//! - **Significance**: heuristic that flags illustrations outdated when
//!   their text changes meaningfully.
//!
//! # How it fits in the system
//! The runtime (`storyloom-runtime`) owns the document history and the
//! auto-saver; its editor session consumes [`EditorAction`]s produced here
//! and uses [`ChangeDetector`] inside edit closures.

pub mod event;
pub mod keybinding;
pub mod significance;

pub use event::{KeyCode, KeyEvent, KeyEventKind, Modifiers};
pub use keybinding::{ActionMapper, EditorAction, KeymapConfig, PrimaryModifier};
pub use significance::{
    ChangeDetector, IllustratedText, KeywordCategory, Lexicon, Verdict, is_significant,
};
