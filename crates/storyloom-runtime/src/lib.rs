#![forbid(unsafe_code)]

//! Storyloom Runtime
//!
//! Stateful machinery for editing a document: undo/redo history, debounced
//! and periodic auto-save, persistence backends, and configuration.
//!
//! # Key Components
//!
//! - [`History`] - Linear undo/redo over `Arc` snapshots
//! - [`AutoSaveScheduler`] - Deterministic debounce/interval state machine
//! - [`AutoSaver`] - Worker thread that drives the scheduler and persists
//! - [`Persist`] - Backend trait ([`MemoryStore`], [`JsonFileStore`], closures)
//! - [`EditorConfig`] - TOML/JSON/env configuration for all of the above
//! - [`EditorSession`] - History, auto-save, and keybindings wired together
//!
//! # Role in Storyloom
//! `storyloom-runtime` sits on top of `storyloom-core`, which supplies the
//! pure pieces (key events, the action mapper, the change detector). The
//! host owns rendering and calls into an [`EditorSession`] per document.
//!
//! # Logging
//! All diagnostics go through `tracing`. The crate never installs a
//! subscriber; the auto-save worker inherits the dispatcher of the thread
//! that spawned it.

pub mod autosave;
pub mod config;
pub mod history;
pub mod session;
pub mod storage;

pub use autosave::{
    AutoSaveConfig, AutoSaveScheduler, AutoSaveStatus, AutoSaver, SaveNotice, SaveTicket,
    SaveTrigger,
};
pub use config::{ConfigError, DetectorConfig, EditorConfig};
pub use history::{History, HistoryConfig};
pub use session::EditorSession;
pub use storage::{JsonFileStore, MemoryStore, Persist, PersistError};
