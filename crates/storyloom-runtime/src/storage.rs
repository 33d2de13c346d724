#![forbid(unsafe_code)]

//! Persistence backends for the auto-saver.
//!
//! The auto-saver only knows the [`Persist`] trait. Three implementations
//! ship with the crate:
//!
//! | Backend | Use |
//! |---------|-----|
//! | [`MemoryStore`] | Tests and previews; records every save |
//! | [`JsonFileStore`] | One JSON document per file, atomic replace |
//! | `FnMut(&T) -> Result<(), PersistError>` | Ad-hoc adapters (HTTP client, database handle) |
//!
//! # File Format
//!
//! ```json
//! {
//!   "version": 1,
//!   "saved_at": "2026-02-24T02:30:00.000Z",
//!   "document": { ... }
//! }
//! ```
//!
//! # Atomic Writes
//!
//! Writes use a temp-file-then-rename pattern to prevent corruption on crash.

use std::io;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError};

use chrono::{SecondsFormat, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

/// Current file format version.
const FORMAT_VERSION: u64 = 1;

/// Errors raised by persistence backends.
#[derive(Debug, thiserror::Error)]
pub enum PersistError {
    /// Filesystem failure.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// The document could not be encoded or decoded.
    #[error("serialization error: {0}")]
    Serialize(#[from] serde_json::Error),

    /// The stored file uses an unknown format version.
    #[error("unsupported document version {found} (expected {expected})")]
    Version {
        /// Version found on disk.
        found: u64,
        /// Version this build writes.
        expected: u64,
    },

    /// Failure reported by a custom backend.
    #[error("{0}")]
    Backend(String),
}

impl PersistError {
    /// Construct a backend error from any message.
    pub fn backend(message: impl Into<String>) -> Self {
        Self::Backend(message.into())
    }
}

/// A destination for document snapshots.
///
/// Called only from the auto-saver's worker thread, one call at a time.
pub trait Persist<T: ?Sized> {
    /// Persist `data`. Errors are reported to the user, never retried here.
    fn save(&mut self, data: &T) -> Result<(), PersistError>;
}

impl<T: ?Sized, F> Persist<T> for F
where
    F: FnMut(&T) -> Result<(), PersistError>,
{
    fn save(&mut self, data: &T) -> Result<(), PersistError> {
        self(data)
    }
}

// ---------------------------------------------------------------------------
// MemoryStore
// ---------------------------------------------------------------------------

#[derive(Debug)]
struct MemoryInner<T> {
    saves: Vec<T>,
    failures: Vec<String>,
}

/// In-memory backend that records every saved value.
///
/// Clones share the same storage, so a test can keep one handle while the
/// auto-saver owns the other. Failures can be scripted with
/// [`fail_next`](Self::fail_next).
#[derive(Debug)]
pub struct MemoryStore<T> {
    inner: Arc<Mutex<MemoryInner<T>>>,
}

impl<T> Clone for MemoryStore<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<T> Default for MemoryStore<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> MemoryStore<T> {
    /// Create an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Mutex::new(MemoryInner {
                saves: Vec::new(),
                failures: Vec::new(),
            })),
        }
    }

    /// Make the next save fail with `message`. Calls stack in FIFO order.
    pub fn fail_next(&self, message: impl Into<String>) {
        self.lock().failures.push(message.into());
    }

    /// Number of successful saves.
    #[must_use]
    pub fn save_count(&self) -> usize {
        self.lock().saves.len()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, MemoryInner<T>> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl<T: Clone> MemoryStore<T> {
    /// Most recently saved value.
    #[must_use]
    pub fn latest(&self) -> Option<T> {
        self.lock().saves.last().cloned()
    }

    /// Every saved value, oldest first.
    #[must_use]
    pub fn saves(&self) -> Vec<T> {
        self.lock().saves.clone()
    }
}

impl<T: Clone> Persist<T> for MemoryStore<T> {
    fn save(&mut self, data: &T) -> Result<(), PersistError> {
        let mut inner = self.lock();
        if !inner.failures.is_empty() {
            let message = inner.failures.remove(0);
            return Err(PersistError::Backend(message));
        }
        inner.saves.push(data.clone());
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// JsonFileStore
// ---------------------------------------------------------------------------

#[derive(Serialize)]
struct EnvelopeRef<'a, T> {
    version: u64,
    saved_at: String,
    document: &'a T,
}

#[derive(Deserialize)]
struct Envelope<T> {
    version: u64,
    document: T,
}

/// Stores one JSON document at a fixed path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JsonFileStore {
    path: PathBuf,
}

impl JsonFileStore {
    /// Create a store writing to `path`. Nothing touches the disk yet.
    #[must_use]
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Target path.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Write `data`, replacing any previous document atomically.
    ///
    /// Missing parent directories are created.
    pub fn write<T: Serialize>(&self, data: &T) -> Result<(), PersistError> {
        let envelope = EnvelopeRef {
            version: FORMAT_VERSION,
            saved_at: Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true),
            document: data,
        };
        let json = serde_json::to_string_pretty(&envelope)?;

        if let Some(parent) = self.path.parent()
            && !parent.as_os_str().is_empty()
        {
            std::fs::create_dir_all(parent)?;
        }

        // Atomic write: temp file then rename
        let temp = self.path.with_extension("json.tmp");
        std::fs::write(&temp, json)?;
        std::fs::rename(&temp, &self.path)?;
        Ok(())
    }

    /// Load the stored document.
    ///
    /// - **Missing file** returns `Ok(None)`.
    /// - **Corrupted file** returns [`PersistError::Serialize`].
    /// - **Version mismatch** returns [`PersistError::Version`].
    pub fn load<T: DeserializeOwned>(&self) -> Result<Option<T>, PersistError> {
        let contents = match std::fs::read_to_string(&self.path) {
            Ok(contents) => contents,
            Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(None),
            Err(err) => return Err(err.into()),
        };
        let envelope: Envelope<T> = serde_json::from_str(&contents)?;
        if envelope.version != FORMAT_VERSION {
            return Err(PersistError::Version {
                found: envelope.version,
                expected: FORMAT_VERSION,
            });
        }
        Ok(Some(envelope.document))
    }
}

impl<T: Serialize> Persist<T> for JsonFileStore {
    fn save(&mut self, data: &T) -> Result<(), PersistError> {
        self.write(data)
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    struct Book {
        title: String,
        pages: Vec<String>,
    }

    fn book() -> Book {
        Book {
            title: "The Red Fox".to_string(),
            pages: vec!["Once upon a time".to_string()],
        }
    }

    #[test]
    fn memory_store_records_saves() {
        let store = MemoryStore::new();
        let mut handle = store.clone();
        handle.save(&1).unwrap();
        handle.save(&2).unwrap();
        assert_eq!(store.save_count(), 2);
        assert_eq!(store.latest(), Some(2));
        assert_eq!(store.saves(), vec![1, 2]);
    }

    #[test]
    fn memory_store_scripted_failures() {
        let mut store = MemoryStore::new();
        store.fail_next("offline");
        store.fail_next("still offline");

        let err = store.save(&"a").unwrap_err();
        assert_eq!(err.to_string(), "offline");
        assert!(store.save(&"a").is_err());
        assert!(store.save(&"a").is_ok());
        assert_eq!(store.save_count(), 1);
    }

    #[test]
    fn closure_backend() {
        let mut calls = Vec::new();
        {
            let mut backend = |data: &u32| -> Result<(), PersistError> {
                calls.push(*data);
                Ok(())
            };
            backend.save(&7u32).unwrap();
            Persist::save(&mut backend, &8u32).unwrap();
        }
        assert_eq!(calls, vec![7, 8]);
    }

    #[test]
    fn closure_backend_error() {
        let mut backend =
            |_: &str| -> Result<(), PersistError> { Err(PersistError::backend("quota exceeded")) };
        let err = backend.save("x").unwrap_err();
        assert!(matches!(err, PersistError::Backend(ref m) if m == "quota exceeded"));
    }

    #[test]
    fn json_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let mut store = JsonFileStore::new(dir.path().join("book.json"));
        store.save(&book()).unwrap();

        let loaded: Option<Book> = store.load().unwrap();
        assert_eq!(loaded, Some(book()));
        assert!(!dir.path().join("book.json.tmp").exists());
    }

    #[test]
    fn json_envelope_fields() {
        let dir = tempfile::tempdir().unwrap();
        let store = JsonFileStore::new(dir.path().join("book.json"));
        store.write(&book()).unwrap();

        let raw = std::fs::read_to_string(store.path()).unwrap();
        let value: serde_json::Value = serde_json::from_str(&raw).unwrap();
        assert_eq!(value["version"], 1);
        assert!(value["saved_at"].as_str().unwrap().ends_with('Z'));
        assert_eq!(value["document"]["title"], "The Red Fox");
    }

    #[test]
    fn json_missing_file_is_none() {
        let dir = tempfile::tempdir().unwrap();
        let store = JsonFileStore::new(dir.path().join("absent.json"));
        let loaded: Option<Book> = store.load().unwrap();
        assert!(loaded.is_none());
    }

    #[test]
    fn json_creates_parent_dirs() {
        let dir = tempfile::tempdir().unwrap();
        let store = JsonFileStore::new(dir.path().join("nested/deeper/book.json"));
        store.write(&book()).unwrap();
        assert!(store.path().exists());
    }

    #[test]
    fn json_corrupt_file_errors() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("book.json");
        std::fs::write(&path, "{ not json").unwrap();
        let err = JsonFileStore::new(&path).load::<Book>().unwrap_err();
        assert!(matches!(err, PersistError::Serialize(_)));
    }

    #[test]
    fn json_version_mismatch_errors() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("book.json");
        std::fs::write(&path, r#"{"version": 99, "saved_at": "", "document": null}"#).unwrap();
        let err = JsonFileStore::new(&path).load::<Option<Book>>().unwrap_err();
        assert!(matches!(
            err,
            PersistError::Version {
                found: 99,
                expected: 1
            }
        ));
    }

    #[test]
    fn json_overwrite_replaces() {
        let dir = tempfile::tempdir().unwrap();
        let mut store = JsonFileStore::new(dir.path().join("n.json"));
        store.save(&1u32).unwrap();
        store.save(&2u32).unwrap();
        assert_eq!(store.load::<u32>().unwrap(), Some(2));
    }
}
