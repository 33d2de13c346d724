#![forbid(unsafe_code)]

//! Editor keybinding bridge: undo/redo/save chords to actions.
//!
//! The bridge is stateless. A host feeds every key press through
//! [`ActionMapper::map`] and, when an [`EditorAction`] comes back, consumes
//! the event and dispatches the action to the history or the auto-saver.
//!
//! # Chords
//!
//! | Chord | Action |
//! |-------|--------|
//! | Primary+Z | [`EditorAction::Undo`] |
//! | Primary+Shift+Z | [`EditorAction::Redo`] |
//! | Primary+Y | [`EditorAction::Redo`] (unless disabled) |
//! | Primary+S | [`EditorAction::Save`] |
//!
//! "Primary" is Ctrl on Windows/Linux and Cmd (Super) on macOS. The default
//! [`PrimaryModifier::Either`] accepts both so a single build behaves on
//! every platform.
//!
//! # Example
//!
//! ```
//! use storyloom_core::event::{KeyCode, KeyEvent, Modifiers};
//! use storyloom_core::keybinding::{ActionMapper, EditorAction};
//!
//! let mapper = ActionMapper::with_defaults();
//!
//! let undo = KeyEvent::new(KeyCode::Char('z')).with_modifiers(Modifiers::CTRL);
//! assert_eq!(mapper.map(&undo), Some(EditorAction::Undo));
//!
//! let redo = KeyEvent::new(KeyCode::Char('Z'))
//!     .with_modifiers(Modifiers::SUPER | Modifiers::SHIFT);
//! assert_eq!(mapper.map(&redo), Some(EditorAction::Redo));
//!
//! let typing = KeyEvent::new(KeyCode::Char('z'));
//! assert_eq!(mapper.map(&typing), None);
//! ```

use crate::event::{KeyEvent, KeyEventKind};

// ---------------------------------------------------------------------------
// Actions
// ---------------------------------------------------------------------------

/// High-level editor actions produced by the bridge.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EditorAction {
    /// Step the document history back by one snapshot.
    Undo,

    /// Re-apply the most recently undone snapshot.
    Redo,

    /// Persist the document now, even if nothing changed.
    Save,
}

impl EditorAction {
    /// Short, stable label for logs and menus.
    #[must_use]
    pub const fn label(&self) -> &'static str {
        match self {
            Self::Undo => "undo",
            Self::Redo => "redo",
            Self::Save => "save",
        }
    }
}

// ---------------------------------------------------------------------------
// Configuration
// ---------------------------------------------------------------------------

/// Which modifier acts as the platform's command key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "lowercase"))]
pub enum PrimaryModifier {
    /// Ctrl only (Windows, Linux).
    Ctrl,

    /// Cmd/Super only (macOS).
    Super,

    /// Either Ctrl or Cmd.
    #[default]
    Either,
}

impl PrimaryModifier {
    /// Parse from string (environment variable value).
    #[must_use]
    pub fn from_str_opt(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "ctrl" | "control" => Some(Self::Ctrl),
            "super" | "cmd" | "command" | "meta" => Some(Self::Super),
            "either" | "any" | "both" => Some(Self::Either),
            _ => None,
        }
    }

    /// Whether `event` carries exactly one accepted primary modifier.
    ///
    /// Holding Ctrl and Cmd together never counts, so host-level shortcuts
    /// that use both are left alone.
    fn matches(self, event: &KeyEvent) -> bool {
        let ctrl = event.ctrl();
        let sup = event.super_key();
        match self {
            Self::Ctrl => ctrl && !sup,
            Self::Super => sup && !ctrl,
            Self::Either => ctrl ^ sup,
        }
    }
}

/// Environment variable selecting the primary modifier.
pub const VAR_PRIMARY_MODIFIER: &str = "STORYLOOM_PRIMARY_MODIFIER";

/// Environment variable toggling Primary+Y as redo.
pub const VAR_REDO_CTRL_Y: &str = "STORYLOOM_REDO_CTRL_Y";

/// Parse a boolean environment value.
///
/// Accepts `1/true/yes/on` and `0/false/no/off`, case-insensitively and
/// ignoring surrounding whitespace. Anything else is `None`.
#[must_use]
pub fn parse_bool(raw: &str) -> Option<bool> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}

/// Configuration for the keybinding bridge.
///
/// # Environment Variables
///
/// | Variable | Type | Default | Description |
/// |----------|------|---------|-------------|
/// | `STORYLOOM_PRIMARY_MODIFIER` | string | "either" | "ctrl", "cmd", or "either" |
/// | `STORYLOOM_REDO_CTRL_Y` | bool | true | Accept Primary+Y as redo |
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(default))]
pub struct KeymapConfig {
    /// Modifier treated as the command key.
    pub primary: PrimaryModifier,

    /// Accept Primary+Y as an alternative redo chord.
    pub redo_with_y: bool,
}

impl Default for KeymapConfig {
    fn default() -> Self {
        Self {
            primary: PrimaryModifier::Either,
            redo_with_y: true,
        }
    }
}

impl KeymapConfig {
    /// Set the primary modifier.
    #[must_use]
    pub fn with_primary(mut self, primary: PrimaryModifier) -> Self {
        self.primary = primary;
        self
    }

    /// Enable or disable Primary+Y as redo.
    #[must_use]
    pub fn with_redo_y(mut self, enabled: bool) -> Self {
        self.redo_with_y = enabled;
        self
    }

    /// Load config from the process environment.
    #[must_use]
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Load config through an arbitrary variable lookup.
    ///
    /// Unknown or unparsable values keep the default.
    #[must_use]
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        Self::default().with_overrides_from(lookup)
    }

    /// Apply overrides through a variable lookup on top of `self`.
    ///
    /// Unparsable values leave the field unchanged.
    #[must_use]
    pub fn with_overrides_from(mut self, lookup: impl Fn(&str) -> Option<String>) -> Self {
        if let Some(val) = lookup(VAR_PRIMARY_MODIFIER)
            && let Some(primary) = PrimaryModifier::from_str_opt(&val)
        {
            self.primary = primary;
        }
        if let Some(val) = lookup(VAR_REDO_CTRL_Y)
            && let Some(enabled) = parse_bool(&val)
        {
            self.redo_with_y = enabled;
        }
        self
    }

    /// Whether `raw` is an accepted value for the keymap variable `var`.
    #[must_use]
    pub fn is_valid_override(var: &str, raw: &str) -> bool {
        match var {
            VAR_PRIMARY_MODIFIER => PrimaryModifier::from_str_opt(raw).is_some(),
            VAR_REDO_CTRL_Y => parse_bool(raw).is_some(),
            _ => false,
        }
    }
}

// ---------------------------------------------------------------------------
// Action Mapper
// ---------------------------------------------------------------------------

/// Maps key events to editor actions.
///
/// Only `Press` and `Repeat` events are considered; holding Ctrl+Z repeats
/// the undo the way text editors do. Alt chords never match so AltGr
/// layouts (which report Ctrl+Alt) still type characters.
#[derive(Debug, Clone, Default)]
pub struct ActionMapper {
    config: KeymapConfig,
}

impl ActionMapper {
    /// Create a new action mapper with the given configuration.
    #[must_use]
    pub fn new(config: KeymapConfig) -> Self {
        Self { config }
    }

    /// Create a new action mapper with default configuration.
    #[must_use]
    pub fn with_defaults() -> Self {
        Self::new(KeymapConfig::default())
    }

    /// Get a reference to the current configuration.
    #[must_use]
    pub fn config(&self) -> &KeymapConfig {
        &self.config
    }

    /// Map a key event to an action.
    ///
    /// Returns `None` when the event is not one of the editor chords and
    /// should pass through to normal input handling.
    #[must_use]
    pub fn map(&self, event: &KeyEvent) -> Option<EditorAction> {
        if event.kind == KeyEventKind::Release {
            return None;
        }
        if event.alt() || !self.config.primary.matches(event) {
            return None;
        }

        if event.is_char('z') {
            return Some(if event.shift() {
                EditorAction::Redo
            } else {
                EditorAction::Undo
            });
        }
        if event.shift() {
            return None;
        }
        if event.is_char('y') && self.config.redo_with_y {
            return Some(EditorAction::Redo);
        }
        event.is_char('s').then_some(EditorAction::Save)
    }
}
