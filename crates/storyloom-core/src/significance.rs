#![forbid(unsafe_code)]

//! Significant-edit detection for text with a generated illustration.
//!
//! When a passage that already has an illustration is edited, the editor has
//! to decide whether the picture may no longer match. [`ChangeDetector`]
//! answers that with two cheap rules:
//!
//! 1. **Magnitude**: the length changed by more than `length_ratio` (30% by
//!    default) of the old length.
//! 2. **Vocabulary**: the set of visually meaningful keywords (colors,
//!    sizes, ages, settings, creatures, time of day, ...) found in the text
//!    gained or lost a member.
//!
//! This is a heuristic. Both false positives and false negatives are
//! expected; a "significant" verdict only flags the illustration as
//! outdated, it never regenerates or deletes anything.
//!
//! # Example
//!
//! ```
//! use storyloom_core::significance::ChangeDetector;
//!
//! let detector = ChangeDetector::default();
//! assert!(detector.is_significant(
//!     "The red dragon flew over the castle.",
//!     "The blue dragon flew over the castle.",
//! ));
//! assert!(!detector.is_significant(
//!     "The dragon flew over the castle.",
//!     "The dragon soared over the castle.",
//! ));
//! ```

use std::collections::BTreeSet;
use std::collections::HashMap;

/// Default length-change ratio above which an edit is significant.
pub const DEFAULT_LENGTH_RATIO: f64 = 0.3;

// ---------------------------------------------------------------------------
// Lexicon
// ---------------------------------------------------------------------------

/// Category of a visually meaningful keyword.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum KeywordCategory {
    /// "red", "golden", "rainbow".
    Color,
    /// "tiny", "huge", "tall".
    Size,
    /// "baby", "old", "ancient".
    Age,
    /// Places: "forest", "castle", "ocean".
    Setting,
    /// Animals, fantasy beings, and people.
    Creature,
    /// "morning", "sunset", "midnight".
    TimeOfDay,
    /// "rainy", "snow", "storm".
    Weather,
    /// "happy", "scared", "crying".
    Emotion,
    /// Keywords added at runtime without a category.
    Custom,
}

const COLORS: &[&str] = &[
    "red", "blue", "green", "yellow", "orange", "purple", "pink", "black", "white", "brown",
    "gray", "grey", "golden", "silver", "rainbow",
];

const SIZES: &[&str] = &[
    "big", "small", "tiny", "huge", "giant", "little", "tall", "short", "enormous", "large",
];

const AGES: &[&str] = &[
    "baby", "young", "old", "elderly", "ancient", "child", "teenage", "grown",
];

const SETTINGS: &[&str] = &[
    "forest", "castle", "ocean", "sea", "beach", "mountain", "city", "village", "desert",
    "jungle", "cave", "space", "garden", "river", "lake", "school", "house", "island",
];

const CREATURES: &[&str] = &[
    "dragon", "unicorn", "cat", "dog", "bird", "fish", "bear", "rabbit", "fox", "owl", "lion",
    "mouse", "horse", "wolf", "monster", "fairy", "wizard", "witch", "princess", "prince",
    "king", "queen", "knight", "robot", "boy", "girl", "man", "woman",
];

const TIMES_OF_DAY: &[&str] = &[
    "morning", "afternoon", "evening", "night", "sunset", "sunrise", "dawn", "dusk", "midnight",
];

const WEATHER: &[&str] = &[
    "rain", "rainy", "snow", "snowy", "sunny", "cloudy", "storm", "stormy", "foggy", "windy",
];

const EMOTIONS: &[&str] = &[
    "happy", "sad", "angry", "scared", "surprised", "sleepy", "excited", "crying", "laughing",
];

/// A closed table of keywords matched case-insensitively as whole words.
///
/// The default table is small, English-only, and tuned for children's
/// stories. Replace it with [`Lexicon::from_words`] or extend it with
/// [`Lexicon::with_words`].
///
/// Entries are normalized to their alphanumeric words, so multi-word
/// entries such as "ice cream" or "red-haired" match as phrases: "ice
/// cream", "Ice-Cream" and "ice  cream" all hit the same entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Lexicon {
    words: HashMap<String, KeywordCategory>,
    /// Word count of the longest entry.
    longest: usize,
}

impl Default for Lexicon {
    fn default() -> Self {
        let mut lexicon = Self::empty();
        let tables = [
            (COLORS, KeywordCategory::Color),
            (SIZES, KeywordCategory::Size),
            (AGES, KeywordCategory::Age),
            (SETTINGS, KeywordCategory::Setting),
            (CREATURES, KeywordCategory::Creature),
            (TIMES_OF_DAY, KeywordCategory::TimeOfDay),
            (WEATHER, KeywordCategory::Weather),
            (EMOTIONS, KeywordCategory::Emotion),
        ];
        for (table, category) in tables {
            for word in table {
                lexicon.insert(word, category);
            }
        }
        lexicon
    }
}

impl Lexicon {
    /// A lexicon with no keywords (only the magnitude rule applies).
    #[must_use]
    pub fn empty() -> Self {
        Self {
            words: HashMap::new(),
            longest: 0,
        }
    }

    /// Build a lexicon from an explicit word list.
    #[must_use]
    pub fn from_words<I, S>(words: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        Self::empty().with_words(words)
    }

    /// Add uncategorized words to this lexicon.
    #[must_use]
    pub fn with_words<I, S>(mut self, words: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        for word in words {
            self.insert(word.as_ref(), KeywordCategory::Custom);
        }
        self
    }

    /// Insert a keyword or phrase under a category.
    ///
    /// Entries without any alphanumeric character are ignored. Returns
    /// whether the entry was stored.
    pub fn insert(&mut self, word: &str, category: KeywordCategory) -> bool {
        let tokens = tokenize(word);
        if tokens.is_empty() {
            return false;
        }
        self.longest = self.longest.max(tokens.len());
        self.words.insert(tokens.join(" "), category);
        true
    }

    /// Category of a keyword or phrase, if present.
    #[must_use]
    pub fn category(&self, word: &str) -> Option<KeywordCategory> {
        self.words.get(&tokenize(word).join(" ")).copied()
    }

    /// Whether the lexicon contains `word` (case-insensitive).
    #[must_use]
    pub fn contains(&self, word: &str) -> bool {
        self.category(word).is_some()
    }

    /// Number of keywords.
    #[must_use]
    pub fn len(&self) -> usize {
        self.words.len()
    }

    /// Whether the lexicon is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.words.is_empty()
    }

    /// Keywords and phrases from the lexicon that occur as whole words in
    /// `text`, in normalized form.
    ///
    /// Words are maximal runs of alphanumeric characters, so "dragon's"
    /// yields "dragon" and "red-haired" yields "red" (plus "red haired" if
    /// that phrase is in the table).
    #[must_use]
    pub fn extract(&self, text: &str) -> BTreeSet<String> {
        let tokens = tokenize(text);
        let mut found = BTreeSet::new();
        for start in 0..tokens.len() {
            let max = self.longest.min(tokens.len() - start);
            for len in 1..=max {
                let candidate = tokens[start..start + len].join(" ");
                if self.words.contains_key(&candidate) {
                    found.insert(candidate);
                }
            }
        }
        found
    }
}

/// Lowercased alphanumeric words of `text`.
fn tokenize(text: &str) -> Vec<String> {
    text.split(|c: char| !c.is_alphanumeric())
        .filter(|w| !w.is_empty())
        .map(str::to_lowercase)
        .collect()
}

// ---------------------------------------------------------------------------
// Detector
// ---------------------------------------------------------------------------

/// Why an edit was classified the way it was.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Verdict {
    /// Length changed by more than the configured ratio.
    Magnitude { old_len: usize, new_len: usize },

    /// Keywords were added or removed.
    Vocabulary {
        added: BTreeSet<String>,
        removed: BTreeSet<String>,
    },

    /// Neither rule fired.
    Insignificant,
}

impl Verdict {
    /// Whether the edit counts as significant.
    #[must_use]
    pub fn is_significant(&self) -> bool {
        !matches!(self, Self::Insignificant)
    }
}

/// Classifies text edits as significant or not.
#[derive(Debug, Clone, PartialEq)]
pub struct ChangeDetector {
    lexicon: Lexicon,
    length_ratio: f64,
}

impl Default for ChangeDetector {
    fn default() -> Self {
        Self::new(Lexicon::default())
    }
}

impl ChangeDetector {
    /// Create a detector with the given lexicon and the default ratio.
    #[must_use]
    pub fn new(lexicon: Lexicon) -> Self {
        Self {
            lexicon,
            length_ratio: DEFAULT_LENGTH_RATIO,
        }
    }

    /// Set the length-change ratio. Negative or non-finite values fall back
    /// to the default.
    #[must_use]
    pub fn with_length_ratio(mut self, ratio: f64) -> Self {
        self.length_ratio = if ratio.is_finite() && ratio >= 0.0 {
            ratio
        } else {
            DEFAULT_LENGTH_RATIO
        };
        self
    }

    /// The lexicon used for the vocabulary rule.
    #[must_use]
    pub fn lexicon(&self) -> &Lexicon {
        &self.lexicon
    }

    /// The length-change ratio used for the magnitude rule.
    #[must_use]
    pub fn length_ratio(&self) -> f64 {
        self.length_ratio
    }

    /// Whether replacing `old` with `new` is a significant edit.
    #[must_use]
    pub fn is_significant(&self, old: &str, new: &str) -> bool {
        self.classify(old, new).is_significant()
    }

    /// Classify an edit, reporting which rule fired.
    ///
    /// The magnitude rule runs first and short-circuits the keyword scan.
    #[must_use]
    pub fn classify(&self, old: &str, new: &str) -> Verdict {
        let old_len = old.chars().count();
        let new_len = new.chars().count();
        let delta = old_len.abs_diff(new_len) as f64;
        if delta > self.length_ratio * old_len as f64 {
            return Verdict::Magnitude { old_len, new_len };
        }

        let before = self.lexicon.extract(old);
        let after = self.lexicon.extract(new);
        if before == after {
            return Verdict::Insignificant;
        }
        Verdict::Vocabulary {
            added: after.difference(&before).cloned().collect(),
            removed: before.difference(&after).cloned().collect(),
        }
    }
}

/// [`ChangeDetector::is_significant`] with the default lexicon and ratio.
#[must_use]
pub fn is_significant(old: &str, new: &str) -> bool {
    ChangeDetector::default().is_significant(old, new)
}

// ---------------------------------------------------------------------------
// Stale-artifact record
// ---------------------------------------------------------------------------

/// A text passage with an optional generated illustration.
///
/// The illustration is flagged outdated, never dropped, when the text
/// changes significantly. Regeneration is always an explicit action that
/// ends with [`attach_image`](Self::attach_image).
#[derive(Debug, Clone, Default, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(default, rename_all = "camelCase"))]
pub struct IllustratedText {
    /// The passage itself.
    pub text: String,

    /// Location of the generated illustration, if one exists.
    pub image_url: Option<String>,

    /// The text changed significantly since the illustration was made.
    pub is_image_outdated: bool,
}

impl IllustratedText {
    /// A passage with no illustration.
    #[must_use]
    pub fn new(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            image_url: None,
            is_image_outdated: false,
        }
    }

    /// Replace the text, flagging the illustration when the edit is
    /// significant. Returns whether the flag was newly raised.
    pub fn set_text(&mut self, text: impl Into<String>, detector: &ChangeDetector) -> bool {
        let text = text.into();
        let raise = self.image_url.is_some()
            && !self.is_image_outdated
            && detector.is_significant(&self.text, &text);
        self.text = text;
        if raise {
            self.is_image_outdated = true;
        }
        raise
    }

    /// Builder form of [`set_text`](Self::set_text) for copy-on-write edits.
    #[must_use]
    pub fn with_text(mut self, text: impl Into<String>, detector: &ChangeDetector) -> Self {
        self.set_text(text, detector);
        self
    }

    /// Attach a freshly generated illustration, clearing the outdated flag.
    pub fn attach_image(&mut self, url: impl Into<String>) {
        self.image_url = Some(url.into());
        self.is_image_outdated = false;
    }

    /// Remove the illustration.
    pub fn detach_image(&mut self) {
        self.image_url = None;
        self.is_image_outdated = false;
    }

    /// Whether an illustration exists and is flagged outdated.
    #[must_use]
    pub fn needs_regeneration(&self) -> bool {
        self.image_url.is_some() && self.is_image_outdated
    }
}
