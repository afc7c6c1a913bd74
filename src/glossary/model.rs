/*!
 * Data model for the annotation pipeline.
 *
 * Lookup keys identify one remote lookup and double as cache keys; annotation
 * payloads are what the remote services return; an `AnnotationResult` is the
 * per-record aggregate handed to the renderer.
 */

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::errors::LookupError;
use crate::text_utils::{clean_text, Script};

/// Kind of annotation requested from the remote services
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LookupKind {
    /// Reading conversion (kana or a kanji reading to romaji)
    Reading,
    /// Meaning lookup for a single kanji
    Meaning,
}

impl fmt::Display for LookupKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LookupKind::Reading => write!(f, "reading"),
            LookupKind::Meaning => write!(f, "meaning"),
        }
    }
}

/// Normalized identity of one lookup
///
/// Two keys are equal iff their normalized text and kind are equal.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct LookupKey {
    kind: LookupKind,
    text: String,
}

impl LookupKey {
    pub fn new(kind: LookupKind, text: &str) -> Self {
        Self {
            kind,
            text: clean_text(text),
        }
    }

    /// Key for converting a kana fragment or kanji reading to romaji
    pub fn reading(text: &str) -> Self {
        Self::new(LookupKind::Reading, text)
    }

    /// Key for looking up a single kanji
    pub fn meaning(kanji: char) -> Self {
        Self::new(LookupKind::Meaning, kanji.encode_utf8(&mut [0; 4]))
    }

    pub fn kind(&self) -> LookupKind {
        self.kind
    }

    pub fn text(&self) -> &str {
        &self.text
    }
}

impl fmt::Display for LookupKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.kind, self.text)
    }
}

impl FromStr for LookupKey {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> anyhow::Result<Self> {
        let (kind, text) = s
            .split_once(':')
            .ok_or_else(|| anyhow::anyhow!("Invalid lookup key: {}", s))?;
        let kind = match kind {
            "reading" => LookupKind::Reading,
            "meaning" => LookupKind::Meaning,
            other => return Err(anyhow::anyhow!("Invalid lookup kind: {}", other)),
        };
        Ok(Self::new(kind, text))
    }
}

/// Kanji information as returned by the meaning-lookup service
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct KanjiInfo {
    /// The character itself
    pub kanji: String,

    /// English meanings
    #[serde(default)]
    pub meanings: Vec<String>,

    /// Japanese (kun) readings
    #[serde(default)]
    pub kun_readings: Vec<String>,

    /// Sino-Japanese (on) readings
    #[serde(default)]
    pub on_readings: Vec<String>,

    #[serde(default)]
    pub grade: Option<u8>,

    #[serde(default)]
    pub stroke_count: Option<u32>,

    #[serde(default)]
    pub jlpt: Option<u8>,
}

/// Value stored in the cache for one lookup key
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AnnotationPayload {
    /// Romaji for a kana fragment or reading
    Reading { romaji: String },
    /// Readings and meanings of a kanji
    Kanji(KanjiInfo),
}

impl AnnotationPayload {
    pub fn romaji(&self) -> Option<&str> {
        match self {
            AnnotationPayload::Reading { romaji } => Some(romaji),
            AnnotationPayload::Kanji(_) => None,
        }
    }

    pub fn kanji_info(&self) -> Option<&KanjiInfo> {
        match self {
            AnnotationPayload::Kanji(info) => Some(info),
            AnnotationPayload::Reading { .. } => None,
        }
    }
}

/// Overall outcome of the lookups of one record
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RecordStatus {
    /// Every lookup succeeded (or none was needed)
    Success,
    /// Some lookups failed
    Partial,
    /// Every lookup failed
    Failed,
}

impl RecordStatus {
    /// Derive the status from success and failure counts
    pub fn from_counts(succeeded: usize, failed: usize) -> Self {
        if failed == 0 {
            RecordStatus::Success
        } else if succeeded == 0 {
            RecordStatus::Failed
        } else {
            RecordStatus::Partial
        }
    }
}

/// Kind of kanji reading
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum ReadingKind {
    Kun,
    On,
}

impl fmt::Display for ReadingKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ReadingKind::Kun => write!(f, "Kun"),
            ReadingKind::On => write!(f, "On"),
        }
    }
}

/// One reading of a kanji with its romaji, when it could be resolved
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KanjiReading {
    pub reading: String,
    pub kind: ReadingKind,
    pub romaji: Option<String>,
}

/// Resolved annotation of one character
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CharacterAnnotation {
    Kana {
        character: char,
        script: Script,
        romaji: String,
    },
    Kanji {
        character: char,
        info: KanjiInfo,
        readings: Vec<KanjiReading>,
    },
}

impl CharacterAnnotation {
    pub fn character(&self) -> char {
        match self {
            CharacterAnnotation::Kana { character, .. } | CharacterAnnotation::Kanji { character, .. } => *character,
        }
    }
}

/// A lookup key that could not be resolved
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyFailure {
    pub key: LookupKey,
    pub error: LookupError,
}

/// Per-record aggregate of all resolved lookups
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AnnotationResult {
    /// Annotations in order of first appearance in the source text
    pub entries: Vec<CharacterAnnotation>,

    /// Keys that failed, in no particular order
    pub failures: Vec<KeyFailure>,

    /// Number of distinct keys looked up for the record
    pub lookups: usize,

    pub status: RecordStatus,
}

impl AnnotationResult {
    pub fn empty() -> Self {
        Self {
            entries: Vec::new(),
            failures: Vec::new(),
            lookups: 0,
            status: RecordStatus::Success,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Whether any lookup was abandoned because the run was cancelled
    pub fn was_cancelled(&self) -> bool {
        self.failures.iter().any(|f| f.error == LookupError::Cancelled)
    }

    /// The first failure, used as the reason when the whole record fails
    pub fn first_error(&self) -> Option<&LookupError> {
        self.failures.first().map(|f| &f.error)
    }
}
