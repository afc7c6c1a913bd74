/*!
 * Record repository contract.
 *
 * The pipeline never owns records: it enumerates them, reads the source
 * field and writes the rendered glossary back through this trait.
 */

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::errors::RepositoryError;

pub type RecordId = i64;

/// One unit of source text to annotate
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Record {
    pub id: RecordId,
    pub deck: String,
    pub note_type: String,
}

/// Which records a run targets; `None` matches everything
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecordSelector {
    pub deck: Option<String>,
    pub note_type: Option<String>,
}

impl RecordSelector {
    pub fn new(deck: Option<String>, note_type: Option<String>) -> Self {
        Self { deck, note_type }
    }

    pub fn matches(&self, record: &Record) -> bool {
        self.deck.as_ref().is_none_or(|d| *d == record.deck)
            && self.note_type.as_ref().is_none_or(|t| *t == record.note_type)
    }
}

/// Source and target field names of a run
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldMapping {
    pub source_field: String,
    pub target_field: String,
}

impl FieldMapping {
    pub fn new(source_field: impl Into<String>, target_field: impl Into<String>) -> Self {
        Self {
            source_field: source_field.into(),
            target_field: target_field.into(),
        }
    }
}

/// Storage of the records being annotated
#[async_trait]
pub trait RecordRepository: Send + Sync {
    /// Records matching `selector`, in a stable order
    async fn list_records(&self, selector: &RecordSelector) -> Result<Vec<Record>, RepositoryError>;

    async fn read_field(&self, record: &Record, field: &str) -> Result<String, RepositoryError>;

    async fn write_field(&self, record: &Record, field: &str, content: &str) -> Result<(), RepositoryError>;
}
