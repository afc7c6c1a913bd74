/*!
 * Database entity models.
 *
 * These structures map directly to database tables.
 */

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::glossary::orchestrator::{RunState, RunSummary};
use crate::records::{FieldMapping, Record, RecordSelector};

/// A stored note with its named fields
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NoteRecord {
    pub id: i64,
    pub deck: String,
    pub note_type: String,
    /// Field name -> HTML content
    pub fields: BTreeMap<String, String>,
    /// Creation timestamp (ISO 8601)
    pub created_at: String,
    /// Last update timestamp (ISO 8601)
    pub updated_at: String,
}

impl NoteRecord {
    pub fn to_record(&self) -> Record {
        Record {
            id: self.id,
            deck: self.deck.clone(),
            note_type: self.note_type.clone(),
        }
    }

    pub fn field(&self, name: &str) -> Option<&str> {
        self.fields.get(name).map(String::as_str)
    }
}

/// A note to insert
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewNote {
    pub deck: String,
    pub note_type: String,
    pub fields: BTreeMap<String, String>,
}

impl NewNote {
    pub fn new(deck: impl Into<String>, note_type: impl Into<String>) -> Self {
        Self {
            deck: deck.into(),
            note_type: note_type.into(),
            fields: BTreeMap::new(),
        }
    }

    pub fn with_field(mut self, name: impl Into<String>, content: impl Into<String>) -> Self {
        self.fields.insert(name.into(), content.into());
        self
    }
}

/// History entry of a finished run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunRecord {
    /// Run identifier (UUID)
    pub id: String,
    pub state: String,
    pub deck: Option<String>,
    pub note_type: Option<String>,
    pub source_field: String,
    pub target_field: String,
    pub total_records: i64,
    pub processed: i64,
    pub skipped: i64,
    pub failed: i64,
    pub cache_hits: i64,
    pub api_calls: i64,
    /// Full statistics snapshot as JSON
    pub statistics: String,
    pub started_at: String,
    pub finished_at: String,
}

impl RunRecord {
    pub fn from_summary(summary: &RunSummary, selector: &RecordSelector, fields: &FieldMapping) -> anyhow::Result<Self> {
        let stats = &summary.stats;
        Ok(Self {
            id: summary.run_id.to_string(),
            state: summary.state.to_string(),
            deck: selector.deck.clone(),
            note_type: selector.note_type.clone(),
            source_field: fields.source_field.clone(),
            target_field: fields.target_field.clone(),
            total_records: stats.total_records as i64,
            processed: stats.processed as i64,
            skipped: stats.skipped as i64,
            failed: stats.failed as i64,
            cache_hits: stats.cache_hits as i64,
            api_calls: stats.api_calls as i64,
            statistics: serde_json::to_string(stats)?,
            started_at: summary.started_at.to_rfc3339(),
            finished_at: summary.finished_at.to_rfc3339(),
        })
    }

    pub fn is_successful(&self) -> bool {
        self.state == RunState::Completed.to_string()
    }
}

impl std::fmt::Display for RunRecord {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{}  {:<9}  {}  {}/{} processed, {} skipped, {} failed",
            self.started_at,
            self.state,
            self.id,
            self.processed,
            self.total_records,
            self.skipped,
            self.failed
        )
    }
}
