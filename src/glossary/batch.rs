/*!
 * Record pool: batch partitioning and per-record processing.
 *
 * Records of one batch run concurrently, bounded by the configured number of
 * parallel workers. A record's failure never aborts its batch.
 */

use futures::stream::{self, StreamExt};
use log::{debug, error, warn};
use std::fmt;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

use crate::app_config::GeneralConfig;
use crate::errors::{LookupError, RepositoryError};
use crate::records::{FieldMapping, Record, RecordId, RecordRepository};
use crate::text_utils::html_to_text;

use super::annotate::Annotator;
use super::model::RecordStatus;
use super::stats::StatisticsAggregator;
use super::templates::Renderer;

/// A bounded slice of records processed in one wave
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BatchJob {
    pub index: usize,
    pub records: Vec<Record>,
}

impl BatchJob {
    /// Split records into consecutive batches of at most `size`
    pub fn partition(records: Vec<Record>, size: usize) -> Vec<BatchJob> {
        let size = size.max(1);
        let mut batches = Vec::with_capacity(records.len().div_ceil(size));
        let mut records = records.into_iter().peekable();
        let mut index = 0;

        while records.peek().is_some() {
            batches.push(BatchJob {
                index,
                records: records.by_ref().take(size).collect(),
            });
            index += 1;
        }
        batches
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

/// Why a record failed
#[derive(Debug, Clone, PartialEq)]
pub enum FailureReason {
    /// Every lookup of the record failed
    Lookup(LookupError),
    RepositoryRead(RepositoryError),
    RepositoryWrite(RepositoryError),
}

impl FailureReason {
    pub fn category(&self) -> &'static str {
        match self {
            FailureReason::Lookup(e) => e.category(),
            FailureReason::RepositoryRead(_) => "repository_read",
            FailureReason::RepositoryWrite(_) => "repository_write",
        }
    }

    /// The repository itself is unavailable, not just this record
    pub fn is_storage_failure(&self) -> bool {
        matches!(
            self,
            FailureReason::RepositoryRead(RepositoryError::Storage(_)) | FailureReason::RepositoryWrite(RepositoryError::Storage(_))
        )
    }
}

impl fmt::Display for FailureReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FailureReason::Lookup(e) => write!(f, "{}", e),
            FailureReason::RepositoryRead(e) => write!(f, "read failed: {}", e),
            FailureReason::RepositoryWrite(e) => write!(f, "write failed: {}", e),
        }
    }
}

/// Final outcome of one record
#[derive(Debug, Clone, PartialEq)]
pub enum RecordOutcome {
    /// New glossary written
    Updated,
    /// The rendered glossary is empty or equal to the existing content
    Unchanged,
    /// No source text
    Empty,
    /// Existing content kept because of the overwrite policy
    Skipped,
    Failed(FailureReason),
    /// Not completed because the run was cancelled
    Cancelled,
}

impl RecordOutcome {
    pub fn is_processed(&self) -> bool {
        matches!(self, RecordOutcome::Updated | RecordOutcome::Unchanged)
    }

    pub fn is_skipped(&self) -> bool {
        matches!(self, RecordOutcome::Skipped | RecordOutcome::Empty)
    }
}

/// Outcome of one record with its lookup status
#[derive(Debug, Clone, PartialEq)]
pub struct RecordReport {
    pub record_id: RecordId,
    pub outcome: RecordOutcome,
    pub status: RecordStatus,
}

/// Processes batches of records with bounded parallelism
#[derive(Clone)]
pub struct RecordPool {
    annotator: Annotator,
    repository: Arc<dyn RecordRepository>,
    renderer: Arc<dyn Renderer>,
    stats: Arc<StatisticsAggregator>,
    fields: FieldMapping,
    workers: usize,
}

impl RecordPool {
    pub fn new(
        annotator: Annotator,
        repository: Arc<dyn RecordRepository>,
        renderer: Arc<dyn Renderer>,
        stats: Arc<StatisticsAggregator>,
        fields: FieldMapping,
        workers: usize,
    ) -> Self {
        Self {
            annotator,
            repository,
            renderer,
            stats,
            fields,
            workers: workers.max(1),
        }
    }

    fn general(&self) -> &GeneralConfig {
        self.annotator.general()
    }

    /// Process every record of the batch, returning outcomes in batch order
    pub async fn run_batch(&self, batch: &BatchJob, cancel: &CancellationToken) -> Vec<RecordReport> {
        debug!("Processing batch {} with {} records", batch.index + 1, batch.len());

        let mut reports: Vec<(usize, RecordReport)> = stream::iter(batch.records.iter().cloned().enumerate())
            .map(|(position, record)| self.process_indexed(position, record, cancel))
            .buffer_unordered(self.workers)
            .collect()
            .await;

        reports.sort_by_key(|(position, _)| *position);
        reports.into_iter().map(|(_, report)| report).collect()
    }

    // takes the record by value so the batch future stays `Send`
    async fn process_indexed(&self, position: usize, record: Record, cancel: &CancellationToken) -> (usize, RecordReport) {
        let (outcome, status) = self.process_record(&record, cancel).await;
        let partial = status == RecordStatus::Partial;
        self.stats.record_outcome(record.id, &outcome, partial);
        (
            position,
            RecordReport {
                record_id: record.id,
                outcome,
                status,
            },
        )
    }

    async fn process_record(&self, record: &Record, cancel: &CancellationToken) -> (RecordOutcome, RecordStatus) {
        if cancel.is_cancelled() {
            return (RecordOutcome::Cancelled, RecordStatus::Success);
        }

        let existing = match self.repository.read_field(record, &self.fields.target_field).await {
            Ok(content) => content,
            Err(RepositoryError::FieldMissing { .. }) => String::new(),
            Err(e) => {
                error!("Failed to read target field of record {}: {}", record.id, e);
                return (RecordOutcome::Failed(FailureReason::RepositoryRead(e)), RecordStatus::Failed);
            }
        };

        if self.general().skips_existing_content() && !existing.trim().is_empty() {
            debug!("Record {} already has a glossary, skipping", record.id);
            return (RecordOutcome::Skipped, RecordStatus::Success);
        }

        let source = match self.repository.read_field(record, &self.fields.source_field).await {
            Ok(content) => html_to_text(&content),
            Err(e) => {
                error!("Failed to read source field of record {}: {}", record.id, e);
                return (RecordOutcome::Failed(FailureReason::RepositoryRead(e)), RecordStatus::Failed);
            }
        };
        if source.is_empty() {
            return (RecordOutcome::Empty, RecordStatus::Success);
        }

        let result = self.annotator.annotate(&source, cancel).await;
        if result.was_cancelled() {
            return (RecordOutcome::Cancelled, result.status);
        }
        if result.status == RecordStatus::Failed {
            let reason = result
                .first_error()
                .cloned()
                .unwrap_or_else(|| LookupError::Transient("all lookups failed".to_string()));
            warn!("All lookups failed for record {}: {}", record.id, reason);
            return (RecordOutcome::Failed(FailureReason::Lookup(reason)), result.status);
        }

        let rendered = self.renderer.render(&result, self.general());
        if rendered.is_empty() || rendered == existing {
            return (RecordOutcome::Unchanged, result.status);
        }

        match self.repository.write_field(record, &self.fields.target_field, &rendered).await {
            Ok(()) => (RecordOutcome::Updated, result.status),
            Err(e) => {
                error!("Failed to write glossary of record {}: {}", record.id, e);
                (RecordOutcome::Failed(FailureReason::RepositoryWrite(e)), result.status)
            }
        }
    }
}
