/*!
 * Run orchestration.
 *
 * The orchestrator owns one end-to-end run: it enumerates the records,
 * partitions them into batches, drives the record pool over the batches in
 * order and reports progress through a bounded channel.
 *
 * State machine: `Idle -> Running -> {Completed, Cancelled, Failed}`.
 * Cancellation is cooperative: the token is checked between batches and
 * threaded into every pacing and single-flight wait, so in-flight work drains
 * promptly without aborting calls already on the wire.
 */

use chrono::{DateTime, Utc};
use log::{error, info, warn};
use parking_lot::Mutex;
use serde::Serialize;
use std::fmt;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::app_config::Config;
use crate::errors::{RepositoryError, RunError};
use crate::records::{FieldMapping, RecordRepository, RecordSelector};
use crate::services::ServicePair;

use super::annotate::Annotator;
use super::batch::{BatchJob, FailureReason, RecordOutcome, RecordPool, RecordReport};
use super::cache::CacheStore;
use super::calls::CallPool;
use super::lookup::{LookupClient, LookupSettings};
use super::pacer::Pacer;
use super::stats::{RunStatistics, StatisticsAggregator};
use super::templates::Renderer;

/// Lifecycle of a run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum RunState {
    Idle,
    Running,
    Completed,
    Cancelled,
    Failed,
}

impl RunState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, RunState::Completed | RunState::Cancelled | RunState::Failed)
    }
}

impl fmt::Display for RunState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            RunState::Idle => "idle",
            RunState::Running => "running",
            RunState::Completed => "completed",
            RunState::Cancelled => "cancelled",
            RunState::Failed => "failed",
        };
        write!(f, "{}", name)
    }
}

/// Snapshot emitted after every batch
#[derive(Debug, Clone)]
pub struct ProgressUpdate {
    pub batch_index: usize,
    pub total_batches: usize,
    pub stats: RunStatistics,
}

/// Final report of a run
#[derive(Debug, Clone, Serialize)]
pub struct RunSummary {
    pub run_id: Uuid,
    pub state: RunState,
    pub stats: RunStatistics,
    pub batches_completed: usize,
    pub total_batches: usize,
    /// Non-fatal cache flush failures
    pub cache_warnings: Vec<String>,
    /// Reason of a failed run
    pub error: Option<String>,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
}

/// Drives one annotation run
pub struct Orchestrator {
    config: Config,
    repository: Arc<dyn RecordRepository>,
    services: ServicePair,
    renderer: Arc<dyn Renderer>,
    cache: Arc<CacheStore>,
    state: Mutex<RunState>,
    cancel: CancellationToken,
    run_id: Uuid,
}

impl Orchestrator {
    pub fn new(
        config: Config,
        repository: Arc<dyn RecordRepository>,
        services: ServicePair,
        renderer: Arc<dyn Renderer>,
        cache: Arc<CacheStore>,
    ) -> Self {
        Self {
            config,
            repository,
            services,
            renderer,
            cache,
            state: Mutex::new(RunState::Idle),
            cancel: CancellationToken::new(),
            run_id: Uuid::new_v4(),
        }
    }

    pub fn run_id(&self) -> Uuid {
        self.run_id
    }

    pub fn state(&self) -> RunState {
        *self.state.lock()
    }

    /// Request cooperative cancellation; safe to call from any task
    pub fn cancel(&self) {
        if !self.cancel.is_cancelled() {
            info!("Cancellation requested, finishing the current batch");
        }
        self.cancel.cancel();
    }

    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    fn transition(&self, from: RunState, to: RunState) -> bool {
        let mut state = self.state.lock();
        if *state != from {
            return false;
        }
        *state = to;
        true
    }

    fn set_state(&self, to: RunState) {
        *self.state.lock() = to;
    }

    /// Execute the run to completion, cancellation or failure.
    ///
    /// Returns `Err` only when the run could not start; a run that fails
    /// after starting yields a summary in the `Failed` state.
    pub async fn run(
        &self,
        selector: &RecordSelector,
        fields: &FieldMapping,
        progress: Option<mpsc::Sender<ProgressUpdate>>,
    ) -> Result<RunSummary, RunError> {
        if !self.transition(RunState::Idle, RunState::Running) {
            return Err(RunError::AlreadyStarted);
        }
        let started_at = Utc::now();

        if let Err(e) = self.config.validate() {
            self.set_state(RunState::Failed);
            return Err(RunError::Setup(e.to_string()));
        }

        let stats = Arc::new(StatisticsAggregator::new(0));
        let mut summary = RunSummary {
            run_id: self.run_id,
            state: RunState::Running,
            stats: stats.snapshot(),
            batches_completed: 0,
            total_batches: 0,
            cache_warnings: Vec::new(),
            error: None,
            started_at,
            finished_at: started_at,
        };

        let records = match self.repository.list_records(selector).await {
            Ok(records) => records,
            Err(e) => {
                error!("Failed to enumerate records: {}", e);
                return Ok(self.finish(summary, &stats, RunState::Failed, Some(e.to_string())));
            }
        };
        stats.set_total_records(records.len());
        info!("Found {} records to annotate", records.len());

        let pacer = Arc::new(Pacer::from_config(&self.config.performance));
        let pool = self.record_pool(Arc::clone(&stats), Arc::clone(&pacer), fields.clone());
        let batches = BatchJob::partition(records, self.config.performance.batch_size);
        summary.total_batches = batches.len();

        let mut end_state = RunState::Completed;
        let mut failure = None;

        for batch in &batches {
            if self.cancel.is_cancelled() {
                end_state = RunState::Cancelled;
                break;
            }

            let reports = pool.run_batch(batch, &self.cancel).await;
            summary.batches_completed += 1;

            let snapshot = stats.snapshot();
            info!(
                "Batch {}/{} done: {} processed, {} skipped, {} failed",
                batch.index + 1,
                batches.len(),
                snapshot.processed,
                snapshot.skipped,
                snapshot.failed
            );
            if let Some(tx) = &progress {
                // a full channel drops this snapshot
                let _ = tx.try_send(ProgressUpdate {
                    batch_index: batch.index,
                    total_batches: batches.len(),
                    stats: snapshot,
                });
            }

            self.flush_cache_if_dirty(&mut summary.cache_warnings).await;

            if let Some(reason) = repository_unavailable(&reports) {
                error!("Repository unavailable, aborting run: {}", reason);
                end_state = RunState::Failed;
                failure = Some(reason.to_string());
                break;
            }

            let is_last = batch.index + 1 == batches.len();
            if !is_last && pacer.pause_between_batches(&self.cancel).await.is_err() {
                end_state = RunState::Cancelled;
                break;
            }
        }

        if end_state == RunState::Completed && self.cancel.is_cancelled() && has_cancelled_records(&stats) {
            end_state = RunState::Cancelled;
        }

        self.flush_cache_if_dirty(&mut summary.cache_warnings).await;
        Ok(self.finish(summary, &stats, end_state, failure))
    }

    fn record_pool(&self, stats: Arc<StatisticsAggregator>, pacer: Arc<Pacer>, fields: FieldMapping) -> RecordPool {
        let perf = &self.config.performance;
        let client = LookupClient::new(
            Arc::clone(&self.cache),
            pacer,
            self.services.clone(),
            Arc::clone(&stats),
            LookupSettings::from_config(&self.config),
        );
        let annotator = Annotator::new(CallPool::new(client, perf.api_workers), self.config.general.clone());
        RecordPool::new(
            annotator,
            Arc::clone(&self.repository),
            Arc::clone(&self.renderer),
            stats,
            fields,
            perf.parallel_workers,
        )
    }

    async fn flush_cache_if_dirty(&self, warnings: &mut Vec<String>) {
        if !self.cache.is_dirty() {
            return;
        }
        if let Err(e) = self.cache.flush_async().await {
            warn!("Failed to save API cache: {}", e);
            warnings.push(e.to_string());
        }
    }

    fn finish(
        &self,
        mut summary: RunSummary,
        stats: &StatisticsAggregator,
        state: RunState,
        error: Option<String>,
    ) -> RunSummary {
        self.set_state(state);
        summary.state = state;
        summary.stats = stats.snapshot();
        summary.error = error;
        summary.finished_at = Utc::now();
        info!("Run {} finished: {}", self.run_id, state);
        summary
    }
}

/// The whole batch failed because the repository itself is unreachable
fn repository_unavailable(reports: &[RecordReport]) -> Option<&RepositoryError> {
    if reports.is_empty() {
        return None;
    }
    let mut first = None;
    for report in reports {
        match &report.outcome {
            RecordOutcome::Failed(reason) if reason.is_storage_failure() => {
                if first.is_none() {
                    first = Some(reason);
                }
            }
            _ => return None,
        }
    }
    first.and_then(|reason| match reason {
        FailureReason::RepositoryRead(e) | FailureReason::RepositoryWrite(e) => Some(e),
        FailureReason::Lookup(_) => None,
    })
}

fn has_cancelled_records(stats: &StatisticsAggregator) -> bool {
    stats.snapshot().cancelled > 0
}
