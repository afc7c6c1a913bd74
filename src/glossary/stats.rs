/*!
 * Run statistics.
 *
 * A `StatisticsAggregator` is shared by every worker of a run. Counters are
 * atomics; compound updates (a record outcome touches several counters) hold
 * the shared side of a gate lock while `snapshot` holds the exclusive side,
 * so a snapshot never observes half of an outcome.
 */

use parking_lot::{Mutex, RwLock};
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use super::batch::RecordOutcome;
use crate::records::RecordId;

/// Number of failure details kept for the final report
const MAX_RECENT_FAILURES: usize = 100;

/// Individually countable events
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatKind {
    CacheHit,
    CacheMiss,
    ApiCall,
    ApiFailure,
    Retry,
}

/// One failed record, kept for the end-of-run report
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FailureDetail {
    pub record_id: RecordId,
    pub category: String,
    pub message: String,
}

#[derive(Debug, Default)]
struct Counters {
    updated: AtomicU64,
    unchanged: AtomicU64,
    empty: AtomicU64,
    skipped: AtomicU64,
    failed: AtomicU64,
    partial: AtomicU64,
    cancelled: AtomicU64,
    cache_hits: AtomicU64,
    cache_misses: AtomicU64,
    api_calls: AtomicU64,
    api_failures: AtomicU64,
    retries: AtomicU64,
}

/// Thread-safe counters for one run
#[derive(Debug)]
pub struct StatisticsAggregator {
    total_records: AtomicU64,
    counters: Counters,
    failure_reasons: Mutex<BTreeMap<String, u64>>,
    recent_failures: Mutex<Vec<FailureDetail>>,
    gate: RwLock<()>,
    started: Instant,
}

impl StatisticsAggregator {
    pub fn new(total_records: usize) -> Self {
        Self {
            total_records: AtomicU64::new(total_records as u64),
            counters: Counters::default(),
            failure_reasons: Mutex::new(BTreeMap::new()),
            recent_failures: Mutex::new(Vec::new()),
            gate: RwLock::new(()),
            started: Instant::now(),
        }
    }

    /// Set the number of records the run will attempt, once enumerated
    pub fn set_total_records(&self, total: usize) {
        self.total_records.store(total as u64, Ordering::SeqCst);
    }

    pub fn increment(&self, kind: StatKind) {
        let _gate = self.gate.read();
        let counter = match kind {
            StatKind::CacheHit => &self.counters.cache_hits,
            StatKind::CacheMiss => &self.counters.cache_misses,
            StatKind::ApiCall => &self.counters.api_calls,
            StatKind::ApiFailure => &self.counters.api_failures,
            StatKind::Retry => &self.counters.retries,
        };
        counter.fetch_add(1, Ordering::SeqCst);
    }

    /// Account the final outcome of one record.
    ///
    /// `partial` marks a record whose annotation succeeded only for some keys.
    pub fn record_outcome(&self, record_id: RecordId, outcome: &RecordOutcome, partial: bool) {
        let _gate = self.gate.read();
        let c = &self.counters;

        match outcome {
            RecordOutcome::Updated => c.updated.fetch_add(1, Ordering::SeqCst),
            RecordOutcome::Unchanged => c.unchanged.fetch_add(1, Ordering::SeqCst),
            RecordOutcome::Empty => c.empty.fetch_add(1, Ordering::SeqCst),
            RecordOutcome::Skipped => c.skipped.fetch_add(1, Ordering::SeqCst),
            RecordOutcome::Cancelled => c.cancelled.fetch_add(1, Ordering::SeqCst),
            RecordOutcome::Failed(reason) => {
                *self
                    .failure_reasons
                    .lock()
                    .entry(reason.category().to_string())
                    .or_insert(0) += 1;

                let mut recent = self.recent_failures.lock();
                if recent.len() < MAX_RECENT_FAILURES {
                    recent.push(FailureDetail {
                        record_id,
                        category: reason.category().to_string(),
                        message: reason.to_string(),
                    });
                }
                c.failed.fetch_add(1, Ordering::SeqCst)
            }
        };

        if partial && outcome.is_processed() {
            c.partial.fetch_add(1, Ordering::SeqCst);
        }
    }

    /// Consistent point-in-time copy of every counter
    pub fn snapshot(&self) -> RunStatistics {
        let _gate = self.gate.write();
        let c = &self.counters;
        let load = |counter: &AtomicU64| counter.load(Ordering::SeqCst);

        let updated = load(&c.updated);
        let unchanged = load(&c.unchanged);
        let empty = load(&c.empty);
        let skipped_existing = load(&c.skipped);

        RunStatistics {
            total_records: load(&self.total_records),
            processed: updated + unchanged,
            updated,
            unchanged,
            empty,
            skipped: skipped_existing + empty,
            failed: load(&c.failed),
            partial: load(&c.partial),
            cancelled: load(&c.cancelled),
            cache_hits: load(&c.cache_hits),
            cache_misses: load(&c.cache_misses),
            api_calls: load(&c.api_calls),
            api_failures: load(&c.api_failures),
            retries: load(&c.retries),
            elapsed: self.started.elapsed(),
            failure_reasons: self.failure_reasons.lock().clone(),
            recent_failures: self.recent_failures.lock().clone(),
        }
    }
}

/// Snapshot of a run's counters
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RunStatistics {
    pub total_records: u64,

    /// Records annotated without error (`updated + unchanged`)
    pub processed: u64,
    pub updated: u64,
    pub unchanged: u64,
    /// Records with no source text, included in `skipped`
    pub empty: u64,
    pub skipped: u64,
    pub failed: u64,

    /// Processed records where some lookups failed
    pub partial: u64,

    /// Records abandoned because of cancellation; not counted as attempted
    pub cancelled: u64,

    pub cache_hits: u64,
    pub cache_misses: u64,
    pub api_calls: u64,
    pub api_failures: u64,
    pub retries: u64,

    #[serde(with = "duration_secs")]
    pub elapsed: Duration,

    /// Failed records by reason category
    pub failure_reasons: BTreeMap<String, u64>,
    pub recent_failures: Vec<FailureDetail>,
}

impl Default for RunStatistics {
    fn default() -> Self {
        StatisticsAggregator::new(0).snapshot()
    }
}

impl RunStatistics {
    /// `processed + skipped + failed`
    pub fn attempted(&self) -> u64 {
        self.processed + self.skipped + self.failed
    }

    pub fn progress_percentage(&self) -> f64 {
        if self.total_records == 0 {
            return 100.0;
        }
        self.attempted() as f64 / self.total_records as f64 * 100.0
    }

    /// Estimated remaining time, from the average time per attempted record
    pub fn eta(&self) -> Option<Duration> {
        let attempted = self.attempted();
        if attempted == 0 || attempted >= self.total_records {
            return None;
        }
        let per_record = self.elapsed.as_secs_f64() / attempted as f64;
        Some(Duration::from_secs_f64(per_record * (self.total_records - attempted) as f64))
    }

    pub fn cache_hit_rate(&self) -> f64 {
        let lookups = self.cache_hits + self.cache_misses;
        if lookups == 0 {
            return 0.0;
        }
        self.cache_hits as f64 / lookups as f64 * 100.0
    }

    /// Human readable end-of-run report
    pub fn summary(&self) -> String {
        let mut summary = format!(
            "Run Summary:\n\
             Records: {}\n\
             Processed: {} (updated {}, unchanged {}, partial {})\n\
             Skipped: {} (empty source {})\n\
             Failed: {}\n\
             Cancelled: {}\n\
             Cache hits: {} / misses: {} ({:.1}% hit rate)\n\
             API calls: {} (failures {}, retries {})\n\
             Elapsed time: {:.2} seconds",
            self.total_records,
            self.processed,
            self.updated,
            self.unchanged,
            self.partial,
            self.skipped,
            self.empty,
            self.failed,
            self.cancelled,
            self.cache_hits,
            self.cache_misses,
            self.cache_hit_rate(),
            self.api_calls,
            self.api_failures,
            self.retries,
            self.elapsed.as_secs_f64()
        );

        if !self.failure_reasons.is_empty() {
            summary.push_str("\nFailure reasons:");
            for (category, count) in &self.failure_reasons {
                summary.push_str(&format!("\n  {}: {}", category, count));
            }
        }
        summary
    }
}

mod duration_secs {
    use serde::Serializer;
    use std::time::Duration;

    pub fn serialize<S: Serializer>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_f64(duration.as_secs_f64())
    }
}
