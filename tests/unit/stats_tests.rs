/*!
 * Tests for run statistics
 */

use std::sync::Arc;

use kanjigloss::errors::{LookupError, RepositoryError};
use kanjigloss::glossary::{FailureReason, RecordOutcome, RunStatistics, StatKind, StatisticsAggregator};

#[test]
fn test_record_outcome_withEveryOutcome_shouldSumToTotal() {
    let aggregator = StatisticsAggregator::new(6);
    aggregator.record_outcome(1, &RecordOutcome::Updated, false);
    aggregator.record_outcome(2, &RecordOutcome::Updated, true);
    aggregator.record_outcome(3, &RecordOutcome::Unchanged, false);
    aggregator.record_outcome(4, &RecordOutcome::Skipped, false);
    aggregator.record_outcome(5, &RecordOutcome::Empty, false);
    aggregator.record_outcome(
        6,
        &RecordOutcome::Failed(FailureReason::Lookup(LookupError::Transient("timeout".to_string()))),
        false,
    );

    let stats = aggregator.snapshot();
    assert_eq!(stats.processed, 3);
    assert_eq!(stats.updated, 2);
    assert_eq!(stats.unchanged, 1);
    assert_eq!(stats.skipped, 2);
    assert_eq!(stats.empty, 1);
    assert_eq!(stats.failed, 1);
    assert_eq!(stats.partial, 1);
    assert_eq!(stats.attempted(), stats.total_records);
    assert_eq!(stats.progress_percentage(), 100.0);
    assert_eq!(stats.eta(), None);
}

#[test]
fn test_record_outcome_withFailures_shouldTallyReasons() {
    let aggregator = StatisticsAggregator::new(3);
    let storage = || RepositoryError::Storage("locked".to_string());
    aggregator.record_outcome(1, &RecordOutcome::Failed(FailureReason::RepositoryWrite(storage())), false);
    aggregator.record_outcome(2, &RecordOutcome::Failed(FailureReason::RepositoryWrite(storage())), false);
    aggregator.record_outcome(
        3,
        &RecordOutcome::Failed(FailureReason::Lookup(LookupError::MalformedResponse("x".to_string()))),
        false,
    );

    let stats = aggregator.snapshot();
    assert_eq!(stats.failure_reasons.get("repository_write"), Some(&2));
    assert_eq!(stats.failure_reasons.get("malformed_response"), Some(&1));
    assert_eq!(stats.recent_failures.len(), 3);
    assert_eq!(stats.recent_failures[0].record_id, 1);
    assert!(stats.summary().contains("repository_write: 2"));
}

#[test]
fn test_partial_onFailedRecord_shouldNotCount() {
    let aggregator = StatisticsAggregator::new(1);
    aggregator.record_outcome(
        1,
        &RecordOutcome::Failed(FailureReason::Lookup(LookupError::Cancelled)),
        true,
    );
    assert_eq!(aggregator.snapshot().partial, 0);
}

#[test]
fn test_increment_shouldCountEachKind() {
    let aggregator = StatisticsAggregator::new(0);
    aggregator.increment(StatKind::CacheHit);
    aggregator.increment(StatKind::CacheHit);
    aggregator.increment(StatKind::CacheHit);
    aggregator.increment(StatKind::CacheMiss);
    aggregator.increment(StatKind::ApiCall);
    aggregator.increment(StatKind::ApiFailure);
    aggregator.increment(StatKind::Retry);

    let stats = aggregator.snapshot();
    assert_eq!(stats.cache_hits, 3);
    assert_eq!(stats.cache_misses, 1);
    assert_eq!(stats.api_calls, 1);
    assert_eq!(stats.api_failures, 1);
    assert_eq!(stats.retries, 1);
    assert_eq!(stats.cache_hit_rate(), 75.0);
}

#[test]
fn test_snapshot_whileThreadsRecord_shouldStayConsistent() {
    let aggregator = Arc::new(StatisticsAggregator::new(4000));
    let writers: Vec<_> = (0..4)
        .map(|t| {
            let aggregator = Arc::clone(&aggregator);
            std::thread::spawn(move || {
                for i in 0..1000 {
                    let outcome = if i % 2 == 0 { RecordOutcome::Updated } else { RecordOutcome::Skipped };
                    aggregator.record_outcome(t * 1000 + i, &outcome, false);
                    aggregator.increment(StatKind::CacheMiss);
                }
            })
        })
        .collect();

    for _ in 0..50 {
        let stats = aggregator.snapshot();
        assert!(stats.attempted() <= stats.total_records);
    }
    for writer in writers {
        writer.join().unwrap();
    }

    let stats = aggregator.snapshot();
    assert_eq!(stats.processed, 2000);
    assert_eq!(stats.skipped, 2000);
    assert_eq!(stats.cache_misses, 4000);
}

#[test]
fn test_default_statistics_shouldBeEmpty() {
    let stats = RunStatistics::default();
    assert_eq!(stats.attempted(), 0);
    assert_eq!(stats.cache_hit_rate(), 0.0);
    assert_eq!(stats.progress_percentage(), 100.0);
}

#[test]
fn test_statistics_serialize_shouldWriteElapsedAsSeconds() {
    let stats = RunStatistics {
        total_records: 1,
        elapsed: std::time::Duration::from_millis(1500),
        ..RunStatistics::default()
    };
    let json = serde_json::to_value(&stats).unwrap();
    assert_eq!(json["elapsed"], 1.5);
    assert_eq!(json["total_records"], 1);
}
