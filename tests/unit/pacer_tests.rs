/*!
 * Tests for outbound call pacing
 */

use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tokio_test::{assert_ok, assert_pending, assert_ready, task};
use tokio_util::sync::CancellationToken;

use kanjigloss::app_config::PerformanceConfig;
use kanjigloss::errors::Cancelled;
use kanjigloss::glossary::pacer::cancellable_sleep;
use kanjigloss::glossary::Pacer;

#[tokio::test(start_paused = true)]
async fn test_wait_for_slot_fromConcurrentTasks_shouldSpaceEveryCall() {
    let pacer = Arc::new(Pacer::new(Duration::from_millis(100), Duration::ZERO));
    let cancel = CancellationToken::new();

    let handles: Vec<_> = (0..5)
        .map(|_| {
            let pacer = Arc::clone(&pacer);
            let cancel = cancel.clone();
            tokio::spawn(async move {
                pacer.wait_for_slot(&cancel).await.map(|_| Instant::now())
            })
        })
        .collect();

    let mut starts = Vec::new();
    for handle in handles {
        starts.push(handle.await.unwrap().unwrap());
    }
    starts.sort();

    for pair in starts.windows(2) {
        assert!(pair[1] - pair[0] >= Duration::from_millis(100));
    }
}

#[tokio::test(start_paused = true)]
async fn test_wait_for_slot_whenCancelledWhileWaiting_shouldReturnCancelled() {
    let pacer = Pacer::new(Duration::from_secs(3600), Duration::ZERO);
    let cancel = CancellationToken::new();
    assert_ok!(pacer.wait_for_slot(&cancel).await);

    let mut waiting = task::spawn(pacer.wait_for_slot(&cancel));
    assert_pending!(waiting.poll());

    cancel.cancel();
    assert!(waiting.is_woken());
    assert_eq!(assert_ready!(waiting.poll()), Err(Cancelled));
}

#[tokio::test]
async fn test_wait_for_slot_withAlreadyCancelledToken_shouldFailFast() {
    let pacer = Pacer::unthrottled();
    let cancel = CancellationToken::new();
    cancel.cancel();
    assert_eq!(pacer.wait_for_slot(&cancel).await, Err(Cancelled));
}

#[tokio::test(start_paused = true)]
async fn test_unthrottled_pacer_shouldNeverWait() {
    let pacer = Pacer::unthrottled();
    let cancel = CancellationToken::new();
    let start = Instant::now();
    for _ in 0..10 {
        assert_ok!(pacer.wait_for_slot(&cancel).await);
    }
    assert_eq!(start.elapsed(), Duration::ZERO);
}

#[tokio::test(start_paused = true)]
async fn test_pause_between_batches_shouldSleepConfiguredPause() {
    let config = PerformanceConfig {
        pause_between_batches_ms: 500,
        ..PerformanceConfig::default()
    };
    let pacer = Pacer::from_config(&config);
    let start = Instant::now();

    assert_ok!(pacer.pause_between_batches(&CancellationToken::new()).await);
    assert!(start.elapsed() >= Duration::from_millis(500));
}

#[tokio::test(start_paused = true)]
async fn test_cancellable_sleep_whenTokenFires_shouldStopEarly() {
    let cancel = CancellationToken::new();
    let trigger = cancel.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_secs(1)).await;
        trigger.cancel();
    });

    let start = Instant::now();
    assert_eq!(cancellable_sleep(Duration::from_secs(60), &cancel).await, Err(Cancelled));
    assert!(start.elapsed() < Duration::from_secs(60));
}
