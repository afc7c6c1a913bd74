/*!
 * Tests for the cache-aware lookup client
 */

use futures::future::join_all;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

use kanjigloss::errors::LookupError;
use kanjigloss::glossary::{
    AnnotationPayload, CacheStore, LookupClient, LookupKey, LookupSettings, Pacer, StatisticsAggregator,
};

use crate::common::{self, MockService};

struct Fixture {
    client: LookupClient,
    reading: Arc<MockService>,
    meaning: Arc<MockService>,
    cache: Arc<CacheStore>,
    stats: Arc<StatisticsAggregator>,
}

fn fixture() -> Fixture {
    let (reading, meaning, services) = common::mock_services();
    let cache = Arc::new(CacheStore::in_memory(1024 * 1024));
    let stats = Arc::new(StatisticsAggregator::new(0));
    let client = common::lookup_client(Arc::clone(&cache), services, Arc::clone(&stats));
    Fixture {
        client,
        reading,
        meaning,
        cache,
        stats,
    }
}

fn server_error() -> LookupError {
    LookupError::Transient("503 Service Unavailable".to_string())
}

#[tokio::test]
async fn test_resolve_withCachedValue_shouldNotCallService() {
    let f = fixture();
    let key = LookupKey::reading("あ");
    f.cache.put(
        key.clone(),
        AnnotationPayload::Reading {
            romaji: "a".to_string(),
        },
    );

    let value = f.client.resolve(&key, &CancellationToken::new()).await.unwrap();

    assert_eq!(value.romaji(), Some("a"));
    assert_eq!(f.reading.call_count(), 0);
    let stats = f.stats.snapshot();
    assert_eq!(stats.cache_hits, 1);
    assert_eq!(stats.api_calls, 0);
}

#[tokio::test]
async fn test_resolve_withMiss_shouldCallOnceAndCache() {
    let f = fixture();
    let cancel = CancellationToken::new();
    let key = LookupKey::meaning('日');
    f.meaning.respond_kanji("日", &["day", "sun"], &["ひ"], &["ニチ"]);

    let first = f.client.resolve(&key, &cancel).await.unwrap();
    let second = f.client.resolve(&key, &cancel).await.unwrap();

    assert_eq!(first, second);
    assert_eq!(first.kanji_info().unwrap().meanings, vec!["day", "sun"]);
    assert_eq!(f.meaning.calls_for("日"), 1);
    assert!(f.cache.contains(&key));

    let stats = f.stats.snapshot();
    assert_eq!(stats.cache_misses, 1);
    assert_eq!(stats.cache_hits, 1);
    assert_eq!(stats.api_calls, 1);
}

#[tokio::test]
async fn test_resolve_withTransientThenSuccess_shouldRetryOnce() {
    let f = fixture();
    f.reading.fail_next("か", server_error());

    let value = f
        .client
        .resolve(&LookupKey::reading("か"), &CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(value.romaji(), Some("romaji(か)"));
    assert_eq!(f.reading.calls_for("か"), 2);
    let stats = f.stats.snapshot();
    assert_eq!(stats.retries, 1);
    assert_eq!(stats.api_calls, 2);
    assert_eq!(stats.api_failures, 0);
}

#[tokio::test]
async fn test_resolve_withTwoTransientFailures_shouldGiveUpAfterOneRetry() {
    let f = fixture();
    let key = LookupKey::reading("き");
    f.reading.fail_next("き", server_error());
    f.reading.fail_next("き", server_error());

    let result = f.client.resolve(&key, &CancellationToken::new()).await;

    assert!(matches!(result, Err(LookupError::Transient(_))));
    assert_eq!(f.reading.calls_for("き"), 2);
    assert!(!f.cache.contains(&key));
    let stats = f.stats.snapshot();
    assert_eq!(stats.retries, 1);
    assert_eq!(stats.api_failures, 1);

    // failures are not cached: the next resolve calls the service again
    let retried = f.client.resolve(&key, &CancellationToken::new()).await;
    assert!(retried.is_ok());
    assert_eq!(f.reading.calls_for("き"), 3);
}

#[tokio::test]
async fn test_resolve_withMalformedResponse_shouldNotRetry() {
    let f = fixture();
    f.meaning
        .fail_always("語", LookupError::MalformedResponse("missing field `kanji`".to_string()));

    let result = f
        .client
        .resolve(&LookupKey::meaning('語'), &CancellationToken::new())
        .await;

    assert!(matches!(result, Err(LookupError::MalformedResponse(_))));
    assert_eq!(f.meaning.calls_for("語"), 1);
    assert_eq!(f.stats.snapshot().retries, 0);
}

#[tokio::test]
async fn test_resolve_withRejectedRequest_shouldNotRetry() {
    let f = fixture();
    f.meaning.fail_always(
        "本",
        LookupError::Rejected {
            status_code: 404,
            message: "not found".to_string(),
        },
    );

    let result = f.client.resolve(&LookupKey::meaning('本'), &CancellationToken::new()).await;

    assert!(matches!(result, Err(LookupError::Rejected { status_code: 404, .. })));
    assert_eq!(f.meaning.call_count(), 1);
}

#[tokio::test]
async fn test_resolve_fromManyConcurrentCallers_shouldIssueSingleCall() {
    let f = fixture();
    f.meaning.set_delay(Duration::from_millis(50));
    let cancel = CancellationToken::new();
    let key = LookupKey::meaning('山');

    let results = join_all((0..10).map(|_| f.client.resolve(&key, &cancel))).await;

    assert!(results.iter().all(|r| r.is_ok()));
    assert_eq!(f.meaning.calls_for("山"), 1);
    assert_eq!(f.cache.in_flight(), 0);
    let stats = f.stats.snapshot();
    assert_eq!(stats.cache_misses, 1);
    assert_eq!(stats.cache_hits, 9);
    assert_eq!(stats.api_calls, 1);
}

#[tokio::test]
async fn test_resolve_fromConcurrentCallersWithFailure_shouldShareTheError() {
    let f = fixture();
    f.meaning.set_delay(Duration::from_millis(20));
    f.meaning.fail_always("川", server_error());
    let cancel = CancellationToken::new();
    let key = LookupKey::meaning('川');

    let results = join_all((0..5).map(|_| f.client.resolve(&key, &cancel))).await;

    assert!(results.iter().all(|r| matches!(r, Err(LookupError::Transient(_)))));
    // one leader call plus its single retry
    assert_eq!(f.meaning.calls_for("川"), 2);
    assert_eq!(f.cache.in_flight(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_resolve_withSlowService_shouldTimeOutAndRetryOnce() {
    let (reading, _meaning, services) = common::mock_services();
    reading.set_delay(Duration::from_secs(30));
    let settings = LookupSettings {
        retry_backoff: Duration::from_millis(10),
        reading_timeout: Duration::from_millis(100),
        meaning_timeout: Duration::from_millis(100),
    };
    let client = LookupClient::new(
        Arc::new(CacheStore::in_memory(1024)),
        Arc::new(Pacer::unthrottled()),
        services,
        Arc::new(StatisticsAggregator::new(0)),
        settings,
    );

    let result = client.resolve(&LookupKey::reading("す"), &CancellationToken::new()).await;

    assert!(matches!(result, Err(LookupError::Transient(message)) if message.contains("timed out")));
    assert_eq!(reading.calls_for("す"), 2);
}

#[tokio::test]
async fn test_resolve_withCancelledToken_shouldNotCallService() {
    let f = fixture();
    let cancel = CancellationToken::new();
    cancel.cancel();

    let result = f.client.resolve(&LookupKey::reading("せ"), &cancel).await;

    assert_eq!(result, Err(LookupError::Cancelled));
    assert_eq!(f.reading.call_count(), 0);
    assert_eq!(f.stats.snapshot().api_failures, 0);
}

#[tokio::test]
async fn test_resolve_withCancelDuringBackoff_shouldReturnCancelled() {
    let (reading, _meaning, services) = common::mock_services();
    reading.fail_always("そ", server_error());
    let settings = LookupSettings {
        retry_backoff: Duration::from_secs(3600),
        ..common::fast_settings()
    };
    let client = LookupClient::new(
        Arc::new(CacheStore::in_memory(1024)),
        Arc::new(Pacer::unthrottled()),
        services,
        Arc::new(StatisticsAggregator::new(0)),
        settings,
    );
    let cancel = CancellationToken::new();
    let trigger = cancel.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(20)).await;
        trigger.cancel();
    });

    let result = client.resolve(&LookupKey::reading("そ"), &cancel).await;

    assert_eq!(result, Err(LookupError::Cancelled));
    assert_eq!(reading.calls_for("そ"), 1);
}
