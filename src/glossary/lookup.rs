/*!
 * Lookup client.
 *
 * Resolves one `LookupKey`: cache first, then a single-flight remote call
 * paced by the shared `Pacer`, bounded by a fixed timeout and retried once
 * on transient failures.
 */

use log::{debug, warn};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

use crate::app_config::Config;
use crate::errors::LookupError;
use crate::services::ServicePair;

use super::cache::{CacheStore, Flight};
use super::model::{AnnotationPayload, LookupKey, LookupKind};
use super::pacer::{cancellable_sleep, Pacer};
use super::stats::{StatKind, StatisticsAggregator};

/// Retries after the first attempt for a transient failure
pub const MAX_RETRIES: u32 = 1;

/// Timeouts and retry settings of the lookup client
#[derive(Debug, Clone, PartialEq)]
pub struct LookupSettings {
    pub retry_backoff: Duration,
    pub reading_timeout: Duration,
    pub meaning_timeout: Duration,
}

impl LookupSettings {
    pub fn from_config(config: &Config) -> Self {
        Self {
            retry_backoff: config.services.retry_backoff(),
            reading_timeout: config.services.reading.timeout(),
            meaning_timeout: config.services.meaning.timeout(),
        }
    }

    fn timeout_for(&self, kind: LookupKind) -> Duration {
        match kind {
            LookupKind::Reading => self.reading_timeout,
            LookupKind::Meaning => self.meaning_timeout,
        }
    }
}

impl Default for LookupSettings {
    fn default() -> Self {
        Self::from_config(&Config::default())
    }
}

/// Cache-aware client for the remote services
#[derive(Clone)]
pub struct LookupClient {
    cache: Arc<CacheStore>,
    pacer: Arc<Pacer>,
    services: ServicePair,
    stats: Arc<StatisticsAggregator>,
    settings: LookupSettings,
}

impl LookupClient {
    pub fn new(
        cache: Arc<CacheStore>,
        pacer: Arc<Pacer>,
        services: ServicePair,
        stats: Arc<StatisticsAggregator>,
        settings: LookupSettings,
    ) -> Self {
        Self {
            cache,
            pacer,
            services,
            stats,
            settings,
        }
    }

    pub fn cache(&self) -> &Arc<CacheStore> {
        &self.cache
    }

    pub fn stats(&self) -> &Arc<StatisticsAggregator> {
        &self.stats
    }

    /// Resolve a key to its annotation payload.
    ///
    /// Concurrent calls for the same key share one remote call. Failures are
    /// never cached.
    pub async fn resolve(&self, key: &LookupKey, cancel: &CancellationToken) -> Result<AnnotationPayload, LookupError> {
        if let Some(value) = self.cache.get(key) {
            self.stats.increment(StatKind::CacheHit);
            return Ok(value);
        }
        if cancel.is_cancelled() {
            return Err(LookupError::Cancelled);
        }

        match self.cache.begin_flight(key) {
            Flight::Follower(waiter) => {
                debug!("Waiting for in-flight lookup of {}", key);
                let outcome = waiter.wait(cancel).await;
                if outcome.is_ok() {
                    self.stats.increment(StatKind::CacheHit);
                }
                outcome
            }
            Flight::Leader(guard) => {
                // the previous leader may have stored the value before releasing the key
                if let Some(value) = self.cache.get(key) {
                    self.stats.increment(StatKind::CacheHit);
                    guard.complete(Ok(value.clone()));
                    return Ok(value);
                }

                self.stats.increment(StatKind::CacheMiss);
                let outcome = self.fetch_with_retry(key, cancel).await;
                match &outcome {
                    Ok(value) => self.cache.put(key.clone(), value.clone()),
                    Err(LookupError::Cancelled) => {}
                    Err(e) => {
                        self.stats.increment(StatKind::ApiFailure);
                        warn!("Lookup of {} failed: {}", key, e);
                    }
                }
                guard.complete(outcome.clone());
                outcome
            }
        }
    }

    /// Call the remote service, retrying a transient failure once
    async fn fetch_with_retry(&self, key: &LookupKey, cancel: &CancellationToken) -> Result<AnnotationPayload, LookupError> {
        let service = self.services.for_kind(key.kind());
        let timeout = self.settings.timeout_for(key.kind());
        let mut attempt = 0;

        loop {
            self.pacer.wait_for_slot(cancel).await?;
            self.stats.increment(StatKind::ApiCall);

            // an in-flight call is never aborted by cancellation, only by its timeout
            let result = match tokio::time::timeout(timeout, service.lookup(key.text())).await {
                Ok(result) => result,
                Err(_) => Err(LookupError::Transient(format!(
                    "{} timed out after {:?}",
                    service.name(),
                    timeout
                ))),
            };

            match result {
                Err(e) if e.is_transient() && attempt < MAX_RETRIES => {
                    attempt += 1;
                    self.stats.increment(StatKind::Retry);
                    debug!(
                        "Transient failure for {} ({}), retrying in {:?} - attempt {}/{}",
                        key,
                        e,
                        self.settings.retry_backoff,
                        attempt + 1,
                        MAX_RETRIES + 1
                    );
                    cancellable_sleep(self.settings.retry_backoff, cancel).await?;
                }
                other => return other,
            }
        }
    }
}
