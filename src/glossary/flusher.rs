/*!
 * Periodic background flush of the lookup cache.
 */

use log::{debug, warn};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

use crate::errors::CacheError;

use super::cache::{CacheStore, FlushReport};

/// Background task flushing a dirty cache on a fixed interval
pub struct CacheFlusher {
    cache: Arc<CacheStore>,
    stop: CancellationToken,
    handle: Option<JoinHandle<()>>,
}

impl CacheFlusher {
    /// Spawn the flush loop. With `None` no task is started and only the
    /// final flush of `shutdown` happens.
    pub fn start(cache: Arc<CacheStore>, interval: Option<Duration>) -> Self {
        let stop = CancellationToken::new();
        let handle = interval
            .filter(|i| !i.is_zero() && cache.is_enabled())
            .map(|period| tokio::spawn(flush_loop(Arc::clone(&cache), period, stop.clone())));

        if let Some(period) = interval {
            debug!("Cache flusher started with interval {:?}", period);
        }

        Self { cache, stop, handle }
    }

    pub fn is_running(&self) -> bool {
        self.handle.as_ref().is_some_and(|h| !h.is_finished())
    }

    /// Stop the loop, wait for it and write the cache one last time
    pub async fn shutdown(mut self) -> Result<FlushReport, CacheError> {
        self.stop.cancel();
        if let Some(handle) = self.handle.take() {
            if let Err(e) = handle.await {
                warn!("Cache flusher task ended abnormally: {}", e);
            }
        }
        self.cache.flush_async().await
    }
}

impl Drop for CacheFlusher {
    fn drop(&mut self) {
        self.stop.cancel();
    }
}

async fn flush_loop(cache: Arc<CacheStore>, period: Duration, stop: CancellationToken) {
    let mut ticker = interval_at(Instant::now() + period, period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = stop.cancelled() => break,
            _ = ticker.tick() => {
                if !cache.is_dirty() {
                    continue;
                }
                match cache.flush_async().await {
                    Ok(report) => debug!("Periodic cache flush wrote {} entries", report.entries),
                    Err(e) => warn!("Periodic cache flush failed: {}", e),
                }
            }
        }
    }
}
