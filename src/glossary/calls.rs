/*!
 * Call pool: bounded fan-out of lookups for one record.
 */

use futures::stream::{self, StreamExt};
use std::collections::{HashMap, HashSet};
use tokio_util::sync::CancellationToken;

use crate::errors::LookupError;

use super::lookup::LookupClient;
use super::model::{AnnotationPayload, KeyFailure, LookupKey, RecordStatus};

/// Outcome of every requested key
#[derive(Debug, Clone, Default)]
pub struct CallResults {
    results: HashMap<LookupKey, Result<AnnotationPayload, LookupError>>,
}

impl CallResults {
    pub fn get(&self, key: &LookupKey) -> Option<&Result<AnnotationPayload, LookupError>> {
        self.results.get(key)
    }

    /// Successful payload of a key, if any
    pub fn value(&self, key: &LookupKey) -> Option<&AnnotationPayload> {
        self.results.get(key).and_then(|r| r.as_ref().ok())
    }

    pub fn contains(&self, key: &LookupKey) -> bool {
        self.results.contains_key(key)
    }

    pub fn merge(&mut self, other: CallResults) {
        self.results.extend(other.results);
    }

    pub fn len(&self) -> usize {
        self.results.len()
    }

    pub fn is_empty(&self) -> bool {
        self.results.is_empty()
    }

    pub fn succeeded(&self) -> usize {
        self.results.values().filter(|r| r.is_ok()).count()
    }

    pub fn failed(&self) -> usize {
        self.results.values().filter(|r| r.is_err()).count()
    }

    pub fn status(&self) -> RecordStatus {
        RecordStatus::from_counts(self.succeeded(), self.failed())
    }

    /// Failed keys, sorted by key
    pub fn failures(&self) -> Vec<KeyFailure> {
        let mut failures: Vec<KeyFailure> = self
            .results
            .iter()
            .filter_map(|(key, result)| {
                result.as_ref().err().map(|error| KeyFailure {
                    key: key.clone(),
                    error: error.clone(),
                })
            })
            .collect();
        failures.sort_by(|a, b| a.key.cmp(&b.key));
        failures
    }
}

/// Runs lookups with at most `workers` in flight
#[derive(Clone)]
pub struct CallPool {
    client: LookupClient,
    workers: usize,
}

impl CallPool {
    pub fn new(client: LookupClient, workers: usize) -> Self {
        Self {
            client,
            workers: workers.max(1),
        }
    }

    pub fn client(&self) -> &LookupClient {
        &self.client
    }

    /// Resolve every key; one key failing never cancels its siblings.
    ///
    /// Duplicate keys are resolved once. Keys are started in the order given.
    pub async fn run_all(&self, keys: Vec<LookupKey>, cancel: &CancellationToken) -> CallResults {
        let mut seen = HashSet::new();
        let unique: Vec<LookupKey> = keys.into_iter().filter(|k| seen.insert(k.clone())).collect();

        let results = stream::iter(unique)
            .map(|key| {
                let client = &self.client;
                async move {
                    let result = client.resolve(&key, cancel).await;
                    (key, result)
                }
            })
            .buffer_unordered(self.workers)
            .collect::<HashMap<_, _>>()
            .await;

        CallResults { results }
    }
}
