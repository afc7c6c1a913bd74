/*!
 * Remote lookup services.
 *
 * This module contains client implementations for the two remote services:
 * - `RomajiService`: reading conversion (kana and readings to romaji)
 * - `KanjiService`: kanji readings and English meanings
 *
 * Clients perform exactly one HTTP call per `lookup` and classify failures;
 * retries, pacing and timeouts are applied by the lookup client.
 */

use async_trait::async_trait;
use reqwest::StatusCode;
use std::fmt::Debug;
use std::sync::Arc;
use std::time::Duration;

use crate::app_config::ServicesConfig;
use crate::errors::LookupError;
use crate::glossary::model::{AnnotationPayload, LookupKind};

pub mod kanji;
pub mod romaji;

pub use kanji::KanjiService;
pub use romaji::RomajiService;

/// Common trait for the remote lookup services
///
/// Implementations must be usable from many tasks at once.
#[async_trait]
pub trait LookupService: Send + Sync + Debug {
    /// Short name used in logs
    fn name(&self) -> &str;

    /// Resolve one normalized lookup text
    ///
    /// # Arguments
    /// * `text` - Kana fragment or reading for the reading service, a single
    ///   kanji for the meaning service
    ///
    /// # Returns
    /// * `Result<AnnotationPayload, LookupError>` - The payload or a classified error
    async fn lookup(&self, text: &str) -> Result<AnnotationPayload, LookupError>;
}

/// The service used for each lookup kind
#[derive(Debug, Clone)]
pub struct ServicePair {
    pub reading: Arc<dyn LookupService>,
    pub meaning: Arc<dyn LookupService>,
}

impl ServicePair {
    pub fn new(reading: Arc<dyn LookupService>, meaning: Arc<dyn LookupService>) -> Self {
        Self { reading, meaning }
    }

    /// HTTP clients for the configured endpoints
    pub fn from_config(config: &ServicesConfig) -> anyhow::Result<Self> {
        Ok(Self {
            reading: Arc::new(RomajiService::new(&config.reading.base_url)?),
            meaning: Arc::new(KanjiService::new(&config.meaning.base_url)?),
        })
    }

    pub fn for_kind(&self, kind: LookupKind) -> &Arc<dyn LookupService> {
        match kind {
            LookupKind::Reading => &self.reading,
            LookupKind::Meaning => &self.meaning,
        }
    }
}

/// Shared HTTP client settings for both services
pub(crate) fn build_http_client() -> anyhow::Result<reqwest::Client> {
    reqwest::Client::builder()
        .pool_idle_timeout(Duration::from_secs(90))
        .pool_max_idle_per_host(16)
        .tcp_keepalive(Duration::from_secs(60))
        .build()
        .map_err(|e| anyhow::anyhow!("Failed to build HTTP client: {}", e))
}

/// Classify a transport-level failure
pub(crate) fn classify_request_error(service: &str, error: reqwest::Error) -> LookupError {
    if error.is_decode() {
        return LookupError::MalformedResponse(format!("{}: {}", service, error));
    }
    // timeouts, connection resets and everything else on the wire are worth one retry
    LookupError::Transient(format!("{}: {}", service, error))
}

/// Classify a non-success HTTP status
pub(crate) fn classify_status(service: &str, status: StatusCode, body: &str) -> LookupError {
    let message = truncate_body(body);
    if status.is_server_error() || status == StatusCode::TOO_MANY_REQUESTS || status == StatusCode::REQUEST_TIMEOUT {
        LookupError::Transient(format!("{} returned {}: {}", service, status, message))
    } else {
        LookupError::Rejected {
            status_code: status.as_u16(),
            message: format!("{}: {}", service, message),
        }
    }
}

fn truncate_body(body: &str) -> String {
    if body.chars().count() > 200 {
        format!("{}...", body.chars().take(200).collect::<String>())
    } else {
        body.to_string()
    }
}

/// Issue a GET and return the body of a successful response
pub(crate) async fn get_text(service: &str, request: reqwest::RequestBuilder) -> Result<String, LookupError> {
    let response = request
        .send()
        .await
        .map_err(|e| classify_request_error(service, e))?;

    let status = response.status();
    let body = response
        .text()
        .await
        .map_err(|e| classify_request_error(service, e))?;

    if !status.is_success() {
        return Err(classify_status(service, status, &body));
    }
    Ok(body)
}
