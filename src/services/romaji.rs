use async_trait::async_trait;
use log::debug;
use reqwest::Client;
use serde::Deserialize;
use url::Url;

use crate::errors::LookupError;
use crate::glossary::model::AnnotationPayload;

use super::{build_http_client, get_text, LookupService};

const SERVICE_NAME: &str = "romaji2kana";

/// Reading-conversion client
///
/// `GET {base}/v1/to/romaji?q={text}` answers `{"a": "<romaji>"}`.
#[derive(Debug)]
pub struct RomajiService {
    client: Client,
    endpoint: Url,
}

#[derive(Debug, Deserialize)]
struct ConversionResponse {
    a: Option<String>,
}

impl RomajiService {
    pub fn new(base_url: &str) -> anyhow::Result<Self> {
        let endpoint = Url::parse(&format!("{}/v1/to/romaji", base_url.trim_end_matches('/')))?;
        Ok(Self {
            client: build_http_client()?,
            endpoint,
        })
    }

    pub fn endpoint(&self) -> &Url {
        &self.endpoint
    }

    /// Extract the romaji from a response body
    pub fn parse_response(body: &str) -> Result<String, LookupError> {
        let response: ConversionResponse = serde_json::from_str(body)
            .map_err(|e| LookupError::MalformedResponse(format!("{}: {}", SERVICE_NAME, e)))?;

        match response.a {
            Some(romaji) if !romaji.trim().is_empty() => Ok(romaji.trim().to_string()),
            _ => Err(LookupError::MalformedResponse(format!(
                "{}: response has no conversion",
                SERVICE_NAME
            ))),
        }
    }
}

#[async_trait]
impl LookupService for RomajiService {
    fn name(&self) -> &str {
        SERVICE_NAME
    }

    async fn lookup(&self, text: &str) -> Result<AnnotationPayload, LookupError> {
        debug!("Converting '{}' to romaji", text);
        let request = self.client.get(self.endpoint.clone()).query(&[("q", text)]);
        let body = get_text(SERVICE_NAME, request).await?;
        let romaji = Self::parse_response(&body)?;
        Ok(AnnotationPayload::Reading { romaji })
    }
}
