use async_trait::async_trait;
use log::debug;
use reqwest::Client;

use crate::errors::LookupError;
use crate::glossary::model::{AnnotationPayload, KanjiInfo};

use super::{build_http_client, get_text, LookupService};

const SERVICE_NAME: &str = "kanjiapi";

/// Meaning-lookup client
///
/// `GET {base}/kanji/{character}` answers a JSON object with the readings,
/// meanings and metadata of the character.
#[derive(Debug)]
pub struct KanjiService {
    client: Client,
    base_url: String,
}

impl KanjiService {
    pub fn new(base_url: &str) -> anyhow::Result<Self> {
        url::Url::parse(base_url)?;
        Ok(Self {
            client: build_http_client()?,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }

    pub fn url_for(&self, kanji: &str) -> String {
        format!("{}/kanji/{}", self.base_url, kanji)
    }

    /// Decode a response body, checking it describes the requested character
    pub fn parse_response(kanji: &str, body: &str) -> Result<KanjiInfo, LookupError> {
        let info: KanjiInfo = serde_json::from_str(body)
            .map_err(|e| LookupError::MalformedResponse(format!("{}: {}", SERVICE_NAME, e)))?;

        if info.kanji != kanji {
            return Err(LookupError::MalformedResponse(format!(
                "{}: asked for '{}' but got '{}'",
                SERVICE_NAME, kanji, info.kanji
            )));
        }
        Ok(info)
    }
}

#[async_trait]
impl LookupService for KanjiService {
    fn name(&self) -> &str {
        SERVICE_NAME
    }

    async fn lookup(&self, text: &str) -> Result<AnnotationPayload, LookupError> {
        debug!("Looking up kanji '{}'", text);
        let request = self.client.get(self.url_for(text));
        let body = get_text(SERVICE_NAME, request).await?;
        Ok(AnnotationPayload::Kanji(Self::parse_response(text, &body)?))
    }
}
