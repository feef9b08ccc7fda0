use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::{debug, instrument};

use benefitdb_core::config::EmbeddingSettings;
use benefitdb_core::traits::Embedder;
use benefitdb_core::{Error, Result};

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct EmbedRequest<'a> {
    input_text: &'a str,
    dimensions: usize,
    normalize: bool,
}

#[derive(Debug, Deserialize)]
struct EmbedResponse {
    embedding: Vec<f32>,
}

/// One request per text against an embedding endpoint. No retries; a
/// timeout surfaces as `Error::Embedding`.
#[derive(Debug, Clone)]
pub struct HttpEmbedder {
    client: reqwest::Client,
    endpoint: String,
    api_key: Option<String>,
    dimensions: usize,
}

impl HttpEmbedder {
    pub fn new(endpoint: &str, settings: &EmbeddingSettings) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_millis(settings.timeout_ms))
            .build()
            .map_err(|e| Error::InvalidConfig(format!("embedding client: {e}")))?;
        Ok(Self {
            client,
            endpoint: endpoint.to_string(),
            api_key: settings.api_key.clone(),
            dimensions: settings.dimensions,
        })
    }
}

#[async_trait]
impl Embedder for HttpEmbedder {
    fn dim(&self) -> usize {
        self.dimensions
    }

    #[instrument(skip_all, fields(chars = text.chars().count()))]
    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        let body = EmbedRequest { input_text: text, dimensions: self.dimensions, normalize: true };
        let mut req = self.client.post(&self.endpoint).json(&body);
        if let Some(key) = &self.api_key {
            req = req.bearer_auth(key);
        }
        let resp = req.send().await.map_err(|e| Error::Embedding(e.to_string()))?;
        let status = resp.status();
        if !status.is_success() {
            let text = resp.text().await.unwrap_or_default();
            return Err(Error::Embedding(format!("status {status}: {text}")));
        }
        let parsed: EmbedResponse = resp
            .json()
            .await
            .map_err(|e| Error::Embedding(format!("malformed response: {e}")))?;
        if parsed.embedding.len() != self.dimensions {
            return Err(Error::Embedding(format!(
                "expected {} dimensions, got {}",
                self.dimensions,
                parsed.embedding.len()
            )));
        }
        debug!("embedded");
        Ok(parsed.embedding)
    }
}
