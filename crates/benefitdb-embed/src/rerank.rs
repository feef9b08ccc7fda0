use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::{debug, instrument};

use benefitdb_core::config::RerankSettings;
use benefitdb_core::traits::PrecisionReranker;
use benefitdb_core::types::RerankHit;
use benefitdb_core::{Error, Result};

/// Per-call document cap of the rerank service.
pub const MAX_RERANK_DOCUMENTS: usize = 100;

#[derive(Debug, Serialize)]
struct RerankRequest<'a> {
    model: &'a str,
    query: &'a str,
    documents: &'a [String],
    top_n: usize,
    return_documents: bool,
}

#[derive(Debug, Deserialize)]
struct RerankResponse {
    results: Vec<RerankResult>,
}

#[derive(Debug, Deserialize)]
struct RerankResult {
    index: usize,
    relevance_score: f32,
}

#[derive(Debug, Clone)]
pub struct HttpReranker {
    client: reqwest::Client,
    endpoint: String,
    api_key: Option<String>,
    model: String,
}

impl HttpReranker {
    pub fn new(endpoint: &str, settings: &RerankSettings) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_millis(settings.timeout_ms))
            .build()
            .map_err(|e| Error::InvalidConfig(format!("rerank client: {e}")))?;
        Ok(Self {
            client,
            endpoint: endpoint.to_string(),
            api_key: settings.api_key.clone(),
            model: settings.model.clone(),
        })
    }
}

#[async_trait]
impl PrecisionReranker for HttpReranker {
    #[instrument(skip_all, fields(documents = documents.len(), top_n = top_n))]
    async fn rerank(&self, query: &str, documents: &[String], top_n: usize) -> Result<Vec<RerankHit>> {
        let documents = &documents[..documents.len().min(MAX_RERANK_DOCUMENTS)];
        if documents.is_empty() || top_n == 0 {
            return Ok(Vec::new());
        }
        let body = RerankRequest {
            model: &self.model,
            query,
            documents,
            top_n: top_n.min(documents.len()),
            return_documents: false,
        };
        let mut req = self.client.post(&self.endpoint).json(&body);
        if let Some(key) = &self.api_key {
            req = req.bearer_auth(key);
        }
        let resp = req.send().await.map_err(|e| Error::Rerank(e.to_string()))?;
        let status = resp.status();
        if !status.is_success() {
            return Err(Error::Rerank(format!("status {status}")));
        }
        let parsed: RerankResponse = resp
            .json()
            .await
            .map_err(|e| Error::Rerank(format!("malformed response: {e}")))?;

        let mut hits = Vec::with_capacity(parsed.results.len());
        for r in parsed.results {
            if r.index >= documents.len() {
                return Err(Error::Rerank(format!("index {} out of range", r.index)));
            }
            hits.push(RerankHit { index: r.index, relevance: r.relevance_score });
        }
        hits.sort_by(|a, b| b.relevance.total_cmp(&a.relevance));
        hits.truncate(top_n);
        debug!(hits = hits.len(), "reranked");
        Ok(hits)
    }
}
