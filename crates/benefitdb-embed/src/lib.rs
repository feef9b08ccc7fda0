//! Embedding and precision-rerank clients.
//!
//! Both services are reached over HTTP JSON. A deterministic hashing
//! embedder stands in for the embedding service in tests and offline runs.
use std::sync::Arc;

use tracing::info;

use benefitdb_core::config::{EmbeddingSettings, RerankSettings};
use benefitdb_core::traits::{Embedder, PrecisionReranker};
use benefitdb_core::{Error, Result};

mod hashing;
mod http;
mod rerank;

pub use hashing::HashEmbedder;
pub use http::HttpEmbedder;
pub use rerank::{HttpReranker, MAX_RERANK_DOCUMENTS};

pub const FAKE_EMBEDDINGS_ENV: &str = "APP_USE_FAKE_EMBEDDINGS";

fn fake_requested() -> bool {
    std::env::var(FAKE_EMBEDDINGS_ENV)
        .ok()
        .is_some_and(|v| v == "1" || v.eq_ignore_ascii_case("true"))
}

/// Picks the embedder for these settings. The hashing embedder wins when
/// `fake` is set or `APP_USE_FAKE_EMBEDDINGS` is truthy.
pub fn get_default_embedder(settings: &EmbeddingSettings) -> Result<Arc<dyn Embedder>> {
    if settings.fake || fake_requested() {
        info!(dim = settings.dimensions, "using hashing embedder");
        return Ok(Arc::new(HashEmbedder::new(settings.dimensions)));
    }
    let Some(endpoint) = settings.endpoint.as_deref() else {
        return Err(Error::InvalidConfig(
            "embedding.endpoint is required unless embedding.fake is set".into(),
        ));
    };
    info!(endpoint, model = %settings.model, "using HTTP embedder");
    Ok(Arc::new(HttpEmbedder::new(endpoint, settings)?))
}

/// `None` when no rerank endpoint is configured.
pub fn get_precision_reranker(settings: &RerankSettings) -> Result<Option<Arc<dyn PrecisionReranker>>> {
    match settings.endpoint.as_deref() {
        Some(endpoint) => Ok(Some(Arc::new(HttpReranker::new(endpoint, settings)?))),
        None => Ok(None),
    }
}
