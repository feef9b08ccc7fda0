use async_trait::async_trait;
use tracing::warn;

use crate::error::Result;
use crate::types::{Chunk, MetaFilter, RerankHit, SearchHit};

#[async_trait]
pub trait Embedder: Send + Sync {
    fn dim(&self) -> usize;

    async fn embed(&self, text: &str) -> Result<Vec<f32>>;

    /// One slot per input. A failed item yields `None` and the rest of the
    /// batch still goes through.
    async fn embed_batch(&self, texts: &[String]) -> Vec<Option<Vec<f32>>> {
        let mut out = Vec::with_capacity(texts.len());
        for (i, text) in texts.iter().enumerate() {
            match self.embed(text).await {
                Ok(v) => out.push(Some(v)),
                Err(e) => {
                    warn!(index = i, error = %e, "embedding failed; leaving placeholder");
                    out.push(None);
                }
            }
        }
        out
    }
}

/// L2 nearest-neighbour index over chunk embeddings.
#[async_trait]
pub trait DenseIndex: Send + Sync {
    /// Nearest chunks by ascending distance. With a filter, `3 * k` neighbours
    /// are fetched and narrowed by metadata equality.
    async fn search(
        &self,
        query_vec: &[f32],
        k: usize,
        filter: Option<&MetaFilter>,
    ) -> Result<Vec<SearchHit>>;

    /// Appends chunks that already carry embeddings.
    async fn append(&self, chunks: &[Chunk]) -> Result<()>;

    async fn chunks_by_doc_code(&self, code: &str, limit: usize) -> Result<Vec<Chunk>>;

    async fn count(&self) -> Result<usize>;
}

/// BM25 lexical index.
pub trait SparseIndex: Send + Sync {
    fn search(&self, query: &str, k: usize, filter: Option<&MetaFilter>) -> Result<Vec<SearchHit>>;

    fn append(&self, chunks: &[Chunk]) -> Result<()>;

    fn chunks_by_doc_code(&self, code: &str, limit: usize) -> Result<Vec<Chunk>>;

    fn count(&self) -> Result<usize>;
}

/// External cross-encoder style reranking service.
#[async_trait]
pub trait PrecisionReranker: Send + Sync {
    /// Returns up to `top_n` entries ordered by descending relevance.
    async fn rerank(&self, query: &str, documents: &[String], top_n: usize) -> Result<Vec<RerankHit>>;
}
