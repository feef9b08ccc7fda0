use std::collections::HashSet;
use std::sync::Arc;

use tracing::{debug, instrument};

use benefitdb_core::types::{MetaFilter, ScoredResult};
use benefitdb_core::Result;
use benefitdb_text::LocalReranker;

use crate::engine::HybridRetriever;

/// Widens a result list with the rest of a matched document when the hit
/// itself does not identify what it is about (no primary field) but the
/// document carries a code.
pub struct FallbackEscalator {
    retriever: Arc<HybridRetriever>,
    local: LocalReranker,
    max_chunks: usize,
}

impl FallbackEscalator {
    pub fn new(retriever: Arc<HybridRetriever>, local: LocalReranker, max_chunks: usize) -> Self {
        Self { retriever, local, max_chunks }
    }

    /// May return up to `2 * top_k` results when escalation added chunks.
    #[instrument(skip(self, filter))]
    pub async fn search_with_fallback(
        &self,
        query: &str,
        top_k: usize,
        filter: Option<&MetaFilter>,
    ) -> Result<Vec<ScoredResult>> {
        let results = self.retriever.search(query, top_k, filter).await?;

        let mut codes: Vec<String> = Vec::new();
        for r in &results {
            if r.chunk.meta.has_primary_field() {
                continue;
            }
            if let Some(code) = &r.chunk.meta.doc_code {
                if !codes.contains(code) {
                    codes.push(code.clone());
                }
            }
        }
        if codes.is_empty() {
            return Ok(results);
        }

        let mut seen: HashSet<String> = results.iter().map(|r| r.chunk.id.clone()).collect();
        let mut combined = results;
        for code in &codes {
            for chunk in self.retriever.chunks_by_doc_code(code, self.max_chunks).await? {
                if seen.insert(chunk.id.clone()) {
                    combined.push(ScoredResult::escalated(chunk));
                }
            }
        }
        debug!(codes = codes.len(), combined = combined.len(), "escalated by document code");

        if combined.len() > top_k {
            combined = self.local.rerank(query, combined, top_k * 2);
        }
        for (i, r) in combined.iter_mut().enumerate() {
            r.rank = i + 1;
        }
        Ok(combined)
    }
}
