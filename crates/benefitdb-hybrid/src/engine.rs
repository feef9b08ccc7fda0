//! Hybrid retrieval: expand, query both indexes concurrently, fuse, and
//! optionally hand the head of the list to a precision reranker.

use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, RwLock};

use tracing::{debug, info, instrument, warn};

use benefitdb_core::config::{DataPaths, RetrievalSettings};
use benefitdb_core::traits::{DenseIndex, Embedder, PrecisionReranker, SparseIndex};
use benefitdb_core::types::{Chunk, MetaFilter, ScoredResult, SearchHit};
use benefitdb_core::{Error, Result};
use benefitdb_embed::MAX_RERANK_DOCUMENTS;
use benefitdb_text::TantivySparseIndex;
use benefitdb_vector::LanceDenseIndex;

use crate::expander::QueryExpander;
use crate::fusion::{fuse, FusionParams};

pub const MATERIAL_CODE_KEY: &str = "재료코드";
pub const PROCEDURE_CODE_KEY: &str = "시술코드";

/// The pair of indexes a query runs against. Either side may be absent.
#[derive(Clone, Default)]
pub struct IndexSnapshot {
    pub dense: Option<Arc<dyn DenseIndex>>,
    pub sparse: Option<Arc<dyn SparseIndex>>,
}

impl IndexSnapshot {
    pub fn new(dense: Option<Arc<dyn DenseIndex>>, sparse: Option<Arc<dyn SparseIndex>>) -> Self {
        Self { dense, sparse }
    }

    pub fn is_empty(&self) -> bool {
        self.dense.is_none() && self.sparse.is_none()
    }

    /// Opens whatever persisted indexes exist under `paths`. A missing index
    /// is logged and left out.
    pub async fn open(paths: &DataPaths, table: &str, dim: usize) -> Result<Self> {
        let dense: Option<Arc<dyn DenseIndex>> = match LanceDenseIndex::open(&paths.dense_index_dir, table, dim).await {
            Ok(idx) => Some(Arc::new(idx)),
            Err(Error::NotFound(what)) => {
                warn!(%what, "dense index missing");
                None
            }
            Err(e) => return Err(e),
        };
        let sparse: Option<Arc<dyn SparseIndex>> = match TantivySparseIndex::open(&paths.sparse_index_dir) {
            Ok(idx) => Some(Arc::new(idx)),
            Err(Error::NotFound(what)) => {
                warn!(%what, "sparse index missing");
                None
            }
            Err(e) => return Err(e),
        };
        Ok(Self { dense, sparse })
    }
}

/// Query path shared by the CLI and the fallback escalator.
///
/// Indexes sit behind an `Arc` snapshot: a rebuild swaps in a new one while
/// queries already running keep the snapshot they started with.
pub struct HybridRetriever {
    snapshot: RwLock<Arc<IndexSnapshot>>,
    embedder: Arc<dyn Embedder>,
    expander: QueryExpander,
    reranker: Option<Arc<dyn PrecisionReranker>>,
    rerank_enabled: AtomicBool,
    fusion: FusionParams,
    default_top_k: usize,
}

impl HybridRetriever {
    pub fn new(snapshot: IndexSnapshot, embedder: Arc<dyn Embedder>, settings: &RetrievalSettings) -> Self {
        Self {
            snapshot: RwLock::new(Arc::new(snapshot)),
            embedder,
            expander: QueryExpander::default(),
            reranker: None,
            rerank_enabled: AtomicBool::new(false),
            fusion: FusionParams { mode: settings.fusion, weights: settings.weights(), rrf_k: settings.rrf_k },
            default_top_k: settings.top_k,
        }
    }

    /// Installs the precision reranker. `None`, or `enabled = false`, leaves
    /// the stage off for the retriever's lifetime.
    pub fn with_reranker(mut self, reranker: Option<Arc<dyn PrecisionReranker>>, enabled: bool) -> Self {
        if enabled && reranker.is_none() {
            warn!("precision rerank requested but no reranker is configured; stage disabled");
        }
        self.rerank_enabled = AtomicBool::new(enabled && reranker.is_some());
        self.reranker = reranker;
        self
    }

    pub fn rerank_enabled(&self) -> bool {
        self.rerank_enabled.load(Ordering::Relaxed)
    }

    pub fn snapshot(&self) -> Arc<IndexSnapshot> {
        match self.snapshot.read() {
            Ok(guard) => Arc::clone(&guard),
            Err(poisoned) => Arc::clone(&poisoned.into_inner()),
        }
    }

    pub fn swap_indexes(&self, snapshot: IndexSnapshot) {
        let next = Arc::new(snapshot);
        match self.snapshot.write() {
            Ok(mut guard) => *guard = next,
            Err(poisoned) => *poisoned.into_inner() = next,
        }
        info!("index snapshot swapped");
    }

    /// Fused ranking for `query`, at most `top_k` long.
    #[instrument(skip(self, filter), fields(filtered = filter.is_some()))]
    pub async fn search(&self, query: &str, top_k: usize, filter: Option<&MetaFilter>) -> Result<Vec<ScoredResult>> {
        if top_k == 0 {
            return Ok(Vec::new());
        }
        let snapshot = self.snapshot();
        if snapshot.is_empty() {
            return Err(Error::NotIndexed);
        }

        let expanded = self.expander.expand(query);
        let rerank = self.rerank_enabled();
        let width = top_k * if rerank { 4 } else { 2 };
        debug!(%expanded, width, "hybrid search");

        let (dense, sparse) = tokio::join!(
            self.dense_hits(&snapshot, &expanded, width, filter),
            sparse_hits(&snapshot, &expanded, width, filter),
        );
        let (dense, sparse) = (dense?, sparse?);
        if snapshot.dense.is_none() || snapshot.sparse.is_none() {
            warn!(dense = snapshot.dense.is_some(), sparse = snapshot.sparse.is_some(), "degraded retrieval");
        }

        let fused = fuse(&dense, &sparse, &self.fusion);
        debug!(dense = dense.len(), sparse = sparse.len(), fused = fused.len(), "fused");

        if rerank {
            match self.precision_rerank(query, &fused, top_k).await {
                Ok(reranked) => return Ok(reranked),
                Err(e) => {
                    self.rerank_enabled.store(false, Ordering::Relaxed);
                    warn!(error = %e, "precision rerank failed; disabled for this retriever");
                }
            }
        }
        let mut out = fused;
        out.truncate(top_k);
        Ok(out)
    }

    /// Search restricted to chunks whose metadata carries the given codes.
    /// Without a query, one is phrased from the codes.
    #[instrument(skip(self))]
    pub async fn search_by_codes(
        &self,
        material_code: Option<&str>,
        procedure_code: Option<&str>,
        query: Option<&str>,
        top_k: Option<usize>,
    ) -> Result<Vec<ScoredResult>> {
        let material_code = material_code.filter(|c| !c.trim().is_empty());
        let procedure_code = procedure_code.filter(|c| !c.trim().is_empty());
        let mut filter = MetaFilter::new();
        if let Some(m) = material_code {
            filter.insert(MATERIAL_CODE_KEY.to_string(), m.to_string());
        }
        if let Some(p) = procedure_code {
            filter.insert(PROCEDURE_CODE_KEY.to_string(), p.to_string());
        }
        let query = match query.map(str::trim).filter(|q| !q.is_empty()) {
            Some(q) => q.to_string(),
            None => code_query(material_code, procedure_code),
        };
        let filter = (!filter.is_empty()).then_some(filter);
        self.search(&query, top_k.unwrap_or(self.default_top_k), filter.as_ref()).await
    }

    /// Every chunk of the document with this code, from whichever index is
    /// loaded (sparse first), ordered by position.
    pub async fn chunks_by_doc_code(&self, code: &str, limit: usize) -> Result<Vec<Chunk>> {
        let snapshot = self.snapshot();
        if let Some(sparse) = snapshot.sparse.clone() {
            let code = code.to_string();
            return tokio::task::spawn_blocking(move || sparse.chunks_by_doc_code(&code, limit))
                .await
                .map_err(|e| Error::Operation(format!("sparse lookup task: {e}")))?;
        }
        match &snapshot.dense {
            Some(dense) => dense.chunks_by_doc_code(code, limit).await,
            None => Err(Error::NotIndexed),
        }
    }

    async fn dense_hits(
        &self,
        snapshot: &IndexSnapshot,
        query: &str,
        k: usize,
        filter: Option<&MetaFilter>,
    ) -> Result<Vec<SearchHit>> {
        let Some(dense) = &snapshot.dense else { return Ok(Vec::new()) };
        let vector = self.embedder.embed(query).await?;
        dense.search(&vector, k, filter).await
    }

    async fn precision_rerank(&self, query: &str, fused: &[ScoredResult], top_k: usize) -> Result<Vec<ScoredResult>> {
        let Some(reranker) = &self.reranker else {
            return Err(Error::Rerank("no reranker configured".into()));
        };
        let candidates = &fused[..fused.len().min(MAX_RERANK_DOCUMENTS)];
        if candidates.is_empty() {
            return Ok(Vec::new());
        }
        let documents: Vec<String> = candidates.iter().map(|r| r.chunk.text.clone()).collect();
        let hits = reranker.rerank(query, &documents, top_k).await?;

        let mut seen = HashSet::new();
        let mut out = Vec::with_capacity(top_k);
        for hit in hits {
            if out.len() == top_k {
                break;
            }
            let Some(candidate) = candidates.get(hit.index) else { continue };
            if !seen.insert(hit.index) {
                continue;
            }
            out.push(ScoredResult {
                original_score: Some(candidate.fused_score),
                rerank_score: Some(hit.relevance),
                rank: out.len() + 1,
                ..candidate.clone()
            });
        }
        debug!(candidates = candidates.len(), kept = out.len(), "precision rerank");
        Ok(out)
    }
}

async fn sparse_hits(
    snapshot: &IndexSnapshot,
    query: &str,
    k: usize,
    filter: Option<&MetaFilter>,
) -> Result<Vec<SearchHit>> {
    let Some(sparse) = snapshot.sparse.clone() else { return Ok(Vec::new()) };
    let query = query.to_string();
    let filter = filter.cloned();
    tokio::task::spawn_blocking(move || sparse.search(&query, k, filter.as_ref()))
        .await
        .map_err(|e| Error::Operation(format!("sparse search task: {e}")))?
}

fn code_query(material_code: Option<&str>, procedure_code: Option<&str>) -> String {
    let mut parts = Vec::new();
    if let Some(m) = material_code {
        parts.push(format!("{MATERIAL_CODE_KEY} {m}"));
    }
    if let Some(p) = procedure_code {
        parts.push(format!("{PROCEDURE_CODE_KEY} {p}"));
    }
    if parts.is_empty() {
        "보험 인정기준".to_string()
    } else {
        format!("{}의 보험 인정기준", parts.join(" "))
    }
}

#[cfg(test)]
mod tests {
    use super::code_query;

    #[test]
    fn code_queries() {
        assert_eq!(code_query(Some("A12345"), Some("M6561")), "재료코드 A12345 시술코드 M6561의 보험 인정기준");
        assert_eq!(code_query(Some("A12345"), None), "재료코드 A12345의 보험 인정기준");
        assert_eq!(code_query(None, None), "보험 인정기준");
    }
}
