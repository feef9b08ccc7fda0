//! Exhaustive in-memory L2 index. Same contract as the LanceDB table, for
//! small corpora and tests.
use std::sync::RwLock;

use async_trait::async_trait;

use benefitdb_core::traits::DenseIndex;
use benefitdb_core::types::{Chunk, MetaFilter, SearchHit, SourceKind};
use benefitdb_core::{Error, Result};

use crate::search::FILTER_OVERFETCH;

/// Squared euclidean distance, matching what LanceDB reports for `L2`.
pub fn l2_squared(a: &[f32], b: &[f32]) -> f32 {
    a.iter().zip(b).map(|(x, y)| (x - y) * (x - y)).sum()
}

#[derive(Default)]
pub struct FlatL2Index {
    dim: usize,
    rows: RwLock<Vec<Chunk>>,
}

impl FlatL2Index {
    pub fn new(dim: usize) -> Self {
        Self { dim, rows: RwLock::new(Vec::new()) }
    }

    pub fn dim(&self) -> usize { self.dim }
}

#[async_trait]
impl DenseIndex for FlatL2Index {
    async fn search(&self, query_vec: &[f32], k: usize, filter: Option<&MetaFilter>) -> Result<Vec<SearchHit>> {
        if query_vec.len() != self.dim {
            return Err(Error::dense(format!("query has {} dimensions, index expects {}", query_vec.len(), self.dim)));
        }
        let rows = self.rows.read().map_err(|_| Error::dense("flat index lock poisoned"))?;
        let mut scored: Vec<(f32, &Chunk)> = rows
            .iter()
            .filter_map(|c| c.embedding.as_deref().map(|e| (l2_squared(query_vec, e), c)))
            .collect();
        scored.sort_by(|a, b| a.0.total_cmp(&b.0).then_with(|| a.1.id.cmp(&b.1.id)));
        let fetch = if filter.is_some() { k * FILTER_OVERFETCH } else { k };
        Ok(scored
            .into_iter()
            .take(fetch)
            .filter(|(_, c)| filter.is_none_or(|f| c.meta.matches(f)))
            .take(k)
            .map(|(d, c)| SearchHit { chunk: Chunk { embedding: None, ..c.clone() }, score: d, raw_score: d, source: SourceKind::Dense })
            .collect())
    }

    async fn append(&self, chunks: &[Chunk]) -> Result<()> {
        for c in chunks {
            match c.embedding.as_ref() {
                Some(e) if e.len() == self.dim => {}
                Some(e) => return Err(Error::dense(format!("chunk {} has {} dimensions, index expects {}", c.id, e.len(), self.dim))),
                None => return Err(Error::dense(format!("chunk {} has no embedding", c.id))),
            }
        }
        let mut rows = self.rows.write().map_err(|_| Error::dense("flat index lock poisoned"))?;
        rows.extend_from_slice(chunks);
        Ok(())
    }

    async fn chunks_by_doc_code(&self, code: &str, limit: usize) -> Result<Vec<Chunk>> {
        let rows = self.rows.read().map_err(|_| Error::dense("flat index lock poisoned"))?;
        let mut out: Vec<Chunk> = rows
            .iter()
            .filter(|c| c.meta.doc_code.as_deref() == Some(code))
            .map(|c| Chunk { embedding: None, ..c.clone() })
            .collect();
        out.sort_by(|a, b| (&a.doc_id, a.meta.chunk_index).cmp(&(&b.doc_id, b.meta.chunk_index)));
        out.truncate(limit);
        Ok(out)
    }

    async fn count(&self) -> Result<usize> {
        Ok(self.rows.read().map_err(|_| Error::dense("flat index lock poisoned"))?.len())
    }
}
