use bm25::{EmbedderBuilder, Scorer};
use tracing::{debug, warn};

use benefitdb_core::types::ScoredResult;

use crate::token_class::{tokenize, TokenClassTokenizer};

pub const DEFAULT_K1: f32 = 1.5;
pub const DEFAULT_B: f32 = 0.75;

/// Cuts an oversized candidate list down with an in-memory BM25 model built
/// over just those candidates. Needs no external service.
#[derive(Debug, Clone, Copy)]
pub struct LocalReranker {
    k1: f32,
    b: f32,
}

impl Default for LocalReranker {
    fn default() -> Self {
        Self::new(DEFAULT_K1, DEFAULT_B)
    }
}

impl LocalReranker {
    pub fn new(k1: f32, b: f32) -> Self {
        Self { k1, b }
    }

    /// Returns at most `top_k` results. Lists already within `top_k` come back
    /// untouched; candidates with no usable tokens are dropped from scoring.
    pub fn rerank(&self, query: &str, results: Vec<ScoredResult>, top_k: usize) -> Vec<ScoredResult> {
        if results.len() <= top_k {
            return results;
        }

        let (candidates, lengths): (Vec<&ScoredResult>, Vec<usize>) = results
            .iter()
            .filter_map(|r| {
                let n = tokenize(&r.chunk.text).len();
                (n > 0).then_some((r, n))
            })
            .unzip();
        if candidates.is_empty() {
            warn!("no candidate produced tokens; keeping input order");
            return results.into_iter().take(top_k).collect();
        }
        if tokenize(query).is_empty() {
            warn!("query produced no tokens; keeping input order");
            return results.into_iter().take(top_k).collect();
        }

        let avgdl = lengths.iter().sum::<usize>() as f32 / lengths.len() as f32;
        let embedder = EmbedderBuilder::<u32, TokenClassTokenizer>::with_avgdl(avgdl).k1(self.k1).b(self.b).build();
        let mut scorer = Scorer::<usize, u32>::new();
        for (i, r) in candidates.iter().enumerate() {
            scorer.upsert(&i, embedder.embed(&r.chunk.text));
        }
        let query_embedding = embedder.embed(query);

        let mut scored: Vec<(f32, &ScoredResult)> = candidates
            .iter()
            .enumerate()
            .map(|(i, r)| (scorer.score(&i, &query_embedding).unwrap_or(0.0), *r))
            .collect();
        // Stable: equal scores keep their incoming order.
        scored.sort_by(|a, b| b.0.total_cmp(&a.0));

        let out: Vec<ScoredResult> = scored
            .into_iter()
            .take(top_k)
            .enumerate()
            .map(|(i, (score, r))| ScoredResult {
                original_score: Some(r.score()),
                rerank_score: Some(score),
                rank: i + 1,
                ..r.clone()
            })
            .collect();
        debug!(input = results.len(), kept = out.len(), "local rerank");
        out
    }
}
