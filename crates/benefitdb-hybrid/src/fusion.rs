//! Merging dense and sparse hit lists into one ranking.
//!
//! Both modes key on the chunk id and break score ties by id ascending, so
//! the output depends only on the hits and never on hash order.

use std::collections::HashMap;

use benefitdb_core::types::{ChunkId, FusionMode, FusionWeights, ScoredResult, SearchHit};

pub const DEFAULT_RRF_K: f32 = 60.0;

/// Similarity used for weighting: `1 / (1 + d)`.
pub fn distance_to_similarity(distance: f32) -> f32 {
    1.0 / (1.0 + distance.max(0.0))
}

#[derive(Debug, Clone, Copy)]
pub struct FusionParams {
    pub mode: FusionMode,
    pub weights: FusionWeights,
    pub rrf_k: f32,
}

impl Default for FusionParams {
    fn default() -> Self {
        Self { mode: FusionMode::Weighted, weights: FusionWeights::default(), rrf_k: DEFAULT_RRF_K }
    }
}

pub fn fuse(dense: &[SearchHit], sparse: &[SearchHit], params: &FusionParams) -> Vec<ScoredResult> {
    match params.mode {
        FusionMode::Weighted => fuse_weighted(dense, sparse, params.weights),
        FusionMode::Rrf => fuse_rrf(dense, sparse, params.weights, params.rrf_k),
    }
}

struct Entry {
    result: ScoredResult,
    dense_rank: Option<usize>,
    sparse_rank: Option<usize>,
}

/// Collects both sides per chunk id: the closest distance, the best sparse
/// score and the first in-side rank of each.
fn collect(dense: &[SearchHit], sparse: &[SearchHit]) -> Vec<Entry> {
    let mut order: Vec<ChunkId> = Vec::new();
    let mut by_id: HashMap<ChunkId, Entry> = HashMap::new();
    let mut slot = |hit: &SearchHit| -> ChunkId {
        if !by_id.contains_key(&hit.chunk.id) {
            order.push(hit.chunk.id.clone());
            let result = ScoredResult::new(hit.chunk.clone());
            by_id.insert(hit.chunk.id.clone(), Entry { result, dense_rank: None, sparse_rank: None });
        }
        hit.chunk.id.clone()
    };

    let mut dense_ids = Vec::with_capacity(dense.len());
    for hit in dense {
        dense_ids.push(slot(hit));
    }
    let mut sparse_ids = Vec::with_capacity(sparse.len());
    for hit in sparse {
        sparse_ids.push(slot(hit));
    }

    for (i, (hit, id)) in dense.iter().zip(&dense_ids).enumerate() {
        if let Some(e) = by_id.get_mut(id) {
            let sim = distance_to_similarity(hit.score);
            if e.result.dense_distance.is_none_or(|d| hit.score < d) {
                e.result.dense_distance = Some(hit.score);
                e.result.dense_similarity = sim;
            }
            e.dense_rank.get_or_insert(i + 1);
        }
    }
    for (i, (hit, id)) in sparse.iter().zip(&sparse_ids).enumerate() {
        if let Some(e) = by_id.get_mut(id) {
            if e.result.sparse_raw.is_none() || hit.score > e.result.sparse_score {
                e.result.sparse_score = hit.score;
                e.result.sparse_raw = Some(hit.raw_score);
            }
            e.sparse_rank.get_or_insert(i + 1);
        }
    }
    order.into_iter().filter_map(|id| by_id.remove(&id)).collect()
}

fn rank(mut results: Vec<ScoredResult>) -> Vec<ScoredResult> {
    results.sort_by(|a, b| b.fused_score.total_cmp(&a.fused_score).then_with(|| a.chunk.id.cmp(&b.chunk.id)));
    for (i, r) in results.iter_mut().enumerate() {
        r.rank = i + 1;
    }
    results
}

/// `fused = wd * 1/(1+d) + ws * sparse`, a missing side contributing zero.
pub fn fuse_weighted(dense: &[SearchHit], sparse: &[SearchHit], weights: FusionWeights) -> Vec<ScoredResult> {
    let results = collect(dense, sparse)
        .into_iter()
        .map(|e| {
            let mut r = e.result;
            r.fused_score = weights.dense * r.dense_similarity + weights.sparse * r.sparse_score;
            r
        })
        .collect();
    rank(results)
}

/// Reciprocal rank fusion: `w / (k + rank)` summed over the sides a chunk
/// appears in, with 1-based in-side ranks.
pub fn fuse_rrf(dense: &[SearchHit], sparse: &[SearchHit], weights: FusionWeights, k: f32) -> Vec<ScoredResult> {
    let results = collect(dense, sparse)
        .into_iter()
        .map(|e| {
            let mut r = e.result;
            let d = e.dense_rank.map_or(0.0, |rk| weights.dense / (k + rk as f32));
            let s = e.sparse_rank.map_or(0.0, |rk| weights.sparse / (k + rk as f32));
            r.fused_score = d + s;
            r
        })
        .collect();
    rank(results)
}
