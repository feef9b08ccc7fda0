use std::collections::BTreeMap;

use benefitdb_core::traits::SparseIndex;
use benefitdb_core::types::{Chunk, ChunkMeta, ScoredResult};
use benefitdb_text::{LocalReranker, TantivySparseIndex};
use proptest::prelude::*;
use tempfile::TempDir;

fn chunk(doc: &str, idx: usize, text: &str, code: Option<&str>, extra: &[(&str, &str)]) -> Chunk {
    Chunk {
        id: Chunk::make_id(doc, idx),
        doc_id: doc.to_string(),
        text: text.to_string(),
        meta: ChunkMeta {
            filename: format!("{doc}.pdf"),
            file_type: "pdf".to_string(),
            chunk_index: idx,
            doc_code: code.map(str::to_string),
            extra: extra.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect(),
            ..ChunkMeta::default()
        },
        embedding: None,
    }
}

fn corpus() -> Vec<Chunk> {
    vec![
        chunk("brain", 0, "직경 10mm이상의 비파열성 뇌동맥류 급여대상", Some("B-1"), &[("재료코드", "A12345")]),
        chunk("brain", 1, "Flow-diverter 색전술 급여개수 1개", Some("B-1"), &[("재료코드", "A99999")]),
        chunk("heart", 0, "경피적 관상동맥 스텐트 삽입술 LAD 병변", Some("H-7"), &[]),
        chunk("misc", 0, "치료재료 목록 안내", None, &[("재료코드", "A12345")]),
    ]
}

#[test]
fn search_scores_are_normalized_and_sorted() {
    let index = TantivySparseIndex::in_memory().expect("index");
    index.append(&corpus()).expect("append");
    assert_eq!(index.count().expect("count"), 4);

    let hits = index.search("뇌동맥류 급여대상 급여개수", 10, None).expect("search");
    assert!(hits.len() >= 2);
    assert_eq!(hits[0].chunk.id, "brain:0");
    assert!((hits[0].score - 1.0).abs() < 1e-6);
    for pair in hits.windows(2) {
        assert!(pair[0].raw_score >= pair[1].raw_score);
        assert!(pair[1].score <= 1.0 && pair[1].score > 0.0);
    }
    for h in &hits {
        assert!((h.score - h.raw_score / hits[0].raw_score).abs() < 1e-6);
    }
}

#[test]
fn query_syntax_characters_are_plain_terms() {
    let index = TantivySparseIndex::in_memory().expect("index");
    index.append(&corpus()).expect("append");
    let hits = index.search("LAD AND (C++) 스텐트 -", 5, None).expect("no parse error");
    assert!(hits.iter().any(|h| h.chunk.id == "heart:0"));
    assert!(index.search("   ", 5, None).expect("empty").is_empty());
    assert!(index.search("없는단어", 5, None).expect("miss").is_empty());
}

#[test]
fn filter_keeps_only_matching_metadata() {
    let index = TantivySparseIndex::in_memory().expect("index");
    index.append(&corpus()).expect("append");
    let filter: BTreeMap<String, String> = [("재료코드".to_string(), "A12345".to_string())].into();
    let hits = index.search("뇌동맥류 치료재료 색전술", 5, Some(&filter)).expect("search");
    assert!(!hits.is_empty());
    for h in &hits {
        assert_eq!(h.chunk.meta.get("재료코드").as_deref(), Some("A12345"));
    }
}

#[test]
fn index_round_trips_through_its_directory() {
    let tmp = TempDir::new().expect("tmp");
    let dir = tmp.path().join("tantivy");
    {
        let index = TantivySparseIndex::create(&dir).expect("create");
        index.append(&corpus()).expect("append");
    }
    let reopened = TantivySparseIndex::open(&dir).expect("open");
    let hits = reopened.search("스텐트", 3, None).expect("search");
    assert_eq!(hits.len(), 1);
    let c = &hits[0].chunk;
    assert_eq!(c.id, "heart:0");
    assert_eq!(c.meta.doc_code.as_deref(), Some("H-7"));
    assert_eq!(c.meta.filename, "heart.pdf");
}

#[test]
fn open_missing_directory_is_not_found() {
    let tmp = TempDir::new().expect("tmp");
    let err = TantivySparseIndex::open(&tmp.path().join("nope")).err().expect("error");
    assert!(matches!(err, benefitdb_core::Error::NotFound(_)));
}

#[test]
fn rebuild_replaces_previous_contents() {
    let tmp = TempDir::new().expect("tmp");
    let dir = tmp.path().join("tantivy");
    {
        let index = TantivySparseIndex::create(&dir).expect("create");
        index.append(&corpus()).expect("append");
    }
    let fresh = vec![chunk("new", 0, "새로운 고시 본문", None, &[])];
    let rebuilt = TantivySparseIndex::rebuild(&dir, &fresh).expect("rebuild");
    assert_eq!(rebuilt.count().expect("count"), 1);
    assert!(rebuilt.search("스텐트", 3, None).expect("search").is_empty());
    assert!(dir.join("meta.json").exists());
}

#[test]
fn held_index_keeps_its_view_across_rebuild() {
    let tmp = TempDir::new().expect("tmp");
    let dir = tmp.path().join("tantivy");
    let held = TantivySparseIndex::create(&dir).expect("create");
    held.append(&corpus()).expect("append");

    let fresh = vec![chunk("new", 0, "개정된 고시 본문", None, &[])];
    let rebuilt = TantivySparseIndex::rebuild(&dir, &fresh).expect("rebuild while held");
    assert_eq!(rebuilt.search("개정된", 3, None).expect("search").len(), 1);

    assert_eq!(held.count().expect("held count"), corpus().len());
    assert_eq!(held.search("스텐트", 3, None).expect("held search").len(), 1);
    assert_eq!(TantivySparseIndex::open(&dir).expect("reopen").count().expect("count"), 1);
}

#[test]
fn chunks_by_doc_code_returns_whole_document_in_order() {
    let index = TantivySparseIndex::in_memory().expect("index");
    index.append(&corpus()).expect("append");
    let chunks = index.chunks_by_doc_code("B-1", 50).expect("lookup");
    let ids: Vec<&str> = chunks.iter().map(|c| c.id.as_str()).collect();
    assert_eq!(ids, vec!["brain:0", "brain:1"]);
    assert_eq!(index.chunks_by_doc_code("B-1", 1).expect("capped").len(), 1);
    assert!(index.chunks_by_doc_code("ZZZ", 50).expect("none").is_empty());
}

fn result(id: &str, text: &str, fused: f32) -> ScoredResult {
    let mut r = ScoredResult::new(chunk(id, 0, text, None, &[]));
    r.fused_score = fused;
    r
}

#[test]
fn local_rerank_orders_by_lexical_overlap() {
    let reranker = LocalReranker::default();
    let input = vec![
        result("a", "관상동맥 스텐트 삽입술", 0.9),
        result("b", "치료재료 목록", 0.8),
        result("c", "비파열성 뇌동맥류 급여대상 뇌동맥류", 0.1),
        result("d", "---", 0.05),
    ];
    let out = reranker.rerank("뇌동맥류 급여", input, 2);
    assert_eq!(out.len(), 2);
    assert_eq!(out[0].chunk.doc_id, "c");
    assert_eq!(out[0].rank, 1);
    assert_eq!(out[1].rank, 2);
    assert_eq!(out[0].original_score, Some(0.1));
    assert!(out[0].rerank_score.unwrap_or_default() > 0.0);
}

#[test]
fn local_rerank_matches_latin_codes_case_insensitively() {
    let input = vec![
        result("a", "관상동맥 협착 소견", 0.9),
        result("b", "LAD 병변 스텐트", 0.5),
        result("c", "치료재료 목록", 0.4),
    ];
    let out = LocalReranker::default().rerank("lad", input, 1);
    assert_eq!(out.len(), 1);
    assert_eq!(out[0].chunk.doc_id, "b");
    assert_eq!(out[0].original_score, Some(0.5));
}

#[test]
fn local_rerank_without_query_tokens_keeps_order() {
    let reranker = LocalReranker::default();
    let input = vec![result("a", "가나다 라마", 0.9), result("b", "바사 아자", 0.5), result("c", "차카 타파", 0.1)];
    let out = reranker.rerank("? !", input, 2);
    let ids: Vec<&str> = out.iter().map(|r| r.chunk.doc_id.as_str()).collect();
    assert_eq!(ids, vec!["a", "b"]);
    assert!(out[0].rerank_score.is_none());
}

proptest! {
    #[test]
    fn local_rerank_is_identity_within_top_k(n in 0usize..6, extra in 0usize..4, query in "[가-힣a-z ]{0,20}") {
        let input: Vec<ScoredResult> = (0..n)
            .map(|i| result(&format!("d{i}"), &format!("문서 {i} 본문"), 1.0 / (i as f32 + 1.0)))
            .collect();
        let out = LocalReranker::default().rerank(&query, input.clone(), n + extra);
        prop_assert_eq!(out, input);
    }
}
