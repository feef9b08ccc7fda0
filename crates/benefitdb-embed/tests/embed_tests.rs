use benefitdb_core::config::{EmbeddingSettings, RerankSettings};
use benefitdb_core::traits::{Embedder, PrecisionReranker};
use benefitdb_core::Error;
use benefitdb_embed::{get_default_embedder, get_precision_reranker, HashEmbedder, HttpEmbedder, HttpReranker};
use httpmock::prelude::*;

#[tokio::test]
async fn hashing_embedder_shapes_and_determinism() {
    let settings = EmbeddingSettings { fake: true, dimensions: 64, ..EmbeddingSettings::default() };
    let embedder = get_default_embedder(&settings).expect("embedder");
    assert_eq!(embedder.dim(), 64);

    let texts = vec!["비파열성 뇌동맥류".to_string(), "비파열성 뇌동맥류".to_string(), "관상동맥 스텐트".to_string()];
    let embs = embedder.embed_batch(&texts).await;
    let v1 = embs[0].as_ref().expect("v1");
    let v2 = embs[1].as_ref().expect("v2");
    let v3 = embs[2].as_ref().expect("v3");

    assert_eq!(v1.len(), 64);
    let norm: f32 = v1.iter().map(|x| x * x).sum::<f32>().sqrt();
    assert!((norm - 1.0).abs() <= 1e-3, "vector is L2-normalized (norm={norm})");
    for (a, b) in v1.iter().zip(v2) {
        assert!((a - b).abs() <= 1e-6);
    }
    assert_ne!(v1, v3);
}

#[test]
fn shared_tokens_pull_vectors_closer() {
    let e = HashEmbedder::new(256);
    let q = e.embed_sync("뇌동맥류 급여기준");
    let near = e.embed_sync("뇌동맥류 급여기준 안내");
    let far = e.embed_sync("관상동맥 스텐트 삽입술");
    let l2 = |a: &[f32], b: &[f32]| a.iter().zip(b).map(|(x, y)| (x - y).powi(2)).sum::<f32>().sqrt();
    assert!(l2(&q, &near) < l2(&q, &far));
}

#[test]
fn http_embedder_requires_endpoint() {
    let settings = EmbeddingSettings { fake: false, endpoint: None, ..EmbeddingSettings::default() };
    match get_default_embedder(&settings) {
        Err(Error::InvalidConfig(msg)) => assert!(msg.contains("endpoint")),
        Err(other) => panic!("unexpected error: {other}"),
        Ok(_) => panic!("expected an error"),
    }
}

#[tokio::test]
async fn http_embedder_posts_input_text_and_reads_embedding() {
    let server = MockServer::start_async().await;
    let mock = server
        .mock_async(|when, then| {
            when.method(POST).path("/embed").body_contains("\"inputText\":\"뇌동맥류\"").body_contains("\"dimensions\":3");
            then.status(200).json_body(serde_json::json!({ "embedding": [0.1, 0.2, 0.3] }));
        })
        .await;

    let settings = EmbeddingSettings { dimensions: 3, ..EmbeddingSettings::default() };
    let embedder = HttpEmbedder::new(&server.url("/embed"), &settings).expect("client");
    let v = embedder.embed("뇌동맥류").await.expect("embedding");
    assert_eq!(v, vec![0.1, 0.2, 0.3]);
    mock.assert_async().await;
}

#[tokio::test]
async fn http_embedder_failures_are_per_item_in_batches() {
    let server = MockServer::start_async().await;
    server
        .mock_async(|when, then| {
            when.method(POST).path("/embed").body_contains("broken");
            then.status(500);
        })
        .await;
    server
        .mock_async(|when, then| {
            when.method(POST).path("/embed").body_contains("ok-");
            then.status(200).json_body(serde_json::json!({ "embedding": [1.0, 0.0] }));
        })
        .await;

    let settings = EmbeddingSettings { dimensions: 2, ..EmbeddingSettings::default() };
    let embedder = HttpEmbedder::new(&server.url("/embed"), &settings).expect("client");
    assert!(matches!(embedder.embed("broken").await, Err(Error::Embedding(_))));

    let out = embedder.embed_batch(&["ok-1".to_string(), "broken".to_string(), "ok-2".to_string()]).await;
    assert!(out[0].is_some());
    assert!(out[1].is_none());
    assert!(out[2].is_some());
}

#[tokio::test]
async fn http_embedder_rejects_wrong_dimension() {
    let server = MockServer::start_async().await;
    server
        .mock_async(|when, then| {
            when.method(POST).path("/embed");
            then.status(200).json_body(serde_json::json!({ "embedding": [0.5] }));
        })
        .await;
    let settings = EmbeddingSettings { dimensions: 4, ..EmbeddingSettings::default() };
    let embedder = HttpEmbedder::new(&server.url("/embed"), &settings).expect("client");
    assert!(matches!(embedder.embed("x").await, Err(Error::Embedding(_))));
}

#[tokio::test]
async fn reranker_orders_by_relevance() {
    let server = MockServer::start_async().await;
    let mock = server
        .mock_async(|when, then| {
            when.method(POST).path("/rerank").body_contains("\"return_documents\":false");
            then.status(200).json_body(serde_json::json!({
                "results": [
                    { "index": 0, "relevance_score": 0.2 },
                    { "index": 2, "relevance_score": 0.9 }
                ]
            }));
        })
        .await;

    let reranker = HttpReranker::new(&server.url("/rerank"), &RerankSettings::default()).expect("client");
    let docs = vec!["a".to_string(), "b".to_string(), "c".to_string()];
    let hits = reranker.rerank("질의", &docs, 3).await.expect("rerank");
    assert_eq!(hits.len(), 2);
    assert_eq!(hits[0].index, 2);
    assert!((hits[0].relevance - 0.9).abs() < 1e-6);
    mock.assert_async().await;
}

#[tokio::test]
async fn reranker_rejects_out_of_range_index_and_errors() {
    let server = MockServer::start_async().await;
    server
        .mock_async(|when, then| {
            when.method(POST).path("/bad-index");
            then.status(200).json_body(serde_json::json!({ "results": [{ "index": 7, "relevance_score": 1.0 }] }));
        })
        .await;
    server
        .mock_async(|when, then| {
            when.method(POST).path("/down");
            then.status(503);
        })
        .await;

    let docs = vec!["a".to_string()];
    let bad = HttpReranker::new(&server.url("/bad-index"), &RerankSettings::default()).expect("client");
    assert!(matches!(bad.rerank("q", &docs, 1).await, Err(Error::Rerank(_))));
    let down = HttpReranker::new(&server.url("/down"), &RerankSettings::default()).expect("client");
    assert!(matches!(down.rerank("q", &docs, 1).await, Err(Error::Rerank(_))));
}

#[test]
fn reranker_is_optional() {
    assert!(get_precision_reranker(&RerankSettings::default()).expect("none").is_none());
    let configured = RerankSettings { endpoint: Some("http://localhost:1/rerank".into()), ..RerankSettings::default() };
    assert!(get_precision_reranker(&configured).expect("some").is_some());
}
