//! End-to-end scenarios against the C9 HTTP surface, plus the
//! cross-cutting invariants that don't belong to any single module.

use std::collections::BTreeMap;
use std::sync::Arc;

use axum::body::Body;
use axum::http::{header, Request, StatusCode};
use chrono::Utc;
use tower::util::ServiceExt;

use rankfuse_core::api;
use rankfuse_core::config::AppConfig;
use rankfuse_core::fusion::FusionPipeline;
use rankfuse_core::models::{AlgorithmResult, AlgorithmResultItem, ItemFeatures, ItemId, ItemKind, ReviewStatus, ViewerFeatures, ViewerId};
use rankfuse_core::ranking::RequestContext;
use rankfuse_core::scorer::{FeatureLayout, LinearScorer};
use rankfuse_core::AppState;

fn test_app() -> axum::Router {
    let state = Arc::new(AppState::new(AppConfig::default()));
    api::build_router(state)
}

async fn post(router: &axum::Router, uri: &str, body: serde_json::Value) -> (StatusCode, serde_json::Value) {
    let request = Request::builder()
        .method("POST")
        .uri(uri)
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from(body.to_string()))
        .unwrap();
    let response = router.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
    let json = if bytes.is_empty() { serde_json::Value::Null } else { serde_json::from_slice(&bytes).unwrap() };
    (status, json)
}

async fn get(router: &axum::Router, uri: &str) -> (StatusCode, serde_json::Value) {
    let request = Request::builder().uri(uri).body(Body::empty()).unwrap();
    let response = router.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
    let json = serde_json::from_slice(&bytes).unwrap();
    (status, json)
}

#[tokio::test]
async fn health_reports_a_loaded_scorer_and_reachable_kv() {
    let router = test_app();
    let (status, body) = get(&router, "/health").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["scorer_loaded"], true);
    assert_eq!(body["kv_reachable"], true);
}

#[tokio::test]
async fn stats_reports_feature_store_and_batcher_counters() {
    let router = test_app();
    let (status, body) = get(&router, "/stats").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["batcher_pending"], 0);
    assert!(body["feature_store"].is_object());
}

#[tokio::test]
async fn ingest_accepts_a_well_formed_event() {
    let router = test_app();
    let (status, body) = post(
        &router,
        "/ingest",
        serde_json::json!({
            "viewer_id": "viewer-1",
            "item_id": "item-1",
            "action": "click",
            "item_kind": "article",
        }),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["accepted"], true);
}

#[tokio::test]
async fn ingest_rejects_an_empty_viewer_id() {
    let router = test_app();
    let (status, body) = post(
        &router,
        "/ingest",
        serde_json::json!({
            "viewer_id": "",
            "item_id": "item-1",
            "action": "view",
            "item_kind": "article",
        }),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["kind"], "BAD_INPUT");
}

#[tokio::test]
async fn rank_scores_candidates_for_a_cold_start_viewer() {
    let router = test_app();
    let (status, body) = post(
        &router,
        "/rank",
        serde_json::json!({
            "viewer_id": "viewer-cold",
            "candidates": [
                {"item_id": "a", "item_kind": "article"},
                {"item_id": "b", "item_kind": "video"},
            ],
            "max_results": 10,
        }),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["items"].as_array().unwrap().len(), 2);
}

#[tokio::test]
async fn rank_rejects_empty_candidates() {
    let router = test_app();
    let (status, _body) = post(
        &router,
        "/rank",
        serde_json::json!({"viewer_id": "viewer-1", "candidates": []}),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

fn algorithm_result_item(id: &str, raw_score: f64) -> AlgorithmResultItem {
    AlgorithmResultItem {
        item_id: ItemId::from(id),
        raw_score,
        kind: ItemKind::Article,
        category: Some("tech".to_string()),
        author_id: Some("author-1".to_string()),
        publish_time: Some(Utc::now()),
        quality_score: Some(0.9),
        review_status: Some(ReviewStatus::Approved),
        viewer_rating: Some(4.5),
        view_count: Some(100),
        like_count: Some(10),
        share_count: Some(2),
        comment_count: Some(1),
        title: Some(id.to_string()),
        description: None,
    }
}

#[tokio::test]
async fn fuse_merges_two_algorithm_results_into_a_ranked_slate() {
    let router = test_app();
    let body = serde_json::json!({
        "viewer_id": "viewer-1",
        "algorithm_results": {
            "collaborative_filtering": {
                "algorithm_name": "collaborative_filtering",
                "items": [algorithm_result_item_json("x", 0.8), algorithm_result_item_json("y", 0.6)],
            },
            "content_based": {
                "algorithm_name": "content_based",
                "items": [algorithm_result_item_json("y", 0.7)],
            },
        },
        "target_size": 10,
    });
    let (status, resp) = post(&router, "/fuse", body).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(resp["degraded"], false);
    assert!(!resp["items"].as_array().unwrap().is_empty());
}

#[tokio::test]
async fn fuse_rejects_empty_algorithm_results() {
    let router = test_app();
    let (status, _body) = post(
        &router,
        "/fuse",
        serde_json::json!({"viewer_id": "viewer-1", "algorithm_results": {}}),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

fn algorithm_result_item_json(id: &str, raw_score: f64) -> serde_json::Value {
    serde_json::to_value(algorithm_result_item(id, raw_score)).unwrap()
}

// ---- Invariant 2: fusion is idempotent for identical inputs -----------

#[tokio::test]
async fn fusion_is_idempotent_for_identical_inputs() {
    let config = AppConfig::default();
    let pipeline = FusionPipeline::new(config);
    let mut results = BTreeMap::new();
    results.insert(
        "collaborative_filtering".to_string(),
        AlgorithmResult {
            algorithm_name: "collaborative_filtering".to_string(),
            items: vec![algorithm_result_item("a", 0.9), algorithm_result_item("b", 0.7), algorithm_result_item("c", 0.5)],
        },
    );
    let context = RequestContext::default();
    let now = Utc::now();

    let (first_items, first_stats) = pipeline.fuse(&results, 5, &context, None, now);
    let (second_items, second_stats) = pipeline.fuse(&results, 5, &context, None, now);

    let first_ids: Vec<_> = first_items.iter().map(|i| i.item_id.clone()).collect();
    let second_ids: Vec<_> = second_items.iter().map(|i| i.item_id.clone()).collect();
    assert_eq!(first_ids, second_ids);
    let first_scores: Vec<_> = first_items.iter().map(|i| i.final_score).collect();
    let second_scores: Vec<_> = second_items.iter().map(|i| i.final_score).collect();
    assert_eq!(first_scores, second_scores);
    assert_eq!(first_stats.degraded, second_stats.degraded);
}

// ---- Invariant 3: batch order preservation -----------------------------

#[tokio::test]
async fn batch_order_is_preserved_for_concurrent_submitters() {
    use rankfuse_core::config::BatcherConfig;
    use rankfuse_core::scorer::{Scorer, ScorerHandle};

    let layout = FeatureLayout {
        viewer_dim: 2,
        item_dim: 0,
        context_dim: 0,
    };
    let scorer = Arc::new(ScorerHandle::loaded(Box::new(LinearScorer::new("order-check", layout))));
    let config = BatcherConfig {
        max_batch_size: 8,
        batch_timeout_ms: 20,
        max_queue_depth: 64,
        worker_pool_size: 2,
        call_deadline_ms: 1_000,
    };
    let batcher = rankfuse_core::batcher::Batcher::new(Arc::clone(&scorer), config);

    let feature_rows: Vec<Vec<f64>> = (0..8).map(|i| vec![i as f64, (8 - i) as f64]).collect();

    let expected: Vec<f64> = {
        let current = scorer.current().unwrap();
        current.batch_score(&feature_rows).unwrap()
    };

    let futures = feature_rows.iter().cloned().map(|row| {
        let batcher = Arc::clone(&batcher);
        async move { batcher.score(row).await.unwrap() }
    });
    let actual = futures::future::join_all(futures).await;

    for (i, (expected_score, actual_score)) in expected.iter().zip(actual.iter()).enumerate() {
        assert!((expected_score - actual_score).abs() < 1e-9, "row {i} diverged: expected {expected_score}, got {actual_score}");
    }
}

// ---- Invariant 10: round-trip serialization ----------------------------

#[tokio::test]
async fn viewer_and_item_features_round_trip_through_json() {
    let now = Utc::now();
    let viewer = ViewerFeatures::default_for(ViewerId::from("viewer-rt"), now);
    let encoded = serde_json::to_string(&viewer).unwrap();
    let decoded: ViewerFeatures = serde_json::from_str(&encoded).unwrap();
    assert_eq!(decoded.viewer_id, viewer.viewer_id);
    assert_eq!(decoded.behavior_score(), viewer.behavior_score());
    assert_eq!(decoded.vector, viewer.vector);

    let item = ItemFeatures::default_for(ItemId::from("item-rt"), ItemKind::Video, now);
    let encoded = serde_json::to_string(&item).unwrap();
    let decoded: ItemFeatures = serde_json::from_str(&encoded).unwrap();
    assert_eq!(decoded.item_id, item.item_id);
    assert_eq!(decoded.kind, item.kind);
    assert_eq!(decoded.popularity_score(), item.popularity_score());
}

#[tokio::test]
async fn algorithm_result_round_trips_through_json() {
    let result = AlgorithmResult {
        algorithm_name: "deep_learning".to_string(),
        items: vec![algorithm_result_item("z", 0.42)],
    };
    let encoded = serde_json::to_string(&result).unwrap();
    let decoded: AlgorithmResult = serde_json::from_str(&encoded).unwrap();
    assert_eq!(decoded.algorithm_name, result.algorithm_name);
    assert_eq!(decoded.items[0].item_id, result.items[0].item_id);
    assert_eq!(decoded.items[0].raw_score, result.items[0].raw_score);
}
