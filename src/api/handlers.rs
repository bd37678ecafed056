//! Request handlers for C9 (spec.md §4.9 / §6). Validation happens at
//! the boundary; everything past it talks to the core in terms of the
//! same types C7/C8 use internally.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Instant;

use axum::extract::State;
use axum::Json;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{CoreError, CoreResult};
use crate::feature_store::FeatureStoreStats;
use crate::fusion::{FusedItem, FusionPipeline};
use crate::models::{ActionKind, AlgorithmResult, BehaviorEvent, ItemId, ItemKind, ViewerId};
use crate::ranking::{Candidate, RankedItem, RequestContext};
use crate::AppState;

const MAX_CANDIDATES: usize = 500;
const MAX_ALGORITHM_ITEMS: usize = 2_000;
const MAX_TARGET_SIZE: usize = 200;
const MAX_RESULTS_CAP: usize = 100;
const DEFAULT_MAX_RESULTS: usize = 20;
const DEFAULT_TARGET_SIZE: usize = 20;

const JOB_NAMES: [&str; 5] = ["viewer-daily", "item-hourly", "matrix-daily", "trending-hourly", "retention-weekly"];

fn require_nonempty(label: &str, value: &str) -> CoreResult<()> {
    if value.trim().is_empty() {
        Err(CoreError::bad_input(format!("{label} must not be empty")))
    } else {
        Ok(())
    }
}

// ---- RANK -----------------------------------------------------------

#[derive(Debug, Deserialize)]
pub struct RankRequest {
    pub viewer_id: String,
    pub candidates: Vec<Candidate>,
    #[serde(default)]
    pub context: Option<RequestContext>,
    #[serde(default = "default_max_results")]
    pub max_results: usize,
}

fn default_max_results() -> usize {
    DEFAULT_MAX_RESULTS
}

#[derive(Debug, Serialize)]
pub struct RankResponse {
    pub items: Vec<RankedItem>,
    pub processing_time_ms: u64,
    pub timestamp: DateTime<Utc>,
}

pub async fn rank(State(state): State<Arc<AppState>>, Json(req): Json<RankRequest>) -> CoreResult<Json<RankResponse>> {
    let start = Instant::now();
    require_nonempty("viewerId", &req.viewer_id)?;
    if req.candidates.is_empty() {
        return Err(CoreError::bad_input("candidates must not be empty"));
    }
    if req.candidates.len() > MAX_CANDIDATES {
        return Err(CoreError::bad_input(format!("candidates exceeds the configured cap of {MAX_CANDIDATES}")));
    }

    let max_results = req.max_results.clamp(1, MAX_RESULTS_CAP);
    let context = req.context.unwrap_or_default();
    let viewer_id = ViewerId::from(req.viewer_id);

    let items = state.ranking.rank(&viewer_id, &req.candidates, &context, max_results).await?;

    Ok(Json(RankResponse {
        items,
        processing_time_ms: start.elapsed().as_millis() as u64,
        timestamp: state.clock.now(),
    }))
}

// ---- FUSE -------------------------------------------------------------

#[derive(Debug, Deserialize)]
pub struct FuseRequest {
    pub viewer_id: String,
    pub algorithm_results: BTreeMap<String, AlgorithmResult>,
    #[serde(default = "default_target_size")]
    pub target_size: usize,
    #[serde(default)]
    pub context: Option<RequestContext>,
}

fn default_target_size() -> usize {
    DEFAULT_TARGET_SIZE
}

#[derive(Debug, Serialize)]
pub struct FuseResponse {
    pub items: Vec<FusedItem>,
    pub degraded: bool,
    pub rejections: BTreeMap<String, u64>,
    pub processing_time_ms: u64,
    pub timestamp: DateTime<Utc>,
}

pub async fn fuse(State(state): State<Arc<AppState>>, Json(req): Json<FuseRequest>) -> CoreResult<Json<FuseResponse>> {
    let start = Instant::now();
    require_nonempty("viewerId", &req.viewer_id)?;
    if req.algorithm_results.is_empty() {
        return Err(CoreError::bad_input("algorithmResults must not be empty"));
    }
    let total_items: usize = req.algorithm_results.values().map(|r| r.items.len()).sum();
    if total_items > MAX_ALGORITHM_ITEMS {
        return Err(CoreError::bad_input(format!("algorithm result items exceed the configured cap of {MAX_ALGORITHM_ITEMS}")));
    }

    let target_size = req.target_size.clamp(1, MAX_TARGET_SIZE);
    let context = req.context.unwrap_or_default();
    let viewer_id = ViewerId::from(req.viewer_id);
    let now = state.clock.now();

    let patterns = state.behavior_log.viewer_patterns(&viewer_id).await;
    let pipeline = FusionPipeline::new(state.config.load().as_ref().clone());
    let (items, stats) = pipeline.fuse_or_degraded(&req.algorithm_results, target_size, &context, Some(&patterns), now);

    Ok(Json(FuseResponse {
        items,
        degraded: stats.degraded,
        rejections: stats.rejections.into_iter().map(|(reason, count)| (reason.to_string(), count)).collect(),
        processing_time_ms: start.elapsed().as_millis() as u64,
        timestamp: now,
    }))
}

// ---- INGEST -----------------------------------------------------------

#[derive(Debug, Deserialize)]
pub struct IngestRequest {
    pub viewer_id: String,
    pub item_id: String,
    pub action: ActionKind,
    pub item_kind: ItemKind,
    #[serde(default)]
    pub session_id: Option<String>,
    #[serde(default)]
    pub device_kind: Option<String>,
    #[serde(default)]
    pub duration_sec: Option<f64>,
    #[serde(default)]
    pub extra: serde_json::Value,
}

#[derive(Debug, Serialize)]
pub struct IngestResponse {
    pub accepted: bool,
    pub processing_time_ms: u64,
    pub timestamp: DateTime<Utc>,
}

/// Append is synchronous; the invalidate+patch of C3 happens
/// fire-and-forget per spec.md §3's ingestion data-flow.
pub async fn ingest(State(state): State<Arc<AppState>>, Json(req): Json<IngestRequest>) -> CoreResult<Json<IngestResponse>> {
    let start = Instant::now();
    require_nonempty("viewerId", &req.viewer_id)?;
    require_nonempty("itemId", &req.item_id)?;

    let now = state.clock.now();
    let viewer_id = ViewerId::from(req.viewer_id);
    let item_id = ItemId::from(req.item_id);
    let weight = req.action.weight();

    let event = BehaviorEvent {
        viewer_id: viewer_id.clone(),
        item_id,
        action: req.action,
        item_kind: req.item_kind,
        session_id: req.session_id,
        device_kind: req.device_kind,
        duration_sec: req.duration_sec,
        timestamp: now,
        extra: req.extra,
    };

    state.behavior_log.append_batch(vec![event]).await?;

    let feature_store = Arc::clone(&state.feature_store);
    tokio::spawn(async move {
        feature_store.invalidate_viewer(&viewer_id);
        feature_store.patch_viewer_incremental(&viewer_id, weight, now).await;
    });

    Ok(Json(IngestResponse {
        accepted: true,
        processing_time_ms: start.elapsed().as_millis() as u64,
        timestamp: now,
    }))
}

// ---- HEALTH / STATS -----------------------------------------------------

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub scorer_loaded: bool,
    pub kv_reachable: bool,
    pub scheduler_alive: bool,
    pub batcher_alive: bool,
    pub timestamp: DateTime<Utc>,
}

const HEALTH_PROBE_KEY: &str = "feature_engineering:stats:health_probe";

pub async fn health(State(state): State<Arc<AppState>>) -> Json<HealthResponse> {
    state.kv.setex(HEALTH_PROBE_KEY, b"1".to_vec(), 5).await;
    let kv_reachable = state.kv.exists(HEALTH_PROBE_KEY).await;

    Json(HealthResponse {
        scorer_loaded: state.scorer.is_loaded(),
        kv_reachable,
        scheduler_alive: true,
        batcher_alive: true,
        timestamp: state.clock.now(),
    })
}

#[derive(Debug, Serialize)]
pub struct StatsResponse {
    pub batcher_pending: usize,
    pub feature_store: FeatureStoreStats,
    pub next_job_runs: BTreeMap<String, DateTime<Utc>>,
    pub timestamp: DateTime<Utc>,
}

pub async fn stats(State(state): State<Arc<AppState>>) -> Json<StatsResponse> {
    let next_job_runs = JOB_NAMES
        .iter()
        .filter_map(|name| state.job_registry.next_run(name).map(|at| (name.to_string(), at)))
        .collect();

    Json(StatsResponse {
        batcher_pending: state.batcher.pending_count(),
        feature_store: state.feature_store.stats(),
        next_job_runs,
        timestamp: state.clock.now(),
    })
}
