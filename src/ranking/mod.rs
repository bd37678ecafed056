//! Ranking Pipeline (C7): hydrate → assemble features → score → sort.

use std::sync::Arc;

use chrono::{DateTime, Datelike, Timelike, Utc};
use serde::{Deserialize, Serialize};

use crate::batcher::Batcher;
use crate::clock::Clock;
use crate::error::{CoreError, CoreResult, ErrorKind};
use crate::feature_store::FeatureStore;
use crate::models::{ItemId, ItemKind, ViewerId};
use crate::scorer::{FeatureLayout, ScorerHandle};

pub const CONTEXT_DIM: usize = 8;
const LOCATION_BUCKETS: usize = 64;
const DEVICE_BUCKETS: usize = 16;

#[derive(Debug, Clone, Default, Deserialize)]
pub struct RequestContext {
    pub device_kind: Option<String>,
    pub location_hint: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Candidate {
    pub item_id: ItemId,
    pub item_kind: ItemKind,
    pub title: Option<String>,
    pub category: Option<String>,
    #[serde(default)]
    pub extra: serde_json::Value,
}

#[derive(Debug, Clone, Serialize)]
pub struct RankedItem {
    pub item_id: ItemId,
    pub item_kind: ItemKind,
    pub ranking_score: f64,
    pub popularity_score: f64,
}

fn hash_bucket(s: &str, buckets: usize) -> usize {
    use std::hash::{Hash, Hasher};
    let mut hasher = std::collections::hash_map::DefaultHasher::new();
    s.hash(&mut hasher);
    (hasher.finish() as usize) % buckets
}

/// Hour-of-day, weekday, weekend flag, bucketed device, hashed location,
/// zero-padded to `CONTEXT_DIM`.
fn project_context(now: DateTime<Utc>, context: &RequestContext) -> Vec<f64> {
    let mut vector = vec![0.0; CONTEXT_DIM];
    vector[0] = now.hour() as f64 / 23.0;
    vector[1] = now.weekday().num_days_from_monday() as f64 / 6.0;
    vector[2] = if matches!(now.weekday(), chrono::Weekday::Sat | chrono::Weekday::Sun) { 1.0 } else { 0.0 };
    vector[3] = context
        .device_kind
        .as_deref()
        .map(|d| hash_bucket(d, DEVICE_BUCKETS) as f64 / (DEVICE_BUCKETS - 1) as f64)
        .unwrap_or(0.0);
    vector[4] = context
        .location_hint
        .as_deref()
        .map(|l| hash_bucket(l, LOCATION_BUCKETS) as f64 / (LOCATION_BUCKETS - 1) as f64)
        .unwrap_or(0.0);
    vector
}

pub struct RankingPipeline {
    feature_store: Arc<FeatureStore>,
    batcher: Arc<Batcher>,
    scorer: Arc<ScorerHandle>,
    clock: Arc<dyn Clock>,
}

impl RankingPipeline {
    pub fn new(feature_store: Arc<FeatureStore>, batcher: Arc<Batcher>, scorer: Arc<ScorerHandle>, clock: Arc<dyn Clock>) -> Self {
        Self {
            feature_store,
            batcher,
            scorer,
            clock,
        }
    }

    pub fn feature_layout(&self) -> FeatureLayout {
        self.scorer
            .current()
            .map(|s| s.feature_layout())
            .unwrap_or(FeatureLayout {
                viewer_dim: crate::models::VIEWER_VECTOR_DIM,
                item_dim: crate::models::ITEM_VECTOR_DIM,
                context_dim: CONTEXT_DIM,
            })
    }

    pub async fn rank(
        &self,
        viewer_id: &ViewerId,
        candidates: &[Candidate],
        context: &RequestContext,
        max_results: usize,
    ) -> CoreResult<Vec<RankedItem>> {
        if !self.scorer.is_loaded() {
            return Err(CoreError::new(ErrorKind::ServiceUnavailable, "scorer is not loaded"));
        }

        let now = self.clock.now();

        // Step 1: hydrate viewer via the cache-only fast path. A miss
        // synthesizes an instant default and schedules an async refresh
        // rather than blocking this request on an L3 compute (spec.md §4.7).
        let viewer = match self.feature_store.get_viewer_cached(viewer_id).await {
            Some(features) => features,
            None => {
                self.feature_store.schedule_viewer_refresh(viewer_id.clone());
                crate::models::ViewerFeatures::default_for(viewer_id.clone(), now)
            }
        };

        // Step 2: hydrate items in one getBatch call.
        let item_ids: Vec<ItemId> = candidates.iter().map(|c| c.item_id.clone()).collect();
        let item_features = self.feature_store.get_item_batch(&item_ids).await;

        // Step 3: project context once per request.
        let context_vector = project_context(now, context);

        // Step 4 + 5: assemble per-candidate features and score.
        let mut ranked = Vec::with_capacity(candidates.len());
        for candidate in candidates {
            let item = item_features.get(&candidate.item_id).cloned().unwrap_or_else(|| {
                crate::models::ItemFeatures::default_for(candidate.item_id.clone(), candidate.item_kind, now)
            });

            let mut features = Vec::with_capacity(viewer.vector.len() + item.vector.len() + context_vector.len());
            features.extend_from_slice(&viewer.vector);
            features.extend_from_slice(&item.vector);
            features.extend_from_slice(&context_vector);

            let score = match self.batcher.score(features).await {
                Ok(s) => s,
                Err(err) if err.kind == ErrorKind::ServiceUnavailable => return Err(err),
                Err(_) => 0.0,
            };

            ranked.push(RankedItem {
                item_id: candidate.item_id.clone(),
                item_kind: candidate.item_kind,
                ranking_score: score,
                popularity_score: item.popularity_score(),
            });
        }

        // Step 6: deterministic sort (score desc, popularity desc, id asc).
        ranked.sort_by(|a, b| {
            b.ranking_score
                .partial_cmp(&a.ranking_score)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| b.popularity_score.partial_cmp(&a.popularity_score).unwrap_or(std::cmp::Ordering::Equal))
                .then_with(|| a.item_id.cmp(&b.item_id))
        });

        // Step 7: cap to maxResults.
        ranked.truncate(max_results.min(100));
        Ok(ranked)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::behavior_log::{BehaviorLogGateway, InMemoryAnalyticalStore};
    use crate::clock::SystemClock;
    use crate::config::{BatcherConfig, CacheTtlConfig};
    use crate::feature_store::InMemoryKvTier;
    use crate::scorer::LinearScorer;

    fn pipeline() -> RankingPipeline {
        let clock: Arc<dyn Clock> = Arc::new(SystemClock);
        let store: Arc<dyn crate::behavior_log::AnalyticalStore> = Arc::new(InMemoryAnalyticalStore::new());
        let gateway = Arc::new(BehaviorLogGateway::new(store, Arc::clone(&clock)));
        let kv: Arc<dyn crate::feature_store::KvTier> = Arc::new(InMemoryKvTier::new());
        let feature_store = Arc::new(FeatureStore::new(kv, gateway, Arc::clone(&clock), CacheTtlConfig::default()));

        let layout = FeatureLayout {
            viewer_dim: crate::models::VIEWER_VECTOR_DIM,
            item_dim: crate::models::ITEM_VECTOR_DIM,
            context_dim: CONTEXT_DIM,
        };
        let scorer = Arc::new(ScorerHandle::loaded(Box::new(LinearScorer::new("test", layout))));
        let batcher = Batcher::new(Arc::clone(&scorer), BatcherConfig::default());

        RankingPipeline::new(feature_store, batcher, scorer, clock)
    }

    #[tokio::test]
    async fn tiebreak_orders_by_popularity_when_scores_match() {
        let pipeline = pipeline();
        let viewer_id = ViewerId::from("viewer-1");

        let candidates = vec![
            Candidate {
                item_id: ItemId::from("a"),
                item_kind: ItemKind::Article,
                title: None,
                category: None,
                extra: serde_json::Value::Null,
            },
            Candidate {
                item_id: ItemId::from("b"),
                item_kind: ItemKind::Article,
                title: None,
                category: None,
                extra: serde_json::Value::Null,
            },
        ];

        let context = RequestContext {
            device_kind: None,
            location_hint: None,
        };

        let ranked = pipeline.rank(&viewer_id, &candidates, &context, 10).await.unwrap();
        assert_eq!(ranked.len(), 2);
        // Both are cold-start defaults with score 0 popularity; ItemId asc breaks the tie.
        assert_eq!(ranked[0].item_id, ItemId::from("a"));
    }

    #[tokio::test]
    async fn caps_results_to_max_results() {
        let pipeline = pipeline();
        let viewer_id = ViewerId::from("viewer-2");
        let candidates: Vec<Candidate> = (0..5)
            .map(|i| Candidate {
                item_id: ItemId::from(format!("item-{i}")),
                item_kind: ItemKind::Article,
                title: None,
                category: None,
                extra: serde_json::Value::Null,
            })
            .collect();
        let context = RequestContext {
            device_kind: None,
            location_hint: None,
        };

        let ranked = pipeline.rank(&viewer_id, &candidates, &context, 2).await.unwrap();
        assert_eq!(ranked.len(), 2);
    }
}
