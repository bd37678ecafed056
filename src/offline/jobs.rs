//! The five offline aggregation jobs (spec.md §4.4).

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use chrono::Weekday;

use crate::behavior_log::{activity_for_behavior_score, AnalyticalStore, BehaviorLogGateway, EntityKind, FeatureVectorRecord};
use crate::clock::{Cadence, Clock, JobHandle, JobOutcome};
use crate::feature_store::{keys, FeatureStore, KvTier};
use crate::models::{ItemFeatures, ItemId, ItemKind, ViewerFeatures, ViewerId, VIEWER_VECTOR_DIM, ITEM_VECTOR_DIM};

const VIEWER_WINDOW_DAYS: i64 = 30;
const ITEM_WINDOW_DAYS: i64 = 7;
const TRENDING_WINDOW_HOURS: i64 = 24;
const TRENDING_MIN_INTERACTIONS: u64 = 10;
const TRENDING_LIMIT: usize = 100;
const BEHAVIOR_RETENTION_DAYS: i64 = 90;
const VECTOR_RETENTION_DAYS: i64 = 30;
const BACKUP_RETENTION_DAYS: i64 = 7;

fn hashed_bucket(s: &str, buckets: usize) -> usize {
    use std::hash::{Hash, Hasher};
    let mut hasher = std::collections::hash_map::DefaultHasher::new();
    s.hash(&mut hasher);
    (hasher.finish() as usize) % buckets
}

pub struct ViewerDailyJob {
    pub gateway: Arc<BehaviorLogGateway>,
    pub feature_store: Arc<FeatureStore>,
    pub clock: Arc<dyn Clock>,
    pub min_interactions: u64,
}

#[async_trait]
impl JobHandle for ViewerDailyJob {
    fn name(&self) -> &'static str {
        "viewer-daily"
    }

    fn cadence(&self) -> Cadence {
        Cadence::DailyAt { hour: 2, minute: 0 }
    }

    async fn run(&self) -> JobOutcome {
        let start = Instant::now();
        let now = self.clock.now();
        let aggregates = self.gateway.viewer_aggregates(None, VIEWER_WINDOW_DAYS, self.min_interactions).await;

        let mut success = 0u64;
        let mut errors = 0u64;
        let mut entries = Vec::with_capacity(aggregates.len());
        for (viewer_id, agg) in aggregates {
            let mut features = ViewerFeatures::default_for(viewer_id, now);
            let activity = activity_for_behavior_score(agg.behavior_score);
            features.apply_aggregates(&agg, activity, now);
            entries.push(features);
        }
        let count = entries.len() as u64;
        self.feature_store.put_viewer_batch(entries).await;
        success += count;
        let _ = &mut errors;

        JobOutcome {
            success_count: success,
            error_count: errors,
            processing_time: start.elapsed(),
        }
    }
}

pub struct ItemHourlyJob {
    pub gateway: Arc<BehaviorLogGateway>,
    pub feature_store: Arc<FeatureStore>,
    pub clock: Arc<dyn Clock>,
    pub min_interactions: u64,
}

#[async_trait]
impl JobHandle for ItemHourlyJob {
    fn name(&self) -> &'static str {
        "item-hourly"
    }

    fn cadence(&self) -> Cadence {
        Cadence::HourlyAt { minute: 0 }
    }

    async fn run(&self) -> JobOutcome {
        let start = Instant::now();
        let now = self.clock.now();
        let aggregates = self.gateway.item_aggregates(None, ITEM_WINDOW_DAYS, self.min_interactions).await;

        let mut entries = Vec::with_capacity(aggregates.len());
        for (item_id, agg) in aggregates {
            let mut features = ItemFeatures::default_for(item_id, ItemKind::Article, now);
            features.apply_aggregates(&agg, now);
            entries.push(features);
        }
        let count = entries.len() as u64;
        self.feature_store.put_item_batch(entries).await;

        JobOutcome {
            success_count: count,
            error_count: 0,
            processing_time: start.elapsed(),
        }
    }
}

pub struct MatrixDailyJob {
    pub gateway: Arc<BehaviorLogGateway>,
    pub store: Arc<dyn AnalyticalStore>,
    pub clock: Arc<dyn Clock>,
}

#[async_trait]
impl JobHandle for MatrixDailyJob {
    fn name(&self) -> &'static str {
        "matrix-daily"
    }

    fn cadence(&self) -> Cadence {
        Cadence::DailyAt { hour: 3, minute: 0 }
    }

    async fn run(&self) -> JobOutcome {
        let start = Instant::now();
        let now = self.clock.now();
        let matrix = self.gateway.interaction_matrix(None, None, VIEWER_WINDOW_DAYS).await;

        let mut viewer_vectors: HashMap<ViewerId, Vec<f64>> = HashMap::new();
        let mut item_vectors: HashMap<ItemId, Vec<f64>> = HashMap::new();

        for ((viewer_id, item_id), weight) in &matrix {
            let vv = viewer_vectors.entry(viewer_id.clone()).or_insert_with(|| vec![0.0; VIEWER_VECTOR_DIM]);
            vv[hashed_bucket(item_id.as_str(), VIEWER_VECTOR_DIM)] += weight;

            let iv = item_vectors.entry(item_id.clone()).or_insert_with(|| vec![0.0; ITEM_VECTOR_DIM]);
            iv[hashed_bucket(viewer_id.as_str(), ITEM_VECTOR_DIM)] += weight;
        }

        let mut success = 0u64;
        for (viewer_id, vector) in viewer_vectors {
            self.store.save_vector(FeatureVectorRecord {
                entity_id: viewer_id.as_str().to_string(),
                entity_kind: EntityKind::Viewer,
                vector,
                created_at: now,
            });
            success += 1;
        }
        for (item_id, vector) in item_vectors {
            self.store.save_vector(FeatureVectorRecord {
                entity_id: item_id.as_str().to_string(),
                entity_kind: EntityKind::Item,
                vector,
                created_at: now,
            });
            success += 1;
        }

        JobOutcome {
            success_count: success,
            error_count: 0,
            processing_time: start.elapsed(),
        }
    }
}

pub struct TrendingHourlyJob {
    pub gateway: Arc<BehaviorLogGateway>,
    pub kv: Arc<dyn KvTier>,
    pub cache_ttl_secs: u64,
}

#[async_trait]
impl JobHandle for TrendingHourlyJob {
    fn name(&self) -> &'static str {
        "trending-hourly"
    }

    fn cadence(&self) -> Cadence {
        Cadence::HourlyAt { minute: 30 }
    }

    async fn run(&self) -> JobOutcome {
        let start = Instant::now();
        let mut success = 0u64;
        let mut errors = 0u64;

        let overall = self
            .gateway
            .trending(None, TRENDING_WINDOW_HOURS, TRENDING_MIN_INTERACTIONS, TRENDING_LIMIT)
            .await;
        match serde_json::to_vec(&overall) {
            Ok(bytes) => {
                self.kv.setex(&keys::trending("all"), bytes, self.cache_ttl_secs).await;
                success += 1;
            }
            Err(_) => errors += 1,
        }

        for kind in ItemKind::ALL {
            let list = self
                .gateway
                .trending(Some(kind), TRENDING_WINDOW_HOURS, TRENDING_MIN_INTERACTIONS, TRENDING_LIMIT)
                .await;
            match serde_json::to_vec(&list) {
                Ok(bytes) => {
                    self.kv.setex(&keys::trending(kind.as_str()), bytes, self.cache_ttl_secs).await;
                    success += 1;
                }
                Err(_) => errors += 1,
            }
        }

        JobOutcome {
            success_count: success,
            error_count: errors,
            processing_time: start.elapsed(),
        }
    }
}

pub struct KvSweepJob {
    pub kv: Arc<dyn KvTier>,
}

#[async_trait]
impl JobHandle for KvSweepJob {
    fn name(&self) -> &'static str {
        "kv-sweep"
    }

    fn cadence(&self) -> Cadence {
        Cadence::Interval(std::time::Duration::from_secs(300))
    }

    async fn run(&self) -> JobOutcome {
        let start = Instant::now();
        let reaped = self.kv.sweep();

        JobOutcome {
            success_count: reaped,
            error_count: 0,
            processing_time: start.elapsed(),
        }
    }
}

pub struct RetentionWeeklyJob {
    pub store: Arc<dyn AnalyticalStore>,
    pub clock: Arc<dyn Clock>,
}

#[async_trait]
impl JobHandle for RetentionWeeklyJob {
    fn name(&self) -> &'static str {
        "retention-weekly"
    }

    fn cadence(&self) -> Cadence {
        Cadence::Weekly {
            weekday: Weekday::Sun,
            hour: 4,
            minute: 0,
        }
    }

    async fn run(&self) -> JobOutcome {
        let start = Instant::now();
        let now = self.clock.now();

        // Purge before compact (SPEC_FULL.md §16 Open Question 2).
        let purged_events = self.store.purge_events_before(now - chrono::Duration::days(BEHAVIOR_RETENTION_DAYS));
        let purged_vectors = self.store.purge_vectors_before(now - chrono::Duration::days(VECTOR_RETENTION_DAYS));
        let purged_backups = self.store.purge_backups_before(now - chrono::Duration::days(BACKUP_RETENTION_DAYS));
        self.store.compact();

        JobOutcome {
            success_count: purged_events + purged_vectors + purged_backups,
            error_count: 0,
            processing_time: start.elapsed(),
        }
    }
}
