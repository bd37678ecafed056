//! Tiered feature store (C3): L1 in-process LRU, L2 shared KV with
//! TTL, L3 compute-on-miss over the behavior log.

use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use lru::LruCache;
use parking_lot::Mutex;
use serde::Serialize;

use crate::behavior_log::{activity_for_behavior_score, BehaviorLogGateway};
use crate::clock::Clock;
use crate::config::CacheTtlConfig;
use crate::feature_store::kv::{keys, KvTier};
use crate::feature_store::single_flight::{SingleFlightGroup, WriteStripes, DEFAULT_STRIPE_COUNT};
use crate::models::{ItemFeatures, ItemId, ViewerFeatures, ViewerId};

const VIEWER_AGGREGATE_WINDOW_DAYS: i64 = 30;
const ITEM_AGGREGATE_WINDOW_DAYS: i64 = 7;
const L1_CAPACITY: usize = 50_000;

#[derive(Debug, Clone, Default, Serialize)]
pub struct FeatureStoreStats {
    pub l1_viewer_entries: usize,
    pub l1_item_entries: usize,
    pub l2_key_count: usize,
    pub l2_memory_estimate_bytes: usize,
    pub viewer_single_flight_inflight: usize,
    pub item_single_flight_inflight: usize,
}

pub struct FeatureStore {
    l1_viewers: Mutex<LruCache<ViewerId, ViewerFeatures>>,
    l1_items: Mutex<LruCache<ItemId, ItemFeatures>>,
    l2: Arc<dyn KvTier>,
    gateway: Arc<BehaviorLogGateway>,
    clock: Arc<dyn Clock>,
    ttl: CacheTtlConfig,
    viewer_single_flight: SingleFlightGroup<ViewerId, ViewerFeatures>,
    item_single_flight: SingleFlightGroup<ItemId, ItemFeatures>,
    write_stripes: WriteStripes,
}

impl FeatureStore {
    pub fn new(l2: Arc<dyn KvTier>, gateway: Arc<BehaviorLogGateway>, clock: Arc<dyn Clock>, ttl: CacheTtlConfig) -> Self {
        Self {
            l1_viewers: Mutex::new(LruCache::new(std::num::NonZeroUsize::new(L1_CAPACITY).unwrap())),
            l1_items: Mutex::new(LruCache::new(std::num::NonZeroUsize::new(L1_CAPACITY).unwrap())),
            l2,
            gateway,
            clock,
            ttl,
            viewer_single_flight: SingleFlightGroup::new(),
            item_single_flight: SingleFlightGroup::new(),
            write_stripes: WriteStripes::new(DEFAULT_STRIPE_COUNT),
        }
    }

    pub async fn get_viewer_batch(&self, ids: &[ViewerId]) -> BTreeMap<ViewerId, ViewerFeatures> {
        let mut out = BTreeMap::new();
        let mut l2_misses = Vec::new();

        {
            let mut l1 = self.l1_viewers.lock();
            for id in ids {
                if let Some(hit) = l1.get(id) {
                    out.insert(id.clone(), hit.clone());
                } else {
                    l2_misses.push(id.clone());
                }
            }
        }
        if l2_misses.is_empty() {
            return out;
        }

        let l2_keys: Vec<String> = l2_misses.iter().map(|id| keys::viewer_features(id.as_str())).collect();
        let l2_values = self.l2.mget(&l2_keys).await;

        let mut l3_misses: HashSet<ViewerId> = HashSet::new();
        for (id, raw) in l2_misses.into_iter().zip(l2_values) {
            match raw.and_then(|bytes| serde_json::from_slice::<ViewerFeatures>(&bytes).ok()) {
                Some(mut features) => {
                    features.sanitize_vector(0.0);
                    self.l1_viewers.lock().put(id.clone(), features.clone());
                    out.insert(id, features);
                }
                None => {
                    l3_misses.insert(id);
                }
            }
        }
        if l3_misses.is_empty() {
            return out;
        }

        let computed = futures::future::join_all(l3_misses.into_iter().map(|id| async move {
            let features = self
                .viewer_single_flight
                .execute(id.clone(), || self.compute_viewer_features(id.clone()))
                .await;
            (id, features)
        }))
        .await;

        let entries: Vec<ViewerFeatures> = computed.into_iter().map(|(_, f)| f).collect();
        self.put_viewer_batch(entries.clone()).await;
        for features in entries {
            out.insert(features.viewer_id.clone(), features);
        }
        out
    }

    pub async fn get_item_batch(&self, ids: &[ItemId]) -> BTreeMap<ItemId, ItemFeatures> {
        let mut out = BTreeMap::new();
        let mut l2_misses = Vec::new();

        {
            let mut l1 = self.l1_items.lock();
            for id in ids {
                if let Some(hit) = l1.get(id) {
                    out.insert(id.clone(), hit.clone());
                } else {
                    l2_misses.push(id.clone());
                }
            }
        }
        if l2_misses.is_empty() {
            return out;
        }

        let l2_keys: Vec<String> = l2_misses.iter().map(|id| keys::content_features(id.as_str())).collect();
        let l2_values = self.l2.mget(&l2_keys).await;

        let mut l3_misses: HashSet<ItemId> = HashSet::new();
        for (id, raw) in l2_misses.into_iter().zip(l2_values) {
            match raw.and_then(|bytes| serde_json::from_slice::<ItemFeatures>(&bytes).ok()) {
                Some(mut features) => {
                    features.sanitize_vector(0.0);
                    self.l1_items.lock().put(id.clone(), features.clone());
                    out.insert(id, features);
                }
                None => {
                    l3_misses.insert(id);
                }
            }
        }
        if l3_misses.is_empty() {
            return out;
        }

        let computed = futures::future::join_all(l3_misses.into_iter().map(|id| async move {
            let features = self
                .item_single_flight
                .execute(id.clone(), || self.compute_item_features(id.clone()))
                .await;
            (id, features)
        }))
        .await;

        let entries: Vec<ItemFeatures> = computed.into_iter().map(|(_, f)| f).collect();
        self.put_item_batch(entries.clone()).await;
        for features in entries {
            out.insert(features.item_id.clone(), features);
        }
        out
    }

    async fn compute_viewer_features(&self, id: ViewerId) -> ViewerFeatures {
        let now = self.clock.now();
        let mut ids = HashSet::new();
        ids.insert(id.clone());
        let aggregates = self.gateway.viewer_aggregates(Some(&ids), VIEWER_AGGREGATE_WINDOW_DAYS, 0).await;

        let mut features = ViewerFeatures::default_for(id.clone(), now);
        if let Some(agg) = aggregates.get(&id) {
            features.apply_aggregates(agg, activity_for_behavior_score(agg.behavior_score), now);
        }
        features.sanitize_vector(0.0);
        features
    }

    async fn compute_item_features(&self, id: ItemId) -> ItemFeatures {
        let now = self.clock.now();
        let mut ids = HashSet::new();
        ids.insert(id.clone());
        let aggregates = self.gateway.item_aggregates(Some(&ids), ITEM_AGGREGATE_WINDOW_DAYS, 0).await;

        // Kind is unknown at compute time for a cold item; Article is the
        // conservative placeholder until the next item-hourly refresh.
        let mut features = ItemFeatures::default_for(id.clone(), crate::models::ItemKind::Article, now);
        if let Some(agg) = aggregates.get(&id) {
            features.apply_aggregates(agg, now);
        }
        features.sanitize_vector(0.0);
        features
    }

    pub async fn put_viewer_batch(&self, entries: Vec<ViewerFeatures>) {
        let mut kv_entries = Vec::with_capacity(entries.len());
        for entry in &entries {
            let _guard = self.write_stripes.lock_for(&entry.viewer_id);
            if let Ok(bytes) = serde_json::to_vec(entry) {
                kv_entries.push((keys::viewer_features(entry.viewer_id.as_str()), bytes));
            }
        }
        self.l2.mset_ex(kv_entries, self.ttl.viewer_secs).await;

        let mut l1 = self.l1_viewers.lock();
        for entry in entries {
            l1.put(entry.viewer_id.clone(), entry);
        }
    }

    pub async fn put_item_batch(&self, entries: Vec<ItemFeatures>) {
        let mut kv_entries = Vec::with_capacity(entries.len());
        for entry in &entries {
            let _guard = self.write_stripes.lock_for(&entry.item_id);
            if let Ok(bytes) = serde_json::to_vec(entry) {
                kv_entries.push((keys::content_features(entry.item_id.as_str()), bytes));
            }
        }
        self.l2.mset_ex(kv_entries, self.ttl.item_secs).await;

        let mut l1 = self.l1_items.lock();
        for entry in entries {
            l1.put(entry.item_id.clone(), entry);
        }
    }

    /// Fast path for the ranking pipeline's hydrate step: checks L1
    /// then L2 only, never falling through to L3 compute. A miss here
    /// stays a miss; the caller synthesizes a default and schedules a
    /// refresh rather than blocking on the behavior log (spec.md §4.7).
    pub async fn get_viewer_cached(&self, id: &ViewerId) -> Option<ViewerFeatures> {
        if let Some(hit) = self.l1_viewers.lock().get(id) {
            return Some(hit.clone());
        }
        let raw = self.l2.get(&keys::viewer_features(id.as_str())).await?;
        let mut features = serde_json::from_slice::<ViewerFeatures>(&raw).ok()?;
        features.sanitize_vector(0.0);
        self.l1_viewers.lock().put(id.clone(), features.clone());
        Some(features)
    }

    /// Fires the L3 recompute for a viewer cache miss in the background,
    /// repopulating L1/L2 once done. Collapses with any in-flight
    /// `get_viewer_batch` compute for the same id via the single-flight
    /// group.
    pub fn schedule_viewer_refresh(self: &Arc<Self>, id: ViewerId) {
        let store = Arc::clone(self);
        tokio::spawn(async move {
            let features = store.viewer_single_flight.execute(id.clone(), || store.compute_viewer_features(id.clone())).await;
            store.put_viewer_batch(vec![features]).await;
        });
    }

    /// Best-effort L1 invalidation of a viewer, used on ingestion
    /// before the incremental patch (spec.md §4.3).
    pub fn invalidate_viewer(&self, id: &ViewerId) {
        self.l1_viewers.lock().pop(id);
    }

    /// Incremental patch on ingestion: bump `behaviorScore`, update
    /// `lastActive`, and promote `activity` one step if the viewer was
    /// already active within the last hour. Best-effort: a missing L2
    /// record is a no-op, reconciled by the next `viewer-daily` run.
    pub async fn patch_viewer_incremental(&self, id: &ViewerId, action_weight: f64, now: DateTime<Utc>) {
        let key = keys::viewer_features(id.as_str());
        let Some(bytes) = self.l2.get(&key).await else {
            return;
        };
        let Ok(mut features) = serde_json::from_slice::<ViewerFeatures>(&bytes) else {
            return;
        };

        let _guard = self.write_stripes.lock_for(id);

        let was_recently_active = features
            .last_active
            .map(|last| now.signed_duration_since(last) <= chrono::Duration::hours(1))
            .unwrap_or(false);

        features.set_behavior_score(features.behavior_score() + 0.1 * action_weight);
        features.last_active = Some(now);
        features.updated_at = now;
        if was_recently_active {
            features.activity = match features.activity {
                crate::models::Activity::Low => crate::models::Activity::Medium,
                crate::models::Activity::Medium => crate::models::Activity::High,
                crate::models::Activity::High => crate::models::Activity::High,
            };
        }

        if let Ok(bytes) = serde_json::to_vec(&features) {
            self.l2.setex(&key, bytes, self.ttl.viewer_secs).await;
        }
        self.l1_viewers.lock().put(id.clone(), features);
    }

    /// Reports current tier sizes and an L2 memory estimate, the way
    /// `get_cache_statistics` surfaces Redis `INFO memory` alongside key
    /// counts. Reaping of expired KV entries happens separately via the
    /// `kv-sweep` scheduled job.
    pub fn stats(&self) -> FeatureStoreStats {
        FeatureStoreStats {
            l1_viewer_entries: self.l1_viewers.lock().len(),
            l1_item_entries: self.l1_items.lock().len(),
            l2_key_count: self.l2.key_count(),
            l2_memory_estimate_bytes: self.l2.estimated_memory_bytes(),
            viewer_single_flight_inflight: self.viewer_single_flight.in_flight_count(),
            item_single_flight_inflight: self.item_single_flight.in_flight_count(),
        }
    }
}
