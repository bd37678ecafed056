//! Behavior Log Gateway (C2). The five aggregation templates have a
//! single canonical definition here; nothing upstream composes its own
//! aggregations over raw events.

use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};
use std::sync::Arc;

use chrono::{DateTime, Datelike, Timelike, Utc};
use serde::Serialize;

use crate::behavior_log::store::AnalyticalStore;
use crate::clock::Clock;
use crate::error::CoreResult;
use crate::models::{ActionKind, Activity, BehaviorEvent, ItemAggregates, ItemId, ItemKind, TrendingList, ViewerAggregates, ViewerId};

#[derive(Debug, Clone, Default, Serialize)]
pub struct ViewerPatterns {
    pub hour_histogram: [u64; 24],
    pub weekday_histogram: [u64; 7],
    pub action_histogram: BTreeMap<String, u64>,
    pub kind_histogram: BTreeMap<String, u64>,
    pub device_histogram: BTreeMap<String, u64>,
}

pub struct BehaviorLogGateway {
    store: Arc<dyn AnalyticalStore>,
    clock: Arc<dyn Clock>,
}

impl BehaviorLogGateway {
    pub fn new(store: Arc<dyn AnalyticalStore>, clock: Arc<dyn Clock>) -> Self {
        Self { store, clock }
    }

    pub fn store(&self) -> &Arc<dyn AnalyticalStore> {
        &self.store
    }

    pub async fn append_batch(&self, events: Vec<BehaviorEvent>) -> CoreResult<()> {
        self.store.append(events);
        Ok(())
    }

    /// Template 1: per-viewer aggregates over a rolling window.
    pub async fn viewer_aggregates(
        &self,
        viewer_ids: Option<&HashSet<ViewerId>>,
        window_days: i64,
        min_interactions: u64,
    ) -> BTreeMap<ViewerId, ViewerAggregates> {
        let cutoff = self.clock.now() - chrono::Duration::days(window_days);
        let events = self.store.events_since(cutoff);

        let mut grouped: HashMap<ViewerId, Vec<&BehaviorEvent>> = HashMap::new();
        for event in &events {
            if let Some(ids) = viewer_ids {
                if !ids.contains(&event.viewer_id) {
                    continue;
                }
            }
            grouped.entry(event.viewer_id.clone()).or_default().push(event);
        }

        let mut out = BTreeMap::new();
        for (viewer_id, viewer_events) in grouped {
            if (viewer_events.len() as u64) < min_interactions {
                continue;
            }

            let mut action_counts: BTreeMap<String, u64> = BTreeMap::new();
            let mut kind_counts: BTreeMap<String, u64> = BTreeMap::new();
            let mut active_days: BTreeSet<chrono::NaiveDate> = BTreeSet::new();
            let mut duration_sum = 0.0;
            let mut duration_n = 0u64;
            let mut weighted_sum = 0.0;
            let mut last_active: Option<DateTime<Utc>> = None;

            for event in &viewer_events {
                *action_counts.entry(event.action.as_label().to_string()).or_default() += 1;
                *kind_counts.entry(event.item_kind.as_str().to_string()).or_default() += 1;
                active_days.insert(event.timestamp.date_naive());
                weighted_sum += event.action.weight();
                if let Some(d) = event.duration_sec {
                    duration_sum += d;
                    duration_n += 1;
                }
                last_active = Some(last_active.map_or(event.timestamp, |prev| prev.max(event.timestamp)));
            }

            let active_days_count = active_days.len().max(1) as f64;
            let behavior_score = crate::models::clamp_score01(weighted_sum / active_days_count / 10.0) * 10.0;

            out.insert(
                viewer_id,
                ViewerAggregates {
                    action_counts,
                    kind_counts,
                    active_days: active_days.len() as u64,
                    avg_duration: if duration_n > 0 { duration_sum / duration_n as f64 } else { 0.0 },
                    behavior_score,
                    daily_avg_actions: viewer_events.len() as f64 / active_days_count,
                    last_active,
                    computed_at: Some(self.clock.now()),
                },
            );
        }
        out
    }

    /// Template 2: per-item aggregates over a rolling window.
    pub async fn item_aggregates(
        &self,
        item_ids: Option<&HashSet<ItemId>>,
        window_days: i64,
        min_interactions: u64,
    ) -> BTreeMap<ItemId, ItemAggregates> {
        let cutoff = self.clock.now() - chrono::Duration::days(window_days);
        let events = self.store.events_since(cutoff);

        let mut grouped: HashMap<ItemId, Vec<&BehaviorEvent>> = HashMap::new();
        for event in &events {
            if let Some(ids) = item_ids {
                if !ids.contains(&event.item_id) {
                    continue;
                }
            }
            grouped.entry(event.item_id.clone()).or_default().push(event);
        }

        let mut out = BTreeMap::new();
        for (item_id, item_events) in grouped {
            let total = item_events.len() as u64;
            if total < min_interactions {
                continue;
            }

            let mut action_counts: BTreeMap<String, u64> = BTreeMap::new();
            let mut unique_viewers: HashSet<&ViewerId> = HashSet::new();
            for event in &item_events {
                *action_counts.entry(event.action.as_label().to_string()).or_default() += 1;
                unique_viewers.insert(&event.viewer_id);
            }

            let views = *action_counts.get(ActionKind::View.as_label()).unwrap_or(&0) as f64;
            let clicks = *action_counts.get(ActionKind::Click.as_label()).unwrap_or(&0) as f64;
            let likes = *action_counts.get(ActionKind::Like.as_label()).unwrap_or(&0) as f64;
            let shares = *action_counts.get(ActionKind::Share.as_label()).unwrap_or(&0) as f64;
            let comments = *action_counts.get(ActionKind::Comment.as_label()).unwrap_or(&0) as f64;
            let purchases = *action_counts.get(ActionKind::Purchase.as_label()).unwrap_or(&0) as f64;

            let ctr = if views > 0.0 { clicks / views } else { 0.0 };
            let like_rate = likes / total as f64;
            let share_rate = shares / total as f64;
            let engagement_rate = (likes + shares + comments + purchases) / total as f64;
            let user_diversity = unique_viewers.len() as f64 / total as f64;
            let popularity_score = crate::models::clamp_score01(((total as f64 + 1.0).ln() * 2.5) / 10.0) * 10.0;

            out.insert(
                item_id,
                ItemAggregates {
                    action_counts,
                    unique_viewers: unique_viewers.len() as u64,
                    ctr,
                    like_rate,
                    share_rate,
                    engagement_rate,
                    user_diversity,
                    popularity_score,
                    computed_at: Some(self.clock.now()),
                },
            );
        }
        out
    }

    /// Template 3: sparse viewer x item interaction matrix.
    pub async fn interaction_matrix(
        &self,
        viewer_ids: Option<&HashSet<ViewerId>>,
        item_ids: Option<&HashSet<ItemId>>,
        window_days: i64,
    ) -> BTreeMap<(ViewerId, ItemId), f64> {
        let cutoff = self.clock.now() - chrono::Duration::days(window_days);
        let events = self.store.events_since(cutoff);

        let mut matrix: BTreeMap<(ViewerId, ItemId), f64> = BTreeMap::new();
        for event in &events {
            if let Some(ids) = viewer_ids {
                if !ids.contains(&event.viewer_id) {
                    continue;
                }
            }
            if let Some(ids) = item_ids {
                if !ids.contains(&event.item_id) {
                    continue;
                }
            }
            *matrix
                .entry((event.viewer_id.clone(), event.item_id.clone()))
                .or_insert(0.0) += event.action.weight();
        }
        matrix
    }

    /// Template 4: trending items by weighted interaction count.
    pub async fn trending(
        &self,
        kind: Option<ItemKind>,
        window_hours: i64,
        min_interactions: u64,
        limit: usize,
    ) -> TrendingList {
        let cutoff = self.clock.now() - chrono::Duration::hours(window_hours);
        let events = self.store.events_since(cutoff);

        let mut scored: HashMap<ItemId, (f64, u64)> = HashMap::new();
        for event in &events {
            if let Some(k) = kind {
                if event.item_kind != k {
                    continue;
                }
            }
            let entry = scored.entry(event.item_id.clone()).or_insert((0.0, 0));
            entry.0 += event.action.weight();
            entry.1 += 1;
        }

        let mut ranked: Vec<(ItemId, f64)> = scored
            .into_iter()
            .filter(|(_, (_, count))| *count >= min_interactions)
            .map(|(id, (score, _))| (id, score))
            .collect();

        ranked.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal).then_with(|| a.0.cmp(&b.0)));
        ranked.truncate(limit);

        TrendingList {
            kind,
            items: ranked.into_iter().map(|(id, _)| id).collect(),
            computed_at: self.clock.now(),
        }
    }

    /// Template 5: behavioral histograms for one viewer.
    pub async fn viewer_patterns(&self, viewer_id: &ViewerId) -> ViewerPatterns {
        let events = self.store.events_since(DateTime::<Utc>::MIN_UTC);
        let mut patterns = ViewerPatterns::default();

        for event in events.iter().filter(|e| &e.viewer_id == viewer_id) {
            patterns.hour_histogram[event.timestamp.hour() as usize] += 1;
            patterns.weekday_histogram[event.timestamp.weekday().num_days_from_monday() as usize] += 1;
            *patterns.action_histogram.entry(event.action.as_label().to_string()).or_default() += 1;
            *patterns.kind_histogram.entry(event.item_kind.as_str().to_string()).or_default() += 1;
            if let Some(device) = &event.device_kind {
                *patterns.device_histogram.entry(device.clone()).or_default() += 1;
            }
        }

        patterns
    }
}

/// Derives `activity` from a freshly computed `behaviorScore`, used by
/// the viewer-daily offline job (spec.md §4.4).
pub fn activity_for_behavior_score(behavior_score: f64) -> Activity {
    if behavior_score >= 7.0 {
        Activity::High
    } else if behavior_score >= 3.0 {
        Activity::Medium
    } else {
        Activity::Low
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::behavior_log::store::InMemoryAnalyticalStore;
    use crate::clock::SystemClock;
    use crate::models::ItemId;

    fn event(viewer: &str, item: &str, action: ActionKind, ts: DateTime<Utc>) -> BehaviorEvent {
        BehaviorEvent {
            viewer_id: ViewerId::from(viewer),
            item_id: ItemId::from(item),
            action,
            item_kind: ItemKind::Article,
            session_id: None,
            device_kind: None,
            duration_sec: None,
            timestamp: ts,
            extra: serde_json::Value::Null,
        }
    }

    #[tokio::test]
    async fn trending_ranks_by_weighted_interactions_and_respects_limit() {
        let store: Arc<dyn AnalyticalStore> = Arc::new(InMemoryAnalyticalStore::new());
        let clock: Arc<dyn Clock> = Arc::new(SystemClock);
        let now = clock.now();

        store.append(vec![
            event("v1", "i1", ActionKind::Purchase, now),
            event("v2", "i1", ActionKind::Purchase, now),
            event("v1", "i2", ActionKind::View, now),
        ]);

        let gateway = BehaviorLogGateway::new(store, clock);
        let trending = gateway.trending(None, 24, 1, 1).await;

        assert_eq!(trending.items.len(), 1);
        assert_eq!(trending.items[0], ItemId::from("i1"));
    }

    #[tokio::test]
    async fn viewer_aggregates_excludes_viewers_below_min_interactions() {
        let store: Arc<dyn AnalyticalStore> = Arc::new(InMemoryAnalyticalStore::new());
        let clock: Arc<dyn Clock> = Arc::new(SystemClock);
        let now = clock.now();

        store.append(vec![event("v1", "i1", ActionKind::View, now)]);

        let gateway = BehaviorLogGateway::new(store, clock);
        let aggregates = gateway.viewer_aggregates(None, 30, 5).await;
        assert!(aggregates.is_empty());
    }
}
