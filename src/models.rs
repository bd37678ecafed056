//! Core data model: entities, enums, and invariant-enforcing constructors.
//!
//! Mirrors spec.md §3. `ViewerId`/`ItemId` are opaque ids modeled as owned
//! strings (see SPEC_FULL.md §16 Open Question 1).

use std::collections::BTreeSet;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

pub const VIEWER_VECTOR_DIM: usize = 64;
pub const ITEM_VECTOR_DIM: usize = 128;

macro_rules! opaque_id {
    ($name:ident) => {
        #[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(pub Box<str>);

        impl $name {
            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl From<&str> for $name {
            fn from(s: &str) -> Self {
                Self(s.into())
            }
        }

        impl From<String> for $name {
            fn from(s: String) -> Self {
                Self(s.into_boxed_str())
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                f.write_str(&self.0)
            }
        }
    };
}

opaque_id!(ViewerId);
opaque_id!(ItemId);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ItemKind {
    Article,
    Video,
    Product,
}

impl ItemKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ItemKind::Article => "article",
            ItemKind::Video => "video",
            ItemKind::Product => "product",
        }
    }

    pub const ALL: [ItemKind; 3] = [ItemKind::Article, ItemKind::Video, ItemKind::Product];
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionKind {
    View,
    Click,
    Like,
    Share,
    Comment,
    Purchase,
}

impl ActionKind {
    pub fn as_label(&self) -> &'static str {
        match self {
            ActionKind::View => "view",
            ActionKind::Click => "click",
            ActionKind::Like => "like",
            ActionKind::Share => "share",
            ActionKind::Comment => "comment",
            ActionKind::Purchase => "purchase",
        }
    }

    /// Fixed weight table from spec.md §3.
    pub fn weight(&self) -> f64 {
        match self {
            ActionKind::View => 1.0,
            ActionKind::Click => 2.0,
            ActionKind::Like => 3.0,
            ActionKind::Share => 4.0,
            ActionKind::Comment => 3.5,
            ActionKind::Purchase => 5.0,
        }
    }

    pub const ALL: [ActionKind; 6] = [
        ActionKind::View,
        ActionKind::Click,
        ActionKind::Like,
        ActionKind::Share,
        ActionKind::Comment,
        ActionKind::Purchase,
    ];
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Activity {
    Low,
    Medium,
    High,
}

/// Immutable once appended; `(ViewerId, ItemId, ActionKind, ItemKind, ...)`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BehaviorEvent {
    pub viewer_id: ViewerId,
    pub item_id: ItemId,
    pub action: ActionKind,
    pub item_kind: ItemKind,
    pub session_id: Option<String>,
    pub device_kind: Option<String>,
    pub duration_sec: Option<f64>,
    pub timestamp: DateTime<Utc>,
    pub extra: serde_json::Value,
}

fn clamp01(x: f64) -> f64 {
    x.clamp(0.0, 1.0)
}

fn clamp10(x: f64) -> f64 {
    x.clamp(0.0, 10.0)
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ViewerFeatures {
    pub viewer_id: ViewerId,
    pub age_bucket: Option<String>,
    pub gender: Option<String>,
    pub interests: BTreeSet<String>,
    behavior_score: f64,
    pub activity: Activity,
    pub preferred_kinds: Vec<ItemKind>,
    pub last_active: Option<DateTime<Utc>>,
    pub vector: Vec<f64>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl ViewerFeatures {
    pub fn default_for(viewer_id: ViewerId, now: DateTime<Utc>) -> Self {
        Self {
            viewer_id,
            age_bucket: None,
            gender: None,
            interests: BTreeSet::new(),
            behavior_score: 0.0,
            activity: Activity::Low,
            preferred_kinds: Vec::new(),
            last_active: None,
            vector: vec![0.0; VIEWER_VECTOR_DIM],
            created_at: now,
            updated_at: now,
        }
    }

    pub fn behavior_score(&self) -> f64 {
        self.behavior_score
    }

    /// Invariant 2: clamped to [0, 10].
    pub fn set_behavior_score(&mut self, value: f64) {
        self.behavior_score = clamp10(value);
    }

    /// Invariant 1: forbid NaN/infinite components; infill with `fallback_mean`.
    pub fn sanitize_vector(&mut self, fallback_mean: f64) {
        sanitize_vector_inplace(&mut self.vector, VIEWER_VECTOR_DIM, fallback_mean);
    }

    /// Refreshes the fields owned by the `viewer-daily` offline job
    /// (spec.md §4.4) from freshly computed aggregates.
    pub fn apply_aggregates(&mut self, aggregates: &ViewerAggregates, activity: Activity, now: DateTime<Utc>) {
        self.set_behavior_score(aggregates.behavior_score);
        self.activity = activity;
        if aggregates.last_active.is_some() {
            self.last_active = aggregates.last_active;
        }

        let mut by_count: Vec<(&String, &u64)> = aggregates.kind_counts.iter().collect();
        by_count.sort_by(|a, b| b.1.cmp(a.1));
        self.preferred_kinds = by_count
            .into_iter()
            .filter_map(|(kind, _)| match kind.as_str() {
                "article" => Some(ItemKind::Article),
                "video" => Some(ItemKind::Video),
                "product" => Some(ItemKind::Product),
                _ => None,
            })
            .collect();

        self.updated_at = now;
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ItemFeatures {
    pub item_id: ItemId,
    pub kind: ItemKind,
    pub title: String,
    pub category: Option<String>,
    pub tags: BTreeSet<String>,
    pub author_id: Option<String>,
    pub publish_time: Option<DateTime<Utc>>,
    quality_score: f64,
    popularity_score: f64,
    pub text_features: std::collections::BTreeMap<String, f64>,
    pub vector: Vec<f64>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl ItemFeatures {
    pub fn default_for(item_id: ItemId, kind: ItemKind, now: DateTime<Utc>) -> Self {
        Self {
            item_id,
            kind,
            title: String::new(),
            category: None,
            tags: BTreeSet::new(),
            author_id: None,
            publish_time: None,
            quality_score: 0.0,
            popularity_score: 0.0,
            text_features: std::collections::BTreeMap::new(),
            vector: vec![0.0; ITEM_VECTOR_DIM],
            created_at: now,
            updated_at: now,
        }
    }

    pub fn quality_score(&self) -> f64 {
        self.quality_score
    }

    pub fn set_quality_score(&mut self, value: f64) {
        self.quality_score = clamp10(value);
    }

    pub fn popularity_score(&self) -> f64 {
        self.popularity_score
    }

    pub fn set_popularity_score(&mut self, value: f64) {
        self.popularity_score = clamp10(value);
    }

    pub fn sanitize_vector(&mut self, fallback_mean: f64) {
        sanitize_vector_inplace(&mut self.vector, ITEM_VECTOR_DIM, fallback_mean);
    }

    /// Refreshes the fields owned by the `item-hourly` offline job
    /// (spec.md §4.4) from freshly computed aggregates.
    pub fn apply_aggregates(&mut self, aggregates: &ItemAggregates, now: DateTime<Utc>) {
        self.set_popularity_score(aggregates.popularity_score);
        self.set_quality_score(aggregates.engagement_rate * 10.0);
        self.updated_at = now;
    }
}

fn sanitize_vector_inplace(vector: &mut Vec<f64>, expected_dim: usize, fallback_mean: f64) {
    if vector.len() != expected_dim {
        vector.resize(expected_dim, fallback_mean);
    }
    for component in vector.iter_mut() {
        if !component.is_finite() {
            *component = fallback_mean;
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ItemAggregates {
    pub action_counts: std::collections::BTreeMap<String, u64>,
    pub unique_viewers: u64,
    pub ctr: f64,
    pub like_rate: f64,
    pub share_rate: f64,
    pub engagement_rate: f64,
    pub user_diversity: f64,
    pub popularity_score: f64,
    pub computed_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ViewerAggregates {
    pub action_counts: std::collections::BTreeMap<String, u64>,
    pub kind_counts: std::collections::BTreeMap<String, u64>,
    pub active_days: u64,
    pub avg_duration: f64,
    pub behavior_score: f64,
    pub daily_avg_actions: f64,
    pub last_active: Option<DateTime<Utc>>,
    pub computed_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AlgorithmResultItem {
    pub item_id: ItemId,
    pub raw_score: f64,
    pub kind: ItemKind,
    pub category: Option<String>,
    pub author_id: Option<String>,
    pub publish_time: Option<DateTime<Utc>>,
    pub quality_score: Option<f64>,
    pub review_status: Option<ReviewStatus>,
    pub viewer_rating: Option<f64>,
    pub view_count: Option<u64>,
    pub like_count: Option<u64>,
    pub share_count: Option<u64>,
    pub comment_count: Option<u64>,
    pub title: Option<String>,
    pub description: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReviewStatus {
    Approved,
    Pending,
    Rejected,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AlgorithmResult {
    pub algorithm_name: String,
    pub items: Vec<AlgorithmResultItem>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrendingList {
    pub kind: Option<ItemKind>,
    pub items: Vec<ItemId>,
    pub computed_at: DateTime<Utc>,
}

#[inline]
pub fn clamp_score01(x: f64) -> f64 {
    clamp01(x)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn behavior_score_clamps_to_0_10() {
        let mut v = ViewerFeatures::default_for(ViewerId::from("v1"), Utc::now());
        v.set_behavior_score(42.0);
        assert_eq!(v.behavior_score(), 10.0);
        v.set_behavior_score(-5.0);
        assert_eq!(v.behavior_score(), 0.0);
    }

    #[test]
    fn sanitize_vector_replaces_nan_and_wrong_length() {
        let mut v = vec![1.0, f64::NAN, f64::INFINITY];
        sanitize_vector_inplace(&mut v, 5, 0.25);
        assert_eq!(v.len(), 5);
        assert!(v.iter().all(|x| x.is_finite()));
        assert_eq!(v[1], 0.25);
        assert_eq!(v[2], 0.25);
    }
}
