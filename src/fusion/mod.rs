//! Fusion & Rerank Pipeline (C8): weighted merge -> dedup -> policy
//! filter -> MMR diversify -> final boost.

pub mod boost;
pub mod dedup;
pub mod diversity;
pub mod policy;

use std::collections::{BTreeMap, HashMap, HashSet};

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::behavior_log::ViewerPatterns;
use crate::config::AppConfig;
use crate::models::{AlgorithmResult, ItemId, ItemKind, ReviewStatus};
use crate::ranking::RequestContext;

pub use boost::ScoreBreakdown;
pub use policy::PolicyRejections;

#[derive(Debug, Clone, Serialize)]
pub struct FusedItem {
    pub item_id: ItemId,
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
    pub fusion_score: f64,
    pub algorithm_coverage: Vec<String>,
    pub final_score: f64,
    pub score_breakdown: ScoreBreakdown,
}

#[derive(Debug, Clone, Default)]
pub struct FusionStats {
    pub rejections: BTreeMap<&'static str, u64>,
    pub degraded: bool,
}

/// Stage A: weighted merge. Exact-dedup by ItemId falls out of the
/// hashmap join for free; near-dedup is Stage B.
fn weighted_merge(results: &BTreeMap<String, AlgorithmResult>, weights: &BTreeMap<String, f64>) -> Vec<FusedItem> {
    let configured_algorithms = weights.len().max(1) as f64;

    struct Accumulator {
        numerator: f64,
        denominator: f64,
        coverage: HashSet<String>,
        template: FusedItem,
    }

    let mut merged: HashMap<ItemId, Accumulator> = HashMap::new();

    for (algorithm_name, result) in results {
        let weight = *weights.get(algorithm_name).unwrap_or(&0.0);
        for (index, item) in result.items.iter().enumerate() {
            let position_score = 1.0 / ((index + 1) as f64);
            let contribution = item.raw_score * position_score;

            let entry = merged.entry(item.item_id.clone()).or_insert_with(|| Accumulator {
                numerator: 0.0,
                denominator: 0.0,
                coverage: HashSet::new(),
                template: FusedItem {
                    item_id: item.item_id.clone(),
                    kind: item.kind,
                    category: item.category.clone(),
                    author_id: item.author_id.clone(),
                    publish_time: item.publish_time,
                    quality_score: item.quality_score,
                    review_status: item.review_status,
                    viewer_rating: item.viewer_rating,
                    view_count: item.view_count,
                    like_count: item.like_count,
                    share_count: item.share_count,
                    comment_count: item.comment_count,
                    title: item.title.clone(),
                    description: item.description.clone(),
                    fusion_score: 0.0,
                    algorithm_coverage: Vec::new(),
                    final_score: 0.0,
                    score_breakdown: ScoreBreakdown {
                        fusion: 0.0,
                        freshness: 0.0,
                        popularity: 0.0,
                        personalization: 0.0,
                    },
                },
            });

            entry.numerator += contribution * weight;
            entry.denominator += weight;
            entry.coverage.insert(algorithm_name.clone());
        }
    }

    merged
        .into_values()
        .map(|acc| {
            let mut item = acc.template;
            let weighted_avg = if acc.denominator > 0.0 { acc.numerator / acc.denominator } else { 0.0 };
            let coverage_bonus = (acc.coverage.len() as f64 / configured_algorithms) * 0.1;
            item.fusion_score = weighted_avg + coverage_bonus;
            item.algorithm_coverage = {
                let mut coverage: Vec<String> = acc.coverage.into_iter().collect();
                coverage.sort();
                coverage
            };
            item
        })
        .collect()
}

fn matched_active_hour(patterns: &ViewerPatterns, now: DateTime<Utc>) -> bool {
    use chrono::Timelike;
    let hour = now.hour() as usize;
    let busiest = patterns.hour_histogram.iter().enumerate().max_by_key(|(_, count)| **count);
    matches!(busiest, Some((h, count)) if h == hour && *count > 0)
}

fn matched_device_preference(patterns: &ViewerPatterns, context: &RequestContext) -> bool {
    match &context.device_kind {
        Some(device) => patterns.device_histogram.get(device).copied().unwrap_or(0) > 0,
        None => false,
    }
}

pub struct FusionPipeline {
    config: AppConfig,
}

impl FusionPipeline {
    pub fn new(config: AppConfig) -> Self {
        Self { config }
    }

    pub fn fuse(
        &self,
        algorithm_results: &BTreeMap<String, AlgorithmResult>,
        target_size: usize,
        context: &RequestContext,
        viewer_patterns: Option<&ViewerPatterns>,
        now: DateTime<Utc>,
    ) -> (Vec<FusedItem>, FusionStats) {
        if algorithm_results.is_empty() {
            return (Vec::new(), FusionStats::default());
        }

        let merged = weighted_merge(algorithm_results, &self.config.algorithm_weights);
        let deduped = dedup::near_dedup(merged, &self.config.dedup);
        let (policy_passed, rejections) = policy::apply(deduped, &self.config.business_rules, now);
        let diversified = diversity::select(policy_passed, target_size, &self.config.diversity);

        let active_hour_match = viewer_patterns.map(|p| matched_active_hour(p, now)).unwrap_or(false);
        let device_match = viewer_patterns.map(|p| matched_device_preference(p, context)).unwrap_or(false);

        let mut boosted: Vec<FusedItem> = diversified
            .into_iter()
            .map(|mut item| {
                let freshness = boost::freshness_boost(now, item.publish_time, self.config.boost.freshness_half_life_hours);
                let popularity = boost::popularity_boost(
                    item.view_count.unwrap_or(0),
                    item.like_count.unwrap_or(0),
                    item.share_count.unwrap_or(0),
                    item.comment_count.unwrap_or(0),
                    self.config.boost.max_expected_popularity,
                );
                let personalization = boost::personalization_boost(active_hour_match, device_match);

                item.score_breakdown = ScoreBreakdown {
                    fusion: item.fusion_score,
                    freshness,
                    popularity,
                    personalization,
                };
                item.final_score = boost::final_score(item.score_breakdown, &self.config.boost);
                item
            })
            .collect();

        boosted.sort_by(|a, b| b.final_score.partial_cmp(&a.final_score).unwrap_or(std::cmp::Ordering::Equal).then_with(|| a.item_id.cmp(&b.item_id)));
        boosted.truncate(target_size);

        (boosted, FusionStats { rejections: rejections.counts, degraded: false })
    }

    /// Safe fallback when any stage above fails: the first algorithm's
    /// results (by algorithm name) truncated to `targetSize`.
    pub fn degraded_fallback(&self, algorithm_results: &BTreeMap<String, AlgorithmResult>, target_size: usize) -> (Vec<FusedItem>, FusionStats) {
        let Some((_, first)) = algorithm_results.iter().next() else {
            return (Vec::new(), FusionStats { rejections: BTreeMap::new(), degraded: true });
        };

        let items = first
            .items
            .iter()
            .take(target_size)
            .map(|item| FusedItem {
                item_id: item.item_id.clone(),
                kind: item.kind,
                category: item.category.clone(),
                author_id: item.author_id.clone(),
                publish_time: item.publish_time,
                quality_score: item.quality_score,
                review_status: item.review_status,
                viewer_rating: item.viewer_rating,
                view_count: item.view_count,
                like_count: item.like_count,
                share_count: item.share_count,
                comment_count: item.comment_count,
                title: item.title.clone(),
                description: item.description.clone(),
                fusion_score: item.raw_score,
                algorithm_coverage: vec![first.algorithm_name.clone()],
                final_score: item.raw_score,
                score_breakdown: ScoreBreakdown {
                    fusion: item.raw_score,
                    freshness: 0.0,
                    popularity: 0.0,
                    personalization: 0.0,
                },
            })
            .collect();

        (items, FusionStats { rejections: BTreeMap::new(), degraded: true })
    }

    /// `fuse`, but never lets a panic inside one of the five stages take
    /// the request down with it — falls back to `degraded_fallback`.
    pub fn fuse_or_degraded(
        &self,
        algorithm_results: &BTreeMap<String, AlgorithmResult>,
        target_size: usize,
        context: &RequestContext,
        viewer_patterns: Option<&ViewerPatterns>,
        now: DateTime<Utc>,
    ) -> (Vec<FusedItem>, FusionStats) {
        let outcome = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| self.fuse(algorithm_results, target_size, context, viewer_patterns, now)));
        match outcome {
            Ok(output) => output,
            Err(_) => {
                tracing::error!("fusion pipeline panicked, falling back to degraded mode");
                self.degraded_fallback(algorithm_results, target_size)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::AlgorithmResultItem;

    fn result_item(id: &str, raw_score: f64) -> AlgorithmResultItem {
        AlgorithmResultItem {
            item_id: ItemId::from(id),
            raw_score,
            kind: ItemKind::Article,
            category: None,
            author_id: None,
            publish_time: None,
            quality_score: Some(0.9),
            review_status: Some(ReviewStatus::Approved),
            viewer_rating: Some(4.5),
            view_count: Some(10),
            like_count: Some(2),
            share_count: Some(1),
            comment_count: Some(0),
            title: Some(id.to_string()),
            description: None,
        }
    }

    #[test]
    fn coverage_bonus_rewards_items_in_more_algorithms() {
        let mut weights = BTreeMap::new();
        weights.insert("alg1".to_string(), 0.5);
        weights.insert("alg2".to_string(), 0.5);

        let mut results = BTreeMap::new();
        results.insert(
            "alg1".to_string(),
            AlgorithmResult {
                algorithm_name: "alg1".to_string(),
                items: vec![result_item("x", 0.8), ],
            },
        );
        let mut alg1_extra = results.remove("alg1").unwrap();
        alg1_extra.items.push(result_item("y", 0.8));
        results.insert("alg1".to_string(), alg1_extra);

        results.insert(
            "alg2".to_string(),
            AlgorithmResult {
                algorithm_name: "alg2".to_string(),
                items: vec![result_item("y", 0.8)],
            },
        );

        let merged = weighted_merge(&results, &weights);
        let x = merged.iter().find(|i| i.item_id == ItemId::from("x")).unwrap();
        let y = merged.iter().find(|i| i.item_id == ItemId::from("y")).unwrap();
        assert!((y.fusion_score - x.fusion_score - 0.05).abs() < 1e-9);
    }

    #[test]
    fn empty_input_yields_empty_output() {
        let config = AppConfig::default();
        let pipeline = FusionPipeline::new(config);
        let context = RequestContext {
            device_kind: None,
            location_hint: None,
        };
        let (items, stats) = pipeline.fuse(&BTreeMap::new(), 10, &context, None, Utc::now());
        assert!(items.is_empty());
        assert!(!stats.degraded);
    }
}
