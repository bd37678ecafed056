//! Stage D: MMR-style greedy diversification over four axes
//! (spec.md §4.8-D).

use chrono::{DateTime, Utc};
use rayon::prelude::*;

use crate::config::DiversityConfig;
use crate::fusion::FusedItem;

fn time_bucket(publish_time: Option<DateTime<Utc>>, bucket_hours: i64) -> i64 {
    match publish_time {
        Some(t) => t.timestamp() / (bucket_hours.max(1) * 3600),
        None => i64::MIN,
    }
}

fn axis_ratio<T: PartialEq>(selected: &[FusedItem], matches: impl Fn(&FusedItem) -> T, value: &T) -> f64 {
    if selected.is_empty() {
        return 0.0;
    }
    let count = selected.iter().filter(|s| matches(s) == *value).count();
    count as f64 / selected.len() as f64
}

fn diversity_of(candidate: &FusedItem, selected: &[FusedItem], config: &DiversityConfig) -> f64 {
    let category_ratio = axis_ratio(selected, |s| s.category.clone(), &candidate.category);
    let category_value = 1.0 - (category_ratio - config.max_category_ratio).max(0.0);

    let kind_ratio = axis_ratio(selected, |s| s.kind, &candidate.kind);
    let kind_value = 1.0 - kind_ratio;

    let author_ratio = axis_ratio(selected, |s| s.author_id.clone(), &candidate.author_id);
    let author_value = 1.0 - (author_ratio - config.max_author_ratio).max(0.0);

    let candidate_bucket = time_bucket(candidate.publish_time, config.time_bucket_hours);
    let time_ratio = axis_ratio(selected, |s| time_bucket(s.publish_time, config.time_bucket_hours), &candidate_bucket);
    let time_value = 1.0 - time_ratio;

    config.category_weight * category_value + config.kind_weight * kind_value + config.author_weight * author_value + config.time_weight * time_value
}

/// Greedy MMR selection. Initializes with the highest-fusionScore item,
/// then repeatedly picks `argmax(λ·fusionScore + (1-λ)·diversity)`.
pub fn select(mut candidates: Vec<FusedItem>, target_size: usize, config: &DiversityConfig) -> Vec<FusedItem> {
    if candidates.is_empty() || target_size == 0 {
        return Vec::new();
    }

    candidates.sort_by(|a, b| b.fusion_score.partial_cmp(&a.fusion_score).unwrap_or(std::cmp::Ordering::Equal).then_with(|| a.item_id.cmp(&b.item_id)));
    let mut selected = vec![candidates.remove(0)];

    while selected.len() < target_size && !candidates.is_empty() {
        // Each candidate's diversity score only reads `selected`, so a
        // round's candidates score independently of one another.
        let scores: Vec<f64> = candidates
            .par_iter()
            .map(|candidate| {
                let diversity = diversity_of(candidate, &selected, config);
                config.lambda * candidate.fusion_score + (1.0 - config.lambda) * diversity
            })
            .collect();

        let mut best_index = 0;
        let mut best_score = f64::NEG_INFINITY;
        for (i, &mmr) in scores.iter().enumerate() {
            let is_better = mmr > best_score
                || (mmr == best_score
                    && candidates[i].fusion_score > candidates[best_index].fusion_score)
                || (mmr == best_score
                    && candidates[i].fusion_score == candidates[best_index].fusion_score
                    && candidates[i].item_id < candidates[best_index].item_id);
            if is_better {
                best_score = mmr;
                best_index = i;
            }
        }
        selected.push(candidates.remove(best_index));
    }

    selected
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{ItemId, ItemKind};

    fn item(id: &str, category: &str, fusion_score: f64) -> FusedItem {
        FusedItem {
            item_id: ItemId::from(id),
            kind: ItemKind::Article,
            category: Some(category.to_string()),
            author_id: None,
            publish_time: None,
            quality_score: None,
            review_status: None,
            viewer_rating: None,
            view_count: None,
            like_count: None,
            share_count: None,
            comment_count: None,
            title: None,
            description: None,
            fusion_score,
            algorithm_coverage: vec![],
            final_score: 0.0,
            score_breakdown: crate::fusion::boost::ScoreBreakdown {
                fusion: fusion_score,
                freshness: 0.0,
                popularity: 0.0,
                personalization: 0.0,
            },
        }
    }

    #[test]
    fn mmr_surfaces_a_minority_category_into_the_top_slate() {
        let mut candidates: Vec<FusedItem> = (0..8).map(|i| item(&format!("tech-{i}"), "tech", 0.9)).collect();
        candidates.extend((0..2).map(|i| item(&format!("sports-{i}"), "sports", 0.7)));

        let config = DiversityConfig {
            category_weight: 1.0,
            kind_weight: 0.0,
            author_weight: 0.0,
            time_weight: 0.0,
            max_category_ratio: 0.4,
            max_author_ratio: 0.3,
            lambda: 0.7,
            time_bucket_hours: 6,
        };

        let selected = select(candidates, 5, &config);
        assert!(selected.iter().any(|i| i.category.as_deref() == Some("sports")));
    }
}
