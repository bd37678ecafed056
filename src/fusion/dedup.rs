//! Stage B: near-dedup via Jaccard similarity over title + description
//! (spec.md §4.8-B). Exact dedup by ItemId happens earlier, during the
//! weighted-merge join in `fusion::mod`.

use std::collections::BTreeSet;

use crate::config::DedupConfig;
use crate::fusion::FusedItem;

fn tokenize(text: &str) -> BTreeSet<String> {
    text.split_whitespace().map(|t| t.to_lowercase()).collect()
}

fn jaccard(a: &BTreeSet<String>, b: &BTreeSet<String>) -> f64 {
    if a.is_empty() && b.is_empty() {
        return 0.0;
    }
    let intersection = a.intersection(b).count() as f64;
    let union = a.union(b).count() as f64;
    if union == 0.0 {
        0.0
    } else {
        intersection / union
    }
}

fn similarity(a: &FusedItem, b: &FusedItem, config: &DedupConfig) -> f64 {
    let title_sim = jaccard(&tokenize(a.title.as_deref().unwrap_or("")), &tokenize(b.title.as_deref().unwrap_or("")));
    let desc_sim = jaccard(
        &tokenize(a.description.as_deref().unwrap_or("")),
        &tokenize(b.description.as_deref().unwrap_or("")),
    );
    config.title_weight * title_sim + config.description_weight * desc_sim
}

/// Greedily keeps the highest-fusionScore item from each near-duplicate
/// cluster. Input must already be exact-deduped by ItemId.
pub fn near_dedup(mut items: Vec<FusedItem>, config: &DedupConfig) -> Vec<FusedItem> {
    items.sort_by(|a, b| b.fusion_score.partial_cmp(&a.fusion_score).unwrap_or(std::cmp::Ordering::Equal).then_with(|| a.item_id.cmp(&b.item_id)));

    let mut kept: Vec<FusedItem> = Vec::with_capacity(items.len());
    for candidate in items {
        let is_near_duplicate = kept.iter().any(|k| similarity(k, &candidate, config) > config.similarity_threshold);
        if !is_near_duplicate {
            kept.push(candidate);
        }
    }
    kept
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{ItemId, ItemKind};

    fn item(id: &str, title: &str, fusion_score: f64) -> FusedItem {
        FusedItem {
            item_id: ItemId::from(id),
            kind: ItemKind::Article,
            category: None,
            author_id: None,
            publish_time: None,
            quality_score: None,
            review_status: None,
            viewer_rating: None,
            view_count: None,
            like_count: None,
            share_count: None,
            comment_count: None,
            title: Some(title.to_string()),
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
    fn near_duplicate_titles_collapse_to_the_higher_scored_item() {
        let config = DedupConfig {
            similarity_threshold: 0.5,
            title_weight: 1.0,
            description_weight: 0.0,
        };
        let items = vec![
            item("a", "breaking news today", 0.9),
            item("b", "breaking news today now", 0.6),
        ];
        let kept = near_dedup(items, &config);
        assert_eq!(kept.len(), 1);
        assert_eq!(kept[0].item_id, ItemId::from("a"));
    }

    #[test]
    fn dissimilar_titles_are_both_kept() {
        let config = DedupConfig {
            similarity_threshold: 0.8,
            title_weight: 1.0,
            description_weight: 0.0,
        };
        let items = vec![item("a", "space exploration update", 0.9), item("b", "local cooking recipes", 0.6)];
        let kept = near_dedup(items, &config);
        assert_eq!(kept.len(), 2);
    }
}
