//! Stage C: business-rule policy filter (spec.md §4.8-C). Rejections
//! are counted per reason and exposed as statistics.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};

use crate::config::BusinessRulesConfig;
use crate::fusion::FusedItem;
use crate::models::ReviewStatus;

#[derive(Debug, Clone, Default)]
pub struct PolicyRejections {
    pub counts: BTreeMap<&'static str, u64>,
}

impl PolicyRejections {
    fn record(&mut self, reason: &'static str) {
        *self.counts.entry(reason).or_default() += 1;
    }
}

fn violates(item: &FusedItem, config: &BusinessRulesConfig, now: DateTime<Utc>, rejections: &mut PolicyRejections) -> bool {
    let mut rejected = false;

    if let Some(quality) = item.quality_score {
        if quality < config.min_quality_score {
            rejections.record("quality_score");
            rejected = true;
        }
    }

    if let Some(published) = item.publish_time {
        let age_days = now.signed_duration_since(published).num_days();
        if age_days > config.max_age_days {
            rejections.record("age");
            rejected = true;
        }
    }

    if let Some(category) = &item.category {
        if config.blocked_categories.contains(category) {
            rejections.record("category");
            rejected = true;
        }
    }

    if let Some(author) = &item.author_id {
        if config.blocked_authors.contains(author) {
            rejections.record("author");
            rejected = true;
        }
    }

    if let Some(rating) = item.viewer_rating {
        if rating < config.min_rating {
            rejections.record("rating");
            rejected = true;
        }
    }

    if config.require_review && item.review_status != Some(ReviewStatus::Approved) {
        rejections.record("not_reviewed");
        rejected = true;
    }

    rejected
}

pub fn apply(items: Vec<FusedItem>, config: &BusinessRulesConfig, now: DateTime<Utc>) -> (Vec<FusedItem>, PolicyRejections) {
    let mut rejections = PolicyRejections::default();
    let kept = items.into_iter().filter(|item| !violates(item, config, now, &mut rejections)).collect();
    (kept, rejections)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{ItemId, ItemKind};

    fn base_item() -> FusedItem {
        FusedItem {
            item_id: ItemId::from("x"),
            kind: ItemKind::Article,
            category: None,
            author_id: None,
            publish_time: None,
            quality_score: Some(0.9),
            review_status: Some(ReviewStatus::Approved),
            viewer_rating: Some(4.0),
            view_count: None,
            like_count: None,
            share_count: None,
            comment_count: None,
            title: None,
            description: None,
            fusion_score: 0.5,
            algorithm_coverage: vec![],
            final_score: 0.0,
            score_breakdown: crate::fusion::boost::ScoreBreakdown {
                fusion: 0.5,
                freshness: 0.0,
                popularity: 0.0,
                personalization: 0.0,
            },
        }
    }

    #[test]
    fn pending_review_is_rejected_when_review_required() {
        let config = BusinessRulesConfig {
            require_review: true,
            ..BusinessRulesConfig::default()
        };
        let mut item = base_item();
        item.review_status = Some(ReviewStatus::Pending);

        let (kept, rejections) = apply(vec![item], &config, Utc::now());
        assert!(kept.is_empty());
        assert_eq!(*rejections.counts.get("not_reviewed").unwrap(), 1);
    }

    #[test]
    fn compliant_item_survives() {
        let config = BusinessRulesConfig::default();
        let (kept, rejections) = apply(vec![base_item()], &config, Utc::now());
        assert_eq!(kept.len(), 1);
        assert!(rejections.counts.is_empty());
    }
}
