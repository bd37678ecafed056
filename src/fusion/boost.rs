//! Stage E: final boost composition (spec.md §4.8-E).

use chrono::{DateTime, Utc};

use crate::config::BoostConfig;

/// `exp(-ageHours / halfLifeHours)`, clamped to `[0,1]`. A missing
/// `publishTime` yields the fixed neutral value 0.5.
pub fn freshness_boost(now: DateTime<Utc>, publish_time: Option<DateTime<Utc>>, half_life_hours: f64) -> f64 {
    match publish_time {
        Some(published) => {
            let age_hours = now.signed_duration_since(published).num_seconds() as f64 / 3600.0;
            (-age_hours.max(0.0) / half_life_hours).exp().clamp(0.0, 1.0)
        }
        None => 0.5,
    }
}

/// Weighted sum of `ln(1+count)` across engagement signals, normalized
/// by `maxExpectedPopularity` and clamped to `[0,1]`.
pub fn popularity_boost(views: u64, likes: u64, shares: u64, comments: u64, max_expected: f64) -> f64 {
    let raw = 0.4 * ((1 + views) as f64).ln() + 0.3 * ((1 + likes) as f64).ln() + 0.2 * ((1 + shares) as f64).ln() + 0.1 * ((1 + comments) as f64).ln();
    (raw / max_expected.max(f64::EPSILON)).min(1.0).max(0.0)
}

/// Starts at 0.5 and nudges up to +0.2 total for matching the
/// viewer's active hour and preferred device, bounded to `[0,1]`.
pub fn personalization_boost(matched_active_hour: bool, matched_device_preference: bool) -> f64 {
    let mut score = 0.5;
    if matched_active_hour {
        score += 0.1;
    }
    if matched_device_preference {
        score += 0.1;
    }
    score.clamp(0.0, 1.0)
}

#[derive(Debug, Clone, Copy)]
pub struct ScoreBreakdown {
    pub fusion: f64,
    pub freshness: f64,
    pub popularity: f64,
    pub personalization: f64,
}

pub fn final_score(breakdown: ScoreBreakdown, config: &BoostConfig) -> f64 {
    config.base_weight * breakdown.fusion
        + config.freshness_weight * breakdown.freshness
        + config.popularity_weight * breakdown.popularity
        + config.personalization_weight * breakdown.personalization
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn freshness_defaults_to_half_when_publish_time_missing() {
        assert_eq!(freshness_boost(Utc::now(), None, 24.0), 0.5);
    }

    #[test]
    fn popularity_boost_is_bounded() {
        let boost = popularity_boost(1_000_000, 500_000, 200_000, 50_000, 20.0);
        assert!(boost <= 1.0);
        assert!(boost >= 0.0);
    }

    #[test]
    fn personalization_boost_caps_at_one() {
        assert_eq!(personalization_boost(true, true), 0.7);
    }
}
