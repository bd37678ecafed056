//! Configuration surface (spec.md §6). Loaded from TOML; unknown keys
//! rejected at load via `deny_unknown_fields`.

use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct BatcherConfig {
    pub max_batch_size: usize,
    pub batch_timeout_ms: u64,
    pub max_queue_depth: usize,
    pub worker_pool_size: usize,
    pub call_deadline_ms: u64,
}

impl Default for BatcherConfig {
    fn default() -> Self {
        Self {
            max_batch_size: 64,
            batch_timeout_ms: 10,
            max_queue_depth: 8 * 64,
            worker_pool_size: 4,
            call_deadline_ms: 1_000,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CacheTtlConfig {
    pub viewer_secs: u64,
    pub item_secs: u64,
    pub trending_secs: u64,
    pub stats_secs: u64,
    pub model_secs: u64,
}

impl Default for CacheTtlConfig {
    fn default() -> Self {
        Self {
            viewer_secs: 3600,
            item_secs: 7200,
            trending_secs: 3600,
            stats_secs: 3600,
            model_secs: 86_400,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct DiversityConfig {
    pub category_weight: f64,
    pub kind_weight: f64,
    pub author_weight: f64,
    pub time_weight: f64,
    pub max_category_ratio: f64,
    pub max_author_ratio: f64,
    pub lambda: f64,
    pub time_bucket_hours: i64,
}

impl Default for DiversityConfig {
    fn default() -> Self {
        Self {
            category_weight: 0.3,
            kind_weight: 0.2,
            author_weight: 0.2,
            time_weight: 0.3,
            max_category_ratio: 0.4,
            max_author_ratio: 0.3,
            lambda: 0.7,
            time_bucket_hours: 6,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct BusinessRulesConfig {
    pub min_quality_score: f64,
    pub max_age_days: i64,
    pub blocked_categories: BTreeSet<String>,
    pub blocked_authors: BTreeSet<String>,
    pub min_rating: f64,
    pub require_review: bool,
}

impl Default for BusinessRulesConfig {
    fn default() -> Self {
        Self {
            min_quality_score: 0.6,
            max_age_days: 30,
            blocked_categories: BTreeSet::new(),
            blocked_authors: BTreeSet::new(),
            min_rating: 3.0,
            require_review: true,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct DedupConfig {
    pub similarity_threshold: f64,
    pub title_weight: f64,
    pub description_weight: f64,
}

impl Default for DedupConfig {
    fn default() -> Self {
        Self {
            similarity_threshold: 0.8,
            title_weight: 0.4,
            description_weight: 0.6,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct BoostConfig {
    pub base_weight: f64,
    pub freshness_weight: f64,
    pub popularity_weight: f64,
    pub personalization_weight: f64,
    pub freshness_half_life_hours: f64,
    pub max_expected_popularity: f64,
}

impl Default for BoostConfig {
    fn default() -> Self {
        Self {
            base_weight: 0.6,
            freshness_weight: 0.15,
            popularity_weight: 0.15,
            personalization_weight: 0.1,
            freshness_half_life_hours: 24.0,
            max_expected_popularity: 20.0,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct OfflineConfig {
    pub viewer_min_interactions: u64,
    pub item_min_interactions: u64,
}

impl Default for OfflineConfig {
    fn default() -> Self {
        Self {
            viewer_min_interactions: 5,
            item_min_interactions: 5,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct AppConfig {
    pub algorithm_weights: BTreeMap<String, f64>,
    pub diversity: DiversityConfig,
    pub business_rules: BusinessRulesConfig,
    pub dedup: DedupConfig,
    pub boost: BoostConfig,
    pub batcher: BatcherConfig,
    pub cache_ttl: CacheTtlConfig,
    pub offline: OfflineConfig,
}

impl Default for AppConfig {
    fn default() -> Self {
        let mut algorithm_weights = BTreeMap::new();
        algorithm_weights.insert("collaborative_filtering".to_string(), 0.3);
        algorithm_weights.insert("content_based".to_string(), 0.3);
        algorithm_weights.insert("deep_learning".to_string(), 0.4);

        Self {
            algorithm_weights,
            diversity: DiversityConfig::default(),
            business_rules: BusinessRulesConfig::default(),
            dedup: DedupConfig::default(),
            boost: BoostConfig::default(),
            batcher: BatcherConfig::default(),
            cache_ttl: CacheTtlConfig::default(),
            offline: OfflineConfig::default(),
        }
    }
}

impl AppConfig {
    /// Loads from a TOML file; falls back to defaults if the file is
    /// absent. A malformed file is a hard error (unknown keys included).
    pub fn load(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let path = path.as_ref();
        if !path.exists() {
            tracing::info!(path = %path.display(), "config file not found, using defaults");
            return Ok(Self::default());
        }
        let raw = std::fs::read_to_string(path)?;
        let config: Self = toml::from_str(&raw)?;
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_round_trips_through_toml() {
        let config = AppConfig::default();
        let serialized = toml::to_string(&config).unwrap();
        let deserialized: AppConfig = toml::from_str(&serialized).unwrap();
        assert_eq!(deserialized.batcher.max_batch_size, config.batcher.max_batch_size);
    }

    #[test]
    fn unknown_key_is_rejected() {
        let bad = r#"
            [batcher]
            max_batch_size = 10
            batch_timeout_ms = 5
            max_queue_depth = 100
            worker_pool_size = 2
            call_deadline_ms = 500
            typo_field = true
        "#;
        let parsed: Result<BatcherConfig, _> = toml::from_str(bad);
        assert!(parsed.is_err());
    }

    #[test]
    fn missing_file_falls_back_to_defaults() {
        let config = AppConfig::load("/nonexistent/path/config.toml").unwrap();
        assert_eq!(config.batcher.max_batch_size, 64);
    }
}
