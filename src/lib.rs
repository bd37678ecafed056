//! Online scoring and result-assembly tier for a content recommendation
//! platform: inference batching, a tiered feature store, the ranking
//! and fusion pipelines, and the offline aggregator that feeds them.

pub mod api;
pub mod batcher;
pub mod behavior_log;
pub mod clock;
pub mod config;
pub mod error;
pub mod feature_store;
pub mod fusion;
pub mod middleware;
pub mod models;
pub mod offline;
pub mod ranking;
pub mod scorer;
pub mod telemetry;

use std::sync::Arc;

use arc_swap::ArcSwap;

use crate::batcher::Batcher;
use crate::behavior_log::{AnalyticalStore, BehaviorLogGateway, InMemoryAnalyticalStore};
use crate::clock::{Clock, JobRegistry, Scheduler, SystemClock};
use crate::config::AppConfig;
use crate::feature_store::{FeatureStore, InMemoryKvTier, KvTier};
use crate::ranking::RankingPipeline;
use crate::scorer::{FeatureLayout, LinearScorer, ScorerHandle};

/// Shared application state wired up once at startup and handed to
/// every request handler behind an `Arc`.
pub struct AppState {
    pub config: ArcSwap<AppConfig>,
    pub clock: Arc<dyn Clock>,
    pub analytical_store: Arc<dyn AnalyticalStore>,
    pub behavior_log: Arc<BehaviorLogGateway>,
    pub kv: Arc<dyn KvTier>,
    pub feature_store: Arc<FeatureStore>,
    pub scorer: Arc<ScorerHandle>,
    pub batcher: Arc<Batcher>,
    pub ranking: RankingPipeline,
    pub scheduler: Arc<Scheduler>,
    pub job_registry: Arc<JobRegistry>,
}

impl AppState {
    pub fn new(config: AppConfig) -> Self {
        let clock: Arc<dyn Clock> = Arc::new(SystemClock);
        let analytical_store: Arc<dyn AnalyticalStore> = Arc::new(InMemoryAnalyticalStore::new());
        let behavior_log = Arc::new(BehaviorLogGateway::new(Arc::clone(&analytical_store), Arc::clone(&clock)));
        let kv: Arc<dyn KvTier> = Arc::new(InMemoryKvTier::new());
        let feature_store = Arc::new(FeatureStore::new(Arc::clone(&kv), Arc::clone(&behavior_log), Arc::clone(&clock), config.cache_ttl.clone()));

        let layout = FeatureLayout {
            viewer_dim: models::VIEWER_VECTOR_DIM,
            item_dim: models::ITEM_VECTOR_DIM,
            context_dim: ranking::CONTEXT_DIM,
        };
        let scorer = Arc::new(ScorerHandle::loaded(Box::new(LinearScorer::new("default-linear", layout))));
        let batcher = Batcher::new(Arc::clone(&scorer), config.batcher.clone());
        let ranking = RankingPipeline::new(Arc::clone(&feature_store), Arc::clone(&batcher), Arc::clone(&scorer), Arc::clone(&clock));

        let scheduler = Arc::new(Scheduler::new(2));
        let job_registry = scheduler.registry();

        Self {
            config: ArcSwap::from_pointee(config),
            clock,
            analytical_store,
            behavior_log,
            kv,
            feature_store,
            scorer,
            batcher,
            ranking,
            scheduler,
            job_registry,
        }
    }

    /// Registers the five offline jobs (spec.md §4.4) with the scheduler.
    pub fn register_offline_jobs(&self) {
        use crate::offline::{ItemHourlyJob, KvSweepJob, MatrixDailyJob, RetentionWeeklyJob, TrendingHourlyJob, ViewerDailyJob};

        let now = self.clock.now();
        let offline_config = self.config.load().offline.clone();
        self.scheduler.register(
            Arc::new(ViewerDailyJob {
                gateway: Arc::clone(&self.behavior_log),
                feature_store: Arc::clone(&self.feature_store),
                clock: Arc::clone(&self.clock),
                min_interactions: offline_config.viewer_min_interactions,
            }),
            now,
        );
        self.scheduler.register(
            Arc::new(ItemHourlyJob {
                gateway: Arc::clone(&self.behavior_log),
                feature_store: Arc::clone(&self.feature_store),
                clock: Arc::clone(&self.clock),
                min_interactions: offline_config.item_min_interactions,
            }),
            now,
        );
        self.scheduler.register(
            Arc::new(MatrixDailyJob {
                gateway: Arc::clone(&self.behavior_log),
                store: Arc::clone(&self.analytical_store),
                clock: Arc::clone(&self.clock),
            }),
            now,
        );
        self.scheduler.register(
            Arc::new(TrendingHourlyJob {
                gateway: Arc::clone(&self.behavior_log),
                kv: Arc::clone(&self.kv),
                cache_ttl_secs: self.config.load().cache_ttl.trending_secs,
            }),
            now,
        );
        self.scheduler.register(
            Arc::new(RetentionWeeklyJob {
                store: Arc::clone(&self.analytical_store),
                clock: Arc::clone(&self.clock),
            }),
            now,
        );
        self.scheduler.register(Arc::new(KvSweepJob { kv: Arc::clone(&self.kv) }), now);
    }
}
