//! Behavior Log Gateway (C2): append-only event log plus the five
//! canonical aggregation templates.

pub mod gateway;
pub mod store;

pub use gateway::{activity_for_behavior_score, BehaviorLogGateway, ViewerPatterns};
pub use store::{AnalyticalStore, EntityKind, FeatureBackupRecord, FeatureVectorRecord, InMemoryAnalyticalStore};
