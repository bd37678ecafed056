//! Offline Aggregator (C4): scheduled jobs that refresh the feature
//! store and behavior-log-derived tables.

pub mod jobs;

pub use jobs::{ItemHourlyJob, KvSweepJob, MatrixDailyJob, RetentionWeeklyJob, TrendingHourlyJob, ViewerDailyJob};
