//! Tiered Feature Store (C3).

pub mod kv;
pub mod single_flight;
pub mod tiers;

pub use kv::{keys, InMemoryKvTier, KvTier};
pub use single_flight::{SingleFlightGroup, WriteStripes, DEFAULT_STRIPE_COUNT};
pub use tiers::{FeatureStore, FeatureStoreStats};
