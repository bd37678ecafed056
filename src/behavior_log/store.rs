//! The analytical store boundary (spec.md §6): logically
//! `behaviors`, `feature_vectors`, and `feature_backups` tables. The
//! in-memory implementation here is a faithful stand-in for whatever
//! partitioned store backs it in production.

use chrono::{DateTime, Utc};
use parking_lot::RwLock;

use crate::models::BehaviorEvent;

#[derive(Debug, Clone)]
pub struct FeatureVectorRecord {
    pub entity_id: String,
    pub entity_kind: EntityKind,
    pub vector: Vec<f64>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntityKind {
    Viewer,
    Item,
}

#[derive(Debug, Clone)]
pub struct FeatureBackupRecord {
    pub entity_id: String,
    pub kind: String,
    pub payload: serde_json::Value,
    pub backup_at: DateTime<Utc>,
}

/// Logical schema boundary for the behavior log and its derived tables.
/// All methods are synchronous here; a real backend (ClickHouse,
/// partitioned Postgres, ...) would make these I/O-bound, which is why
/// the gateway above this store treats every call as fallible.
pub trait AnalyticalStore: Send + Sync {
    fn append(&self, events: Vec<BehaviorEvent>);
    fn events_since(&self, cutoff: DateTime<Utc>) -> Vec<BehaviorEvent>;
    fn save_vector(&self, record: FeatureVectorRecord);
    fn save_backup(&self, record: FeatureBackupRecord);
    fn purge_events_before(&self, cutoff: DateTime<Utc>) -> u64;
    fn purge_vectors_before(&self, cutoff: DateTime<Utc>) -> u64;
    fn purge_backups_before(&self, cutoff: DateTime<Utc>) -> u64;
    /// Logical `OPTIMIZE`/compaction hint (spec.md §6); a no-op for the
    /// in-memory store beyond shrinking backing storage.
    fn compact(&self);
    fn event_count(&self) -> usize;
}

#[derive(Default)]
pub struct InMemoryAnalyticalStore {
    events: RwLock<Vec<BehaviorEvent>>,
    vectors: RwLock<Vec<FeatureVectorRecord>>,
    backups: RwLock<Vec<FeatureBackupRecord>>,
}

impl InMemoryAnalyticalStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl AnalyticalStore for InMemoryAnalyticalStore {
    fn append(&self, mut events: Vec<BehaviorEvent>) {
        self.events.write().append(&mut events);
    }

    fn events_since(&self, cutoff: DateTime<Utc>) -> Vec<BehaviorEvent> {
        self.events
            .read()
            .iter()
            .filter(|e| e.timestamp >= cutoff)
            .cloned()
            .collect()
    }

    fn save_vector(&self, record: FeatureVectorRecord) {
        self.vectors.write().push(record);
    }

    fn save_backup(&self, record: FeatureBackupRecord) {
        self.backups.write().push(record);
    }

    fn purge_events_before(&self, cutoff: DateTime<Utc>) -> u64 {
        let mut events = self.events.write();
        let before = events.len();
        events.retain(|e| e.timestamp >= cutoff);
        (before - events.len()) as u64
    }

    fn purge_vectors_before(&self, cutoff: DateTime<Utc>) -> u64 {
        let mut vectors = self.vectors.write();
        let before = vectors.len();
        vectors.retain(|v| v.created_at >= cutoff);
        (before - vectors.len()) as u64
    }

    fn purge_backups_before(&self, cutoff: DateTime<Utc>) -> u64 {
        let mut backups = self.backups.write();
        let before = backups.len();
        backups.retain(|b| b.backup_at >= cutoff);
        (before - backups.len()) as u64
    }

    fn compact(&self) {
        self.events.write().shrink_to_fit();
        self.vectors.write().shrink_to_fit();
        self.backups.write().shrink_to_fit();
        tracing::debug!("analytical store compaction pass complete");
    }

    fn event_count(&self) -> usize {
        self.events.read().len()
    }
}
