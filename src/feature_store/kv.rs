//! The shared KV tier boundary (spec.md §6): `GET`, `MGET`, `SETEX`,
//! `EXISTS`, `TTL`, `EXPIRE`, `KEYS <prefix>*`, plus pipelined batches
//! of the above. The in-memory implementation stands in for Redis.

use std::time::{Duration, Instant};

use async_trait::async_trait;
use dashmap::DashMap;

struct Entry {
    value: Vec<u8>,
    expires_at: Instant,
}

#[async_trait]
pub trait KvTier: Send + Sync {
    async fn get(&self, key: &str) -> Option<Vec<u8>>;
    async fn mget(&self, keys: &[String]) -> Vec<Option<Vec<u8>>>;
    async fn setex(&self, key: &str, value: Vec<u8>, ttl_secs: u64);
    async fn mset_ex(&self, entries: Vec<(String, Vec<u8>)>, ttl_secs: u64);
    async fn exists(&self, key: &str) -> bool;
    async fn ttl(&self, key: &str) -> Option<Duration>;
    async fn expire(&self, key: &str, ttl_secs: u64) -> bool;
    async fn keys_prefix(&self, prefix: &str) -> Vec<String>;
    fn key_count(&self) -> usize;
    /// Periodic reap of expired entries (spec.md §4.3 Cleanup). A real
    /// Redis-backed tier expires keys on its own; the default is a no-op.
    fn sweep(&self) -> u64 {
        0
    }
    /// Approximate bytes held by the tier, surfaced by the stats endpoint
    /// the way `INFO memory`'s `used_memory` does for a real Redis tier.
    fn estimated_memory_bytes(&self) -> usize {
        0
    }
}

/// DashMap-backed stand-in for the production KV tier. Entries carry
/// an absolute expiry and are lazily reaped on access plus a periodic
/// sweep (the `kv-sweep` scheduled job).
#[derive(Default)]
pub struct InMemoryKvTier {
    entries: DashMap<String, Entry>,
}

impl InMemoryKvTier {
    pub fn new() -> Self {
        Self::default()
    }

    fn is_live(entry: &Entry) -> bool {
        entry.expires_at > Instant::now()
    }
}

#[async_trait]
impl KvTier for InMemoryKvTier {
    async fn get(&self, key: &str) -> Option<Vec<u8>> {
        self.entries.get(key).filter(|e| Self::is_live(e)).map(|e| e.value.clone())
    }

    async fn mget(&self, keys: &[String]) -> Vec<Option<Vec<u8>>> {
        keys.iter().map(|k| self.entries.get(k).filter(|e| Self::is_live(e)).map(|e| e.value.clone())).collect()
    }

    async fn setex(&self, key: &str, value: Vec<u8>, ttl_secs: u64) {
        self.entries.insert(
            key.to_string(),
            Entry {
                value,
                expires_at: Instant::now() + Duration::from_secs(ttl_secs),
            },
        );
    }

    async fn mset_ex(&self, entries: Vec<(String, Vec<u8>)>, ttl_secs: u64) {
        let expires_at = Instant::now() + Duration::from_secs(ttl_secs);
        for (key, value) in entries {
            self.entries.insert(key, Entry { value, expires_at });
        }
    }

    async fn exists(&self, key: &str) -> bool {
        self.entries.get(key).map(|e| Self::is_live(&e)).unwrap_or(false)
    }

    async fn ttl(&self, key: &str) -> Option<Duration> {
        self.entries.get(key).and_then(|e| {
            if Self::is_live(&e) {
                Some(e.expires_at.saturating_duration_since(Instant::now()))
            } else {
                None
            }
        })
    }

    async fn expire(&self, key: &str, ttl_secs: u64) -> bool {
        if let Some(mut entry) = self.entries.get_mut(key) {
            entry.expires_at = Instant::now() + Duration::from_secs(ttl_secs);
            true
        } else {
            false
        }
    }

    async fn keys_prefix(&self, prefix: &str) -> Vec<String> {
        self.entries
            .iter()
            .filter(|e| Self::is_live(&e) && e.key().starts_with(prefix))
            .map(|e| e.key().clone())
            .collect()
    }

    fn key_count(&self) -> usize {
        self.entries.len()
    }

    /// Drops expired entries, returning how many were reaped.
    fn sweep(&self) -> u64 {
        let now = Instant::now();
        let dead: Vec<String> = self
            .entries
            .iter()
            .filter(|e| e.expires_at <= now)
            .map(|e| e.key().clone())
            .collect();
        for key in &dead {
            self.entries.remove(key);
        }
        dead.len() as u64
    }

    /// Sum of key and value bytes currently held. There's no server
    /// process to query `INFO memory` on, so this stands in for it.
    fn estimated_memory_bytes(&self) -> usize {
        self.entries.iter().map(|e| e.key().len() + e.value.len()).sum()
    }
}

pub mod keys {
    pub fn viewer_features(id: &str) -> String {
        format!("viewer:features:{id}")
    }

    pub fn content_features(id: &str) -> String {
        format!("content:features:{id}")
    }

    pub fn trending(kind: &str) -> String {
        format!("trending:{kind}")
    }

    pub fn model(name: &str) -> String {
        format!("feature_engineering:model:{name}")
    }

    pub fn stats(kind: &str) -> String {
        format!("feature_engineering:stats:{kind}")
    }
}
