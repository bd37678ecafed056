//! Single-flight compute-on-miss (invariant 3 / 8) and the striped
//! write lock that bounds write concurrency per id (spec.md §4.3).

use std::future::Future;
use std::hash::{Hash, Hasher};
use std::sync::Arc;

use dashmap::DashMap;
use parking_lot::Mutex;
use tokio::sync::OnceCell;

/// Ensures at most one computation per key is in flight; concurrent
/// callers for the same key await the same result.
pub struct SingleFlightGroup<K, V> {
    inflight: DashMap<K, Arc<OnceCell<V>>>,
}

impl<K, V> Default for SingleFlightGroup<K, V>
where
    K: Eq + Hash + Clone + Send + Sync + 'static,
    V: Clone + Send + Sync + 'static,
{
    fn default() -> Self {
        Self::new()
    }
}

impl<K, V> SingleFlightGroup<K, V>
where
    K: Eq + Hash + Clone + Send + Sync + 'static,
    V: Clone + Send + Sync + 'static,
{
    pub fn new() -> Self {
        Self { inflight: DashMap::new() }
    }

    /// Runs `compute` at most once per `key` among concurrent callers.
    /// The entry is evicted after the first resolution so a later,
    /// independent miss recomputes rather than replaying a stale value.
    pub async fn execute<F, Fut>(&self, key: K, compute: F) -> V
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = V>,
    {
        let cell = self
            .inflight
            .entry(key.clone())
            .or_insert_with(|| Arc::new(OnceCell::new()))
            .clone();

        let value = cell.get_or_init(compute).await.clone();
        self.inflight.remove(&key);
        value
    }

    pub fn in_flight_count(&self) -> usize {
        self.inflight.len()
    }
}

/// Bounded table of stripe mutexes keyed by `hash(id) mod stripes`,
/// used to serialize L1/L2 writes per id without one lock per id.
pub struct WriteStripes {
    stripes: Vec<Mutex<()>>,
}

impl WriteStripes {
    pub fn new(stripe_count: usize) -> Self {
        let count = stripe_count.max(1);
        Self {
            stripes: (0..count).map(|_| Mutex::new(())).collect(),
        }
    }

    fn index_for<K: Hash>(&self, key: &K) -> usize {
        let mut hasher = std::collections::hash_map::DefaultHasher::new();
        key.hash(&mut hasher);
        (hasher.finish() as usize) % self.stripes.len()
    }

    /// Acquires the stripe guarding `key`, serializing writers that
    /// happen to hash to the same stripe.
    pub fn lock_for<K: Hash>(&self, key: &K) -> parking_lot::MutexGuard<'_, ()> {
        self.stripes[self.index_for(key)].lock()
    }
}

pub const DEFAULT_STRIPE_COUNT: usize = 4096;

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[tokio::test]
    async fn concurrent_misses_for_same_key_share_one_computation() {
        let group: Arc<SingleFlightGroup<String, u32>> = Arc::new(SingleFlightGroup::new());
        let calls = Arc::new(AtomicU32::new(0));

        let mut handles = Vec::new();
        for _ in 0..8 {
            let group = Arc::clone(&group);
            let calls = Arc::clone(&calls);
            handles.push(tokio::spawn(async move {
                group
                    .execute("item-1".to_string(), || async {
                        calls.fetch_add(1, Ordering::SeqCst);
                        tokio::time::sleep(std::time::Duration::from_millis(5)).await;
                        42
                    })
                    .await
            }));
        }

        for h in handles {
            assert_eq!(h.await.unwrap(), 42);
        }
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn write_stripes_bounds_table_size() {
        let stripes = WriteStripes::new(DEFAULT_STRIPE_COUNT);
        let _guard = stripes.lock_for(&"some-id".to_string());
    }
}
