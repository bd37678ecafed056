//! Inference Batcher (C6): coalesces concurrent single-item scoring
//! calls into bounded `batchScore` calls. State machine of a batch is
//! `OPEN -> FLUSHING -> DONE|FAILED`; transitions are one-way.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::{oneshot, Semaphore};

use crate::config::BatcherConfig;
use crate::error::{CoreError, CoreResult};
use crate::scorer::ScorerHandle;

struct PendingItem {
    features: Vec<f64>,
    responder: oneshot::Sender<CoreResult<f64>>,
}

#[derive(Default)]
struct BatchBuffer {
    items: Vec<PendingItem>,
    generation: u64,
}

pub struct Batcher {
    scorer: Arc<ScorerHandle>,
    config: BatcherConfig,
    buffer: Mutex<BatchBuffer>,
    pending_count: AtomicUsize,
    worker_pool: Arc<Semaphore>,
}

impl Batcher {
    pub fn new(scorer: Arc<ScorerHandle>, config: BatcherConfig) -> Arc<Self> {
        let worker_pool = Arc::new(Semaphore::new(config.worker_pool_size.max(1)));
        Arc::new(Self {
            scorer,
            config,
            buffer: Mutex::new(BatchBuffer::default()),
            pending_count: AtomicUsize::new(0),
            worker_pool,
        })
    }

    pub fn pending_count(&self) -> usize {
        self.pending_count.load(Ordering::SeqCst)
    }

    /// Suspends until the enclosing batch is scored, or fails with
    /// `TIMEOUT`/`OVERLOADED`/`INFERENCE_ERROR`/`SERVICE_UNAVAILABLE`.
    pub async fn score(self: &Arc<Self>, features: Vec<f64>) -> CoreResult<f64> {
        if self.pending_count.load(Ordering::SeqCst) >= self.config.max_queue_depth {
            return Err(CoreError::overloaded("inference batcher queue is full"));
        }
        self.pending_count.fetch_add(1, Ordering::SeqCst);

        let (tx, rx) = oneshot::channel();
        let (should_arm_timer, should_flush_now, generation_at_enqueue);
        {
            let mut buf = self.buffer.lock();
            buf.items.push(PendingItem { features, responder: tx });
            should_arm_timer = buf.items.len() == 1;
            should_flush_now = buf.items.len() >= self.config.max_batch_size;
            generation_at_enqueue = buf.generation;
        }

        if should_flush_now {
            self.flush_unconditional();
        } else if should_arm_timer {
            let this = Arc::clone(self);
            let timeout = Duration::from_millis(self.config.batch_timeout_ms);
            tokio::spawn(async move {
                tokio::time::sleep(timeout).await;
                this.flush_if_generation(generation_at_enqueue);
            });
        }

        let deadline = Duration::from_millis(self.config.call_deadline_ms);
        let outcome = match tokio::time::timeout(deadline, rx).await {
            Ok(Ok(result)) => result,
            Ok(Err(_)) => Err(CoreError::inference_error("batch worker dropped its response")),
            Err(_) => Err(CoreError::timeout("inference call exceeded its deadline")),
        };
        self.pending_count.fetch_sub(1, Ordering::SeqCst);
        outcome
    }

    /// Size-triggered flush: takes whatever is currently buffered,
    /// regardless of the generation a caller observed.
    fn flush_unconditional(self: &Arc<Self>) {
        let items = {
            let mut buf = self.buffer.lock();
            if buf.items.is_empty() {
                return;
            }
            buf.generation += 1;
            std::mem::take(&mut buf.items)
        };
        self.dispatch(items);
    }

    /// Timer-triggered flush: only fires if the batch this timer armed
    /// for hasn't already been flushed by the size trigger.
    fn flush_if_generation(self: &Arc<Self>, expected_generation: u64) {
        let items = {
            let mut buf = self.buffer.lock();
            if buf.generation != expected_generation || buf.items.is_empty() {
                return;
            }
            buf.generation += 1;
            std::mem::take(&mut buf.items)
        };
        self.dispatch(items);
    }

    fn dispatch(self: &Arc<Self>, items: Vec<PendingItem>) {
        let this = Arc::clone(self);
        tokio::spawn(async move {
            let _permit = this.worker_pool.acquire().await;

            // An in-flight batch uses the Scorer it started with (§5).
            let scorer = match this.scorer.current() {
                Some(scorer) => scorer,
                None => {
                    for item in items {
                        let _ = item.responder.send(Err(CoreError::new(
                            crate::error::ErrorKind::ServiceUnavailable,
                            "no Scorer loaded",
                        )));
                    }
                    return;
                }
            };

            let matrix: Vec<Vec<f64>> = items.iter().map(|i| i.features.clone()).collect();
            let compute = tokio::task::spawn_blocking(move || scorer.batch_score(&matrix)).await;

            match compute {
                Ok(Ok(scores)) if scores.len() == items.len() => {
                    for (item, score) in items.into_iter().zip(scores) {
                        let _ = item.responder.send(Ok(score));
                    }
                }
                Ok(Ok(_)) => {
                    for item in items {
                        let _ = item
                            .responder
                            .send(Err(CoreError::inference_error("scorer returned a mismatched result count")));
                    }
                }
                Ok(Err(err)) => {
                    for item in items {
                        let _ = item.responder.send(Err(err.clone()));
                    }
                }
                Err(_join_error) => {
                    for item in items {
                        let _ = item.responder.send(Err(CoreError::inference_error("scorer task panicked")));
                    }
                }
            }
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scorer::{FeatureLayout, LinearScorer};

    fn test_config(max_batch_size: usize, batch_timeout_ms: u64) -> BatcherConfig {
        BatcherConfig {
            max_batch_size,
            batch_timeout_ms,
            max_queue_depth: 64,
            worker_pool_size: 2,
            call_deadline_ms: 1_000,
        }
    }

    fn scorer_handle() -> Arc<ScorerHandle> {
        let layout = FeatureLayout {
            viewer_dim: 1,
            item_dim: 1,
            context_dim: 0,
        };
        Arc::new(ScorerHandle::loaded(Box::new(LinearScorer::new("test", layout))))
    }

    #[tokio::test]
    async fn size_trigger_flushes_before_timeout() {
        let batcher = Batcher::new(scorer_handle(), test_config(3, 50));
        let b1 = Arc::clone(&batcher);
        let b2 = Arc::clone(&batcher);
        let b3 = Arc::clone(&batcher);

        let (r1, r2, r3) = tokio::join!(
            b1.score(vec![1.0, 0.0]),
            b2.score(vec![0.0, 1.0]),
            b3.score(vec![1.0, 1.0]),
        );

        assert!(r1.is_ok());
        assert!(r2.is_ok());
        assert!(r3.is_ok());
    }

    #[tokio::test]
    async fn lone_item_flushes_on_timeout() {
        let batcher = Batcher::new(scorer_handle(), test_config(8, 10));
        let result = batcher.score(vec![0.5, 0.5]).await;
        assert!(result.is_ok());
    }

    #[tokio::test]
    async fn queue_over_capacity_is_overloaded() {
        let mut config = test_config(1, 1_000);
        config.max_queue_depth = 0;
        let batcher = Batcher::new(scorer_handle(), config);
        let err = batcher.score(vec![1.0, 1.0]).await.unwrap_err();
        assert_eq!(err.kind, crate::error::ErrorKind::Overloaded);
    }

    #[tokio::test]
    async fn unloaded_scorer_fails_whole_batch_as_service_unavailable() {
        let batcher = Batcher::new(Arc::new(ScorerHandle::empty()), test_config(1, 10));
        let err = batcher.score(vec![1.0, 1.0]).await.unwrap_err();
        assert_eq!(err.kind, crate::error::ErrorKind::ServiceUnavailable);
    }
}
