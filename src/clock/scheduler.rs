//! Cron-like job registry and dispatch loop.
//!
//! Jobs are idempotent and carry a logical `runId = jobName + rounded
//! start time`; a second due-firing of the same runId is dropped
//! (at-most-once per slot, spec.md §4.1 / invariant 9).

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration as StdDuration;

use async_trait::async_trait;
use chrono::{DateTime, Datelike, Timelike, Utc, Weekday};
use dashmap::DashMap;
use parking_lot::Mutex;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{info, warn};

/// Job firing cadence.
#[derive(Debug, Clone, Copy)]
pub enum Cadence {
    DailyAt { hour: u32, minute: u32 },
    HourlyAt { minute: u32 },
    Weekly { weekday: Weekday, hour: u32, minute: u32 },
    Interval(StdDuration),
}

impl Cadence {
    /// The next fire time strictly after `after`.
    pub fn next_fire_after(&self, after: DateTime<Utc>) -> DateTime<Utc> {
        match *self {
            Cadence::DailyAt { hour, minute } => {
                let candidate = after
                    .date_naive()
                    .and_hms_opt(hour, minute, 0)
                    .expect("valid hh:mm")
                    .and_utc();
                if candidate > after {
                    candidate
                } else {
                    candidate + chrono::Duration::days(1)
                }
            }
            Cadence::HourlyAt { minute } => {
                let candidate = after
                    .date_naive()
                    .and_hms_opt(after.hour(), minute, 0)
                    .expect("valid minute")
                    .and_utc();
                if candidate > after {
                    candidate
                } else {
                    candidate + chrono::Duration::hours(1)
                }
            }
            Cadence::Weekly {
                weekday,
                hour,
                minute,
            } => {
                let mut candidate = after
                    .date_naive()
                    .and_hms_opt(hour, minute, 0)
                    .expect("valid hh:mm")
                    .and_utc();
                while candidate <= after || candidate.weekday() != weekday {
                    candidate += chrono::Duration::days(1);
                }
                candidate
            }
            Cadence::Interval(d) => after + chrono::Duration::from_std(d).unwrap_or_default(),
        }
    }

    /// The rounded slot identifier for the fire time that `next_fire_after`
    /// would have computed, used to build the at-most-once `run_id`.
    pub fn slot_label(&self, fire_time: DateTime<Utc>) -> String {
        match self {
            Cadence::DailyAt { .. } => fire_time.format("%Y-%m-%d").to_string(),
            Cadence::HourlyAt { .. } => fire_time.format("%Y-%m-%dT%H").to_string(),
            Cadence::Weekly { .. } => fire_time.format("%Y-W%W").to_string(),
            Cadence::Interval(_) => fire_time.format("%Y-%m-%dT%H:%M:%S").to_string(),
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct JobOutcome {
    pub success_count: u64,
    pub error_count: u64,
    pub processing_time: StdDuration,
}

#[async_trait]
pub trait JobHandle: Send + Sync {
    fn name(&self) -> &'static str;
    fn cadence(&self) -> Cadence;
    async fn run(&self) -> JobOutcome;
}

#[derive(Debug, Clone)]
pub struct JobRunRecord {
    pub run_id: String,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
    pub outcome: Option<JobOutcome>,
}

/// Tracks last-run/next-run bookkeeping for all registered jobs.
#[derive(Default)]
pub struct JobRegistry {
    last_run: DashMap<&'static str, JobRunRecord>,
    next_run: DashMap<&'static str, DateTime<Utc>>,
}

impl JobRegistry {
    pub fn record_start(&self, name: &'static str, run_id: String, started_at: DateTime<Utc>) {
        self.last_run.insert(
            name,
            JobRunRecord {
                run_id,
                started_at,
                finished_at: None,
                outcome: None,
            },
        );
    }

    pub fn record_finish(&self, name: &'static str, finished_at: DateTime<Utc>, outcome: JobOutcome) {
        if let Some(mut entry) = self.last_run.get_mut(name) {
            entry.finished_at = Some(finished_at);
            entry.outcome = Some(outcome);
        }
    }

    pub fn set_next_run(&self, name: &'static str, at: DateTime<Utc>) {
        self.next_run.insert(name, at);
    }

    pub fn last_run(&self, name: &str) -> Option<JobRunRecord> {
        self.last_run.get(name).map(|r| r.clone())
    }

    pub fn next_run(&self, name: &str) -> Option<DateTime<Utc>> {
        self.next_run.get(name).map(|r| *r)
    }
}

struct Registered {
    job: Arc<dyn JobHandle>,
    next_fire: DateTime<Utc>,
}

/// Min-heap-driven scheduler. On tick, pops all due jobs and dispatches
/// them onto a bounded worker pool (default 2).
pub struct Scheduler {
    jobs: Mutex<Vec<Registered>>,
    seen_slots: Mutex<HashSet<String>>,
    pool: Arc<Semaphore>,
    registry: Arc<JobRegistry>,
    accepting: std::sync::atomic::AtomicBool,
}

impl Scheduler {
    pub fn new(pool_size: usize) -> Self {
        Self {
            jobs: Mutex::new(Vec::new()),
            seen_slots: Mutex::new(HashSet::new()),
            pool: Arc::new(Semaphore::new(pool_size.max(1))),
            registry: Arc::new(JobRegistry::default()),
            accepting: std::sync::atomic::AtomicBool::new(true),
        }
    }

    pub fn registry(&self) -> Arc<JobRegistry> {
        Arc::clone(&self.registry)
    }

    pub fn register(&self, job: Arc<dyn JobHandle>, now: DateTime<Utc>) {
        let next_fire = job.cadence().next_fire_after(now);
        self.registry.set_next_run(job.name(), next_fire);
        self.jobs.lock().push(Registered { job, next_fire });
    }

    /// Pops every job due at or before `now`, dispatches each at most
    /// once per slot, and returns the spawned task handles (empty if
    /// nothing was due or the scheduler has stopped accepting work).
    pub fn tick(&self, now: DateTime<Utc>, joinset: &mut JoinSet<()>) {
        if !self.accepting.load(std::sync::atomic::Ordering::SeqCst) {
            return;
        }

        let mut due = Vec::new();
        {
            let mut jobs = self.jobs.lock();
            for entry in jobs.iter_mut() {
                if entry.next_fire <= now {
                    due.push(Arc::clone(&entry.job));
                    let fire_time = entry.next_fire;
                    entry.next_fire = entry.job.cadence().next_fire_after(fire_time);
                    self.registry.set_next_run(entry.job.name(), entry.next_fire);
                }
            }
        }

        for job in due {
            let slot = job.cadence().slot_label(now);
            let run_id = format!("{}@{}", job.name(), slot);

            {
                let mut seen = self.seen_slots.lock();
                if !seen.insert(run_id.clone()) {
                    warn!(run_id = %run_id, "dropping duplicate firing for slot");
                    continue;
                }
            }

            let registry = Arc::clone(&self.registry);
            let pool = Arc::clone(&self.pool);
            let name = job.name();
            self.registry.record_start(name, run_id.clone(), now);

            joinset.spawn(async move {
                let Ok(_permit) = pool.acquire().await else {
                    return;
                };
                let start = std::time::Instant::now();
                let outcome = job.run().await;
                let finished = Utc::now();
                info!(
                    job = name,
                    run_id = %run_id,
                    success_count = outcome.success_count,
                    error_count = outcome.error_count,
                    elapsed_ms = start.elapsed().as_millis() as u64,
                    "job run complete"
                );
                registry.record_finish(name, finished, outcome);
            });
        }
    }

    /// Stops accepting new dispatches. Callers should then await
    /// in-flight tasks (e.g. via the `JoinSet` returned by `tick`) with a
    /// 5s grace period, per spec.md §4.1.
    pub fn begin_shutdown(&self) {
        self.accepting.store(false, std::sync::atomic::Ordering::SeqCst);
    }
}

pub const SHUTDOWN_GRACE: StdDuration = StdDuration::from_secs(5);

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn dt(y: i32, m: u32, d: u32, h: u32, mi: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(y, m, d, h, mi, 0).unwrap()
    }

    #[test]
    fn daily_cadence_fires_next_day_if_past() {
        let cadence = Cadence::DailyAt { hour: 2, minute: 0 };
        let after = dt(2026, 1, 1, 3, 0);
        let next = cadence.next_fire_after(after);
        assert_eq!(next, dt(2026, 1, 2, 2, 0));
    }

    #[test]
    fn hourly_cadence_fires_this_hour_if_not_yet_passed() {
        let cadence = Cadence::HourlyAt { minute: 30 };
        let after = dt(2026, 1, 1, 3, 0);
        let next = cadence.next_fire_after(after);
        assert_eq!(next, dt(2026, 1, 1, 3, 30));
    }

    #[test]
    fn weekly_cadence_picks_correct_weekday() {
        let cadence = Cadence::Weekly {
            weekday: Weekday::Sun,
            hour: 0,
            minute: 0,
        };
        let after = dt(2026, 1, 1, 0, 0); // Thursday
        let next = cadence.next_fire_after(after);
        assert_eq!(next.weekday(), Weekday::Sun);
        assert!(next > after);
    }

    struct CountingJob {
        name: &'static str,
        cadence: Cadence,
        runs: Arc<std::sync::atomic::AtomicU64>,
    }

    #[async_trait]
    impl JobHandle for CountingJob {
        fn name(&self) -> &'static str {
            self.name
        }
        fn cadence(&self) -> Cadence {
            self.cadence
        }
        async fn run(&self) -> JobOutcome {
            self.runs.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
            JobOutcome {
                success_count: 1,
                error_count: 0,
                processing_time: StdDuration::from_millis(1),
            }
        }
    }

    #[tokio::test]
    async fn at_most_once_per_slot() {
        let scheduler = Scheduler::new(2);
        let runs = Arc::new(std::sync::atomic::AtomicU64::new(0));
        let job = Arc::new(CountingJob {
            name: "test-job",
            cadence: Cadence::Interval(StdDuration::from_secs(60)),
            runs: Arc::clone(&runs),
        });

        let now = dt(2026, 1, 1, 0, 0);
        scheduler.register(job.clone(), now - chrono::Duration::seconds(61));

        let mut joinset = JoinSet::new();
        scheduler.tick(now, &mut joinset);
        // Second tick at the exact same instant must not re-fire the slot.
        scheduler.tick(now, &mut joinset);

        while joinset.join_next().await.is_some() {}

        assert_eq!(runs.load(std::sync::atomic::Ordering::SeqCst), 1);
    }
}
