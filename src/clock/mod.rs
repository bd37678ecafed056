//! Clock & Scheduler (C1).

mod scheduler;

use chrono::{DateTime, Utc};

pub use scheduler::{Cadence, JobHandle, JobOutcome, JobRegistry, JobRunRecord, Scheduler, SHUTDOWN_GRACE};

/// Monotonic-enough wall clock abstraction (spec.md §9 capability set).
/// The production implementation just wraps `Utc::now`; tests can swap in
/// a fixed or stepped clock.
pub trait Clock: Send + Sync + 'static {
    fn now(&self) -> DateTime<Utc>;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}
