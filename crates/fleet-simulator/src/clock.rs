//! Injected elapsed-time sources.
//!
//! The pacer and the warning path never read a process-wide timer; they are
//! handed a [`SharedClock`] instead.

use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tokio::time::Instant;

/// Monotonic elapsed time since some fixed origin.
pub trait Clock: Send + Sync + fmt::Debug {
    fn elapsed(&self) -> Duration;
}

pub type SharedClock = Arc<dyn Clock>;

/// Wall clock backed by tokio's `Instant`, so paused-time tests control it.
#[derive(Debug, Clone, Copy)]
pub struct MonotonicClock {
    origin: Instant,
}

impl MonotonicClock {
    pub fn new() -> Self {
        Self {
            origin: Instant::now(),
        }
    }

    pub fn shared() -> SharedClock {
        Arc::new(Self::new())
    }
}

impl Default for MonotonicClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for MonotonicClock {
    fn elapsed(&self) -> Duration {
        self.origin.elapsed()
    }
}

/// Hand-driven clock for deterministic runs.
///
/// With an auto-advance step, every read returns the current time and then
/// moves the clock forward by that step.
#[derive(Debug, Default)]
pub struct ManualClock {
    nanos: AtomicU64,
    auto_advance_nanos: u64,
}

impl ManualClock {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_auto_advance(step: Duration) -> Self {
        Self {
            nanos: AtomicU64::new(0),
            auto_advance_nanos: duration_nanos(step),
        }
    }

    pub fn set(&self, at: Duration) {
        self.nanos.store(duration_nanos(at), Ordering::SeqCst);
    }

    pub fn advance(&self, by: Duration) {
        self.nanos.fetch_add(duration_nanos(by), Ordering::SeqCst);
    }

    /// Current reading without triggering auto-advance.
    pub fn peek(&self) -> Duration {
        Duration::from_nanos(self.nanos.load(Ordering::SeqCst))
    }
}

impl Clock for ManualClock {
    fn elapsed(&self) -> Duration {
        let now = self
            .nanos
            .fetch_add(self.auto_advance_nanos, Ordering::SeqCst);
        Duration::from_nanos(now)
    }
}

fn duration_nanos(d: Duration) -> u64 {
    u64::try_from(d.as_nanos()).unwrap_or(u64::MAX)
}
