//! Logical clock for action ids
//!
//! Action ids follow the wall clock in milliseconds so they double as
//! approximate timestamps, but never repeat or go backwards even when the
//! wall clock does.

use crate::ActionId;
use log::debug;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

/// Source of wall clock time in milliseconds since the Unix epoch
pub trait Clock: Send + Sync {
    fn now_ms(&self) -> u64;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now_ms(&self) -> u64 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or(Duration::from_secs(0))
            .as_millis() as u64
    }
}

/// Settable clock for tests. Clones share the same time.
#[derive(Debug, Clone, Default)]
pub struct MockClock {
    time_ms: Arc<AtomicU64>,
}

impl MockClock {
    pub fn new(time_ms: u64) -> Self {
        Self {
            time_ms: Arc::new(AtomicU64::new(time_ms)),
        }
    }

    pub fn set(&self, time_ms: u64) {
        self.time_ms.store(time_ms, Ordering::SeqCst);
    }

    pub fn advance(&self, ms: u64) {
        self.time_ms.fetch_add(ms, Ordering::SeqCst);
    }
}

impl Clock for MockClock {
    fn now_ms(&self) -> u64 {
        self.time_ms.load(Ordering::SeqCst)
    }
}

/// Produces strictly increasing action ids: `max(now, previous + 1)`.
pub struct ActionIdGenerator<C: Clock = SystemClock> {
    clock: C,
    previous: ActionId,
}

impl ActionIdGenerator<SystemClock> {
    pub fn new() -> Self {
        Self::with_clock(SystemClock)
    }
}

impl Default for ActionIdGenerator<SystemClock> {
    fn default() -> Self {
        Self::new()
    }
}

impl<C: Clock> ActionIdGenerator<C> {
    pub fn with_clock(clock: C) -> Self {
        Self { clock, previous: 0 }
    }

    pub fn generate(&mut self) -> ActionId {
        let now = self.clock.now_ms();
        let next = now.max(self.previous + 1);

        if now < self.previous {
            debug!(
                "Wall clock behind last action id by {}ms, incrementing instead",
                self.previous - now
            );
        }

        self.previous = next;
        next
    }

    /// Last id handed out, 0 before the first call.
    pub fn previous(&self) -> ActionId {
        self.previous
    }
}
