//! Simulated millisecond clock.
//!
//! [`MockClock`] only moves when someone sleeps on it (or a test calls
//! [`MockClock::advance`]). A 5000 ms command timeout therefore completes
//! in a few thousand polling iterations without real waiting, and a clock
//! started near `u32::MAX` exercises deadline wraparound.

use async_trait::async_trait;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use mm002_core::clock::Clock;

/// Shared simulated tick. Clones observe and drive the same counter.
#[derive(Debug, Clone, Default)]
pub struct MockClock {
    now: Arc<AtomicU32>,
}

impl MockClock {
    /// A clock starting at tick 0.
    pub fn new() -> Self {
        Self::starting_at(0)
    }

    /// A clock starting at `tick`, e.g. `u32::MAX - 100` for wrap tests.
    pub fn starting_at(tick: u32) -> Self {
        MockClock {
            now: Arc::new(AtomicU32::new(tick)),
        }
    }

    /// Move the clock forward, wrapping at `u32::MAX`.
    pub fn advance(&self, ms: u32) {
        self.now.fetch_add(ms, Ordering::AcqRel);
    }

    /// Milliseconds elapsed since `start`, wrap-aware.
    pub fn elapsed_since(&self, start: u32) -> u32 {
        self.now_ms().wrapping_sub(start)
    }
}

#[async_trait]
impl Clock for MockClock {
    fn now_ms(&self) -> u32 {
        self.now.load(Ordering::Acquire)
    }

    async fn sleep_ms(&self, ms: u32) {
        self.advance(ms);
        // Give other tasks (the link I/O task) a turn.
        tokio::task::yield_now().await;
    }
}
