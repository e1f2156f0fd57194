//! Millisecond tick source.
//!
//! The link engine measures deadlines against a `u32` millisecond counter
//! that wraps after about 49.7 days, and it performs every delay through the
//! same source. Tests swap in `MockClock` from `mm002-test-harness` to run
//! multi-second timeouts instantly and to start the counter just below its
//! wrap point.

use async_trait::async_trait;
use std::time::Duration;
use tokio::time::Instant;

/// A monotonically increasing, wrapping millisecond clock.
#[async_trait]
pub trait Clock: Send + Sync {
    /// Current tick in milliseconds. Wraps at `u32::MAX`.
    fn now_ms(&self) -> u32;

    /// Suspend the caller for `ms` milliseconds of this clock's time.
    async fn sleep_ms(&self, ms: u32);
}

/// Wall-clock implementation backed by tokio's [`Instant`] and
/// `tokio::time::sleep`, so it follows a paused test runtime too.
#[derive(Debug, Clone)]
pub struct SystemClock {
    origin: Instant,
}

impl SystemClock {
    pub fn new() -> Self {
        SystemClock {
            origin: Instant::now(),
        }
    }
}

impl Default for SystemClock {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Clock for SystemClock {
    fn now_ms(&self) -> u32 {
        // Truncation is the wrap.
        self.origin.elapsed().as_millis() as u32
    }

    async fn sleep_ms(&self, ms: u32) {
        tokio::time::sleep(Duration::from_millis(u64::from(ms))).await;
    }
}
