//! Wrap-safe millisecond deadline.
//!
//! The tick is a `u32` that wraps after about 49.7 days. Expiry is computed
//! from the unsigned distance `now - armed_at`, which stays correct when the
//! counter wraps between arming and checking. The deadline itself never
//! reads a clock; callers pass the current tick.

/// A deadline armed at one tick for a fixed number of milliseconds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Deadline {
    armed_at: u32,
    duration_ms: u32,
    wraps: bool,
    expired: bool,
}

impl Deadline {
    /// Arm a deadline `duration_ms` after tick `now`.
    pub fn arm(now: u32, duration_ms: u32) -> Self {
        Deadline {
            armed_at: now,
            duration_ms,
            wraps: now.checked_add(duration_ms).is_none(),
            expired: false,
        }
    }

    /// Re-arm in place. This is the only way to restart a deadline.
    pub fn rearm(&mut self, now: u32, duration_ms: u32) {
        *self = Self::arm(now, duration_ms);
    }

    /// Push the expiry back by `extra_ms`. Has no effect once expiry has
    /// been observed.
    pub fn extend(&mut self, extra_ms: u32) {
        if self.expired {
            return;
        }
        self.duration_ms = self.duration_ms.saturating_add(extra_ms);
        self.wraps = self.armed_at.checked_add(self.duration_ms).is_none();
    }

    /// True once `duration_ms` have elapsed since arming. Stays true after
    /// the first time it is observed.
    pub fn is_expired(&mut self, now: u32) -> bool {
        if !self.expired && self.elapsed(now) >= self.duration_ms {
            self.expired = true;
        }
        self.expired
    }

    pub fn elapsed(&self, now: u32) -> u32 {
        now.wrapping_sub(self.armed_at)
    }

    pub fn remaining(&self, now: u32) -> u32 {
        if self.expired {
            0
        } else {
            self.duration_ms.saturating_sub(self.elapsed(now))
        }
    }

    pub fn armed_at(&self) -> u32 {
        self.armed_at
    }

    pub fn duration_ms(&self) -> u32 {
        self.duration_ms
    }

    /// Tick at which the deadline falls due (may be numerically below
    /// `armed_at` when [`wraps`](Self::wraps) is set).
    pub fn expires_at(&self) -> u32 {
        self.armed_at.wrapping_add(self.duration_ms)
    }

    /// Whether the expiry tick lies past the counter's wrap point.
    pub fn wraps(&self) -> bool {
        self.wraps
    }
}
