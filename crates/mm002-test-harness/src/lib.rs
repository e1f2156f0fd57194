//! mm002-test-harness: Test utilities for the MM002 link.
//!
//! [`MockTransport`] scripts the modem's side of the serial line and
//! [`MockClock`] supplies simulated time, so the engine's timeouts and
//! wraparound handling can be tested without hardware or waiting.

pub mod mock_clock;
pub mod mock_serial;

pub use mock_clock::MockClock;
pub use mock_serial::{ControlLine, MockTransport};
