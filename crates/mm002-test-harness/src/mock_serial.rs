//! Mock transport for deterministic testing of the link engine.
//!
//! [`MockTransport`] plays the modem. It is loaded with request/response
//! pairs: once the bytes written by the engine add up to the next expected
//! request, the matching response is queued for `receive()`. The engine
//! paces commands one byte at a time, so matching works on the accumulated
//! frame rather than on individual `send()` calls.
//!
//! The mock is a cheap handle over shared state. Keep a clone to inspect
//! traffic or inject unsolicited lines after the original has been boxed
//! into the engine.
//!
//! # Example
//!
//! ```
//! use mm002_test_harness::MockTransport;
//!
//! let mock = MockTransport::new();
//! mock.expect(b"AT+MAC=RDR\r\n", b"+MAC: RDR,SF7BW125,14,0000,00,1\r\nOK\r\n");
//! assert_eq!(mock.remaining_expectations(), 1);
//! ```

use async_trait::async_trait;
use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use mm002_core::error::{Error, Result};
use mm002_core::transport::Transport;

/// Which control line a recorded toggle was applied to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControlLine {
    Dtr,
    Rts,
}

#[derive(Debug, Clone)]
struct Expectation {
    request: Vec<u8>,
    response: Vec<u8>,
}

#[derive(Debug)]
struct MockState {
    expectations: VecDeque<Expectation>,
    /// Bytes sent since the last completed frame.
    partial: Vec<u8>,
    /// Bytes waiting to be returned by `receive()`.
    rx: VecDeque<u8>,
    /// Upper bound on bytes returned per `receive()` call.
    chunk_size: usize,
    connected: bool,
    frames: Vec<Vec<u8>>,
    send_calls: usize,
    control_log: Vec<(ControlLine, bool)>,
}

/// A scripted stand-in for the modem's serial port.
#[derive(Debug, Clone)]
pub struct MockTransport {
    state: Arc<Mutex<MockState>>,
}

impl MockTransport {
    /// Create a new mock transport in the connected state.
    pub fn new() -> Self {
        MockTransport {
            state: Arc::new(Mutex::new(MockState {
                expectations: VecDeque::new(),
                partial: Vec::new(),
                rx: VecDeque::new(),
                chunk_size: usize::MAX,
                connected: true,
                frames: Vec::new(),
                send_calls: 0,
                control_log: Vec::new(),
            })),
        }
    }

    fn lock(&self) -> MutexGuard<'_, MockState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Add an expected request/response pair.
    ///
    /// An empty `response` means the modem stays silent.
    pub fn expect(&self, request: &[u8], response: &[u8]) {
        self.lock().expectations.push_back(Expectation {
            request: request.to_vec(),
            response: response.to_vec(),
        });
    }

    /// Expect the bare CRLF preamble the engine writes when the link opens.
    pub fn expect_open(&self) {
        self.expect(b"\r\n", b"");
    }

    /// Queue bytes for `receive()` as if the modem sent them unprompted.
    pub fn inject(&self, bytes: &[u8]) {
        self.lock().rx.extend(bytes.iter().copied());
    }

    /// Limit how many bytes a single `receive()` returns, so lines arrive
    /// split across reads.
    pub fn set_chunk_size(&self, chunk_size: usize) {
        self.lock().chunk_size = chunk_size.max(1);
    }

    /// Every complete frame sent so far, as text.
    pub fn sent_frames(&self) -> Vec<String> {
        self.lock()
            .frames
            .iter()
            .map(|f| String::from_utf8_lossy(f).into_owned())
            .collect()
    }

    /// Number of `send()` calls, which reveals per-byte pacing.
    pub fn send_calls(&self) -> usize {
        self.lock().send_calls
    }

    /// Every DTR/RTS change in order.
    pub fn control_log(&self) -> Vec<(ControlLine, bool)> {
        self.lock().control_log.clone()
    }

    pub fn remaining_expectations(&self) -> usize {
        self.lock().expectations.len()
    }

    /// When set to `false`, `send()` and `receive()` return
    /// [`Error::NotConnected`].
    pub fn set_connected(&self, connected: bool) {
        self.lock().connected = connected;
    }
}

impl Default for MockTransport {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Transport for MockTransport {
    async fn send(&mut self, data: &[u8]) -> Result<()> {
        let mut state = self.lock();
        if !state.connected {
            return Err(Error::NotConnected);
        }
        state.send_calls += 1;
        state.partial.extend_from_slice(data);

        let Some(next) = state.expectations.front() else {
            return Err(Error::Protocol(format!(
                "no more expectations in mock transport, got {:?}",
                String::from_utf8_lossy(&state.partial)
            )));
        };
        if !next.request.starts_with(&state.partial) {
            return Err(Error::Protocol(format!(
                "unexpected send data: expected {:?}, got {:?}",
                String::from_utf8_lossy(&next.request),
                String::from_utf8_lossy(&state.partial)
            )));
        }
        if next.request.len() == state.partial.len() {
            if let Some(done) = state.expectations.pop_front() {
                state.rx.extend(done.response.iter().copied());
                state.frames.push(done.request);
            }
            state.partial.clear();
        }
        Ok(())
    }

    async fn receive(&mut self, buf: &mut [u8], _timeout: Duration) -> Result<usize> {
        let n = {
            let mut state = self.lock();
            if !state.connected {
                return Err(Error::NotConnected);
            }
            let n = buf.len().min(state.rx.len()).min(state.chunk_size);
            for (slot, byte) in buf.iter_mut().zip(state.rx.drain(..n)) {
                *slot = byte;
            }
            n
        };
        if n == 0 {
            // Let the consumer run before reporting an idle window.
            tokio::task::yield_now().await;
            return Err(Error::Timeout);
        }
        Ok(n)
    }

    async fn set_dtr(&mut self, on: bool) -> Result<()> {
        self.lock().control_log.push((ControlLine::Dtr, on));
        Ok(())
    }

    async fn set_rts(&mut self, on: bool) -> Result<()> {
        self.lock().control_log.push((ControlLine::Rts, on));
        Ok(())
    }

    async fn close(&mut self) -> Result<()> {
        self.lock().connected = false;
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.lock().connected
    }
}
