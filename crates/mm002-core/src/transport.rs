//! Transport trait for modem communication.
//!
//! The [`Transport`] trait abstracts over the physical link to the modem.
//! `SerialTransport` in `mm002-transport` drives a real UART, and
//! `MockTransport` from `mm002-test-harness` scripts the modem's replies
//! for deterministic tests.

use async_trait::async_trait;
use std::time::Duration;

use crate::error::Result;

/// Asynchronous byte-level transport to the modem.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Send raw bytes to the modem.
    ///
    /// Implementations should not return until all bytes have been handed
    /// to the underlying device.
    async fn send(&mut self, data: &[u8]) -> Result<()>;

    /// Receive bytes from the modem into the provided buffer.
    ///
    /// Returns the number of bytes read. Waits up to `timeout` for data and
    /// returns [`Error::Timeout`](crate::error::Error::Timeout) if nothing
    /// arrived.
    ///
    /// Must be cancel safe: the link drops a pending receive whenever it has
    /// bytes to write, and no received data may be lost when it does.
    async fn receive(&mut self, buf: &mut [u8], timeout: Duration) -> Result<usize>;

    /// Drive the DTR control line.
    async fn set_dtr(&mut self, on: bool) -> Result<()>;

    /// Drive the RTS control line.
    async fn set_rts(&mut self, on: bool) -> Result<()>;

    /// Close the transport. Later `send()`/`receive()` calls should return
    /// [`Error::NotConnected`](crate::error::Error::NotConnected).
    async fn close(&mut self) -> Result<()>;

    /// Check whether the transport is currently connected.
    fn is_connected(&self) -> bool;
}
