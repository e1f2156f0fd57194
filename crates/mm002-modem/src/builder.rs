//! ModemBuilder -- fluent builder for constructing [`Modem`] instances.
//!
//! Separates configuration from construction so that callers can set up
//! serial port parameters, buffer sizes and the wake line before the
//! transport is opened.
//!
//! # Example
//!
//! ```no_run
//! use mm002_modem::builder::ModemBuilder;
//!
//! # async fn example() -> mm002_core::Result<()> {
//! let modem = ModemBuilder::new()
//!     .serial_port("/dev/ttyUSB0")
//!     .baud_rate(38_400)
//!     .build()
//!     .await?;
//! modem.init().await?;
//! # Ok(())
//! # }
//! ```

use std::sync::Arc;

use mm002_at_io::{LinkConfig, ModemLink, WakeConfig};
use mm002_core::clock::{Clock, SystemClock};
use mm002_core::error::{Error, Result};
use mm002_core::transport::Transport;
use mm002_core::types::WakeLine;
use mm002_transport::{SerialConfig, SerialTransport};

use crate::args::MAX_ARGS_LEN;
use crate::modem::Modem;

/// Longest frame the modules produce: the longest command text plus a full
/// argument string.
const MAX_FRAME_LEN: usize = MAX_ARGS_LEN + 32;

/// Link defaults for a modem with every protocol module attached.
pub fn default_link_config() -> LinkConfig {
    LinkConfig {
        max_command_len: MAX_FRAME_LEN,
        unsolicited: crate::unsolicited_tables(),
        ..LinkConfig::default()
    }
}

/// Fluent builder for [`Modem`].
pub struct ModemBuilder {
    serial_port: Option<String>,
    serial_config: SerialConfig,
    link_config: LinkConfig,
    clock: Arc<dyn Clock>,
}

impl Default for ModemBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl ModemBuilder {
    pub fn new() -> Self {
        ModemBuilder {
            serial_port: None,
            serial_config: SerialConfig::default(),
            link_config: default_link_config(),
            clock: Arc::new(SystemClock::new()),
        }
    }

    /// Set the serial port path (e.g. `/dev/ttyUSB0` or `COM3`).
    pub fn serial_port(mut self, port: &str) -> Self {
        self.serial_port = Some(port.to_string());
        self
    }

    /// Override the default baud rate (38400).
    pub fn baud_rate(mut self, baud: u32) -> Self {
        self.serial_config.baud_rate = baud;
        self
    }

    /// Replace the whole serial configuration.
    pub fn serial_config(mut self, config: SerialConfig) -> Self {
        self.serial_config = config;
        self
    }

    /// Replace the link configuration. An empty unsolicited table list is
    /// filled in with the tables of all protocol modules.
    pub fn link_config(mut self, config: LinkConfig) -> Self {
        self.link_config = config;
        self
    }

    /// Control line pulsed before every command (default: RTS).
    pub fn wake_line(mut self, line: WakeLine) -> Self {
        self.link_config.wake = WakeConfig {
            line,
            ..self.link_config.wake
        };
        self
    }

    /// Time source for deadlines and delays. Tests pass a `MockClock`.
    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Build a [`Modem`] with a caller-provided transport.
    ///
    /// This is the entry point for testing (pass a `MockTransport` from
    /// `mm002-test-harness`).
    pub async fn build_with_transport(self, transport: Box<dyn Transport>) -> Result<Modem> {
        let mut config = self.link_config;
        if config.max_line_len == 0 || config.max_line_len > config.rx_capacity {
            return Err(Error::InvalidParameter(
                "max_line_len must be between 1 and rx_capacity".into(),
            ));
        }
        if config.max_command_len == 0 {
            return Err(Error::InvalidParameter(
                "max_command_len must be non-zero".into(),
            ));
        }
        if config.unsolicited.is_empty() {
            config.unsolicited = crate::unsolicited_tables();
        }

        Ok(Modem::new(ModemLink::new(transport, self.clock, config)))
    }

    /// Build a [`Modem`] on a serial port.
    ///
    /// Requires that [`serial_port()`](Self::serial_port) has been called.
    pub async fn build(self) -> Result<Modem> {
        let port = self
            .serial_port
            .as_ref()
            .ok_or_else(|| Error::InvalidParameter("serial_port is required for build()".into()))?;

        let transport = SerialTransport::open_with_config(port, self.serial_config.clone()).await?;
        self.build_with_transport(Box::new(transport)).await
    }
}
