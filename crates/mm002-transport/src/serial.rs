//! Serial port transport for the MM002 modem.
//!
//! The modem's AT interface is a 3.3 V UART, usually reached through a
//! USB-serial adapter. The factory rate is 38400 baud, 8N1, no flow control.
//! The adapter's RTS (or DTR) output is wired to the modem's wake input so
//! the link engine can pulse it before each command.
//!
//! # Example
//!
//! ```no_run
//! use mm002_transport::SerialTransport;
//! use mm002_core::transport::Transport;
//! use std::time::Duration;
//!
//! # async fn example() -> mm002_core::Result<()> {
//! let mut transport = SerialTransport::open("/dev/ttyUSB0", 38400).await?;
//! transport.send(b"AT+RF=?\r\n").await?;
//!
//! let mut buf = [0u8; 256];
//! let n = transport.receive(&mut buf, Duration::from_millis(500)).await?;
//! # Ok(())
//! # }
//! ```

use async_trait::async_trait;
use mm002_core::error::{Error, Result};
use mm002_core::transport::Transport;
use std::io::ErrorKind;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio_serial::{SerialPort, SerialPortBuilderExt, SerialStream};

/// Factory baud rate of the modem's AT interface.
pub const DEFAULT_BAUD_RATE: u32 = 38400;

/// Serial port configuration.
///
/// Defaults match the modem's factory settings:
/// - 38400 baud
/// - 8 data bits, 1 stop bit, no parity
/// - No flow control
#[derive(Debug, Clone)]
pub struct SerialConfig {
    /// Baud rate (the modem ships at 38400)
    pub baud_rate: u32,
    /// Number of data bits (8 for the AT interface)
    pub data_bits: DataBits,
    /// Number of stop bits (typically 1)
    pub stop_bits: StopBits,
    /// Parity checking (typically None)
    pub parity: Parity,
    /// Flow control (None when RTS doubles as the wake line)
    pub flow_control: FlowControl,
}

impl Default for SerialConfig {
    fn default() -> Self {
        Self {
            baud_rate: DEFAULT_BAUD_RATE,
            data_bits: DataBits::Eight,
            stop_bits: StopBits::One,
            parity: Parity::None,
            flow_control: FlowControl::None,
        }
    }
}

/// Number of data bits per character.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DataBits {
    Seven,
    Eight,
}

impl From<DataBits> for tokio_serial::DataBits {
    fn from(bits: DataBits) -> Self {
        match bits {
            DataBits::Seven => tokio_serial::DataBits::Seven,
            DataBits::Eight => tokio_serial::DataBits::Eight,
        }
    }
}

/// Number of stop bits per character.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopBits {
    One,
    Two,
}

impl From<StopBits> for tokio_serial::StopBits {
    fn from(bits: StopBits) -> Self {
        match bits {
            StopBits::One => tokio_serial::StopBits::One,
            StopBits::Two => tokio_serial::StopBits::Two,
        }
    }
}

/// Parity checking mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Parity {
    None,
    Odd,
    Even,
}

impl From<Parity> for tokio_serial::Parity {
    fn from(parity: Parity) -> Self {
        match parity {
            Parity::None => tokio_serial::Parity::None,
            Parity::Odd => tokio_serial::Parity::Odd,
            Parity::Even => tokio_serial::Parity::Even,
        }
    }
}

/// Flow control mode. Hardware flow control cannot be combined with an
/// RTS wake line.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlowControl {
    /// No flow control.
    None,
    /// RTS/CTS hardware flow control.
    Hardware,
}

impl From<FlowControl> for tokio_serial::FlowControl {
    fn from(flow: FlowControl) -> Self {
        match flow {
            FlowControl::None => tokio_serial::FlowControl::None,
            FlowControl::Hardware => tokio_serial::FlowControl::Hardware,
        }
    }
}

/// [`Transport`] over a serial port.
pub struct SerialTransport {
    port: Option<SerialStream>,
    port_name: String,
}

impl SerialTransport {
    /// Open a serial port at `baud_rate` with 8N1 and no flow control.
    pub async fn open(port: &str, baud_rate: u32) -> Result<Self> {
        let config = SerialConfig {
            baud_rate,
            ..Default::default()
        };
        Self::open_with_config(port, config).await
    }

    /// Open a serial port with full configuration control.
    pub async fn open_with_config(port: &str, config: SerialConfig) -> Result<Self> {
        tracing::debug!(
            port = %port,
            baud_rate = config.baud_rate,
            parity = ?config.parity,
            flow_control = ?config.flow_control,
            "opening modem serial port"
        );

        let mut stream = tokio_serial::new(port, config.baud_rate)
            .data_bits(config.data_bits.into())
            .stop_bits(config.stop_bits.into())
            .parity(config.parity.into())
            .flow_control(config.flow_control.into())
            .open_native_async()
            .map_err(|e| {
                tracing::error!(port = %port, error = %e, "failed to open serial port");
                Error::Transport(format!("failed to open serial port {port}: {e}"))
            })?;

        // Start with the wake line idle (low).
        if let Err(e) = stream.write_request_to_send(false) {
            tracing::warn!(port = %port, error = %e, "failed to de-assert RTS");
        }
        if let Err(e) = stream.write_data_terminal_ready(false) {
            tracing::warn!(port = %port, error = %e, "failed to de-assert DTR");
        }

        tracing::info!(port = %port, baud_rate = config.baud_rate, "modem serial port opened");

        Ok(Self {
            port: Some(stream),
            port_name: port.to_string(),
        })
    }

    pub fn port_name(&self) -> &str {
        &self.port_name
    }
}

/// Broken pipes and vanished devices mean the adapter was unplugged.
fn map_io_error(e: std::io::Error) -> Error {
    match e.kind() {
        ErrorKind::BrokenPipe | ErrorKind::NotConnected => Error::ConnectionLost,
        _ => Error::Io(e),
    }
}

#[async_trait]
impl Transport for SerialTransport {
    async fn send(&mut self, data: &[u8]) -> Result<()> {
        let port = self.port.as_mut().ok_or(Error::NotConnected)?;

        tracing::trace!(port = %self.port_name, bytes = data.len(), data = ?data, "tx");

        port.write_all(data).await.map_err(|e| {
            tracing::error!(port = %self.port_name, error = %e, "serial write failed");
            map_io_error(e)
        })?;
        port.flush().await.map_err(map_io_error)?;
        Ok(())
    }

    async fn receive(&mut self, buf: &mut [u8], timeout: Duration) -> Result<usize> {
        let port = self.port.as_mut().ok_or(Error::NotConnected)?;

        match tokio::time::timeout(timeout, port.read(buf)).await {
            Ok(Ok(0)) => {
                tracing::warn!(port = %self.port_name, "serial port returned end of stream");
                Err(Error::ConnectionLost)
            }
            Ok(Ok(n)) => {
                tracing::trace!(port = %self.port_name, bytes = n, data = ?&buf[..n], "rx");
                Ok(n)
            }
            Ok(Err(e)) => {
                tracing::error!(port = %self.port_name, error = %e, "serial read failed");
                Err(map_io_error(e))
            }
            Err(_) => Err(Error::Timeout),
        }
    }

    async fn set_dtr(&mut self, on: bool) -> Result<()> {
        let port = self.port.as_mut().ok_or(Error::NotConnected)?;
        port.write_data_terminal_ready(on)
            .map_err(|e| Error::Transport(format!("failed to set DTR: {e}")))
    }

    async fn set_rts(&mut self, on: bool) -> Result<()> {
        let port = self.port.as_mut().ok_or(Error::NotConnected)?;
        port.write_request_to_send(on)
            .map_err(|e| Error::Transport(format!("failed to set RTS: {e}")))
    }

    async fn close(&mut self) -> Result<()> {
        if let Some(mut port) = self.port.take() {
            if let Err(e) = port.flush().await {
                tracing::warn!(port = %self.port_name, error = %e, "flush before close failed");
            }
            tracing::info!(port = %self.port_name, "modem serial port closed");
        }
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.port.is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_matches_modem_factory_settings() {
        let config = SerialConfig::default();
        assert_eq!(config.baud_rate, 38400);
        assert_eq!(config.data_bits, DataBits::Eight);
        assert_eq!(config.stop_bits, StopBits::One);
        assert_eq!(config.parity, Parity::None);
        assert_eq!(config.flow_control, FlowControl::None);
    }

    #[test]
    fn config_enums_convert() {
        let _: tokio_serial::DataBits = DataBits::Seven.into();
        let _: tokio_serial::StopBits = StopBits::Two.into();
        let _: tokio_serial::Parity = Parity::Even.into();
        let _: tokio_serial::FlowControl = FlowControl::Hardware.into();
    }

    #[test]
    fn broken_pipe_maps_to_connection_lost() {
        let e = map_io_error(std::io::Error::new(ErrorKind::BrokenPipe, "gone"));
        assert!(matches!(e, Error::ConnectionLost));
        let e = map_io_error(std::io::Error::new(ErrorKind::Other, "glitch"));
        assert!(matches!(e, Error::Io(_)));
    }

    #[tokio::test]
    async fn opening_missing_port_is_a_transport_error() {
        let result = SerialTransport::open("/dev/mm002-does-not-exist", DEFAULT_BAUD_RATE).await;
        assert!(matches!(result, Err(Error::Transport(_))));
    }
}
