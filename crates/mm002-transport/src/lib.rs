//! Transport implementations for the MM002 link.
//!
//! - [`SerialTransport`]: UART or USB-serial connection to the modem

pub mod serial;

pub use serial::{
    DataBits, FlowControl, Parity, SerialConfig, SerialTransport, StopBits, DEFAULT_BAUD_RATE,
};
