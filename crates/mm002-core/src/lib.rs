//! mm002-core: Core traits, types, and error definitions for the MM002 link.
//!
//! This crate defines the abstractions shared by the link engine, the
//! transports and the protocol modules.
//!
//! # Key types
//!
//! - [`Transport`] -- byte-level communication channel
//! - [`Clock`] -- wrapping millisecond tick and delays
//! - [`Command`] -- an opcode plus its wire text
//! - [`ResultCode`] -- the modem's verdict on a command
//! - [`Error`] / [`Result`] -- link-level failures

pub mod clock;
pub mod error;
pub mod transport;
pub mod types;

pub use clock::{Clock, SystemClock};
pub use error::{Error, Result};
pub use transport::Transport;
pub use types::{Command, ResultCode, WakeLine};
