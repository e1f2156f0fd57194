//! AT command link engine for the MM002 modem.
//!
//! One task owns the serial port: it serves writes and control-line changes
//! and pumps everything received into a lock-free ring. The engine,
//! sole reader of that ring, frames LF-terminated lines, classifies them and
//! resolves the one command that may be in flight, handing every other line
//! to registered observers.
//!
//! # Architecture
//!
//! - [`ring_buffer`] -- single-producer/single-consumer byte ring with overwrite
//! - [`deadline`] -- wrap-safe millisecond deadline
//! - [`protocol`] -- line classification and field extraction
//! - [`observers`] -- ordered listener registry
//! - [`io`] -- the task that owns the transport and fills the ring
//! - [`engine`] -- [`ModemLink`], the command/response state machine

pub mod deadline;
pub mod engine;
pub mod io;
pub mod observers;
pub mod protocol;
pub mod ring_buffer;

pub use deadline::Deadline;
pub use engine::{LinkConfig, ModemLink, SharedLink, WakeConfig};
pub use observers::{listener, LineEvent, LineListener, ListenerHandle, ObserverRegistry};
pub use protocol::{ClassifiedLine, LineKind, UnsolicitedTable};
pub use ring_buffer::RingBuffer;
