//! Error types for the MM002 link.
//!
//! Fallible operations return [`Result<T>`] with [`Error`] as the error type.
//! These cover failures of the link itself (serial port gone, I/O errors,
//! misuse of a closed link). The modem's own verdict on a command
//! (`OK`, `ERROR`, no answer) is not an error here; it travels as a
//! [`ResultCode`](crate::ResultCode).

/// The error type for link-level failures.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// A transport-level error (serial port open or configuration failure).
    #[error("transport error: {0}")]
    Transport(String),

    /// A protocol-level error (unexpected bytes on the wire).
    #[error("protocol error: {0}")]
    Protocol(String),

    /// Timed out waiting for bytes from the transport.
    ///
    /// Transports return this from `receive()` when nothing arrived within
    /// the requested window. The link I/O task treats it as "idle".
    #[error("timeout waiting for data")]
    Timeout,

    /// An invalid parameter was passed to a builder or command.
    #[error("invalid parameter: {0}")]
    InvalidParameter(String),

    /// The link has not been opened, or has been closed.
    #[error("not connected")]
    NotConnected,

    /// The connection to the modem was lost unexpectedly.
    #[error("connection lost")]
    ConnectionLost,

    /// An underlying I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// A convenience `Result` alias using [`Error`] as the error type.
pub type Result<T> = std::result::Result<T, Error>;
