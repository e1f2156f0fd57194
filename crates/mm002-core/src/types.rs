//! Core types shared by the link engine and the protocol modules.

use std::fmt;

/// Outcome of one command/response cycle as reported by the modem.
///
/// The discriminants are the stable wire-compatible integers used by
/// applications that log or forward result codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum ResultCode {
    /// The modem answered `OK`.
    Success = 0,
    /// No terminal line arrived before the deadline.
    NoAnswer = 2,
    /// The modem answered `ERROR NOACK` (frame sent, acknowledgement missing).
    UnacknowledgedError = 3,
    /// The caller's arguments were rejected before anything was transmitted.
    ArgumentError = 4,
    /// The command succeeded but the payload was truncated to fit.
    PayloadTruncatedWarning = 5,
    /// The modem answered `ERROR`.
    GenericError = 255,
}

impl ResultCode {
    /// Return the numeric code.
    pub fn as_u8(self) -> u8 {
        self as u8
    }

    /// Map a numeric code back to a `ResultCode`.
    pub fn from_u8(code: u8) -> Option<Self> {
        match code {
            0 => Some(ResultCode::Success),
            2 => Some(ResultCode::NoAnswer),
            3 => Some(ResultCode::UnacknowledgedError),
            4 => Some(ResultCode::ArgumentError),
            5 => Some(ResultCode::PayloadTruncatedWarning),
            255 => Some(ResultCode::GenericError),
            _ => None,
        }
    }

    /// True for `Success` and `PayloadTruncatedWarning`.
    pub fn is_success(self) -> bool {
        matches!(
            self,
            ResultCode::Success | ResultCode::PayloadTruncatedWarning
        )
    }
}

impl fmt::Display for ResultCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ResultCode::Success => "success",
            ResultCode::NoAnswer => "no answer",
            ResultCode::UnacknowledgedError => "error (no ack)",
            ResultCode::ArgumentError => "argument error",
            ResultCode::PayloadTruncatedWarning => "success (payload truncated)",
            ResultCode::GenericError => "error",
        };
        write!(f, "{s}")
    }
}

/// An AT command: a numeric opcode plus the fixed text that starts its frame.
///
/// Commands are immutable values taken from a static catalog. Argument text
/// is appended at send time. [`Command::NONE`] is the "no command" sentinel
/// and has no wire text.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Command {
    opcode: u8,
    wire_text: Option<&'static str>,
}

impl Command {
    /// The "no command" sentinel.
    pub const NONE: Command = Command {
        opcode: 0xFF,
        wire_text: None,
    };

    pub const fn new(opcode: u8, wire_text: &'static str) -> Self {
        Command {
            opcode,
            wire_text: Some(wire_text),
        }
    }

    pub fn opcode(&self) -> u8 {
        self.opcode
    }

    pub fn wire_text(&self) -> Option<&'static str> {
        self.wire_text
    }

    pub fn is_none(&self) -> bool {
        self.wire_text.is_none()
    }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.wire_text {
            Some(text) => write!(f, "{}", text.trim_end()),
            None => write!(f, "<none>"),
        }
    }
}

/// Serial control line used to pulse the modem out of low-power mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum WakeLine {
    /// No wake pulse is issued.
    None,
    /// Pulse the DTR line.
    Dtr,
    /// Pulse the RTS line (default).
    #[default]
    Rts,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn result_code_values_are_stable() {
        assert_eq!(ResultCode::Success.as_u8(), 0);
        assert_eq!(ResultCode::NoAnswer.as_u8(), 2);
        assert_eq!(ResultCode::UnacknowledgedError.as_u8(), 3);
        assert_eq!(ResultCode::ArgumentError.as_u8(), 4);
        assert_eq!(ResultCode::PayloadTruncatedWarning.as_u8(), 5);
        assert_eq!(ResultCode::GenericError.as_u8(), 255);
    }

    #[test]
    fn result_code_from_u8() {
        for code in [
            ResultCode::Success,
            ResultCode::NoAnswer,
            ResultCode::UnacknowledgedError,
            ResultCode::ArgumentError,
            ResultCode::PayloadTruncatedWarning,
            ResultCode::GenericError,
        ] {
            assert_eq!(ResultCode::from_u8(code.as_u8()), Some(code));
        }
        assert_eq!(ResultCode::from_u8(1), None);
    }

    #[test]
    fn truncation_warning_counts_as_success() {
        assert!(ResultCode::Success.is_success());
        assert!(ResultCode::PayloadTruncatedWarning.is_success());
        assert!(!ResultCode::NoAnswer.is_success());
        assert!(!ResultCode::GenericError.is_success());
    }

    #[test]
    fn result_code_display() {
        assert_eq!(ResultCode::NoAnswer.to_string(), "no answer");
        assert_eq!(ResultCode::UnacknowledgedError.to_string(), "error (no ack)");
    }

    #[test]
    fn command_accessors() {
        let cmd = Command::new(9, "AT+MAC=RDR\r\n");
        assert_eq!(cmd.opcode(), 9);
        assert_eq!(cmd.wire_text(), Some("AT+MAC=RDR\r\n"));
        assert!(!cmd.is_none());
        assert_eq!(cmd.to_string(), "AT+MAC=RDR");
    }

    #[test]
    fn sentinel_has_no_wire_text() {
        assert!(Command::NONE.is_none());
        assert_eq!(Command::NONE.wire_text(), None);
        assert_eq!(Command::NONE.opcode(), 0xFF);
        assert_eq!(Command::NONE.to_string(), "<none>");
    }

    #[test]
    fn wake_line_default_is_rts() {
        assert_eq!(WakeLine::default(), WakeLine::Rts);
    }
}
