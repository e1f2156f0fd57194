//! Bounded argument builder.
//!
//! Argument text is what follows a command's fixed wire text, ending in
//! CRLF. [`ArgBuilder`] never grows past its limit: text that does not fit
//! is cut on a character boundary and the builder remembers that it
//! overflowed.

use std::fmt::Display;

use mm002_at_io::protocol::SEPARATOR;

/// Largest argument string the modem accepts, CRLF included.
pub const MAX_ARGS_LEN: usize = 512;

const CRLF: &str = "\r\n";

/// Longest prefix of `s` that is at most `max` bytes and ends on a char
/// boundary.
fn clip(s: &str, max: usize) -> &str {
    if s.len() <= max {
        return s;
    }
    let mut end = max;
    while !s.is_char_boundary(end) {
        end -= 1;
    }
    &s[..end]
}

#[derive(Debug, Clone)]
pub struct ArgBuilder {
    buf: String,
    /// Content limit, excluding the CRLF reserved for `finish`.
    limit: usize,
    overflowed: bool,
}

impl Default for ArgBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl ArgBuilder {
    pub fn new() -> Self {
        Self::with_limit(MAX_ARGS_LEN)
    }

    /// Builder for at most `limit` bytes including the final CRLF.
    pub fn with_limit(limit: usize) -> Self {
        let limit = limit.saturating_sub(CRLF.len());
        ArgBuilder {
            buf: String::with_capacity(limit + CRLF.len()),
            limit,
            overflowed: false,
        }
    }

    /// Append as much of `s` as fits.
    pub fn push_str(&mut self, s: &str) -> &mut Self {
        let room = self.limit - self.buf.len();
        let part = clip(s, room);
        if part.len() < s.len() {
            self.overflowed = true;
        }
        self.buf.push_str(part);
        self
    }

    pub fn push_separator(&mut self) -> &mut Self {
        let mut tmp = [0u8; 4];
        self.push_str(SEPARATOR.encode_utf8(&mut tmp))
    }

    /// Separator followed by `value`.
    pub fn push_field(&mut self, value: &str) -> &mut Self {
        self.push_separator().push_str(value)
    }

    pub fn push_number<T: Display>(&mut self, n: T) -> &mut Self {
        self.push_str(&n.to_string())
    }

    /// `1` or `0`.
    pub fn push_bool_flag(&mut self, flag: bool) -> &mut Self {
        self.push_str(if flag { "1" } else { "0" })
    }

    /// Append at most `max` bytes of `payload`. Returns `true` if the
    /// payload was cut.
    pub fn push_truncated(&mut self, payload: &str, max: usize) -> bool {
        let part = clip(payload, max);
        self.push_str(part);
        part.len() < payload.len()
    }

    /// True if anything pushed so far did not fit.
    pub fn overflowed(&self) -> bool {
        self.overflowed
    }

    pub fn len(&self) -> usize {
        self.buf.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    /// Terminate with CRLF and return the argument text.
    pub fn finish(mut self) -> String {
        self.buf.push_str(CRLF);
        self.buf
    }
}

/// Payload encoding of a send command.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PayloadMode {
    /// Hex-encoded bytes, two characters per byte.
    Binary,
    /// Printable text, one character per byte.
    Text,
}

impl PayloadMode {
    pub fn tag(self) -> &'static str {
        match self {
            PayloadMode::Binary => "BIN",
            PayloadMode::Text => "TXT",
        }
    }

    /// Longest payload string for a radio limit of `max_bytes`.
    pub fn max_chars(self, max_bytes: usize) -> usize {
        match self {
            PayloadMode::Binary => 2 * max_bytes,
            PayloadMode::Text => max_bytes,
        }
    }
}

/// True if `value` can be sent as one field: no separator and no line
/// terminator.
pub fn is_plain_field(value: &str) -> bool {
    !value.contains([SEPARATOR, '\r', '\n'])
}

/// True if `value` is exactly `len` hex digits.
pub fn is_hex(value: &str, len: usize) -> bool {
    value.len() == len && value.bytes().all(|b| b.is_ascii_hexdigit())
}
