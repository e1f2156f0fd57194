//! Line classification and field extraction for the MM002 AT protocol.
//!
//! Replies are LF-terminated ASCII lines, optionally with a CR before the
//! LF. A line is one of:
//!
//! - a terminal reply (`OK`, `ERROR NOACK`, `ERROR`) that resolves the
//!   command in flight,
//! - an event line starting with `+`, either one of the unsolicited prefixes
//!   a protocol module registered or a plain solicited data line,
//! - free-form trace text.
//!
//! Each protocol module contributes an [`UnsolicitedTable`]; a single
//! [`classify`] serves all of them.

/// Terminal success reply.
pub const OK_MARKER: &str = "OK";

/// Terminal reply for a frame that was sent but not acknowledged.
pub const NOACK_MARKER: &str = "ERROR NOACK";

/// Terminal failure reply.
pub const ERROR_MARKER: &str = "ERROR";

/// First character of every event/data line.
pub const EVENT_MARKER: char = '+';

/// Field separator inside parameter lines. There is no escaping.
pub const SEPARATOR: char = ',';

/// End of the value header, as in `+MAC: `.
pub const HEADER_END: &str = ": ";

/// Unsolicited prefixes recognised for one protocol module.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UnsolicitedTable {
    /// Module name, used in log fields.
    pub module: &'static str,
    /// Line prefixes that mark an unsolicited event from this module.
    pub prefixes: &'static [&'static str],
    /// The prefix whose first field announces an extra send delay in ms.
    pub send_delay_prefix: Option<&'static str>,
}

/// Tag of a classified line, carried in observer notifications.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LineKind {
    Success,
    HardError,
    UnacknowledgedError,
    Unsolicited,
    /// An event-marker line that matched no unsolicited table.
    Response,
    Trace,
    Incomplete,
}

/// Result of classifying one raw line.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClassifiedLine<'a> {
    Success,
    HardError,
    UnacknowledgedError,
    Unsolicited {
        module: &'static str,
        prefix: &'static str,
        line: &'a str,
        /// Parsed delay hint when `prefix` is the module's send-delay prefix.
        send_delay_ms: Option<u32>,
    },
    Response(&'a str),
    Trace(&'a str),
    /// The raw text had no line feed.
    Incomplete,
}

impl ClassifiedLine<'_> {
    pub fn kind(&self) -> LineKind {
        match self {
            ClassifiedLine::Success => LineKind::Success,
            ClassifiedLine::HardError => LineKind::HardError,
            ClassifiedLine::UnacknowledgedError => LineKind::UnacknowledgedError,
            ClassifiedLine::Unsolicited { .. } => LineKind::Unsolicited,
            ClassifiedLine::Response(_) => LineKind::Response,
            ClassifiedLine::Trace(_) => LineKind::Trace,
            ClassifiedLine::Incomplete => LineKind::Incomplete,
        }
    }

    /// Whether the line resolves the command in flight.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            ClassifiedLine::Success
                | ClassifiedLine::HardError
                | ClassifiedLine::UnacknowledgedError
        )
    }
}

/// Remove the trailing LF and an optional CR before it.
///
/// Returns `None` when `raw` does not end in a line feed.
pub fn strip_terminator(raw: &str) -> Option<&str> {
    let line = raw.strip_suffix('\n')?;
    Some(line.strip_suffix('\r').unwrap_or(line))
}

/// Classify one raw line (terminator included).
///
/// `NOACK_MARKER` is tested before the shorter `ERROR_MARKER`. Among event
/// lines the longest matching table prefix wins.
pub fn classify<'a>(raw: &'a str, tables: &[UnsolicitedTable]) -> ClassifiedLine<'a> {
    let Some(line) = strip_terminator(raw) else {
        return ClassifiedLine::Incomplete;
    };

    if line.starts_with(OK_MARKER) {
        return ClassifiedLine::Success;
    }
    if line.starts_with(NOACK_MARKER) {
        return ClassifiedLine::UnacknowledgedError;
    }
    if line.starts_with(ERROR_MARKER) {
        return ClassifiedLine::HardError;
    }
    if !line.starts_with(EVENT_MARKER) {
        return ClassifiedLine::Trace(line);
    }

    let matched = tables
        .iter()
        .flat_map(|table| table.prefixes.iter().map(move |p| (table, *p)))
        .filter(|(_, prefix)| line.starts_with(prefix))
        .max_by_key(|(_, prefix)| prefix.len());

    match matched {
        Some((table, prefix)) => ClassifiedLine::Unsolicited {
            module: table.module,
            prefix,
            line,
            send_delay_ms: (table.send_delay_prefix == Some(prefix))
                .then(|| send_delay_hint(line))
                .flatten(),
        },
        None => ClassifiedLine::Response(line),
    }
}

/// Delay announced by a send-delay line such as `+MAC: SND,3000`.
pub fn send_delay_hint(line: &str) -> Option<u32> {
    let start = after_first_separator(line)?;
    parse_field(line, start, 0)
}

// ---------------------------------------------------------------------------
// Field extraction
// ---------------------------------------------------------------------------

/// Offset just past the value header, e.g. the `S` in `+MAC: SF7BW125,14`.
pub fn value_start(line: &str) -> Option<usize> {
    line.find(HEADER_END).map(|i| i + HEADER_END.len())
}

/// Offset just past the first separator, e.g. the `S` in
/// `+MAC: RDR,SF7BW125,14`.
pub fn after_first_separator(line: &str) -> Option<usize> {
    line.find(SEPARATOR).map(|i| i + SEPARATOR.len_utf8())
}

/// Field `n` counting from offset `start`: skip `n` separators, then take
/// everything up to the next separator or the end of the line.
///
/// Returns `None` when `start` is out of range or fewer than `n`
/// separators follow it.
pub fn field(line: &str, start: usize, n: usize) -> Option<&str> {
    let mut rest = line.get(start..)?;
    for _ in 0..n {
        let i = rest.find(SEPARATOR)?;
        rest = &rest[i + SEPARATOR.len_utf8()..];
    }
    rest.split(SEPARATOR).next()
}

/// All fields from offset `start` onwards.
pub fn fields(line: &str, start: usize) -> impl Iterator<Item = &str> {
    line.get(start..).into_iter().flat_map(|rest| rest.split(SEPARATOR))
}

/// Field `n` parsed as a number, ignoring surrounding whitespace.
pub fn parse_field<T: std::str::FromStr>(line: &str, start: usize, n: usize) -> Option<T> {
    field(line, start, n)?.trim().parse().ok()
}
