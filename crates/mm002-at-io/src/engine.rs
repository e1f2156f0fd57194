//! The link engine: one command in flight, replies read out of the ring.
//!
//! [`ModemLink`] owns the [`LinkIo`] task (and through it the transport),
//! the receive ring that task fills, the trace ring and the
//! [`ObserverRegistry`]. A command cycle is:
//!
//! 1. validate the frame (nothing is sent on failure),
//! 2. claim the ongoing-command slot,
//! 3. pulse the wake line,
//! 4. pace the frame out one byte at a time,
//! 5. poll the ring for lines until a terminal reply or the deadline.
//!
//! Every line read in between is classified and handed to the observers in
//! wire order. The slot is released by a guard, so it is empty again when
//! `send_command` returns by any path, including a dropped future.
//!
//! All methods take `&mut self`. Upper modules share one link as a
//! [`SharedLink`] and queue on its mutex, which keeps a second command from
//! interleaving with the first.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use bytes::{BufMut, Bytes, BytesMut};
use tracing::{debug, info, warn};

use mm002_core::clock::Clock;
use mm002_core::error::{Error, Result};
use mm002_core::transport::Transport;
use mm002_core::types::{Command, ResultCode, WakeLine};

use crate::deadline::Deadline;
use crate::io::LinkIo;
use crate::observers::{LineEvent, ListenerHandle, ObserverRegistry};
use crate::protocol::{self, ClassifiedLine, LineKind, UnsolicitedTable};
use crate::ring_buffer::RingBuffer;

/// Written once when the link opens to flush the modem's command parser.
const OPEN_PREAMBLE: &[u8] = b"\r\n";

/// Settling time after the open preamble.
const OPEN_SETTLE_MS: u32 = 2;

/// A link shared by every protocol module on one physical port.
pub type SharedLink = Arc<tokio::sync::Mutex<ModemLink>>;

/// Wake pulse issued before every command.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WakeConfig {
    /// Control line wired to the modem's wake input. `None` skips the pulse.
    pub line: WakeLine,
    /// How long the line is held asserted.
    pub pulse_ms: u32,
    /// Wait after releasing the line before the first byte is sent.
    pub settle_ms: u32,
}

impl Default for WakeConfig {
    fn default() -> Self {
        WakeConfig {
            line: WakeLine::Rts,
            pulse_ms: 10,
            settle_ms: 100,
        }
    }
}

/// Configuration for a [`ModemLink`].
#[derive(Debug, Clone)]
pub struct LinkConfig {
    /// Receive ring size in bytes (rounded up to a power of two).
    pub rx_capacity: usize,
    /// Trace ring size in bytes (rounded up to a power of two).
    pub trace_capacity: usize,
    /// Longest line, terminator included. Longer runs are dropped.
    pub max_line_len: usize,
    /// Longest command frame, wire text plus arguments.
    pub max_command_len: usize,
    /// Delay after each transmitted byte. Zero sends the frame in one write.
    pub char_delay_ms: u32,
    /// Sleep between polls of an empty ring.
    pub poll_interval_ms: u32,
    /// Window of each receive call made by the I/O task.
    pub rx_poll_interval: Duration,
    /// Wake pulse issued before every command.
    pub wake: WakeConfig,
    /// Added to every send-delay hint when extending a deadline.
    pub send_delay_margin_ms: u32,
    /// Unsolicited prefixes of every protocol module on this link.
    pub unsolicited: Vec<UnsolicitedTable>,
}

impl Default for LinkConfig {
    fn default() -> Self {
        LinkConfig {
            rx_capacity: 1024,
            trace_capacity: 1024,
            max_line_len: 256,
            max_command_len: 512,
            char_delay_ms: 1,
            poll_interval_ms: 1,
            rx_poll_interval: Duration::from_millis(10),
            wake: WakeConfig::default(),
            send_delay_margin_ms: 4000,
            unsolicited: Vec::new(),
        }
    }
}

// ---------------------------------------------------------------------------
// Ongoing command slot
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default)]
struct OngoingSlot(Arc<Mutex<Option<Command>>>);

impl OngoingSlot {
    fn lock(&self) -> MutexGuard<'_, Option<Command>> {
        self.0.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Occupy the slot until the returned guard drops.
    ///
    /// Panics if a command is already in flight.
    fn claim(&self, command: Command) -> OngoingGuard {
        let mut slot = self.lock();
        assert!(
            slot.is_none(),
            "{command} issued while {} is still in flight",
            slot.map(|c| c.to_string()).unwrap_or_default()
        );
        *slot = Some(command);
        OngoingGuard(self.clone())
    }

    fn get(&self) -> Option<Command> {
        *self.lock()
    }

    fn take(&self) -> Option<Command> {
        self.lock().take()
    }
}

struct OngoingGuard(OngoingSlot);

impl Drop for OngoingGuard {
    fn drop(&mut self) {
        self.0.take();
    }
}

// ---------------------------------------------------------------------------
// ModemLink
// ---------------------------------------------------------------------------

/// AT command engine for one serial link.
pub struct ModemLink {
    config: LinkConfig,
    /// Held here while the link is closed, owned by `io` while open.
    transport: Option<Box<dyn Transport>>,
    clock: Arc<dyn Clock>,
    rx: Arc<RingBuffer>,
    traces: RingBuffer,
    observers: Arc<ObserverRegistry>,
    ongoing: OngoingSlot,
    io: Option<LinkIo>,
    /// Overwrite count already reported.
    seen_overwritten: u64,
}

impl ModemLink {
    /// Create a closed link. Call [`open`](Self::open) before sending.
    pub fn new(transport: Box<dyn Transport>, clock: Arc<dyn Clock>, config: LinkConfig) -> Self {
        ModemLink {
            rx: Arc::new(RingBuffer::new(config.rx_capacity)),
            traces: RingBuffer::new(config.trace_capacity),
            transport: Some(transport),
            clock,
            observers: Arc::new(ObserverRegistry::new()),
            ongoing: OngoingSlot::default(),
            io: None,
            seen_overwritten: 0,
            config,
        }
    }

    /// Wrap the link for sharing between protocol modules.
    pub fn into_shared(self) -> SharedLink {
        Arc::new(tokio::sync::Mutex::new(self))
    }

    pub fn config(&self) -> &LinkConfig {
        &self.config
    }

    pub fn clock(&self) -> &Arc<dyn Clock> {
        &self.clock
    }

    pub fn observers(&self) -> &Arc<ObserverRegistry> {
        &self.observers
    }

    /// The receive ring, for inspecting fill level and overwrite counts.
    pub fn rx_buffer(&self) -> &RingBuffer {
        &self.rx
    }

    /// The command currently awaiting its reply.
    pub fn ongoing_command(&self) -> Option<Command> {
        self.ongoing.get()
    }

    pub fn register_listener(&self, handle: &ListenerHandle) -> bool {
        self.observers.register(handle)
    }

    pub fn unregister_listener(&self, handle: &ListenerHandle) -> bool {
        self.observers.unregister(handle)
    }

    /// Sleep on the link's clock.
    pub async fn sleep_ms(&self, ms: u32) {
        self.clock.sleep_ms(ms).await;
    }

    // -----------------------------------------------------------------------
    // Lifecycle
    // -----------------------------------------------------------------------

    /// Start the I/O task and flush the modem's parser.
    pub async fn open(&mut self) -> Result<()> {
        if self.is_open() {
            return Ok(());
        }
        // A task that died on an error hands its transport back.
        self.stop_io().await;

        let transport = match self.transport.take() {
            Some(t) if t.is_connected() => t,
            other => {
                self.transport = other;
                return Err(Error::NotConnected);
            }
        };
        self.rx.clear();
        self.seen_overwritten = self.rx.overwritten();
        let io = LinkIo::spawn(transport, Arc::clone(&self.rx), self.config.rx_poll_interval);

        if let Err(e) = io.send(Bytes::from_static(OPEN_PREAMBLE)).await {
            self.transport = io.stop().await;
            return Err(e);
        }
        self.io = Some(io);
        self.clock.sleep_ms(OPEN_SETTLE_MS).await;
        info!("modem link open");
        Ok(())
    }

    /// Stop the I/O task and close the transport.
    pub async fn close(&mut self) -> Result<()> {
        self.stop_io().await;
        if let Some(transport) = self.transport.as_mut() {
            transport.close().await?;
        }
        info!("modem link closed");
        Ok(())
    }

    async fn stop_io(&mut self) {
        if let Some(io) = self.io.take() {
            if let Some(transport) = io.stop().await {
                self.transport = Some(transport);
            }
        }
    }

    /// True while the I/O task is running.
    pub fn is_open(&self) -> bool {
        self.io.as_ref().is_some_and(LinkIo::is_running)
    }

    fn io(&self) -> Result<&LinkIo> {
        match &self.io {
            None => Err(Error::NotConnected),
            Some(io) if !io.is_running() => Err(Error::ConnectionLost),
            Some(io) => Ok(io),
        }
    }

    fn ensure_open(&self) -> Result<()> {
        self.io().map(|_| ())
    }

    // -----------------------------------------------------------------------
    // Command cycle
    // -----------------------------------------------------------------------

    /// Send `command` followed by `args` and wait up to `timeout_ms` for its
    /// terminal reply.
    ///
    /// Protocol outcomes, including a timeout, are returned as
    /// `Ok(ResultCode)`. `Err` means the link itself failed.
    ///
    /// # Panics
    ///
    /// If another command is still in flight on this link.
    pub async fn send_command(
        &mut self,
        command: &Command,
        args: Option<&str>,
        timeout_ms: u32,
    ) -> Result<ResultCode> {
        let Some(text) = command.wire_text() else {
            warn!("refusing to send the empty command");
            return Ok(ResultCode::ArgumentError);
        };
        let args = args.unwrap_or_default();
        let len = text.len() + args.len();
        if len > self.config.max_command_len {
            warn!(
                command = %command,
                len,
                max = self.config.max_command_len,
                "command frame too long"
            );
            return Ok(ResultCode::ArgumentError);
        }
        self.ensure_open()?;

        let _ongoing = self.ongoing.claim(*command);

        let mut frame = BytesMut::with_capacity(len);
        frame.put_slice(text.as_bytes());
        frame.put_slice(args.as_bytes());
        let frame = frame.freeze();

        self.wake().await?;
        self.transmit(frame.clone()).await?;
        debug!(
            command = %command,
            frame = %String::from_utf8_lossy(&frame).trim_end(),
            timeout_ms,
            "command sent"
        );

        self.await_response(timeout_ms).await
    }

    /// Pulse the configured control line to bring the modem out of sleep.
    async fn wake(&self) -> Result<()> {
        let WakeConfig {
            line,
            pulse_ms,
            settle_ms,
        } = self.config.wake;
        if line == WakeLine::None {
            return Ok(());
        }
        self.set_wake_line(line, true).await?;
        self.clock.sleep_ms(pulse_ms).await;
        self.set_wake_line(line, false).await?;
        self.clock.sleep_ms(settle_ms).await;
        Ok(())
    }

    async fn set_wake_line(&self, line: WakeLine, on: bool) -> Result<()> {
        self.io()?.set_line(line, on).await
    }

    /// Write `frame`, pausing `char_delay_ms` after each byte. The I/O task
    /// keeps reading in between.
    async fn transmit(&self, frame: Bytes) -> Result<()> {
        let io = self.io()?;
        let delay = self.config.char_delay_ms;
        if delay == 0 {
            return io.send(frame).await;
        }
        for i in 0..frame.len() {
            io.send(frame.slice(i..i + 1)).await?;
            self.clock.sleep_ms(delay).await;
        }
        Ok(())
    }

    /// Poll for lines until a terminal reply or until `timeout_ms` (plus any
    /// send-delay extensions) has elapsed.
    async fn await_response(&mut self, timeout_ms: u32) -> Result<ResultCode> {
        let mut deadline = Deadline::arm(self.clock.now_ms(), timeout_ms);

        loop {
            let now = self.clock.now_ms();
            if deadline.is_expired(now) {
                let command = self.ongoing.take();
                warn!(
                    command = %command.unwrap_or(Command::NONE),
                    waited_ms = deadline.elapsed(now),
                    "no answer from modem"
                );
                return Ok(ResultCode::NoAnswer);
            }

            let Some(raw) = self.next_line() else {
                self.ensure_open()?;
                self.clock.sleep_ms(self.config.poll_interval_ms).await;
                continue;
            };
            if let Some(code) = self.dispatch(&raw, Some(&mut deadline)) {
                return Ok(code);
            }
        }
    }

    /// Deliver every line that arrives during the next `duration_ms` to the
    /// observers. Terminal replies are forwarded like any other line.
    pub async fn poll_link(&mut self, duration_ms: u32) -> Result<()> {
        self.ensure_open()?;
        let mut window = Deadline::arm(self.clock.now_ms(), duration_ms);

        while !window.is_expired(self.clock.now_ms()) {
            match self.next_line() {
                Some(raw) => {
                    self.dispatch(&raw, None);
                }
                None => {
                    self.ensure_open()?;
                    self.clock.sleep_ms(self.config.poll_interval_ms).await;
                }
            }
        }
        Ok(())
    }

    /// Take the next complete line out of the receive ring, or a block of
    /// `max_line_len` bytes that cannot be part of any valid line.
    fn next_line(&mut self) -> Option<Vec<u8>> {
        let overwritten = self.rx.overwritten();
        if overwritten > self.seen_overwritten {
            warn!(
                lost = overwritten - self.seen_overwritten,
                total = overwritten,
                "receive buffer overrun"
            );
            self.seen_overwritten = overwritten;
        }

        let max = self.config.max_line_len.min(self.rx.capacity());
        if let Some(line) = self.rx.read_line(max) {
            return Some(line);
        }
        if self.rx.available() < max {
            return None;
        }
        let mut chunk = vec![0u8; max];
        let n = self.rx.peek(&mut chunk);
        if n < max || chunk.contains(&b'\n') {
            return None;
        }
        self.rx.skip(n);
        Some(chunk)
    }

    /// Classify one raw line and notify the observers.
    ///
    /// With a `deadline` (a command is awaiting its reply) a terminal line
    /// releases the ongoing slot and yields the command's result, and a
    /// send-delay hint extends the deadline.
    fn dispatch(&self, raw: &[u8], deadline: Option<&mut Deadline>) -> Option<ResultCode> {
        let text = String::from_utf8_lossy(raw);
        let classified = protocol::classify(&text, &self.config.unsolicited);
        let kind = classified.kind();

        let (line, result) = match classified {
            ClassifiedLine::Success => (protocol::OK_MARKER, ResultCode::Success),
            ClassifiedLine::HardError => (protocol::ERROR_MARKER, ResultCode::GenericError),
            ClassifiedLine::UnacknowledgedError => {
                (protocol::NOACK_MARKER, ResultCode::UnacknowledgedError)
            }
            ClassifiedLine::Unsolicited {
                module,
                line,
                send_delay_ms,
                ..
            } => {
                debug!(module, line, "unsolicited");
                if let (Some(deadline), Some(delay)) = (deadline, send_delay_ms) {
                    if delay > 0 {
                        let extra = delay.saturating_add(self.config.send_delay_margin_ms);
                        deadline.extend(extra);
                        debug!(
                            module,
                            delay_ms = delay,
                            extended_by_ms = extra,
                            "deadline extended"
                        );
                    }
                }
                self.notify(line, kind);
                return None;
            }
            ClassifiedLine::Response(line) => {
                debug!(line, "response");
                self.notify(line, kind);
                return None;
            }
            ClassifiedLine::Trace(line) => {
                debug!(line, "trace");
                self.store_trace(line);
                self.notify(line, kind);
                return None;
            }
            ClassifiedLine::Incomplete => {
                warn!(len = raw.len(), "discarding over-long line");
                return None;
            }
        };

        match deadline {
            Some(_) => {
                let command = self.ongoing.take();
                debug!(command = %command.unwrap_or(Command::NONE), reply = line, "command done");
                self.observers.notify_all(&LineEvent {
                    line,
                    kind,
                    command,
                });
                Some(result)
            }
            None => {
                debug!(reply = line, "terminal reply with no command in flight");
                self.notify(line, kind);
                None
            }
        }
    }

    fn notify(&self, line: &str, kind: LineKind) {
        self.observers.notify_all(&LineEvent {
            line,
            kind,
            command: self.ongoing.get(),
        });
    }

    // -----------------------------------------------------------------------
    // Trace buffer
    // -----------------------------------------------------------------------

    /// Append one trace line, evicting the oldest whole lines to make room,
    /// so the trace ring never holds a partial line.
    fn store_trace(&self, line: &str) {
        let needed = line.len() + 1;
        if needed > self.traces.capacity() {
            warn!(len = line.len(), "trace line larger than the trace buffer");
            return;
        }
        let mut evicted = 0;
        while self.traces.capacity() - self.traces.available() < needed {
            if self.traces.read_line(self.traces.capacity()).is_none() {
                self.traces.clear();
            }
            evicted += 1;
        }
        if evicted > 0 {
            debug!(evicted, "trace buffer full, dropped oldest lines");
        }
        self.traces.write(line.as_bytes());
        self.traces.write(b"\n");
    }

    /// Bytes of trace text waiting to be read.
    pub fn available_traces(&self) -> usize {
        self.traces.available()
    }

    /// Oldest buffered trace line without its terminator.
    ///
    /// When the buffer fills up the oldest lines are dropped whole, so this
    /// only returns complete lines unless [`read_traces`](Self::read_traces)
    /// stopped partway through one.
    pub fn read_trace_line(&self) -> Option<String> {
        let line = self.traces.read_line(self.traces.capacity())?;
        let text = String::from_utf8_lossy(&line);
        Some(text.trim_end_matches(['\r', '\n']).to_owned())
    }

    /// Raw trace bytes, lines separated by `\n`.
    pub fn read_traces(&self, buf: &mut [u8]) -> usize {
        self.traces.read(buf)
    }
}

impl std::fmt::Debug for ModemLink {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ModemLink")
            .field("open", &self.is_open())
            .field("ongoing", &self.ongoing.get())
            .field("rx", &self.rx)
            .field("observers", &self.observers)
            .finish_non_exhaustive()
    }
}
