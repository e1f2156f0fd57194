//! End-to-end command cycles against a scripted modem on simulated time.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use mm002_at_io::{
    listener, LineEvent, LineKind, LinkConfig, ListenerHandle, ModemLink, UnsolicitedTable,
    WakeConfig,
};
use mm002_core::{Clock, Command, Error, ResultCode, SystemClock, Transport, WakeLine};
use mm002_test_harness::{ControlLine, MockClock, MockTransport};

const MAC_READ_DATA_RATE: Command = Command::new(9, "AT+MAC=RDR\r\n");
const MAC_SEND: Command = Command::new(8, "AT+MAC=SND");
const RF_STATUS: Command = Command::new(3, "AT+RF=?\r\n");

const MAC_TABLE: UnsolicitedTable = UnsolicitedTable {
    module: "lorawan",
    prefixes: &["+MAC: SND,", "+MAC: RDR,", "+MAC: RDEVADDR,"],
    send_delay_prefix: Some("+MAC: SND,"),
};

type Seen = Arc<Mutex<Vec<(String, LineKind, Option<Command>)>>>;

fn config() -> LinkConfig {
    LinkConfig {
        char_delay_ms: 0,
        wake: WakeConfig {
            line: WakeLine::None,
            ..WakeConfig::default()
        },
        unsolicited: vec![MAC_TABLE],
        ..LinkConfig::default()
    }
}

fn recorder() -> (ListenerHandle, Seen) {
    let seen: Seen = Arc::new(Mutex::new(Vec::new()));
    let s = Arc::clone(&seen);
    let handle = listener(move |e: &LineEvent<'_>| {
        s.lock()
            .unwrap()
            .push((e.line.to_owned(), e.kind, e.command));
    });
    (handle, seen)
}

async fn open(mock: &MockTransport, clock: &MockClock, config: LinkConfig) -> ModemLink {
    mock.expect_open();
    let mut link = ModemLink::new(Box::new(mock.clone()), Arc::new(clock.clone()), config);
    link.open().await.unwrap();
    link
}

#[tokio::test]
async fn data_line_then_ok_resolves_success() {
    let mock = MockTransport::new();
    let clock = MockClock::new();
    let mut link = open(&mock, &clock, config()).await;
    let (handle, seen) = recorder();
    link.register_listener(&handle);

    mock.expect(
        b"AT+MAC=RDR\r\n",
        b"+MAC: RDR,SF7BW125,14,0000,00,1\r\nOK\r\n",
    );
    let code = link
        .send_command(&MAC_READ_DATA_RATE, None, 5000)
        .await
        .unwrap();

    assert_eq!(code, ResultCode::Success);
    assert_eq!(link.ongoing_command(), None);
    assert_eq!(
        *seen.lock().unwrap(),
        vec![
            (
                "+MAC: RDR,SF7BW125,14,0000,00,1".to_owned(),
                LineKind::Unsolicited,
                Some(MAC_READ_DATA_RATE)
            ),
            ("OK".to_owned(), LineKind::Success, Some(MAC_READ_DATA_RATE)),
        ]
    );
    assert_eq!(mock.remaining_expectations(), 0);
}

#[tokio::test]
async fn silence_times_out_after_the_full_window() {
    let mock = MockTransport::new();
    let clock = MockClock::new();
    let mut link = open(&mock, &clock, config()).await;

    mock.expect(b"AT+RF=?\r\n", b"");
    let start = clock.now_ms();
    let code = link.send_command(&RF_STATUS, None, 5000).await.unwrap();

    assert_eq!(code, ResultCode::NoAnswer);
    assert_eq!(clock.elapsed_since(start), 5000);
    assert_eq!(link.ongoing_command(), None);
}

#[tokio::test]
async fn timeout_across_tick_wraparound() {
    let mock = MockTransport::new();
    let clock = MockClock::starting_at(u32::MAX - 1000);
    let mut link = open(&mock, &clock, config()).await;

    mock.expect(b"AT+RF=?\r\n", b"");
    let start = clock.now_ms();
    let code = link.send_command(&RF_STATUS, None, 5000).await.unwrap();

    assert_eq!(code, ResultCode::NoAnswer);
    assert_eq!(clock.elapsed_since(start), 5000);
    assert!(clock.now_ms() < start);
}

#[tokio::test]
async fn send_delay_hint_extends_the_deadline() {
    let mock = MockTransport::new();
    let clock = MockClock::new();
    let mut link = open(&mock, &clock, config()).await;
    let (handle, seen) = recorder();
    link.register_listener(&handle);

    let args = "TXT,hello,1,2,0\r\n";
    mock.expect(format!("AT+MAC=SND{args}").as_bytes(), b"+MAC: SND,3000\r\n");
    let start = clock.now_ms();
    let code = link
        .send_command(&MAC_SEND, Some(args), 20_000)
        .await
        .unwrap();

    // 20000 plus the 3000 ms hint and the 4000 ms margin.
    assert_eq!(code, ResultCode::NoAnswer);
    assert_eq!(clock.elapsed_since(start), 27_000);
    assert_eq!(seen.lock().unwrap().len(), 1);
    assert_eq!(seen.lock().unwrap()[0].1, LineKind::Unsolicited);
}

#[tokio::test]
async fn extended_deadline_still_accepts_late_ok() {
    let mock = MockTransport::new();
    let clock = MockClock::new();
    let mut link = open(&mock, &clock, config()).await;

    // The OK arrives after the original 1000 ms but inside the extension.
    let late = mock.clone();
    let watch = clock.clone();
    let start = clock.now_ms();
    let handle = listener(move |e: &LineEvent<'_>| {
        if e.kind == LineKind::Unsolicited {
            let late = late.clone();
            let watch = watch.clone();
            tokio::spawn(async move {
                while watch.elapsed_since(start) < 1500 {
                    tokio::task::yield_now().await;
                }
                late.inject(b"OK\r\n");
            });
        }
    });
    link.register_listener(&handle);

    mock.expect(b"AT+MAC=SNDTXT,x,1,2,0\r\n", b"+MAC: SND,500\r\n");
    let code = link
        .send_command(&MAC_SEND, Some("TXT,x,1,2,0\r\n"), 1000)
        .await
        .unwrap();

    assert_eq!(code, ResultCode::Success);
    assert!(clock.elapsed_since(start) < 1000 + 500 + 4000);
}

#[tokio::test]
async fn error_resolves_generic_and_notifies_once() {
    let mock = MockTransport::new();
    let clock = MockClock::new();
    let mut link = open(&mock, &clock, config()).await;
    let (handle, seen) = recorder();
    link.register_listener(&handle);

    mock.expect(b"AT+RF=?\r\n", b"ERROR\r\n");
    let code = link.send_command(&RF_STATUS, None, 5000).await.unwrap();

    assert_eq!(code, ResultCode::GenericError);
    let seen = seen.lock().unwrap();
    let errors: Vec<_> = seen.iter().filter(|(line, ..)| line == "ERROR").collect();
    assert_eq!(errors.len(), 1);
    assert_eq!(errors[0].1, LineKind::HardError);
}

#[tokio::test]
async fn first_terminal_line_wins() {
    let mock = MockTransport::new();
    let clock = MockClock::new();
    let mut link = open(&mock, &clock, config()).await;
    let (handle, seen) = recorder();
    link.register_listener(&handle);

    mock.expect(b"AT+RF=?\r\n", b"+RF: ON\r\nERROR NOACK\r\nOK\r\n");
    let code = link.send_command(&RF_STATUS, None, 5000).await.unwrap();
    assert_eq!(code, ResultCode::UnacknowledgedError);

    // The stray OK is delivered by the next poll with no command attached.
    link.poll_link(10).await.unwrap();
    let seen = seen.lock().unwrap();
    assert_eq!(seen[0], ("+RF: ON".to_owned(), LineKind::Response, Some(RF_STATUS)));
    assert_eq!(
        seen[1],
        ("ERROR NOACK".to_owned(), LineKind::UnacknowledgedError, Some(RF_STATUS))
    );
    assert_eq!(seen[2], ("OK".to_owned(), LineKind::Success, None));
}

#[tokio::test]
async fn ongoing_slot_is_empty_after_every_outcome() {
    let mock = MockTransport::new();
    let clock = MockClock::new();
    let mut link = open(&mock, &clock, config()).await;
    let outcomes: [&[u8]; 4] = [b"OK\r\n", b"ERROR\r\n", b"ERROR NOACK\r\n", b""];

    for reply in outcomes {
        mock.expect(b"AT+RF=?\r\n", reply);
        link.send_command(&RF_STATUS, None, 200).await.unwrap();
        assert_eq!(link.ongoing_command(), None);
    }
    let oversize = "A".repeat(1000);
    link.send_command(&RF_STATUS, Some(&oversize), 200)
        .await
        .unwrap();
    assert_eq!(link.ongoing_command(), None);
}

#[tokio::test]
async fn lines_split_across_reads_are_reassembled() {
    let mock = MockTransport::new();
    mock.set_chunk_size(3);
    let clock = MockClock::new();
    let mut link = open(&mock, &clock, config()).await;
    let (handle, seen) = recorder();
    link.register_listener(&handle);

    mock.expect(
        b"AT+MAC=RDR\r\n",
        b"+MAC: RDR,SF9BW125,14,0000,00,1\r\nOK\r\n",
    );
    let code = link
        .send_command(&MAC_READ_DATA_RATE, None, 5000)
        .await
        .unwrap();
    assert_eq!(code, ResultCode::Success);
    assert_eq!(seen.lock().unwrap()[0].0, "+MAC: RDR,SF9BW125,14,0000,00,1");
}

#[tokio::test]
async fn wake_pulse_and_byte_pacing() {
    let mock = MockTransport::new();
    let clock = MockClock::new();
    let mut link = open(
        &mock,
        &clock,
        LinkConfig {
            unsolicited: vec![MAC_TABLE],
            ..LinkConfig::default()
        },
    )
    .await;

    mock.expect(b"AT+RF=?\r\n", b"OK\r\n");
    let before_calls = mock.send_calls();
    let start = clock.now_ms();
    let code = link.send_command(&RF_STATUS, None, 5000).await.unwrap();

    assert_eq!(code, ResultCode::Success);
    assert_eq!(
        mock.control_log(),
        vec![(ControlLine::Rts, true), (ControlLine::Rts, false)]
    );
    assert_eq!(mock.send_calls() - before_calls, "AT+RF=?\r\n".len());
    // 10 ms pulse, 100 ms settle and 1 ms per byte before the reply is read.
    assert!(clock.elapsed_since(start) >= 110 + 9);
}

#[tokio::test]
async fn dtr_wake_line() {
    let mock = MockTransport::new();
    let clock = MockClock::new();
    let mut link = open(
        &mock,
        &clock,
        LinkConfig {
            char_delay_ms: 0,
            wake: WakeConfig {
                line: WakeLine::Dtr,
                pulse_ms: 5,
                settle_ms: 20,
            },
            ..LinkConfig::default()
        },
    )
    .await;

    mock.expect(b"AT+RF=?\r\n", b"OK\r\n");
    link.send_command(&RF_STATUS, None, 5000).await.unwrap();
    assert_eq!(
        mock.control_log(),
        vec![(ControlLine::Dtr, true), (ControlLine::Dtr, false)]
    );
}

#[tokio::test]
async fn poll_link_forwards_unsolicited_events() {
    let mock = MockTransport::new();
    let clock = MockClock::new();
    let mut link = open(&mock, &clock, config()).await;
    let (handle, seen) = recorder();
    link.register_listener(&handle);

    mock.inject(b"+MAC: RDEVADDR,26011BDA\r\nJoin accepted\r\n");
    let start = clock.now_ms();
    link.poll_link(8000).await.unwrap();

    assert_eq!(clock.elapsed_since(start), 8000);
    assert_eq!(
        *seen.lock().unwrap(),
        vec![
            (
                "+MAC: RDEVADDR,26011BDA".to_owned(),
                LineKind::Unsolicited,
                None
            ),
            ("Join accepted".to_owned(), LineKind::Trace, None),
        ]
    );
}

#[tokio::test]
async fn trace_lines_are_buffered_for_the_application() {
    let mock = MockTransport::new();
    let clock = MockClock::new();
    let mut link = open(&mock, &clock, config()).await;

    mock.expect(b"AT+RF=?\r\n", b"[radio] idle\r\nrx window 2\nOK\r\n");
    link.send_command(&RF_STATUS, None, 5000).await.unwrap();

    assert!(link.available_traces() > 0);
    assert_eq!(link.read_trace_line().as_deref(), Some("[radio] idle"));
    let mut raw = [0u8; 64];
    let n = link.read_traces(&mut raw);
    assert_eq!(&raw[..n], b"rx window 2\n");
    assert_eq!(link.read_trace_line(), None);
}

#[tokio::test]
async fn full_trace_buffer_drops_whole_lines() {
    let mock = MockTransport::new();
    let clock = MockClock::new();
    let mut link = open(
        &mock,
        &clock,
        LinkConfig {
            trace_capacity: 16,
            ..config()
        },
    )
    .await;

    // 6 + 6 bytes fit, the 8-byte third line evicts the first.
    mock.expect(b"AT+RF=?\r\n", b"alpha\r\nbravo\r\ncharlie\r\nOK\r\n");
    link.send_command(&RF_STATUS, None, 5000).await.unwrap();

    assert_eq!(link.available_traces(), 14);
    assert_eq!(link.read_trace_line().as_deref(), Some("bravo"));
    assert_eq!(link.read_trace_line().as_deref(), Some("charlie"));
    assert_eq!(link.read_trace_line(), None);
}

#[tokio::test]
async fn over_long_line_is_dropped_and_link_recovers() {
    let mock = MockTransport::new();
    let clock = MockClock::new();
    let mut link = open(
        &mock,
        &clock,
        LinkConfig {
            max_line_len: 16,
            ..config()
        },
    )
    .await;
    let (handle, seen) = recorder();
    link.register_listener(&handle);

    let mut reply = vec![b'x'; 40];
    reply.extend_from_slice(b"\r\nOK\r\n");
    mock.expect(b"AT+RF=?\r\n", &reply);
    let code = link.send_command(&RF_STATUS, None, 5000).await.unwrap();

    // Two 16-byte blocks are discarded, the 8-byte tail frames as a trace.
    assert_eq!(code, ResultCode::Success);
    let seen = seen.lock().unwrap();
    assert_eq!(seen[0], ("xxxxxxxx".to_owned(), LineKind::Trace, Some(RF_STATUS)));
    assert_eq!(seen[1].0, "OK");
}

#[tokio::test]
async fn ring_overrun_is_counted() {
    let mock = MockTransport::new();
    let clock = MockClock::new();
    let mut link = open(
        &mock,
        &clock,
        LinkConfig {
            rx_capacity: 64,
            ..config()
        },
    )
    .await;

    mock.inject(&[b'z'; 200]);
    link.poll_link(20).await.unwrap();
    assert!(link.rx_buffer().overwritten() > 0);
}

#[tokio::test]
async fn unregistered_listener_stops_receiving() {
    let mock = MockTransport::new();
    let clock = MockClock::new();
    let mut link = open(&mock, &clock, config()).await;
    let (handle, seen) = recorder();

    assert!(link.register_listener(&handle));
    mock.expect(b"AT+RF=?\r\n", b"OK\r\n");
    link.send_command(&RF_STATUS, None, 5000).await.unwrap();

    assert!(link.unregister_listener(&handle));
    assert!(!link.unregister_listener(&handle));
    mock.expect(b"AT+RF=?\r\n", b"OK\r\n");
    link.send_command(&RF_STATUS, None, 5000).await.unwrap();

    assert_eq!(seen.lock().unwrap().len(), 1);
}

#[tokio::test]
async fn shared_link_serializes_callers() {
    let mock = MockTransport::new();
    let clock = MockClock::new();
    let link = open(&mock, &clock, config()).await.into_shared();

    mock.expect(b"AT+RF=?\r\n", b"OK\r\n");
    mock.expect(b"AT+RF=?\r\n", b"OK\r\n");

    let callers: Vec<_> = (0..2)
        .map(|_| {
            let link = Arc::clone(&link);
            tokio::spawn(async move {
                let mut link = link.lock().await;
                let code = link.send_command(&RF_STATUS, None, 5000).await;
                code
            })
        })
        .collect();
    for caller in callers {
        assert_eq!(caller.await.unwrap().unwrap(), ResultCode::Success);
    }

    assert_eq!(mock.sent_frames(), vec!["\r\n", "AT+RF=?\r\n", "AT+RF=?\r\n"]);
    assert_eq!(link.lock().await.ongoing_command(), None);
}

/// A modem whose `receive` waits out its whole window, like a UART.
#[derive(Clone, Default)]
struct SlowUart {
    state: Arc<Mutex<SlowUartState>>,
}

#[derive(Default)]
struct SlowUartState {
    partial: Vec<u8>,
    rx: Vec<u8>,
    send_times: Vec<tokio::time::Instant>,
    line_times: Vec<(tokio::time::Instant, bool)>,
}

#[async_trait::async_trait]
impl Transport for SlowUart {
    async fn send(&mut self, data: &[u8]) -> mm002_core::Result<()> {
        let mut state = self.state.lock().unwrap();
        state.send_times.push(tokio::time::Instant::now());
        state.partial.extend_from_slice(data);
        if state.partial.ends_with(b"\n") {
            if state.partial.len() > 2 {
                state.rx.extend_from_slice(b"OK\r\n");
            }
            state.partial.clear();
        }
        Ok(())
    }

    async fn receive(&mut self, buf: &mut [u8], timeout: Duration) -> mm002_core::Result<usize> {
        {
            let mut state = self.state.lock().unwrap();
            if !state.rx.is_empty() {
                let n = buf.len().min(state.rx.len());
                buf[..n].copy_from_slice(&state.rx[..n]);
                state.rx.drain(..n);
                return Ok(n);
            }
        }
        tokio::time::sleep(timeout).await;
        Err(Error::Timeout)
    }

    async fn set_dtr(&mut self, _on: bool) -> mm002_core::Result<()> {
        Ok(())
    }

    async fn set_rts(&mut self, on: bool) -> mm002_core::Result<()> {
        let now = tokio::time::Instant::now();
        self.state.lock().unwrap().line_times.push((now, on));
        Ok(())
    }

    async fn close(&mut self) -> mm002_core::Result<()> {
        Ok(())
    }

    fn is_connected(&self) -> bool {
        true
    }
}

#[tokio::test(start_paused = true)]
async fn blocking_receive_does_not_stretch_pacing() {
    let uart = SlowUart::default();
    let mut link = ModemLink::new(
        Box::new(uart.clone()),
        Arc::new(SystemClock::new()),
        LinkConfig {
            char_delay_ms: 1,
            rx_poll_interval: Duration::from_millis(10),
            wake: WakeConfig {
                line: WakeLine::Rts,
                pulse_ms: 10,
                settle_ms: 5,
            },
            unsolicited: vec![MAC_TABLE],
            ..LinkConfig::default()
        },
    );
    link.open().await.unwrap();

    let code = link
        .send_command(&MAC_READ_DATA_RATE, None, 1000)
        .await
        .unwrap();
    assert_eq!(code, ResultCode::Success);

    let state = uart.state.lock().unwrap();
    let frame_len = "AT+MAC=RDR\r\n".len();
    // The open preamble, then one call per paced byte.
    assert_eq!(state.send_times.len(), 1 + frame_len);
    let paced = &state.send_times[1..];
    for pair in paced.windows(2) {
        let gap = pair[1] - pair[0];
        assert!(gap <= Duration::from_millis(2), "inter-byte gap {gap:?}");
    }
    let span = paced[frame_len - 1] - paced[0];
    assert!(span <= Duration::from_millis(2 * frame_len as u64), "span {span:?}");

    let &[(asserted, true), (released, false)] = &state.line_times[..] else {
        panic!("unexpected RTS toggles: {:?}", state.line_times.len());
    };
    assert!(released - asserted <= Duration::from_millis(11));
}
