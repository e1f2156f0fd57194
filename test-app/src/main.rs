// mm002 test application -- CLI tool for exercising an MM002 modem over
// its serial AT interface, or against a scripted mock modem.
//
// Usage:
//   mm002-test-app --port /dev/ttyACM0 status
//   mm002-test-app --port /dev/ttyACM0 -v version
//   mm002-test-app --port /dev/ttyACM0 poll --ms 10000
//   mm002-test-app --port /dev/ttyACM0 lorawan-send --port 2 --payload CAFE
//   mm002-test-app --mock sigfox-send --payload 0102

use std::sync::Arc;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use tracing::debug;
use tracing_subscriber::EnvFilter;

use mm002::lorawan::DeviceClass;
use mm002::{listener, LineEvent, Modem, ModemBuilder, PayloadMode, ResultCode, SigfoxMode};
use mm002_test_harness::{MockClock, MockTransport};

// ---------------------------------------------------------------------------
// CLI argument definitions
// ---------------------------------------------------------------------------

/// mm002 test application -- exercises an MM002 modem from the command line.
#[derive(Parser)]
#[command(name = "mm002-test-app", version, about)]
struct Cli {
    /// Serial port path (e.g. /dev/ttyACM0, COM3). Required unless --mock
    /// is used.
    #[arg(long)]
    port: Option<String>,

    /// Baud rate.
    #[arg(long, default_value_t = mm002::serial::DEFAULT_BAUD_RATE)]
    baud: u32,

    /// Use a scripted mock modem instead of a real serial port.
    #[arg(long)]
    mock: bool,

    /// Log at debug level (RUST_LOG overrides).
    #[arg(short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Check that the modem answers.
    Status,

    /// Cold-reset the modem.
    Reset,

    /// Print the firmware version.
    Version,

    /// Print every line the modem sends for a while.
    Poll {
        /// How long to listen, in milliseconds.
        #[arg(long, default_value_t = 5000)]
        ms: u32,
    },

    /// Print buffered trace output.
    Traces,

    /// Join over OTAA and send one LoRaWAN uplink.
    LorawanSend {
        /// LoRaWAN port (0-99).
        #[arg(long = "port", default_value_t = 2)]
        lora_port: u8,

        /// Hex-encoded payload.
        #[arg(long)]
        payload: String,

        /// Request a confirmed uplink.
        #[arg(long)]
        ack: bool,

        /// Encrypt the payload with the application session key.
        #[arg(long)]
        encrypt: bool,
    },

    /// Send one Sigfox uplink.
    SigfoxSend {
        /// Hex-encoded payload (up to 12 bytes).
        #[arg(long)]
        payload: String,

        /// Request a downlink acknowledgement.
        #[arg(long)]
        ack: bool,

        /// Start Sigfox with the duty cycle limit disabled.
        #[arg(long)]
        no_duty_cycle: bool,
    },
}

// ---------------------------------------------------------------------------
// Modem construction
// ---------------------------------------------------------------------------

/// A mock that answers the commands `command` is going to issue.
fn scripted_mock(command: &Command) -> MockTransport {
    let mock = MockTransport::new();
    mock.expect_open();
    mock.expect(b"AT+RF=?\r\n", b"+RF: OFF\r\nOK\r\n");
    match command {
        Command::Status | Command::Poll { .. } => {}
        // Read by the link I/O task ahead of the status reply.
        Command::Traces => mock.inject(b"radio idle\r\nrx window 2\r\n"),
        Command::Reset => mock.expect(b"~K\nAT+GA=DIND,1,8401\r\n", b"OK\r\nMM002 booting\r\n"),
        Command::Version => mock.expect(b"AT+DEBUG=MVER\r\n", b"+DEBUG: MM002 mock\r\nOK\r\n"),
        Command::LorawanSend {
            lora_port,
            payload,
            ack,
            encrypt,
        } => {
            mock.expect(b"AT+MAC=RVAR\r\n", b"+MAC: 0,0,0,0\r\nOK\r\n");
            mock.expect(b"AT+MAC=RCH,,,1\r\n", b"OK\r\n");
            mock.expect(b"AT+MAC=RADR\r\n", b"+MAC: true,false\r\nOK\r\n");
            mock.expect(b"AT+MAC=RDR\r\n", b"+MAC: RDR,SF7BW125,14,0000,00,1\r\nOK\r\n");
            mock.expect(b"AT+MAC=ON,,A,1\r\n", b"OK\r\n");
            mock.expect(
                b"AT+MAC=RDR\r\n",
                b"+MAC: RDR,SF7BW125,14,0000,00,1\r\nOK\r\n+MAC: RDEVADDR,0870C367,010203\r\n",
            );
            if *encrypt {
                mock.expect(b"AT+MAC=SVAR,,,1\r\n", b"OK\r\n");
            }
            let frame = format!(
                "AT+MAC=SNDBIN,{payload},0,{lora_port},{}\r\n",
                u8::from(*ack)
            );
            mock.expect(frame.as_bytes(), b"OK\r\n");
        }
        Command::SigfoxSend {
            payload,
            ack,
            no_duty_cycle,
        } => {
            let on: &[u8] = if *no_duty_cycle {
                b"AT+SF=ON,0\r\n"
            } else {
                b"AT+SF=ON\r\n"
            };
            mock.expect(on, b"OK\r\n");
            let frame = format!("AT+SF=SNDBIN,{payload},{}\r\n", u8::from(*ack));
            mock.expect(frame.as_bytes(), b"OK\r\n");
        }
    }
    mock
}

async fn create_modem(cli: &Cli) -> Result<Modem> {
    if cli.mock {
        let mock = scripted_mock(&cli.command);
        let modem = ModemBuilder::new()
            .clock(Arc::new(MockClock::new()))
            .build_with_transport(Box::new(mock))
            .await
            .context("failed to build modem with mock transport")?;
        println!("Connected (mock transport)");
        return Ok(modem);
    }

    let port = cli
        .port
        .as_deref()
        .context("--port is required when not using --mock")?;
    let modem = ModemBuilder::new()
        .serial_port(port)
        .baud_rate(cli.baud)
        .build()
        .await
        .with_context(|| format!("failed to open {port}"))?;
    println!("Connected -- {port} at {} baud", cli.baud);
    Ok(modem)
}

fn check(what: &str, code: ResultCode) -> Result<()> {
    if code.is_success() {
        println!("{what}: {code}");
        Ok(())
    } else {
        bail!("{what} failed: {code}")
    }
}

// ---------------------------------------------------------------------------
// Commands
// ---------------------------------------------------------------------------

async fn cmd_reset(modem: &Modem) -> Result<()> {
    check("Reset", modem.reset().await?)
}

async fn cmd_version(modem: &Modem) -> Result<()> {
    match modem.firmware_version().await? {
        Some(version) => println!("Firmware: {version}"),
        None => bail!("modem did not report a firmware version"),
    }
    Ok(())
}

async fn cmd_poll(modem: &Modem, ms: u32) -> Result<()> {
    let printer = listener(|event: &LineEvent<'_>| {
        println!("{:<20} {}", format!("{:?}", event.kind), event.line);
    });
    modem.register_listener(&printer);
    println!("Listening for {ms} ms...");
    let result = modem.poll(ms).await;
    modem.unregister_listener(&printer);
    result?;
    Ok(())
}

async fn cmd_traces(modem: &Modem) -> Result<()> {
    modem.poll(500).await?;
    let mut count = 0;
    while let Some(line) = modem.read_trace_line().await {
        println!("{line}");
        count += 1;
    }
    println!("{count} trace line(s)");
    Ok(())
}

async fn cmd_lorawan_send(
    modem: &Modem,
    port: u8,
    payload: &str,
    ack: bool,
    encrypt: bool,
) -> Result<()> {
    let lorawan = modem.lorawan();
    println!("Joining (OTAA, class A)...");
    check("Join", lorawan.on(DeviceClass::A, true).await?)?;
    debug!(state = ?lorawan.state(), "joined");
    let code = lorawan
        .send_frame(PayloadMode::Binary, 0, port, payload, ack, encrypt)
        .await?;
    check("Uplink", code)
}

async fn cmd_sigfox_send(
    modem: &Modem,
    payload: &str,
    ack: bool,
    no_duty_cycle: bool,
) -> Result<()> {
    let sigfox = modem.sigfox();
    let on = if no_duty_cycle {
        sigfox.on_without_duty_cycle().await?
    } else {
        sigfox.on().await?
    };
    check("Sigfox on", on)?;
    check(
        "Uplink",
        sigfox.send_frame(SigfoxMode::Binary, payload, ack).await?,
    )
}

// ---------------------------------------------------------------------------
// Main
// ---------------------------------------------------------------------------

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let default_level = if cli.verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let modem = create_modem(&cli).await?;
    check("Init", modem.init().await?)?;

    let result = match &cli.command {
        Command::Status => Ok(()),
        Command::Reset => cmd_reset(&modem).await,
        Command::Version => cmd_version(&modem).await,
        Command::Poll { ms } => cmd_poll(&modem, *ms).await,
        Command::Traces => cmd_traces(&modem).await,
        Command::LorawanSend {
            lora_port,
            payload,
            ack,
            encrypt,
        } => cmd_lorawan_send(&modem, *lora_port, payload, *ack, *encrypt).await,
        Command::SigfoxSend {
            payload,
            ack,
            no_duty_cycle,
        } => cmd_sigfox_send(&modem, payload, *ack, *no_duty_cycle).await,
    };

    modem.close().await.ok();
    result
}
