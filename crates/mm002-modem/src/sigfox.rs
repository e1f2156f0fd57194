//! Sigfox uplinks.

use tracing::{info, warn};

use mm002_at_io::{SharedLink, UnsolicitedTable};
use mm002_core::{Result, ResultCode};

use crate::args::{self, ArgBuilder};
use crate::commands;
use crate::link::{self, CONFIG_TIMEOUT_MS, SEND_TIMEOUT_MS};

const SEND_UNSOL: &str = "+SF: SND,";

pub const TABLE: UnsolicitedTable = UnsolicitedTable {
    module: "sigfox",
    prefixes: &[SEND_UNSOL],
    send_delay_prefix: Some(SEND_UNSOL),
};

/// Largest Sigfox payload in bytes.
pub const MAX_PAYLOAD: usize = 12;

/// Frame type of a Sigfox send.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SigfoxMode {
    /// Up to 12 bytes, hex encoded.
    Binary,
    /// A single bit, sent as `0` or `1`.
    Bit,
    /// Out-of-band keep-alive frame with no payload.
    OutOfBand,
}

/// Sigfox protocol module.
#[derive(Debug, Clone)]
pub struct Sigfox {
    link: SharedLink,
}

impl Sigfox {
    pub fn new(link: SharedLink) -> Self {
        Sigfox { link }
    }

    pub async fn on(&self) -> Result<ResultCode> {
        self.start(ArgBuilder::new(), true).await
    }

    /// Start Sigfox with the modem's duty cycle limit lifted.
    pub async fn on_without_duty_cycle(&self) -> Result<ResultCode> {
        let mut args = ArgBuilder::new();
        args.push_separator().push_number(0);
        self.start(args, false).await
    }

    async fn start(&self, args: ArgBuilder, duty_cycle: bool) -> Result<ResultCode> {
        let code = link::exchange(
            &self.link,
            &commands::SIGFOX_ON,
            Some(&args.finish()),
            CONFIG_TIMEOUT_MS,
        )
        .await?;
        if code == ResultCode::Success {
            info!(duty_cycle, "Sigfox on");
        }
        Ok(code)
    }

    pub async fn off(&self) -> Result<ResultCode> {
        link::exchange(&self.link, &commands::SIGFOX_OFF, None, CONFIG_TIMEOUT_MS).await
    }

    pub fn max_payload_size(&self) -> usize {
        MAX_PAYLOAD
    }

    /// Send one uplink. `payload` is ignored for out-of-band frames.
    pub async fn send_frame(&self, mode: SigfoxMode, payload: &str, ack: bool) -> Result<ResultCode> {
        if !args::is_plain_field(payload) {
            warn!("payload contains a separator or line terminator");
            return Ok(ResultCode::ArgumentError);
        }

        let mut args = ArgBuilder::new();
        let truncated = match mode {
            SigfoxMode::Binary => {
                args.push_str("BIN").push_separator();
                let cut = args.push_truncated(payload, 2 * MAX_PAYLOAD);
                args.push_separator().push_bool_flag(ack);
                cut
            }
            SigfoxMode::Bit => {
                args.push_str("BIT").push_separator();
                let cut = args.push_truncated(payload, 1);
                args.push_separator().push_bool_flag(ack);
                cut
            }
            SigfoxMode::OutOfBand => {
                args.push_str("OOB");
                false
            }
        };
        if truncated {
            warn!(len = payload.len(), ?mode, "payload truncated");
        }

        let code = link::exchange(
            &self.link,
            &commands::SIGFOX_SEND,
            Some(&args.finish()),
            SEND_TIMEOUT_MS,
        )
        .await?;
        Ok(link::with_truncation(code, truncated))
    }
}
