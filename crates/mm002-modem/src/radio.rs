//! Raw LoRa/FSK radio access, bypassing the LoRaWAN MAC.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tracing::{info, warn};

use mm002_at_io::{SharedLink, UnsolicitedTable};
use mm002_core::{Command, Result, ResultCode};

use crate::args::{self, ArgBuilder, PayloadMode};
use crate::commands;
use crate::link::{self, CONFIG_TIMEOUT_MS, SEND_TIMEOUT_MS};

pub const TABLE: UnsolicitedTable = UnsolicitedTable {
    module: "radio",
    prefixes: &["+RFTX:", "+RFRX:"],
    send_delay_prefix: None,
};

/// Largest raw radio payload in bytes.
pub const MAX_PAYLOAD: usize = 248;

/// Modulation selected with the radio's parameter command.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Modulation {
    /// LoRa chirp spread spectrum.
    Lora,
    /// Frequency shift keying.
    Fsk,
}

impl Modulation {
    pub fn as_str(self) -> &'static str {
        match self {
            Modulation::Lora => "LORA",
            Modulation::Fsk => "FSK",
        }
    }
}

/// Receiver settings. `None` fields are left unchanged by the modem.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RxParams {
    /// LoRa or FSK.
    pub modulation: Option<Modulation>,
    /// Carrier frequency in Hz.
    pub frequency_hz: Option<u32>,
    /// Channel bandwidth setting.
    pub bandwidth: Option<u32>,
    /// Data rate setting.
    pub data_rate: Option<u32>,
    /// LoRa coding rate.
    pub code_rate: Option<u8>,
}

/// Transmitter settings. `None` fields are left unchanged by the modem.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TxParams {
    /// LoRa or FSK.
    pub modulation: Option<Modulation>,
    /// Carrier frequency in Hz.
    pub frequency_hz: Option<u32>,
    /// Output power in dBm.
    pub tx_power: Option<u8>,
    /// Channel bandwidth setting.
    pub bandwidth: Option<u32>,
    /// Data rate setting.
    pub data_rate: Option<u32>,
    /// LoRa coding rate.
    pub code_rate: Option<u8>,
}

fn push_opt<T: std::fmt::Display>(args: &mut ArgBuilder, value: Option<T>) {
    if let Some(v) = value {
        args.push_number(v);
    }
}

impl RxParams {
    fn push_args(&self, args: &mut ArgBuilder) {
        if let Some(m) = self.modulation {
            args.push_str(m.as_str());
        }
        args.push_separator();
        push_opt(args, self.frequency_hz);
        args.push_separator();
        push_opt(args, self.bandwidth);
        args.push_separator();
        push_opt(args, self.data_rate);
        args.push_separator();
        push_opt(args, self.code_rate);
    }
}

impl TxParams {
    fn push_args(&self, args: &mut ArgBuilder) {
        if let Some(m) = self.modulation {
            args.push_str(m.as_str());
        }
        args.push_separator();
        push_opt(args, self.frequency_hz);
        args.push_separator();
        push_opt(args, self.tx_power);
        args.push_separator();
        push_opt(args, self.bandwidth);
        args.push_separator();
        push_opt(args, self.data_rate);
        args.push_separator();
        push_opt(args, self.code_rate);
    }
}

/// Raw radio protocol module.
#[derive(Debug, Clone)]
pub struct Radio {
    link: SharedLink,
    continuous_rx: Arc<AtomicBool>,
    continuous_tx: Arc<AtomicBool>,
}

impl Radio {
    pub fn new(link: SharedLink) -> Self {
        Radio {
            link,
            continuous_rx: Arc::new(AtomicBool::new(false)),
            continuous_tx: Arc::new(AtomicBool::new(false)),
        }
    }

    async fn send(&self, command: Command, args: Option<&str>) -> Result<ResultCode> {
        link::exchange(&self.link, &command, args, CONFIG_TIMEOUT_MS).await
    }

    pub async fn on(&self) -> Result<ResultCode> {
        let code = self.send(commands::RADIO_ON, None).await?;
        if code == ResultCode::Success {
            info!("radio on");
        }
        Ok(code)
    }

    pub async fn off(&self) -> Result<ResultCode> {
        self.send(commands::RADIO_OFF, None).await
    }

    pub fn max_payload_size(&self) -> usize {
        MAX_PAYLOAD
    }

    /// Transmit one frame `repetitions` times.
    pub async fn send_frame(
        &self,
        mode: PayloadMode,
        payload: &str,
        repetitions: u16,
    ) -> Result<ResultCode> {
        if !args::is_plain_field(payload) {
            warn!("payload contains a separator or line terminator");
            return Ok(ResultCode::ArgumentError);
        }
        let mut args = ArgBuilder::new();
        args.push_str(mode.tag()).push_separator();
        let truncated = args.push_truncated(payload, mode.max_chars(MAX_PAYLOAD));
        args.push_separator().push_number(repetitions);
        if truncated {
            warn!(len = payload.len(), "payload truncated");
        }

        let code = link::exchange(
            &self.link,
            &commands::RADIO_SEND_FRAME,
            Some(&args.finish()),
            SEND_TIMEOUT_MS,
        )
        .await?;
        Ok(link::with_truncation(code, truncated))
    }

    async fn switch(&self, command: Command, flag: &AtomicBool, on: bool) -> Result<ResultCode> {
        let code = self.send(command, None).await?;
        if code == ResultCode::Success {
            flag.store(on, Ordering::Release);
        }
        Ok(code)
    }

    /// Listen continuously. Received frames arrive as `+RFRX:` events.
    pub async fn start_continuous_rx(&self) -> Result<ResultCode> {
        self.switch(commands::RADIO_CONTINUOUS_RX, &self.continuous_rx, true)
            .await
    }

    pub async fn stop_continuous_rx(&self) -> Result<ResultCode> {
        self.switch(commands::RADIO_STOP_RX, &self.continuous_rx, false)
            .await
    }

    /// Transmit an unmodulated carrier until stopped.
    pub async fn start_continuous_tx(&self) -> Result<ResultCode> {
        self.switch(commands::RADIO_CONTINUOUS_TX, &self.continuous_tx, true)
            .await
    }

    pub async fn stop_continuous_tx(&self) -> Result<ResultCode> {
        self.switch(commands::RADIO_STOP_TX, &self.continuous_tx, false)
            .await
    }

    pub fn is_continuous_rx(&self) -> bool {
        self.continuous_rx.load(Ordering::Acquire)
    }

    pub fn is_continuous_tx(&self) -> bool {
        self.continuous_tx.load(Ordering::Acquire)
    }

    pub async fn set_rx_params(&self, params: &RxParams) -> Result<ResultCode> {
        let mut args = ArgBuilder::new();
        params.push_args(&mut args);
        self.send(commands::RADIO_SET_RX_PARAM, Some(&args.finish()))
            .await
    }

    pub async fn set_tx_params(&self, params: &TxParams) -> Result<ResultCode> {
        let mut args = ArgBuilder::new();
        params.push_args(&mut args);
        self.send(commands::RADIO_SET_TX_PARAM, Some(&args.finish()))
            .await
    }
}
