//! Modem -- device-level operations and access to the protocol modules.
//!
//! One [`Modem`] owns the shared link to one MM002. Device commands (reset,
//! power saving, verbose traces, firmware version) live here; the LoRaWAN,
//! Sigfox and raw radio modules are reached through [`Modem::lorawan`],
//! [`Modem::sigfox`] and [`Modem::radio`], and queue on the same link.

use std::sync::{Arc, Mutex, PoisonError};

use tracing::{debug, info};

use mm002_at_io::{
    listener, LineEvent, LineKind, ListenerHandle, ModemLink, ObserverRegistry, SharedLink,
};
use mm002_core::{Command, Result, ResultCode};

use crate::args::ArgBuilder;
use crate::commands;
use crate::link::{self, CONFIG_TIMEOUT_MS};
use crate::lorawan::LoRaWan;
use crate::radio::Radio;
use crate::sigfox::Sigfox;

/// Timeout for status, reset and version queries.
const DEVICE_TIMEOUT_MS: u32 = 5000;

/// Time the modem needs to come back after a cold reset.
const RESET_RECOVERY_MS: u32 = 1000;

/// A connected MM002 modem.
///
/// Constructed via [`ModemBuilder`](crate::builder::ModemBuilder). Call
/// [`init`](Self::init) before anything else.
pub struct Modem {
    link: SharedLink,
    observers: Arc<ObserverRegistry>,
    lorawan: LoRaWan,
    sigfox: Sigfox,
    radio: Radio,
}

impl Modem {
    pub fn new(link: ModemLink) -> Self {
        let observers = Arc::clone(link.observers());
        let link = link.into_shared();
        Modem {
            lorawan: LoRaWan::new(Arc::clone(&link), Arc::clone(&observers)),
            sigfox: Sigfox::new(Arc::clone(&link)),
            radio: Radio::new(Arc::clone(&link)),
            link,
            observers,
        }
    }

    /// The shared link, for issuing catalog commands directly.
    pub fn link(&self) -> &SharedLink {
        &self.link
    }

    pub fn lorawan(&self) -> &LoRaWan {
        &self.lorawan
    }

    pub fn sigfox(&self) -> &Sigfox {
        &self.sigfox
    }

    pub fn radio(&self) -> &Radio {
        &self.radio
    }

    /// Open the link and check that the modem answers.
    pub async fn init(&self) -> Result<ResultCode> {
        let mut link = self.link.lock().await;
        link.open().await?;
        let code = link
            .send_command(&commands::RF_STATUS, None, DEVICE_TIMEOUT_MS)
            .await?;
        info!(%code, "modem initialised");
        Ok(code)
    }

    /// Cold-reset the modem and wait for it to restart.
    pub async fn reset(&self) -> Result<ResultCode> {
        let mut link = self.link.lock().await;
        link.open().await?;
        let code = link
            .send_command(&commands::RESET_COLD, None, DEVICE_TIMEOUT_MS)
            .await?;
        link.sleep_ms(RESET_RECOVERY_MS).await;
        info!(%code, "modem reset");
        Ok(code)
    }

    pub async fn close(&self) -> Result<()> {
        self.link.lock().await.close().await
    }

    pub async fn is_open(&self) -> bool {
        self.link.lock().await.is_open()
    }

    async fn switch(&self, command: Command, value: &str) -> Result<ResultCode> {
        let mut args = ArgBuilder::new();
        args.push_str(value);
        link::exchange(&self.link, &command, Some(&args.finish()), CONFIG_TIMEOUT_MS).await
    }

    pub async fn set_power_saving(&self, enabled: bool) -> Result<ResultCode> {
        self.switch(commands::AT_POWER_SET, if enabled { "01" } else { "00" })
            .await
    }

    /// Turn the modem's verbose trace output on or off.
    pub async fn set_verbose(&self, enabled: bool) -> Result<ResultCode> {
        self.switch(commands::AT_TRACE, if enabled { "ON" } else { "OFF" })
            .await
    }

    /// Ask for the firmware version. Returns the first reply line, or
    /// `None` if the modem did not answer `OK`.
    pub async fn firmware_version(&self) -> Result<Option<String>> {
        let reply: Arc<Mutex<Option<String>>> = Arc::default();
        let slot = Arc::clone(&reply);
        let capture = listener(move |event: &LineEvent<'_>| {
            if event.command == Some(commands::DEBUG_MVER)
                && matches!(event.kind, LineKind::Response | LineKind::Trace)
            {
                slot.lock()
                    .unwrap_or_else(PoisonError::into_inner)
                    .get_or_insert_with(|| event.line.to_owned());
            }
        });

        self.observers.register(&capture);
        let code = link::exchange(&self.link, &commands::DEBUG_MVER, None, DEVICE_TIMEOUT_MS).await;
        self.observers.unregister(&capture);

        if code? != ResultCode::Success {
            return Ok(None);
        }
        let version = reply.lock().unwrap_or_else(PoisonError::into_inner).take();
        debug!(?version, "firmware version");
        Ok(version)
    }

    /// Hand everything the modem sends during `duration_ms` to the
    /// listeners.
    pub async fn poll(&self, duration_ms: u32) -> Result<()> {
        link::poll(&self.link, duration_ms).await
    }

    /// Bytes of trace text waiting to be read.
    pub async fn available_traces(&self) -> usize {
        self.link.lock().await.available_traces()
    }

    pub async fn read_trace_line(&self) -> Option<String> {
        self.link.lock().await.read_trace_line()
    }

    pub async fn read_traces(&self, buf: &mut [u8]) -> usize {
        self.link.lock().await.read_traces(buf)
    }

    /// Register a listener for every line the modem sends. Returns `false`
    /// if it was already registered.
    pub fn register_listener(&self, handle: &ListenerHandle) -> bool {
        self.observers.register(handle)
    }

    pub fn unregister_listener(&self, handle: &ListenerHandle) -> bool {
        self.observers.unregister(handle)
    }
}

impl std::fmt::Debug for Modem {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Modem")
            .field("lorawan", &self.lorawan)
            .field("listeners", &self.observers.len())
            .finish_non_exhaustive()
    }
}
