//! LoRaWAN MAC control.
//!
//! [`LoRaWan`] drives the `AT+MAC=` command family and keeps a copy of the
//! MAC session state. The copy is maintained by a listener on the shared
//! link: solicited replies are interpreted according to the command in
//! flight, and the `RDEVADDR`, `RDR` and `SND` unsolicited events update it
//! at any time. The most important of these is the device address that
//! arrives once an OTAA join succeeds.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tracing::{debug, info, warn};

use mm002_at_io::protocol::{self, UnsolicitedTable};
use mm002_at_io::{listener, LineEvent, LineKind, ListenerHandle, ObserverRegistry, SharedLink};
use mm002_core::{Command, Result, ResultCode};

use crate::args::{self, ArgBuilder, PayloadMode};
use crate::commands;
use crate::link::{self, CONFIG_TIMEOUT_MS, SEND_TIMEOUT_MS};

const MAC_PREFIX: &str = "+MAC:";
const SEND_UNSOL: &str = "+MAC: SND,";
const RDR_UNSOL: &str = "+MAC: RDR,";
const RDEVADDR_UNSOL: &str = "+MAC: RDEVADDR,";

/// Unsolicited `+MAC:` events.
pub const TABLE: UnsolicitedTable = UnsolicitedTable {
    module: "lorawan",
    prefixes: &[
        SEND_UNSOL,
        "+MAC: RCH,",
        "+MAC: RCVBIN,",
        "+MAC: RCVTXT,",
        "+MAC: SCH,",
        RDR_UNSOL,
        "+MAC: SDR,",
        "+MAC: RTI,",
        "+MAC: STI,",
        "+MAC: RRX,",
        "+MAC: RVAR,",
        RDEVADDR_UNSOL,
    ],
    send_delay_prefix: Some(SEND_UNSOL),
};

/// Join polling: rounds, and the length of each round.
const JOIN_ROUNDS: usize = 60;
const JOIN_POLL_MS: u32 = 8000;

const MAX_REPETITION: u8 = 99;
const MAX_PORT: u8 = 99;

const DEV_ADDR_LEN: usize = 8;
const APP_UID_LEN: usize = 16;
const APP_KEY_LEN: usize = 32;

/// LoRaWAN device class.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum DeviceClass {
    #[default]
    A,
    B,
    C,
}

impl DeviceClass {
    pub fn as_str(self) -> &'static str {
        match self {
            DeviceClass::A => "A",
            DeviceClass::B => "B",
            DeviceClass::C => "C",
        }
    }
}

/// MAC data rate settings, as read with `RDR` or written with `SDR`.
///
/// Empty strings and `None` mean "not known" when read and "leave
/// unchanged" when written.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MacDataRate {
    /// Data rate name, e.g. `SF7BW125`.
    pub data_rate: String,
    pub tx_power: Option<u8>,
    pub channel_mask: String,
    pub channel_mask_ctrl: String,
    pub nb_repetition: Option<u8>,
}

impl MacDataRate {
    /// Parse the five data rate fields starting at `start`.
    pub fn parse(line: &str, start: usize) -> Self {
        let text = |n| {
            protocol::field(line, start, n)
                .map(|f| f.trim().to_owned())
                .unwrap_or_default()
        };
        MacDataRate {
            data_rate: text(0),
            tx_power: protocol::parse_field(line, start, 1),
            channel_mask: text(2),
            channel_mask_ctrl: text(3),
            nb_repetition: protocol::parse_field(line, start, 4),
        }
    }

    /// Largest application payload in bytes (FOpts not included), or 0 for
    /// an unknown data rate.
    pub fn max_payload_size(&self) -> usize {
        match self.data_rate.as_str() {
            "SF12BW125" | "SF11BW125" | "SF10BW125" => 51,
            "SF9BW125" => 115,
            "SF8BW125" | "SF7BW125" | "SF7BW250" | "FSK50KBPS" => 242,
            _ => 0,
        }
    }

    fn push_args(&self, args: &mut ArgBuilder) {
        args.push_str(&self.data_rate).push_separator();
        if let Some(power) = self.tx_power {
            args.push_number(power);
        }
        args.push_field(&self.channel_mask)
            .push_field(&self.channel_mask_ctrl)
            .push_separator();
        if let Some(n) = self.nb_repetition {
            args.push_number(n);
        }
    }
}

/// One channel definition for `SCH`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MacChannel {
    pub channel: u8,
    pub page: u8,
    pub frequency_hz: Option<u32>,
    pub min_data_rate: Option<String>,
    pub max_data_rate: Option<String>,
    pub duty_cycle: Option<u8>,
}

impl MacChannel {
    fn push_args(&self, args: &mut ArgBuilder) {
        args.push_number(self.channel).push_separator();
        if let Some(freq) = self.frequency_hz {
            args.push_number(freq);
        }
        args.push_separator();
        if let Some(dr) = &self.min_data_rate {
            args.push_str(dr);
        }
        args.push_separator();
        if let Some(dr) = &self.max_data_rate {
            args.push_str(dr);
        }
        args.push_separator();
        if let Some(dc) = self.duty_cycle {
            args.push_number(dc);
        }
        args.push_separator().push_number(self.page);
    }
}

/// Device identity and session keys, hex strings as the modem prints them.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Personalization {
    pub dev_uid: String,
    pub app_uid: String,
    pub app_key: String,
    pub dev_addr: String,
    pub app_skey: String,
    pub nwk_skey: String,
}

impl Personalization {
    /// True once the device address is a non-zero hex number, which is how
    /// a completed OTAA join shows up.
    pub fn has_dev_addr(&self) -> bool {
        let digits: String = self
            .dev_addr
            .chars()
            .take_while(char::is_ascii_hexdigit)
            .take(DEV_ADDR_LEN)
            .collect();
        u32::from_str_radix(&digits, 16).is_ok_and(|addr| addr != 0)
    }
}

/// Which [`Personalization`] entry a read refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Key {
    DevUid,
    AppUid,
    AppKey,
    DevAddr,
    AppSKey,
    NwkSKey,
}

impl Key {
    fn read_command(self) -> Command {
        match self {
            Key::DevUid => commands::MAC_READ_DEVUID,
            Key::AppUid => commands::MAC_READ_APPUID,
            Key::AppKey => commands::MAC_READ_APPKEY,
            Key::DevAddr => commands::MAC_READ_DEVADDR,
            Key::AppSKey => commands::MAC_READ_APPSKEY,
            Key::NwkSKey => commands::MAC_READ_NWKSKEY,
        }
    }

    fn for_read(command: Command) -> Option<Key> {
        [
            Key::DevUid,
            Key::AppUid,
            Key::AppKey,
            Key::DevAddr,
            Key::AppSKey,
            Key::NwkSKey,
        ]
        .into_iter()
        .find(|k| k.read_command() == command)
    }

    fn slot(self, p: &mut Personalization) -> &mut String {
        match self {
            Key::DevUid => &mut p.dev_uid,
            Key::AppUid => &mut p.app_uid,
            Key::AppKey => &mut p.app_key,
            Key::DevAddr => &mut p.dev_addr,
            Key::AppSKey => &mut p.app_skey,
            Key::NwkSKey => &mut p.nwk_skey,
        }
    }
}

/// Snapshot of what the modem last reported about the MAC layer.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LoRaWanState {
    pub mac_on: bool,
    pub otaa: bool,
    pub adr: bool,
    pub piggyback: bool,
    pub encryption: bool,
    pub data_rate: MacDataRate,
    pub personalization: Personalization,
}

#[derive(Debug, Default)]
struct Tracked {
    state: LoRaWanState,
    /// Join request delay announced while `MAC_ON` was in flight.
    sending_delay_ms: u32,
}

fn lock(tracked: &Mutex<Tracked>) -> MutexGuard<'_, Tracked> {
    tracked.lock().unwrap_or_else(PoisonError::into_inner)
}

fn is_true(value: &str) -> bool {
    value.trim().eq_ignore_ascii_case("true")
}

/// Update `tracked` from one line seen on the link.
fn track(tracked: &mut Tracked, event: &LineEvent<'_>) {
    let line = event.line;
    if !line.starts_with(MAC_PREFIX) {
        return;
    }

    let state = &mut tracked.state;
    if event.kind == LineKind::Unsolicited {
        if line.starts_with(RDEVADDR_UNSOL) {
            // +MAC: RDEVADDR,0870C367,010203
            if let Some(addr) = protocol::after_first_separator(line)
                .and_then(|start| protocol::field(line, start, 0))
            {
                debug!(dev_addr = addr, "device address received");
                state.personalization.dev_addr = addr.trim().to_owned();
            }
        } else if line.starts_with(RDR_UNSOL) {
            if let Some(start) = protocol::after_first_separator(line) {
                state.data_rate = MacDataRate::parse(line, start);
            }
        } else if line.starts_with(SEND_UNSOL) && event.command == Some(commands::MAC_ON) {
            if let Some(delay) = protocol::send_delay_hint(line) {
                debug!(delay_ms = delay, "join request delayed");
                tracked.sending_delay_ms = delay;
            }
        }
        return;
    }

    let (Some(command), Some(start)) = (event.command, protocol::value_start(line)) else {
        return;
    };
    let field = |n| protocol::field(line, start, n).map(str::trim);

    match command {
        commands::MAC_READ_ADR => {
            state.adr = field(0).is_some_and(is_true);
            state.piggyback = field(1).is_some_and(is_true);
        }
        commands::MAC_READ_DATA_RATE => {
            state.data_rate = MacDataRate::parse(line, start);
        }
        commands::MAC_STATUS => {
            state.mac_on = matches!(field(0), Some("ON" | "DUAL"));
            // Fields 1-4 are version, class, page count and ISM band.
            state.otaa = protocol::parse_field::<u8>(line, start, 5) == Some(1);
        }
        commands::MAC_READ_VAR => {
            // Fields 0-2 are the tx, rx and aggregated duty cycle counters.
            state.encryption = protocol::parse_field::<u8>(line, start, 3) == Some(1);
        }
        other => {
            if let (Some(key), Some(value)) = (Key::for_read(other), field(0)) {
                *key.slot(&mut state.personalization) = value.to_owned();
            }
        }
    }
}

/// LoRaWAN protocol module.
///
/// Dropping it unregisters its listener from the link.
pub struct LoRaWan {
    link: SharedLink,
    observers: Arc<ObserverRegistry>,
    handle: ListenerHandle,
    tracked: Arc<Mutex<Tracked>>,
}

impl LoRaWan {
    /// Attach to `link`, whose observers are `observers`.
    pub fn new(link: SharedLink, observers: Arc<ObserverRegistry>) -> Self {
        let tracked = Arc::new(Mutex::new(Tracked::default()));
        let state = Arc::clone(&tracked);
        let handle = listener(move |event: &LineEvent<'_>| track(&mut lock(&state), event));
        observers.register(&handle);
        LoRaWan {
            link,
            observers,
            handle,
            tracked,
        }
    }

    fn tracked(&self) -> MutexGuard<'_, Tracked> {
        lock(&self.tracked)
    }

    pub fn state(&self) -> LoRaWanState {
        self.tracked().state.clone()
    }

    pub fn is_on(&self) -> bool {
        self.tracked().state.mac_on
    }

    pub fn is_otaa(&self) -> bool {
        self.tracked().state.otaa
    }

    pub fn data_rate(&self) -> MacDataRate {
        self.tracked().state.data_rate.clone()
    }

    async fn send(&self, command: Command, args: Option<&str>) -> Result<ResultCode> {
        link::exchange(&self.link, &command, args, CONFIG_TIMEOUT_MS).await
    }

    /// Start the MAC in `class`, joining over the air when `otaa` is set.
    ///
    /// Encryption, ADR and data rate are read and unsolicited channel
    /// events enabled first; the first of these that fails ends the
    /// sequence with its result. An OTAA join that produces no device
    /// address within 60 rounds of 8 s yields `GenericError`.
    pub async fn on(&self, class: DeviceClass, otaa: bool) -> Result<ResultCode> {
        self.tracked().state.otaa = otaa;

        let code = self.prepare().await?;
        if code != ResultCode::Success {
            warn!(%code, "MAC start aborted");
            return Ok(code);
        }
        self.tracked().sending_delay_ms = 0;

        let mut args = ArgBuilder::new();
        args.push_separator()
            .push_str(class.as_str())
            .push_separator()
            .push_bool_flag(otaa);
        let code = self.send(commands::MAC_ON, Some(&args.finish())).await?;
        if code != ResultCode::Success {
            return Ok(code);
        }

        let code = self.read_data_rate().await?;
        if code != ResultCode::Success {
            warn!(%code, "data rate unknown after MAC start");
        }

        if otaa && !self.await_join().await? {
            warn!(rounds = JOIN_ROUNDS, "OTAA join timed out");
            return Ok(ResultCode::GenericError);
        }

        self.tracked().state.mac_on = true;
        info!(class = class.as_str(), otaa, "LoRaWAN MAC on");
        Ok(ResultCode::Success)
    }

    async fn prepare(&self) -> Result<ResultCode> {
        let code = self.read_encryption().await?;
        if code != ResultCode::Success {
            return Ok(code);
        }
        let code = self.enable_unsolicited().await?;
        if code != ResultCode::Success {
            return Ok(code);
        }
        let code = self.read_adr().await?;
        if code != ResultCode::Success {
            return Ok(code);
        }
        self.read_data_rate().await
    }

    /// Poll the link until the join shows up as a device address.
    async fn await_join(&self) -> Result<bool> {
        for round in 0..JOIN_ROUNDS {
            loop {
                let delay = std::mem::take(&mut self.tracked().sending_delay_ms);
                if delay == 0 {
                    break;
                }
                link::poll(&self.link, delay).await?;
            }
            link::poll(&self.link, JOIN_POLL_MS).await?;

            if self.tracked().state.personalization.has_dev_addr() {
                debug!(round, "OTAA join complete");
                return Ok(true);
            }
        }
        Ok(false)
    }

    /// Stop the MAC. After an OTAA session the device address is forgotten.
    pub async fn off(&self) -> Result<ResultCode> {
        let code = self.send(commands::MAC_OFF, None).await?;
        if code == ResultCode::Success {
            let mut tracked = self.tracked();
            tracked.state.mac_on = false;
            if tracked.state.otaa {
                tracked.state.personalization.dev_addr.clear();
            }
            info!("LoRaWAN MAC off");
        }
        Ok(code)
    }

    /// Ask the modem whether the MAC is running. Also refreshes the OTAA
    /// flag.
    pub async fn read_mac_status(&self) -> Result<bool> {
        let code = self.send(commands::MAC_STATUS, None).await?;
        let mut tracked = self.tracked();
        if code != ResultCode::Success {
            tracked.state.mac_on = false;
            tracked.state.otaa = false;
        }
        Ok(tracked.state.mac_on)
    }

    pub async fn read_data_rate(&self) -> Result<ResultCode> {
        self.send(commands::MAC_READ_DATA_RATE, None).await
    }

    pub async fn set_data_rate(&self, data_rate: &MacDataRate) -> Result<ResultCode> {
        let mut args = ArgBuilder::new();
        data_rate.push_args(&mut args);
        let code = self
            .send(commands::MAC_SET_DATA_RATE, Some(&args.finish()))
            .await?;
        if code == ResultCode::Success && !data_rate.data_rate.is_empty() {
            self.tracked().state.data_rate = data_rate.clone();
        }
        Ok(code)
    }

    pub async fn set_channel(&self, channel: &MacChannel) -> Result<ResultCode> {
        let mut args = ArgBuilder::new();
        channel.push_args(&mut args);
        self.send(commands::MAC_SET_CHANNEL, Some(&args.finish()))
            .await
    }

    /// Read one channel definition. With `unsolicited` set the modem also
    /// reports later changes as `+MAC: RCH,` events.
    pub async fn read_channel(&self, channel: u8, page: u8, unsolicited: bool) -> Result<ResultCode> {
        let mut args = ArgBuilder::new();
        args.push_number(channel)
            .push_separator()
            .push_number(page)
            .push_separator()
            .push_bool_flag(unsolicited);
        self.send(commands::MAC_READ_CHANNEL, Some(&args.finish()))
            .await
    }

    /// Turn on unsolicited channel events for all channels.
    pub async fn enable_unsolicited(&self) -> Result<ResultCode> {
        let mut args = ArgBuilder::new();
        args.push_separator().push_separator().push_bool_flag(true);
        self.send(commands::MAC_READ_CHANNEL, Some(&args.finish()))
            .await
    }

    pub async fn read_adr(&self) -> Result<ResultCode> {
        self.send(commands::MAC_READ_ADR, None).await
    }

    /// Enable or disable adaptive data rate, optionally with piggybacked
    /// MAC commands.
    pub async fn set_adr(&self, adr: bool, piggyback: Option<bool>) -> Result<ResultCode> {
        let flag = |b: bool| if b { "true" } else { "false" };
        let mut args = ArgBuilder::new();
        args.push_str(flag(adr));
        if let Some(p) = piggyback {
            args.push_field(flag(p));
        }
        let code = self.send(commands::MAC_SET_ADR, Some(&args.finish())).await?;
        if code == ResultCode::Success {
            let mut tracked = self.tracked();
            tracked.state.adr = adr;
            if let Some(p) = piggyback {
                tracked.state.piggyback = p;
            }
        }
        Ok(code)
    }

    pub async fn read_encryption(&self) -> Result<ResultCode> {
        self.send(commands::MAC_READ_VAR, None).await
    }

    pub async fn set_encryption(&self, encrypt: bool) -> Result<ResultCode> {
        let mut args = ArgBuilder::new();
        args.push_separator().push_separator().push_bool_flag(encrypt);
        let code = self.send(commands::MAC_SET_VAR, Some(&args.finish())).await?;
        if code == ResultCode::Success {
            self.tracked().state.encryption = encrypt;
        }
        Ok(code)
    }

    async fn read_key(&self, key: Key) -> Result<Option<String>> {
        let code = self.send(key.read_command(), None).await?;
        let mut tracked = self.tracked();
        let value = key.slot(&mut tracked.state.personalization);
        if code != ResultCode::Success {
            value.clear();
        }
        Ok((!value.is_empty()).then(|| value.clone()))
    }

    /// Device address, or `None` if the read failed or none is assigned.
    pub async fn read_dev_addr(&self) -> Result<Option<String>> {
        self.read_key(Key::DevAddr).await
    }

    pub async fn read_dev_uid(&self) -> Result<Option<String>> {
        self.read_key(Key::DevUid).await
    }

    pub async fn read_app_uid(&self) -> Result<Option<String>> {
        self.read_key(Key::AppUid).await
    }

    pub async fn read_app_key(&self) -> Result<Option<String>> {
        self.read_key(Key::AppKey).await
    }

    pub async fn read_app_skey(&self) -> Result<Option<String>> {
        self.read_key(Key::AppSKey).await
    }

    pub async fn read_nwk_skey(&self) -> Result<Option<String>> {
        self.read_key(Key::NwkSKey).await
    }

    /// Refresh the MAC status and the device identity in one go.
    ///
    /// DEVUID, APPUID and APPKEY are always read. Outside an OTAA session
    /// the ABP address and session keys are read as well. A key whose read
    /// fails comes back empty.
    pub async fn read_dev_perso(&self) -> Result<Personalization> {
        self.read_mac_status().await?;
        for key in [Key::DevUid, Key::AppUid, Key::AppKey] {
            self.read_key(key).await?;
        }
        if self.is_otaa() {
            return Ok(self.tracked().state.personalization.clone());
        }
        self.read_abp_perso().await
    }

    /// Read the ABP device address and both session keys.
    pub async fn read_abp_perso(&self) -> Result<Personalization> {
        for key in [Key::DevAddr, Key::NwkSKey, Key::AppSKey] {
            self.read_key(key).await?;
        }
        Ok(self.tracked().state.personalization.clone())
    }

    async fn set_key(&self, key: Key, command: Command, value: &str, len: usize) -> Result<ResultCode> {
        if !args::is_hex(value, len) {
            warn!(?key, len, "expected a hex string of fixed length");
            return Ok(ResultCode::ArgumentError);
        }
        let mut args = ArgBuilder::new();
        args.push_str(value);
        let code = self.send(command, Some(&args.finish())).await?;
        if code == ResultCode::Success {
            *key.slot(&mut self.tracked().state.personalization) = value.to_owned();
        }
        Ok(code)
    }

    /// Set the ABP device address (8 hex digits).
    pub async fn set_dev_addr(&self, dev_addr: &str) -> Result<ResultCode> {
        self.set_key(Key::DevAddr, commands::MAC_SET_DEVADDR, dev_addr, DEV_ADDR_LEN)
            .await
    }

    /// Set the OTAA application EUI (16 hex digits).
    pub async fn set_app_uid(&self, app_uid: &str) -> Result<ResultCode> {
        self.set_key(Key::AppUid, commands::MAC_SET_APPUID, app_uid, APP_UID_LEN)
            .await
    }

    /// Set the OTAA application key (32 hex digits).
    pub async fn set_app_key(&self, app_key: &str) -> Result<ResultCode> {
        self.set_key(Key::AppKey, commands::MAC_SET_APPKEY, app_key, APP_KEY_LEN)
            .await
    }

    /// Largest payload in bytes at the current data rate, reading the data
    /// rate first if it is not known yet. 0 means unknown.
    pub async fn max_payload_size(&self) -> Result<usize> {
        if self.tracked().state.data_rate.data_rate.is_empty() {
            let code = self.read_data_rate().await?;
            if code != ResultCode::Success {
                warn!(%code, "could not read data rate");
            }
        }
        Ok(self.tracked().state.data_rate.max_payload_size())
    }

    /// Send an uplink frame on `port`.
    ///
    /// Payload encryption is switched first if `encrypt` differs from the
    /// last known setting, and a failed switch is returned as is. A payload
    /// longer than the data rate allows is cut (hex payloads to twice the
    /// byte limit) and a successful send then reports
    /// `PayloadTruncatedWarning`.
    pub async fn send_frame(
        &self,
        mode: PayloadMode,
        repetition: u8,
        port: u8,
        payload: &str,
        ack: bool,
        encrypt: bool,
    ) -> Result<ResultCode> {
        if repetition > MAX_REPETITION || port > MAX_PORT {
            warn!(repetition, port, "repetition and port must be at most 99");
            return Ok(ResultCode::ArgumentError);
        }
        if !args::is_plain_field(payload) {
            warn!("payload contains a separator or line terminator");
            return Ok(ResultCode::ArgumentError);
        }
        if self.tracked().state.encryption != encrypt {
            let code = self.set_encryption(encrypt).await?;
            if code != ResultCode::Success {
                warn!(%code, encrypt, "could not switch payload encryption");
                return Ok(code);
            }
        }
        let max = self.max_payload_size().await?;
        if max == 0 {
            warn!("no usable data rate, cannot size the payload");
            return Ok(ResultCode::ArgumentError);
        }

        let mut args = ArgBuilder::new();
        args.push_str(mode.tag()).push_separator();
        let truncated = args.push_truncated(payload, mode.max_chars(max));
        args.push_separator()
            .push_number(repetition)
            .push_separator()
            .push_number(port)
            .push_separator()
            .push_bool_flag(ack);
        if args.overflowed() {
            return Ok(ResultCode::ArgumentError);
        }
        if truncated {
            warn!(len = payload.len(), max, "payload truncated");
        }

        let code =
            link::exchange(&self.link, &commands::MAC_SEND, Some(&args.finish()), SEND_TIMEOUT_MS)
                .await?;
        Ok(link::with_truncation(code, truncated))
    }
}

impl Drop for LoRaWan {
    fn drop(&mut self) {
        self.observers.unregister(&self.handle);
    }
}

impl std::fmt::Debug for LoRaWan {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LoRaWan")
            .field("state", &self.tracked().state)
            .finish_non_exhaustive()
    }
}
