//! MM002 AT command catalog.
//!
//! Each command carries the fixed text that starts its frame. Commands that
//! take no arguments already end in CRLF; the others end at the point where
//! the argument text is appended (usually right after a `,` or `=`).

use mm002_core::Command;

// ---------------------------------------------------------------
// Device
// ---------------------------------------------------------------

/// Cold reset. The leading `~K\n` flushes a half-typed command.
pub const RESET_COLD: Command = Command::new(4, "~K\nAT+GA=DIND,1,8401\r\n");
/// Verbose trace output, followed by `ON\r\n` or `OFF\r\n`.
pub const AT_TRACE: Command = Command::new(5, "AT+DEBUG=MV");
/// Power saving, followed by `01\r\n` or `00\r\n`.
pub const AT_POWER_SET: Command = Command::new(20, "AT+GA=DIND,1,8802");
pub const RF_STATUS: Command = Command::new(3, "AT+RF=?\r\n");
/// Firmware version query.
pub const DEBUG_MVER: Command = Command::new(59, "AT+DEBUG=MVER\r\n");

// ---------------------------------------------------------------
// LoRaWAN MAC
// ---------------------------------------------------------------

pub const MAC_ON: Command = Command::new(0, "AT+MAC=ON,");
pub const MAC_OFF: Command = Command::new(1, "AT+MAC=OFF\r\n");
pub const MAC_STATUS: Command = Command::new(2, "AT+MAC=?\r\n");
pub const MAC_SEND: Command = Command::new(8, "AT+MAC=SND");
pub const MAC_READ_DATA_RATE: Command = Command::new(9, "AT+MAC=RDR\r\n");
pub const MAC_SET_DATA_RATE: Command = Command::new(10, "AT+MAC=SDR,");
pub const MAC_SET_CHANNEL: Command = Command::new(11, "AT+MAC=SCH,");
pub const MAC_READ_CHANNEL: Command = Command::new(12, "AT+MAC=RCH,");
pub const MAC_READ_ADR: Command = Command::new(13, "AT+MAC=RADR\r\n");
pub const MAC_SET_ADR: Command = Command::new(14, "AT+MAC=SADR,");
pub const MAC_READ_VAR: Command = Command::new(15, "AT+MAC=RVAR\r\n");
pub const MAC_SET_VAR: Command = Command::new(16, "AT+MAC=SVAR,");
pub const MAC_READ_DEVUID: Command = Command::new(17, "AT+MAC=RDEVUID\r\n");
pub const MAC_READ_DEVADDR: Command = Command::new(18, "AT+MAC=RDEVADDR\r\n");
pub const MAC_SET_DEVADDR: Command = Command::new(19, "AT+MAC=SDEVADDR,");
pub const MAC_READ_APPKEY: Command = Command::new(21, "AT+MAC=RAPPKEY\r\n");
pub const MAC_SET_APPKEY: Command = Command::new(22, "AT+MAC=SAPPKEY,");
pub const MAC_READ_APPUID: Command = Command::new(23, "AT+MAC=RAPPUID\r\n");
pub const MAC_SET_APPUID: Command = Command::new(24, "AT+MAC=SAPPUID,");
pub const MAC_READ_APPSKEY: Command = Command::new(25, "AT+MAC=RAPPSKEY\r\n");
pub const MAC_READ_NWKSKEY: Command = Command::new(26, "AT+MAC=RNSKEY\r\n");

// ---------------------------------------------------------------
// Sigfox
// ---------------------------------------------------------------

pub const SIGFOX_ON: Command = Command::new(30, "AT+SF=ON");
pub const SIGFOX_OFF: Command = Command::new(31, "AT+SF=OFF\r\n");
pub const SIGFOX_SEND: Command = Command::new(32, "AT+SF=SND");

// ---------------------------------------------------------------
// Raw radio
// ---------------------------------------------------------------

pub const RF_TX_SNDBIN: Command = Command::new(6, "AT+RFTX=SNDBIN,");
pub const RF_TX_SET_STATE: Command = Command::new(7, "AT+RF=");
pub const RADIO_ON: Command = Command::new(50, "AT+RF=ON\r\n");
pub const RADIO_OFF: Command = Command::new(51, "AT+RF=OFF\r\n");
pub const RADIO_SET_RX_PARAM: Command = Command::new(52, "AT+RFRX=SET,");
pub const RADIO_SET_TX_PARAM: Command = Command::new(53, "AT+RFTX=SET,");
pub const RADIO_SEND_FRAME: Command = Command::new(54, "AT+RFTX=SND");
pub const RADIO_CONTINUOUS_RX: Command = Command::new(55, "AT+RFRX=CONTRX\r\n");
pub const RADIO_STOP_RX: Command = Command::new(56, "AT+RFRX=STOP\r\n");
pub const RADIO_CONTINUOUS_TX: Command = Command::new(57, "AT+RFTX=START\r\n");
pub const RADIO_STOP_TX: Command = Command::new(58, "AT+RFTX=STOP\r\n");

/// The "no command" sentinel. Sending it yields `ArgumentError`.
pub const NO_COMMAND: Command = Command::NONE;

/// Every catalog entry except [`NO_COMMAND`].
pub const ALL: &[Command] = &[
    MAC_ON,
    MAC_OFF,
    MAC_STATUS,
    RF_STATUS,
    RESET_COLD,
    AT_TRACE,
    RF_TX_SNDBIN,
    RF_TX_SET_STATE,
    MAC_SEND,
    MAC_READ_DATA_RATE,
    MAC_SET_DATA_RATE,
    MAC_SET_CHANNEL,
    MAC_READ_CHANNEL,
    MAC_READ_ADR,
    MAC_SET_ADR,
    MAC_READ_VAR,
    MAC_SET_VAR,
    MAC_READ_DEVUID,
    MAC_READ_DEVADDR,
    MAC_SET_DEVADDR,
    AT_POWER_SET,
    MAC_READ_APPKEY,
    MAC_SET_APPKEY,
    MAC_READ_APPUID,
    MAC_SET_APPUID,
    MAC_READ_APPSKEY,
    MAC_READ_NWKSKEY,
    SIGFOX_ON,
    SIGFOX_OFF,
    SIGFOX_SEND,
    RADIO_ON,
    RADIO_OFF,
    RADIO_SET_RX_PARAM,
    RADIO_SET_TX_PARAM,
    RADIO_SEND_FRAME,
    RADIO_CONTINUOUS_RX,
    RADIO_STOP_RX,
    RADIO_CONTINUOUS_TX,
    RADIO_STOP_TX,
    DEBUG_MVER,
];

/// Look up a catalog command by opcode.
pub fn by_opcode(opcode: u8) -> Option<Command> {
    ALL.iter().copied().find(|c| c.opcode() == opcode)
}
