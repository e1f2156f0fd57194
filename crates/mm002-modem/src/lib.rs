//! mm002-modem: protocol modules and device facade for the Nemeus MM002.
//!
//! Everything here is built on the command/response engine in
//! `mm002-at-io`. The modules add the AT command catalog, argument
//! framing and the state each radio technology keeps between commands.
//!
//! - [`commands`] -- the static command catalog
//! - [`args`] -- bounded argument builder
//! - [`lorawan`] -- LoRaWAN MAC control and session tracking
//! - [`sigfox`] -- Sigfox uplinks
//! - [`radio`] -- raw LoRa/FSK radio
//! - [`modem`] -- [`Modem`], device commands and module access
//! - [`builder`] -- [`ModemBuilder`]

pub mod args;
pub mod builder;
pub mod commands;
mod link;
pub mod lorawan;
pub mod modem;
pub mod radio;
pub mod sigfox;

pub use args::PayloadMode;
pub use builder::ModemBuilder;
pub use lorawan::{DeviceClass, LoRaWan, LoRaWanState, MacChannel, MacDataRate, Personalization};
pub use modem::Modem;
pub use radio::{Modulation, Radio, RxParams, TxParams};
pub use sigfox::{Sigfox, SigfoxMode};

use mm002_at_io::UnsolicitedTable;

/// Unsolicited prefix tables of every protocol module.
pub fn unsolicited_tables() -> Vec<UnsolicitedTable> {
    vec![lorawan::TABLE, sigfox::TABLE, radio::TABLE]
}
