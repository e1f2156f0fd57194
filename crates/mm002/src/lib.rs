//! # mm002 -- async driver for the Nemeus MM002 radio modem
//!
//! `mm002` talks to the MM002 LoRaWAN/Sigfox module over its serial AT
//! interface. Commands are paced onto the wire one byte at a time after a
//! wake pulse, replies are read back as lines, and anything else the modem
//! says (unsolicited events, debug traces) is handed to listeners in the
//! order it arrived.
//!
//! ## Quick Start
//!
//! ```no_run
//! use mm002::{ModemBuilder, PayloadMode, ResultCode};
//! use mm002::lorawan::DeviceClass;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let modem = ModemBuilder::new()
//!         .serial_port("/dev/ttyACM0")
//!         .build()
//!         .await?;
//!     modem.init().await?;
//!
//!     let lorawan = modem.lorawan();
//!     if lorawan.on(DeviceClass::A, true).await? == ResultCode::Success {
//!         lorawan.send_frame(PayloadMode::Binary, 0, 2, "CAFE", false, false).await?;
//!     }
//!     Ok(())
//! }
//! ```
//!
//! ## Architecture
//!
//! | Crate                | Purpose                                          |
//! |----------------------|--------------------------------------------------|
//! | `mm002-core`         | [`Transport`] and [`Clock`] traits, types, errors |
//! | `mm002-transport`    | Serial port transport                            |
//! | `mm002-at-io`        | Ring buffer, line classifier, command engine     |
//! | `mm002-modem`        | Command catalog, protocol modules, [`Modem`]     |
//! | **`mm002`**          | This facade crate -- re-exports everything       |
//!
//! ## Results and errors
//!
//! Every command returns `Result<ResultCode>`. `Err` means the link itself
//! failed (port gone, link not open). The modem's verdict, including "no
//! answer before the deadline", is the [`ResultCode`].

pub use mm002_core::*;

pub use mm002_modem::{
    DeviceClass, LoRaWan, LoRaWanState, MacChannel, MacDataRate, Modem, ModemBuilder, Modulation,
    PayloadMode, Personalization, Radio, RxParams, Sigfox, SigfoxMode, TxParams,
};

/// The command/response engine and its building blocks.
pub mod at_io {
    pub use mm002_at_io::*;
}

/// Serial transport.
pub mod serial {
    pub use mm002_transport::*;
}

/// AT command catalog.
pub mod commands {
    pub use mm002_modem::commands::*;
}

/// LoRaWAN MAC module.
pub mod lorawan {
    pub use mm002_modem::lorawan::*;
}

/// Sigfox module.
pub mod sigfox {
    pub use mm002_modem::sigfox::*;
}

/// Raw radio module.
pub mod radio {
    pub use mm002_modem::radio::*;
}

pub use mm002_at_io::{listener, LineEvent, LineKind, LineListener, LinkConfig, ListenerHandle, WakeConfig};
