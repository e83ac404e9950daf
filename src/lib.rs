//! # wmbusmeters - a wireless M-Bus receiver for utility meters
//!
//! Long-running receiver for wireless M-Bus (EN 13757-4) telegrams from
//! residential water, heat, electricity and heat cost allocator meters. A
//! radio dongle (or a replay file) feeds raw frames into a single-threaded
//! event loop; each frame is parsed, dispatched to the configured meters by
//! address, decrypted with the meter's AES-128 key when one is set, decoded
//! by the meter family and printed as human readable text, separated fields
//! or JSON.
//!
//! ## Pipeline
//!
//! ```text
//! dongle -> raw frame -> Telegram -> per-meter address filter
//!        -> decrypt -> family decoder -> Reading -> Printer
//!        -> stdout | meter file | shell hooks
//! ```
//!
//! ## Usage
//!
//! ```no_run
//! use clap::Parser;
//! use wmbusmeters::{app, config};
//!
//! #[tokio::main(flavor = "current_thread")]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let cli = config::Cli::parse();
//!     let configuration = config::Configuration::from_cli(&cli)?;
//!     wmbusmeters::logging::init(configuration.verbosity, None)?;
//!     app::run(configuration).await?;
//!     Ok(())
//! }
//! ```

pub mod app;
pub mod config;
pub mod device;
pub mod error;
pub mod link_mode;
pub mod logging;
pub mod manager;
pub mod meters;
pub mod printer;
pub mod telegram;
pub mod units;
pub mod util;

pub use error::MetersError;
pub use link_mode::LinkModeSet;
pub use manager::{SerialManager, SourceEvent, StopHandle};
pub use meters::{family_by_name, Meter, MeterInfo, Reading, FAMILIES};
pub use printer::{MeterFileAction, OutputFormat, Printer};
pub use telegram::Telegram;
pub use units::{convert, Unit};
