//! # Meshbackup - golden preferences backup for Meshtastic devices
//!
//! Connects to a Meshtastic device over serial, asks its firmware to back up the current
//! preferences to the SD card, waits for the request to flush, and disconnects. Whether the
//! backup succeeded is checked by hand: reboot the device and read its log.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! # #[cfg(feature = "serial")]
//! # {
//! use meshbackup::config::Config;
//! use meshbackup::meshtastic::SerialOpener;
//! use meshbackup::runner::BackupCommandRunner;
//!
//! #[tokio::main(flavor = "current_thread")]
//! async fn main() {
//!     let config = Config::default();
//!     let runner = BackupCommandRunner::new(SerialOpener::new(config.link_settings()))
//!         .with_settle_delay(config.settle_delay());
//!     let code = runner
//!         .run_to_exit_code(&config.resolve_port(None), &mut std::io::stdout())
//!         .await;
//!     std::process::exit(code);
//! }
//! # }
//! ```
//!
//! ## Module Organization
//!
//! - [`runner`] - the backup run and its single error type
//! - [`admin`] - the SD-card backup admin payload
//! - [`meshtastic`] - serial device link, handshake and framing
//! - [`config`] - optional TOML configuration and defaults
//! - [`protobuf`] - generated Meshtastic protobuf types
//! - [`logutil`] - log sanitising helpers

pub mod admin;
pub mod config;
pub mod logutil;
pub mod meshtastic;
pub mod protobuf;
pub mod runner;
