//! MTP Session Library
//!
//! A host-side client for MTP devices (Android phones, media players,
//! cameras) built on libmtp. It finds attached devices, opens a session to
//! one of them, and lists, uploads, downloads and deletes objects.
//!
//! # Architecture
//!
//! The library is organized into the following modules:
//!
//! - [`core`] - Configuration, the error taxonomy and file type classification
//! - [`device`] - Discovery, sessions and object operations over the
//!   [`device::MtpEngine`] seam
//! - [`cli`] - Command-line interface (only used by the binary)
//! - [`testdb`] - In-memory engine with simulated devices for testing
//!
//! # Example Usage
//!
//! ```rust,no_run
//! use mtp_session::core::config::Config;
//! use mtp_session::device::{detect_devices, LibMtp, ParentId, Session, PRIMARY_STORAGE};
//!
//! fn main() -> anyhow::Result<()> {
//!     let config = Config::load_default()?;
//!     let engine = LibMtp::shared(config.engine.library_path())?;
//!     let options = config.session_options();
//!
//!     let detected = detect_devices(engine.as_ref(), &options.limits)?;
//!     if let Some(descriptor) = detected.devices.first() {
//!         let mut session = Session::open(engine.clone(), descriptor.clone(), options)?;
//!         for entry in session.list_files_and_folders(PRIMARY_STORAGE, ParentId::Root)? {
//!             println!("{:?}", entry.filename);
//!         }
//!         session.disconnect()?;
//!     }
//!
//!     Ok(())
//! }
//! ```
//!
//! # Testing Without a Device
//!
//! [`testdb::MockEngine`] implements the engine trait in memory, tracks
//! every record it hands out, and can be told to fail individual calls.
//!
//! # Platform Support
//!
//! libmtp is loaded at runtime, so the crate builds anywhere. Talking to a
//! real device needs libmtp on a Unix-like system.

pub mod cli;
pub mod core;
pub mod device;
pub mod testdb;

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Library name
pub const NAME: &str = env!("CARGO_PKG_NAME");
