//! Test Database Module
//!
//! An in-memory MTP engine that lets every session operation run without a
//! device or libmtp installed. The CLI uses it for `--simulate`, and the
//! unit tests of the device layer use it throughout.
//!
//! ```rust
//! use mtp_session::device::{detect_devices, AdapterLimits, Session};
//! use mtp_session::testdb::MockEngine;
//! use std::sync::Arc;
//!
//! let engine = Arc::new(MockEngine::demo());
//! let detected = detect_devices(engine.as_ref(), &AdapterLimits::default()).unwrap();
//! let mut session = Session::with_descriptor(engine.clone(), detected.devices[0].clone());
//! session.connect().unwrap();
//! assert!(!session.list_storage().unwrap().is_empty());
//! session.disconnect().unwrap();
//! assert_eq!(engine.live_allocations(), 0);
//! ```

pub mod mock_engine;

pub use mock_engine::{MockDevice, MockEngine, MockObject, MockStorage};
