//! Core functionality module
//!
//! Configuration, the error taxonomy and the file type classifier used by
//! the device layer.
//!
//! # Submodules
//!
//! - `config` - Configuration loading, saving, and management
//! - `error` - Engine error codes, error types and result aliases
//! - `filetype` - MTP file type codes and extension-based classification

pub mod config;
pub mod error;
pub mod filetype;
