//! Error types for the MTP session layer
//!
//! Two layers live here:
//!
//! - [`ErrorCode`] - the engine's numeric status enumeration, decoded into a
//!   closed set with an `Unknown` catch-all for codes newer engines may add
//! - [`MtpError`] - the failure type returned by every fallible operation

use serde::Serialize;
use std::fmt;
use std::path::PathBuf;
use thiserror::Error;

use crate::device::types::ErrorRecord;

/// Status codes reported by the MTP engine (`LIBMTP_error_number_t`)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum ErrorCode {
    /// The call completed
    Success,
    /// Generic engine failure
    GeneralFailure,
    /// PTP layer rejected or failed the request
    ProtocolLayerFailure,
    /// USB transport failure
    TransportLayerFailure,
    /// The engine could not allocate memory
    OutOfMemory,
    /// No device is attached to the bus
    NoDeviceAttached,
    /// A storage reported itself full
    StorageFull,
    /// The engine is busy connecting to a device
    AlreadyConnecting,
    /// The operation was cancelled
    Cancelled,
    /// A code this crate does not know about
    UnknownCode(i32),
}

impl ErrorCode {
    /// Decode a raw engine status
    pub fn from_raw(code: i32) -> Self {
        match code {
            0 => ErrorCode::Success,
            1 => ErrorCode::GeneralFailure,
            2 => ErrorCode::ProtocolLayerFailure,
            3 => ErrorCode::TransportLayerFailure,
            4 => ErrorCode::OutOfMemory,
            5 => ErrorCode::NoDeviceAttached,
            6 => ErrorCode::StorageFull,
            7 => ErrorCode::AlreadyConnecting,
            8 => ErrorCode::Cancelled,
            other => ErrorCode::UnknownCode(other),
        }
    }

    /// The raw engine value for this code
    pub fn raw(&self) -> i32 {
        match self {
            ErrorCode::Success => 0,
            ErrorCode::GeneralFailure => 1,
            ErrorCode::ProtocolLayerFailure => 2,
            ErrorCode::TransportLayerFailure => 3,
            ErrorCode::OutOfMemory => 4,
            ErrorCode::NoDeviceAttached => 5,
            ErrorCode::StorageFull => 6,
            ErrorCode::AlreadyConnecting => 7,
            ErrorCode::Cancelled => 8,
            ErrorCode::UnknownCode(code) => *code,
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, ErrorCode::Success)
    }

    /// Short upper-case name, matching the engine's own constant names
    pub fn name(&self) -> &'static str {
        match self {
            ErrorCode::Success => "NONE",
            ErrorCode::GeneralFailure => "GENERAL",
            ErrorCode::ProtocolLayerFailure => "PTP_LAYER",
            ErrorCode::TransportLayerFailure => "USB_LAYER",
            ErrorCode::OutOfMemory => "MEMORY_ALLOCATION",
            ErrorCode::NoDeviceAttached => "NO_DEVICE_ATTACHED",
            ErrorCode::StorageFull => "STORAGE_FULL",
            ErrorCode::AlreadyConnecting => "CONNECTING",
            ErrorCode::Cancelled => "CANCELLED",
            ErrorCode::UnknownCode(_) => "UNKNOWN",
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ErrorCode::UnknownCode(code) => write!(f, "UNKNOWN({})", code),
            other => f.write_str(other.name()),
        }
    }
}

/// Main error type for the MTP session layer
#[derive(Error, Debug)]
pub enum MtpError {
    /// `connect` was called on a session that already holds a device
    #[error("Already connected to a device")]
    AlreadyConnected,

    /// The operation needs an open device and the session has none
    #[error("Not connected to a device")]
    NotConnected,

    /// The engine could not open the requested device
    #[error("No device connected. Check the USB cable and unlock the device.")]
    NoDeviceConnected,

    /// The requested object (or device descriptor) does not exist
    #[error("Object not found")]
    ObjectNotFound,

    /// No object on the device at this path
    #[error("No such path on the device: {0}")]
    PathNotFound(String),

    /// A path component that must be a folder is a file
    #[error("Not a folder on the device: {0}")]
    NotAFolder(String),

    /// A local transfer source is missing
    #[error("Local file not found: {}", .0.display())]
    FileNotFound(PathBuf),

    /// A foreign list or tree was cyclic or exceeded the traversal bounds
    #[error("Malformed data from device engine: {0}")]
    MalformedForeignData(String),

    /// A foreign text field was not valid UTF-8
    #[error("Invalid UTF-8 in field '{field}': {source}")]
    Encoding {
        field: &'static str,
        #[source]
        source: std::str::Utf8Error,
    },

    /// The device reported a failure for a command
    #[error("Device command failed: {operation}{}", describe_records(.errors))]
    CommandFailed {
        operation: &'static str,
        errors: Vec<ErrorRecord>,
    },

    /// Discovery failed with the given engine status
    #[error("Device engine error: {0}")]
    Engine(ErrorCode),

    /// The engine returned a status code this crate does not recognise
    #[error("Unknown engine status code: {0}")]
    UnknownCode(i32),

    /// The MTP engine library could not be loaded
    #[error("libmtp is not available: {0}")]
    LibraryUnavailable(String),

    /// An argument cannot be passed to the engine (e.g. interior NUL byte)
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    /// General I/O error
    #[error("IO error: {0}")]
    IoError(String),
}

impl MtpError {
    /// Build the failure for a non-success discovery status
    pub fn from_status(code: ErrorCode) -> Self {
        match code {
            ErrorCode::UnknownCode(raw) => MtpError::UnknownCode(raw),
            other => MtpError::Engine(other),
        }
    }

    pub fn command_failed(operation: &'static str) -> Self {
        MtpError::CommandFailed {
            operation,
            errors: Vec::new(),
        }
    }

    /// Returns true if the same call may succeed when the caller retries it.
    ///
    /// Nothing in this crate retries on its own.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            MtpError::Engine(
                ErrorCode::TransportLayerFailure
                    | ErrorCode::ProtocolLayerFailure
                    | ErrorCode::AlreadyConnecting
            )
        )
    }
}

fn describe_records(errors: &[ErrorRecord]) -> String {
    match errors.first() {
        Some(first) if errors.len() == 1 => format!(" ({})", first),
        Some(first) => format!(" ({} and {} more)", first, errors.len() - 1),
        None => String::new(),
    }
}

/// Result type alias for convenience
pub type Result<T> = std::result::Result<T, MtpError>;

impl From<std::io::Error> for MtpError {
    fn from(err: std::io::Error) -> Self {
        MtpError::IoError(err.to_string())
    }
}
