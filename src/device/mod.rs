//! Device interaction module
//!
//! This module talks to MTP devices through libmtp.
//!
//! # Submodules
//!
//! - `sys` - `#[repr(C)]` mirrors of the libmtp records
//! - `engine` - The [`MtpEngine`] seam every device call goes through
//! - `libmtp` - [`MtpEngine`] backed by the shared library, loaded at runtime
//! - `adapter` - Bounded conversion of foreign lists and trees into owned values
//! - `discovery` - Bus scan for attached devices
//! - `session` - Connect/disconnect lifecycle of one device
//! - `operations` - Object, storage and property operations on a session
//! - `paths` - Storage/folder/name paths: resolve, walk, makedirs
//! - `types` - Owned value types handed back to callers
//!
//! # Architecture
//!
//! Nothing above the engine trait touches a raw pointer for longer than a
//! single call. Both the real library and the in-memory mock engine in
//! `testdb` implement [`MtpEngine`], so sessions work with either.

pub mod adapter;
pub mod discovery;
pub mod engine;
pub mod libmtp;
pub mod operations;
pub mod paths;
pub mod session;
pub mod sys;
pub mod types;

pub use adapter::AdapterLimits;
pub use discovery::{detect_devices, DetectedDevices};
pub use engine::MtpEngine;
pub use libmtp::LibMtp;
pub use operations::ProgressFn;
pub use paths::{split_device_path, DeviceObject, DeviceWalk, WalkLevel};
pub use session::{Session, SessionOptions, SessionState};
pub use types::{
    flatten_forest, BatteryLevel, ErrorRecord, FileEntry, FolderEntry, FolderTree, ParentId,
    RawDeviceDescriptor, StorageUsage, StorageVolume, TreeNode, PRIMARY_STORAGE,
};
