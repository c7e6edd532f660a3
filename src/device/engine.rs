//! Engine abstraction for testability
//!
//! [`MtpEngine`] is the boundary between this crate and the MTP protocol
//! engine. It mirrors the libmtp entry points one to one, raw pointers
//! included, so that the real library ([`super::libmtp::LibMtp`]) and the
//! in-memory mock ([`crate::testdb::MockEngine`]) are interchangeable and the
//! adapter code above them is exercised identically by both.
//!
//! Records handed out by the engine follow libmtp's ownership rules:
//!
//! | Returned by | Released with |
//! |---|---|
//! | `detect_raw_devices` (array) | `free_raw_devices` |
//! | `get_*_name`, `get_serial_number`, `get_device_version` | `free_string` |
//! | `get_files_and_folders`, `get_file_metadata` (per node) | `destroy_file` |
//! | `get_folder_list` (whole tree) | `destroy_folder` |
//! | `open_raw_device_uncached` | `release_device` |
//!
//! The storage list and error stack hang off the device record and belong to it.
//!
//! # Safety
//!
//! Every `device` argument must be a live pointer obtained from
//! `open_raw_device_uncached` on the same engine and not yet released. Every
//! record pointer passed to a release function must have come from that
//! engine and must not be released twice.

use super::sys::{
    LIBMTP_error_t, LIBMTP_file_t, LIBMTP_folder_t, LIBMTP_mtpdevice_t, LIBMTP_progressfunc_t,
    LIBMTP_raw_device_t,
};
use libc::{c_char, c_int, c_void};

/// One MTP protocol engine
pub trait MtpEngine: Send + Sync {
    /// Process-wide engine setup. Idempotent: only the first call does work.
    fn initialize(&self);

    /// Enumerate raw devices. Writes an engine-allocated array and its length.
    fn detect_raw_devices(&self, devices: &mut *mut LIBMTP_raw_device_t, count: &mut c_int)
        -> c_int;

    /// # Safety
    /// `devices` must be an array returned by `detect_raw_devices`, or null.
    unsafe fn free_raw_devices(&self, devices: *mut LIBMTP_raw_device_t);

    /// # Safety
    /// `raw` must point to a valid record for the duration of the call.
    unsafe fn open_raw_device_uncached(
        &self,
        raw: *mut LIBMTP_raw_device_t,
    ) -> *mut LIBMTP_mtpdevice_t;

    /// # Safety
    /// See the module docs; `device` is invalid after this call.
    unsafe fn release_device(&self, device: *mut LIBMTP_mtpdevice_t);

    /// # Safety
    /// See the module docs.
    unsafe fn get_friendly_name(&self, device: *mut LIBMTP_mtpdevice_t) -> *mut c_char;

    /// # Safety
    /// See the module docs. `name` must be NUL-terminated.
    unsafe fn set_friendly_name(&self, device: *mut LIBMTP_mtpdevice_t, name: *const c_char)
        -> c_int;

    /// # Safety
    /// See the module docs.
    unsafe fn get_model_name(&self, device: *mut LIBMTP_mtpdevice_t) -> *mut c_char;

    /// # Safety
    /// See the module docs.
    unsafe fn get_serial_number(&self, device: *mut LIBMTP_mtpdevice_t) -> *mut c_char;

    /// # Safety
    /// See the module docs.
    unsafe fn get_manufacturer_name(&self, device: *mut LIBMTP_mtpdevice_t) -> *mut c_char;

    /// # Safety
    /// See the module docs.
    unsafe fn get_device_version(&self, device: *mut LIBMTP_mtpdevice_t) -> *mut c_char;

    /// # Safety
    /// `text` must come from one of this engine's string getters.
    unsafe fn free_string(&self, text: *mut c_char);

    /// # Safety
    /// See the module docs.
    unsafe fn get_battery_level(
        &self,
        device: *mut LIBMTP_mtpdevice_t,
        maximum: &mut u8,
        current: &mut u8,
    ) -> c_int;

    /// Returns the new folder id, or 0 on failure.
    ///
    /// # Safety
    /// See the module docs. The engine may rewrite `name` in place.
    unsafe fn create_folder(
        &self,
        device: *mut LIBMTP_mtpdevice_t,
        name: *mut c_char,
        parent_id: u32,
        storage_id: u32,
    ) -> u32;

    /// On success the engine stores the new object id in `metadata.item_id`.
    ///
    /// # Safety
    /// See the module docs. `path` must be NUL-terminated, `metadata` valid
    /// for the call, and `data` valid for whatever `callback` does with it.
    unsafe fn send_file_from_file(
        &self,
        device: *mut LIBMTP_mtpdevice_t,
        path: *const c_char,
        metadata: *mut LIBMTP_file_t,
        callback: LIBMTP_progressfunc_t,
        data: *const c_void,
    ) -> c_int;

    /// # Safety
    /// As for `send_file_from_file`.
    unsafe fn get_file_to_file(
        &self,
        device: *mut LIBMTP_mtpdevice_t,
        file_id: u32,
        path: *const c_char,
        callback: LIBMTP_progressfunc_t,
        data: *const c_void,
    ) -> c_int;

    /// # Safety
    /// See the module docs.
    unsafe fn delete_object(&self, device: *mut LIBMTP_mtpdevice_t, object_id: u32) -> c_int;

    /// Head of an engine-allocated `next`-linked list, or null when empty.
    ///
    /// # Safety
    /// See the module docs.
    unsafe fn get_files_and_folders(
        &self,
        device: *mut LIBMTP_mtpdevice_t,
        storage_id: u32,
        parent_id: u32,
    ) -> *mut LIBMTP_file_t;

    /// # Safety
    /// See the module docs.
    unsafe fn get_file_metadata(
        &self,
        device: *mut LIBMTP_mtpdevice_t,
        file_id: u32,
    ) -> *mut LIBMTP_file_t;

    /// Releases a single file record. Does not follow `next`.
    ///
    /// # Safety
    /// `file` must be a record from this engine, released at most once.
    unsafe fn destroy_file(&self, file: *mut LIBMTP_file_t);

    /// Refreshes `device.storage`. Returns 0 on success, -1 on failure.
    ///
    /// # Safety
    /// See the module docs.
    unsafe fn get_storage(&self, device: *mut LIBMTP_mtpdevice_t, sort_by: c_int) -> c_int;

    /// # Safety
    /// See the module docs.
    unsafe fn get_folder_list(&self, device: *mut LIBMTP_mtpdevice_t) -> *mut LIBMTP_folder_t;

    /// Releases a folder record together with everything reachable through
    /// its `child` and `sibling` links.
    ///
    /// # Safety
    /// `folder` must be a record from this engine, released at most once.
    unsafe fn destroy_folder(&self, folder: *mut LIBMTP_folder_t);

    /// # Safety
    /// See the module docs.
    unsafe fn get_errorstack(&self, device: *mut LIBMTP_mtpdevice_t) -> *mut LIBMTP_error_t;

    /// # Safety
    /// See the module docs.
    unsafe fn dump_errorstack(&self, device: *mut LIBMTP_mtpdevice_t);

    /// # Safety
    /// See the module docs.
    unsafe fn clear_errorstack(&self, device: *mut LIBMTP_mtpdevice_t);
}
