//! Object and storage operations on a connected session
//!
//! Every method starts with [`Session::device`], so a disconnected session
//! fails with `NotConnected` before the engine is touched. Device-reported
//! failures capture the engine's error stack into
//! [`MtpError::CommandFailed`], optionally ask the engine to dump it, and
//! then clear it.

use libc::{c_char, c_int, c_void, time_t};
use log::{debug, error, info, trace, warn};
use std::ffi::CString;
use std::fs;
use std::panic::{self, AssertUnwindSafe};
use std::path::Path;
use std::ptr;
use std::time::UNIX_EPOCH;

use super::adapter::{
    error_from_raw, file_from_raw, folder_from_raw, materialize_list, materialize_owned_list,
    materialize_owned_tree, storage_from_raw, take_engine_string,
};
use super::engine::MtpEngine;
use super::session::Session;
use super::sys::{
    LIBMTP_devicestorage_t, LIBMTP_error_t, LIBMTP_file_t, LIBMTP_folder_t, LIBMTP_mtpdevice_t,
    LIBMTP_progressfunc_t, LIBMTP_STORAGE_SORTBY_NOTSORTED,
};
use super::types::{
    BatteryLevel, ErrorRecord, FileEntry, FolderTree, ParentId, StorageUsage, StorageVolume,
};
use crate::core::error::{MtpError, Result};
use crate::core::filetype::classify_filename;

/// Transfer progress: `(bytes done, bytes total)`
pub type ProgressFn<'a> = &'a mut dyn FnMut(u64, u64);

impl<E: MtpEngine + ?Sized> Session<E> {
    /// Friendly (owner) name of the device
    pub fn get_device_name(&self) -> Result<Option<String>> {
        self.read_string("friendly name", E::get_friendly_name)
    }

    pub fn get_model_name(&self) -> Result<Option<String>> {
        self.read_string("model name", E::get_model_name)
    }

    pub fn get_serial_number(&self) -> Result<Option<String>> {
        self.read_string("serial number", E::get_serial_number)
    }

    pub fn get_manufacturer_name(&self) -> Result<Option<String>> {
        self.read_string("manufacturer name", E::get_manufacturer_name)
    }

    pub fn get_device_version(&self) -> Result<Option<String>> {
        self.read_string("device version", E::get_device_version)
    }

    /// Change the friendly name of the device
    pub fn set_device_name(&self, name: &str) -> Result<()> {
        let device = self.device()?;
        let name = CString::new(name)
            .map_err(|_| MtpError::InvalidArgument("device name contains a NUL byte".to_string()))?;

        // SAFETY: live handle; `name` outlives the call.
        let status = unsafe { self.engine().set_friendly_name(device, name.as_ptr()) };
        if status != 0 {
            return Err(self.command_failed(device, "set device name"));
        }
        info!("Device name set to {:?}", name);
        Ok(())
    }

    /// Battery level. Many devices do not expose one; the resulting
    /// `CommandFailed` carries no error records and nothing is dumped.
    pub fn get_battery_level(&self) -> Result<BatteryLevel> {
        let device = self.device()?;
        let mut maximum = 0u8;
        let mut current = 0u8;

        // SAFETY: live handle; out-parameters are local.
        let status =
            unsafe { self.engine().get_battery_level(device, &mut maximum, &mut current) };
        if status != 0 {
            self.discard_error_stack(device);
            return Err(MtpError::command_failed("read battery level"));
        }
        Ok(BatteryLevel { maximum, current })
    }

    /// Create a folder and return its object id.
    ///
    /// `storage_id` 0 lets the device pick its primary storage.
    pub fn create_folder(&self, name: &str, parent: ParentId, storage_id: u32) -> Result<u32> {
        let device = self.device()?;
        // The engine may sanitize the name in place, so hand it a buffer it
        // is allowed to write to.
        let mut buffer = CString::new(name)
            .map_err(|_| MtpError::InvalidArgument("folder name contains a NUL byte".to_string()))?
            .into_bytes_with_nul();

        debug!(
            "Creating folder {:?} under {} on storage {}",
            name, parent, storage_id
        );
        // SAFETY: live handle; `buffer` is NUL-terminated and outlives the call.
        let folder_id = unsafe {
            self.engine().create_folder(
                device,
                buffer.as_mut_ptr() as *mut c_char,
                parent.for_creation(),
                storage_id,
            )
        };
        if folder_id == 0 {
            return Err(self.command_failed(device, "create folder"));
        }

        info!("Created folder {:?} with id {}", name, folder_id);
        Ok(folder_id)
    }

    /// Upload a local file as `target_name` and return the new object id
    pub fn send_file_from_local(
        &self,
        source: &Path,
        target_name: &str,
        storage_id: u32,
        parent: ParentId,
    ) -> Result<u32> {
        self.send_file(source, target_name, storage_id, parent, None)
    }

    pub fn send_file_from_local_with_progress(
        &self,
        source: &Path,
        target_name: &str,
        storage_id: u32,
        parent: ParentId,
        progress: ProgressFn<'_>,
    ) -> Result<u32> {
        self.send_file(source, target_name, storage_id, parent, Some(progress))
    }

    /// Download object `file_id` to `target`
    pub fn get_file_to_local(&self, file_id: u32, target: &Path) -> Result<()> {
        self.get_file(file_id, target, None)
    }

    pub fn get_file_to_local_with_progress(
        &self,
        file_id: u32,
        target: &Path,
        progress: ProgressFn<'_>,
    ) -> Result<()> {
        self.get_file(file_id, target, Some(progress))
    }

    /// Delete a file or folder
    pub fn delete_object(&self, object_id: u32) -> Result<()> {
        let device = self.device()?;
        // SAFETY: live handle.
        let status = unsafe { self.engine().delete_object(device, object_id) };
        if status != 0 {
            return Err(self.command_failed(device, "delete object"));
        }
        info!("Deleted object {}", object_id);
        Ok(())
    }

    /// Files and folders directly under `parent` on `storage_id`, in device order
    pub fn list_files_and_folders(
        &self,
        storage_id: u32,
        parent: ParentId,
    ) -> Result<Vec<FileEntry>> {
        let device = self.device()?;
        let engine = self.engine();

        // SAFETY: live handle. The list belongs to us and every node is
        // released through `destroy_file` by the adapter.
        let entries = unsafe {
            let head = engine.get_files_and_folders(device, storage_id, parent.for_listing());
            materialize_owned_list(
                head,
                &self.options().limits,
                |raw: &LIBMTP_file_t| file_from_raw(raw),
                |node| engine.destroy_file(node),
            )?
        };

        debug!(
            "Listed {} object(s) under {} on storage {}",
            entries.len(),
            parent,
            storage_id
        );
        Ok(entries)
    }

    /// `(description, id)` of every storage, read fresh from the device
    pub fn list_storage(&self) -> Result<Vec<(Option<String>, u32)>> {
        Ok(self
            .storage_volumes()?
            .into_iter()
            .map(|volume| (volume.description, volume.id))
            .collect())
    }

    /// Full storage records, read fresh from the device
    pub fn storage_volumes(&self) -> Result<Vec<StorageVolume>> {
        let device = self.device()?;
        self.refresh_storage(device)?;

        // SAFETY: live handle; the storage list belongs to the device and is
        // only copied.
        let volumes = unsafe {
            let head: *const LIBMTP_devicestorage_t = (*device).storage;
            materialize_list(head, &self.options().limits, |raw: &LIBMTP_devicestorage_t| {
                storage_from_raw(raw)
            })?
        };
        trace!("Device reports {} storage(s)", volumes.len());
        Ok(volumes)
    }

    /// Capacity of the primary (first) storage, read fresh from the device
    pub fn storage_usage(&self) -> Result<StorageUsage> {
        self.storage_volumes()?
            .first()
            .map(StorageUsage::from_volume)
            .ok_or(MtpError::ObjectNotFound)
    }

    /// The device's folder forest, pre-order
    pub fn list_folders(&self) -> Result<FolderTree> {
        let device = self.device()?;
        let engine = self.engine();

        // SAFETY: live handle. The tree belongs to us; the adapter unlinks
        // each node before `destroy_folder`, so each call frees one node.
        let forest = unsafe {
            let root = engine.get_folder_list(device);
            materialize_owned_tree(
                root,
                &self.options().limits,
                |raw: &LIBMTP_folder_t| folder_from_raw(raw),
                |node| engine.destroy_folder(node),
            )?
        };
        Ok(forest)
    }

    /// Metadata of a single object
    pub fn get_file_metadata(&self, file_id: u32) -> Result<FileEntry> {
        let device = self.device()?;
        let engine = self.engine();

        // SAFETY: live handle; the record is ours to release.
        let file = unsafe { engine.get_file_metadata(device, file_id) };
        if file.is_null() {
            self.discard_error_stack(device);
            return Err(MtpError::ObjectNotFound);
        }
        // SAFETY: as above.
        let entries = unsafe {
            materialize_owned_list(
                file,
                &self.options().limits,
                |raw: &LIBMTP_file_t| file_from_raw(raw),
                |node| engine.destroy_file(node),
            )?
        };
        entries.into_iter().next().ok_or(MtpError::ObjectNotFound)
    }

    /// Current contents of the engine's error stack. The stack is not cleared.
    pub fn get_error_stack(&self) -> Result<Vec<ErrorRecord>> {
        let device = self.device()?;
        // SAFETY: live handle; the stack belongs to the device and is only copied.
        unsafe { self.read_error_stack(device) }
    }

    fn read_string(
        &self,
        field: &'static str,
        getter: unsafe fn(&E, *mut LIBMTP_mtpdevice_t) -> *mut c_char,
    ) -> Result<Option<String>> {
        let device = self.device()?;
        let engine = self.engine();
        // SAFETY: live handle; the string is engine-allocated and handed back
        // through `free_string` exactly once.
        unsafe {
            let text = getter(engine, device);
            take_engine_string(text, field, |text| engine.free_string(text))
        }
    }

    fn send_file(
        &self,
        source: &Path,
        target_name: &str,
        storage_id: u32,
        parent: ParentId,
        progress: Option<ProgressFn<'_>>,
    ) -> Result<u32> {
        let device = self.device()?;
        if !source.is_file() {
            return Err(MtpError::FileNotFound(source.to_path_buf()));
        }
        let local = fs::metadata(source)?;
        let modified = local
            .modified()
            .ok()
            .and_then(|time| time.duration_since(UNIX_EPOCH).ok())
            .map_or(0, |age| age.as_secs() as time_t);

        let path = path_to_cstring(source)?;
        let filename = CString::new(target_name)
            .map_err(|_| MtpError::InvalidArgument("target name contains a NUL byte".to_string()))?;
        let file_type = classify_filename(source);

        let mut metadata = LIBMTP_file_t {
            item_id: 0,
            parent_id: parent.for_creation(),
            storage_id,
            filename: filename.as_ptr() as *mut c_char,
            filesize: local.len(),
            modificationdate: modified,
            filetype: file_type.raw(),
            next: ptr::null_mut(),
        };

        debug!(
            "Sending {} ({} bytes, {}) as {:?} to {} on storage {}",
            source.display(),
            local.len(),
            file_type,
            target_name,
            parent,
            storage_id
        );
        let status = with_progress(progress, |callback, data| {
            // SAFETY: live handle; `path`, `filename` and `metadata` outlive the call.
            unsafe {
                self.engine()
                    .send_file_from_file(device, path.as_ptr(), &mut metadata, callback, data)
            }
        });
        if status != 0 {
            return Err(self.command_failed(device, "send file"));
        }

        info!("Sent {} as object {}", source.display(), metadata.item_id);
        Ok(metadata.item_id)
    }

    fn get_file(
        &self,
        file_id: u32,
        target: &Path,
        progress: Option<ProgressFn<'_>>,
    ) -> Result<()> {
        let device = self.device()?;
        let path = path_to_cstring(target)?;

        debug!("Fetching object {} to {}", file_id, target.display());
        let status = with_progress(progress, |callback, data| {
            // SAFETY: live handle; `path` outlives the call.
            unsafe {
                self.engine()
                    .get_file_to_file(device, file_id, path.as_ptr(), callback, data)
            }
        });
        if status != 0 {
            return Err(self.command_failed(device, "get file"));
        }

        info!("Fetched object {} to {}", file_id, target.display());
        Ok(())
    }

    /// `get_storage` returns -1 on failure; other non-zero values only mean
    /// some storage details could not be read.
    fn refresh_storage(&self, device: *mut LIBMTP_mtpdevice_t) -> Result<()> {
        // SAFETY: live handle.
        let status = unsafe {
            self.engine()
                .get_storage(device, LIBMTP_STORAGE_SORTBY_NOTSORTED)
        };
        match status {
            0 => Ok(()),
            -1 => Err(self.command_failed(device, "get storage")),
            other => {
                warn!("Storage refresh returned status {}", other);
                Ok(())
            }
        }
    }

    unsafe fn read_error_stack(
        &self,
        device: *mut LIBMTP_mtpdevice_t,
    ) -> Result<Vec<ErrorRecord>> {
        let head: *const LIBMTP_error_t = self.engine().get_errorstack(device);
        materialize_list(head, &self.options().limits, |raw: &LIBMTP_error_t| {
            error_from_raw(raw)
        })
    }

    /// Capture, optionally dump, then clear the error stack. Never fails.
    fn capture_error_stack(&self, device: *mut LIBMTP_mtpdevice_t) -> Vec<ErrorRecord> {
        // SAFETY: live handle.
        let records = match unsafe { self.read_error_stack(device) } {
            Ok(records) => records,
            Err(err) => {
                warn!("Could not read the device error stack: {}", err);
                Vec::new()
            }
        };
        for record in &records {
            warn!("Device error: {}", record);
        }

        // SAFETY: live handle.
        unsafe {
            if self.options().dump_error_stack {
                self.engine().dump_errorstack(device);
            }
            self.engine().clear_errorstack(device);
        }
        records
    }

    fn discard_error_stack(&self, device: *mut LIBMTP_mtpdevice_t) {
        // SAFETY: live handle.
        unsafe { self.engine().clear_errorstack(device) };
    }

    fn command_failed(
        &self,
        device: *mut LIBMTP_mtpdevice_t,
        operation: &'static str,
    ) -> MtpError {
        let errors = self.capture_error_stack(device);
        MtpError::CommandFailed { operation, errors }
    }
}

/// Returns non-zero, which cancels the transfer, if the closure panics.
/// Unwinding must not cross the C frame.
unsafe extern "C" fn progress_trampoline(sent: u64, total: u64, data: *const c_void) -> c_int {
    // SAFETY: `data` is the `&mut ProgressFn` set up by `with_progress`,
    // alive for the duration of the engine call.
    let progress = &mut *(data as *mut ProgressFn<'_>);
    match panic::catch_unwind(AssertUnwindSafe(|| progress(sent, total))) {
        Ok(()) => 0,
        Err(_) => {
            error!("Progress callback panicked at {}/{} bytes, cancelling", sent, total);
            1
        }
    }
}

/// Run an engine transfer with an optional progress closure behind the
/// C callback.
fn with_progress<R>(
    progress: Option<ProgressFn<'_>>,
    call: impl FnOnce(LIBMTP_progressfunc_t, *const c_void) -> R,
) -> R {
    match progress {
        Some(mut progress) => {
            let data = &mut progress as *mut ProgressFn<'_> as *const c_void;
            call(Some(progress_trampoline), data)
        }
        None => call(None, ptr::null()),
    }
}

#[cfg(unix)]
fn path_to_cstring(path: &Path) -> Result<CString> {
    use std::os::unix::ffi::OsStrExt;

    CString::new(path.as_os_str().as_bytes()).map_err(|_| {
        MtpError::InvalidArgument(format!("path {} contains a NUL byte", path.display()))
    })
}

#[cfg(not(unix))]
fn path_to_cstring(path: &Path) -> Result<CString> {
    let text = path.to_str().ok_or_else(|| {
        MtpError::InvalidArgument(format!("path {} is not valid UTF-8", path.display()))
    })?;
    CString::new(text).map_err(|_| {
        MtpError::InvalidArgument(format!("path {} contains a NUL byte", path.display()))
    })
}
