//! libmtp, loaded at runtime
//!
//! The shared library is opened with `dlopen` the first time it is needed and
//! kept for the life of the process. Building and testing the crate does not
//! require libmtp to be installed; only talking to a real device does.

use libc::{c_char, c_int, c_void};
use log::{debug, info};
use std::path::Path;
use std::sync::{Arc, Once, OnceLock};

use super::engine::MtpEngine;
use super::sys::{
    LIBMTP_error_t, LIBMTP_file_t, LIBMTP_folder_t, LIBMTP_mtpdevice_t, LIBMTP_progressfunc_t,
    LIBMTP_raw_device_t,
};
use crate::core::error::{MtpError, Result};

#[cfg(target_os = "macos")]
const LIBRARY_CANDIDATES: &[&str] = &[
    "libmtp.9.dylib",
    "libmtp.dylib",
    "/opt/homebrew/lib/libmtp.9.dylib",
    "/usr/local/lib/libmtp.9.dylib",
];

#[cfg(not(target_os = "macos"))]
const LIBRARY_CANDIDATES: &[&str] = &["libmtp.so.9", "libmtp.so"];

type InitFn = unsafe extern "C" fn();
type DetectFn = unsafe extern "C" fn(*mut *mut LIBMTP_raw_device_t, *mut c_int) -> c_int;
type OpenFn = unsafe extern "C" fn(*mut LIBMTP_raw_device_t) -> *mut LIBMTP_mtpdevice_t;
type DeviceFn = unsafe extern "C" fn(*mut LIBMTP_mtpdevice_t);
type GetStringFn = unsafe extern "C" fn(*mut LIBMTP_mtpdevice_t) -> *mut c_char;
type SetStringFn = unsafe extern "C" fn(*mut LIBMTP_mtpdevice_t, *const c_char) -> c_int;
type BatteryFn = unsafe extern "C" fn(*mut LIBMTP_mtpdevice_t, *mut u8, *mut u8) -> c_int;
type CreateFolderFn = unsafe extern "C" fn(*mut LIBMTP_mtpdevice_t, *mut c_char, u32, u32) -> u32;
type SendFileFn = unsafe extern "C" fn(
    *mut LIBMTP_mtpdevice_t,
    *const c_char,
    *mut LIBMTP_file_t,
    LIBMTP_progressfunc_t,
    *const c_void,
) -> c_int;
type GetFileFn = unsafe extern "C" fn(
    *mut LIBMTP_mtpdevice_t,
    u32,
    *const c_char,
    LIBMTP_progressfunc_t,
    *const c_void,
) -> c_int;
type DeleteFn = unsafe extern "C" fn(*mut LIBMTP_mtpdevice_t, u32) -> c_int;
type FilesAndFoldersFn =
    unsafe extern "C" fn(*mut LIBMTP_mtpdevice_t, u32, u32) -> *mut LIBMTP_file_t;
type FileMetadataFn = unsafe extern "C" fn(*mut LIBMTP_mtpdevice_t, u32) -> *mut LIBMTP_file_t;
type DestroyFileFn = unsafe extern "C" fn(*mut LIBMTP_file_t);
type GetStorageFn = unsafe extern "C" fn(*mut LIBMTP_mtpdevice_t, c_int) -> c_int;
type FolderListFn = unsafe extern "C" fn(*mut LIBMTP_mtpdevice_t) -> *mut LIBMTP_folder_t;
type DestroyFolderFn = unsafe extern "C" fn(*mut LIBMTP_folder_t);
type ErrorStackFn = unsafe extern "C" fn(*mut LIBMTP_mtpdevice_t) -> *mut LIBMTP_error_t;

static SHARED: OnceLock<Arc<LibMtp>> = OnceLock::new();

/// The real MTP engine backed by libmtp
pub struct LibMtp {
    library: String,
    init_once: Once,
    init: InitFn,
    detect_raw_devices: DetectFn,
    open_raw_device_uncached: OpenFn,
    release_device: DeviceFn,
    get_friendlyname: GetStringFn,
    set_friendlyname: SetStringFn,
    get_modelname: GetStringFn,
    get_serialnumber: GetStringFn,
    get_manufacturername: GetStringFn,
    get_deviceversion: GetStringFn,
    get_batterylevel: BatteryFn,
    create_folder: CreateFolderFn,
    send_file_from_file: SendFileFn,
    get_file_to_file: GetFileFn,
    delete_object: DeleteFn,
    get_files_and_folders: FilesAndFoldersFn,
    get_filemetadata: FileMetadataFn,
    destroy_file_t: DestroyFileFn,
    get_storage: GetStorageFn,
    get_folder_list: FolderListFn,
    destroy_folder_t: DestroyFolderFn,
    get_errorstack: ErrorStackFn,
    dump_errorstack: DeviceFn,
    clear_errorstack: DeviceFn,
}

impl LibMtp {
    /// Load libmtp once per process.
    ///
    /// `library_path` overrides the default search (`libmtp.so.9`,
    /// `libmtp.so`, or the macOS `.dylib` names). Only the first successful
    /// load counts; later calls return the same engine whatever path they pass.
    pub fn shared(library_path: Option<&Path>) -> Result<Arc<LibMtp>> {
        if let Some(engine) = SHARED.get() {
            return Ok(Arc::clone(engine));
        }
        let engine = Arc::new(Self::open(library_path)?);
        info!("Loaded MTP engine from {}", engine.library);
        Ok(Arc::clone(SHARED.get_or_init(|| engine)))
    }

    /// Name or path of the library that was loaded
    pub fn library(&self) -> &str {
        &self.library
    }

    #[cfg(unix)]
    fn open(library_path: Option<&Path>) -> Result<Self> {
        use std::ffi::{CStr, CString};

        let candidates: Vec<String> = match library_path {
            Some(path) => vec![path.to_string_lossy().into_owned()],
            None => LIBRARY_CANDIDATES.iter().map(|s| s.to_string()).collect(),
        };

        let mut failures = Vec::new();
        for candidate in &candidates {
            let name = CString::new(candidate.as_str())
                .map_err(|_| MtpError::InvalidArgument(format!("library path {}", candidate)))?;
            // SAFETY: `name` is NUL-terminated and outlives the call.
            let handle = unsafe { libc::dlopen(name.as_ptr(), libc::RTLD_NOW | libc::RTLD_LOCAL) };
            if handle.is_null() {
                // SAFETY: dlerror returns null or a NUL-terminated string.
                let reason = unsafe {
                    let err = libc::dlerror();
                    if err.is_null() {
                        "unknown error".to_string()
                    } else {
                        CStr::from_ptr(err).to_string_lossy().into_owned()
                    }
                };
                debug!("Could not load {}: {}", candidate, reason);
                failures.push(reason);
                continue;
            }
            // SAFETY: `handle` is a live library handle that is never closed.
            return unsafe { Self::bind(handle, candidate) };
        }

        Err(MtpError::LibraryUnavailable(failures.join("; ")))
    }

    #[cfg(not(unix))]
    fn open(_library_path: Option<&Path>) -> Result<Self> {
        Err(MtpError::LibraryUnavailable(
            "runtime loading of libmtp is only supported on Unix-like systems".to_string(),
        ))
    }

    #[cfg(unix)]
    unsafe fn bind(handle: *mut c_void, library: &str) -> Result<Self> {
        macro_rules! symbol {
            ($name:literal) => {{
                let sym = libc::dlsym(handle, concat!($name, "\0").as_ptr() as *const c_char);
                if sym.is_null() {
                    return Err(MtpError::LibraryUnavailable(format!(
                        "{} does not export {}",
                        library, $name
                    )));
                }
                std::mem::transmute::<*mut c_void, _>(sym)
            }};
        }

        Ok(Self {
            library: library.to_string(),
            init_once: Once::new(),
            init: symbol!("LIBMTP_Init"),
            detect_raw_devices: symbol!("LIBMTP_Detect_Raw_Devices"),
            open_raw_device_uncached: symbol!("LIBMTP_Open_Raw_Device_Uncached"),
            release_device: symbol!("LIBMTP_Release_Device"),
            get_friendlyname: symbol!("LIBMTP_Get_Friendlyname"),
            set_friendlyname: symbol!("LIBMTP_Set_Friendlyname"),
            get_modelname: symbol!("LIBMTP_Get_Modelname"),
            get_serialnumber: symbol!("LIBMTP_Get_Serialnumber"),
            get_manufacturername: symbol!("LIBMTP_Get_Manufacturername"),
            get_deviceversion: symbol!("LIBMTP_Get_Deviceversion"),
            get_batterylevel: symbol!("LIBMTP_Get_Batterylevel"),
            create_folder: symbol!("LIBMTP_Create_Folder"),
            send_file_from_file: symbol!("LIBMTP_Send_File_From_File"),
            get_file_to_file: symbol!("LIBMTP_Get_File_To_File"),
            delete_object: symbol!("LIBMTP_Delete_Object"),
            get_files_and_folders: symbol!("LIBMTP_Get_Files_And_Folders"),
            get_filemetadata: symbol!("LIBMTP_Get_Filemetadata"),
            destroy_file_t: symbol!("LIBMTP_destroy_file_t"),
            get_storage: symbol!("LIBMTP_Get_Storage"),
            get_folder_list: symbol!("LIBMTP_Get_Folder_List"),
            destroy_folder_t: symbol!("LIBMTP_destroy_folder_t"),
            get_errorstack: symbol!("LIBMTP_Get_Errorstack"),
            dump_errorstack: symbol!("LIBMTP_Dump_Errorstack"),
            clear_errorstack: symbol!("LIBMTP_Clear_Errorstack"),
        })
    }
}

impl MtpEngine for LibMtp {
    fn initialize(&self) {
        self.init_once.call_once(|| {
            debug!("Initializing libmtp");
            // SAFETY: LIBMTP_Init takes no arguments and runs once per process.
            unsafe { (self.init)() }
        });
    }

    fn detect_raw_devices(
        &self,
        devices: &mut *mut LIBMTP_raw_device_t,
        count: &mut c_int,
    ) -> c_int {
        // SAFETY: both out-pointers come from live references.
        unsafe { (self.detect_raw_devices)(devices, count) }
    }

    unsafe fn free_raw_devices(&self, devices: *mut LIBMTP_raw_device_t) {
        libc::free(devices as *mut c_void);
    }

    unsafe fn open_raw_device_uncached(
        &self,
        raw: *mut LIBMTP_raw_device_t,
    ) -> *mut LIBMTP_mtpdevice_t {
        (self.open_raw_device_uncached)(raw)
    }

    unsafe fn release_device(&self, device: *mut LIBMTP_mtpdevice_t) {
        (self.release_device)(device)
    }

    unsafe fn get_friendly_name(&self, device: *mut LIBMTP_mtpdevice_t) -> *mut c_char {
        (self.get_friendlyname)(device)
    }

    unsafe fn set_friendly_name(
        &self,
        device: *mut LIBMTP_mtpdevice_t,
        name: *const c_char,
    ) -> c_int {
        (self.set_friendlyname)(device, name)
    }

    unsafe fn get_model_name(&self, device: *mut LIBMTP_mtpdevice_t) -> *mut c_char {
        (self.get_modelname)(device)
    }

    unsafe fn get_serial_number(&self, device: *mut LIBMTP_mtpdevice_t) -> *mut c_char {
        (self.get_serialnumber)(device)
    }

    unsafe fn get_manufacturer_name(&self, device: *mut LIBMTP_mtpdevice_t) -> *mut c_char {
        (self.get_manufacturername)(device)
    }

    unsafe fn get_device_version(&self, device: *mut LIBMTP_mtpdevice_t) -> *mut c_char {
        (self.get_deviceversion)(device)
    }

    unsafe fn free_string(&self, text: *mut c_char) {
        libc::free(text as *mut c_void);
    }

    unsafe fn get_battery_level(
        &self,
        device: *mut LIBMTP_mtpdevice_t,
        maximum: &mut u8,
        current: &mut u8,
    ) -> c_int {
        (self.get_batterylevel)(device, maximum, current)
    }

    unsafe fn create_folder(
        &self,
        device: *mut LIBMTP_mtpdevice_t,
        name: *mut c_char,
        parent_id: u32,
        storage_id: u32,
    ) -> u32 {
        (self.create_folder)(device, name, parent_id, storage_id)
    }

    unsafe fn send_file_from_file(
        &self,
        device: *mut LIBMTP_mtpdevice_t,
        path: *const c_char,
        metadata: *mut LIBMTP_file_t,
        callback: LIBMTP_progressfunc_t,
        data: *const c_void,
    ) -> c_int {
        (self.send_file_from_file)(device, path, metadata, callback, data)
    }

    unsafe fn get_file_to_file(
        &self,
        device: *mut LIBMTP_mtpdevice_t,
        file_id: u32,
        path: *const c_char,
        callback: LIBMTP_progressfunc_t,
        data: *const c_void,
    ) -> c_int {
        (self.get_file_to_file)(device, file_id, path, callback, data)
    }

    unsafe fn delete_object(&self, device: *mut LIBMTP_mtpdevice_t, object_id: u32) -> c_int {
        (self.delete_object)(device, object_id)
    }

    unsafe fn get_files_and_folders(
        &self,
        device: *mut LIBMTP_mtpdevice_t,
        storage_id: u32,
        parent_id: u32,
    ) -> *mut LIBMTP_file_t {
        (self.get_files_and_folders)(device, storage_id, parent_id)
    }

    unsafe fn get_file_metadata(
        &self,
        device: *mut LIBMTP_mtpdevice_t,
        file_id: u32,
    ) -> *mut LIBMTP_file_t {
        (self.get_filemetadata)(device, file_id)
    }

    unsafe fn destroy_file(&self, file: *mut LIBMTP_file_t) {
        (self.destroy_file_t)(file)
    }

    unsafe fn get_storage(&self, device: *mut LIBMTP_mtpdevice_t, sort_by: c_int) -> c_int {
        (self.get_storage)(device, sort_by)
    }

    unsafe fn get_folder_list(&self, device: *mut LIBMTP_mtpdevice_t) -> *mut LIBMTP_folder_t {
        (self.get_folder_list)(device)
    }

    unsafe fn destroy_folder(&self, folder: *mut LIBMTP_folder_t) {
        (self.destroy_folder_t)(folder)
    }

    unsafe fn get_errorstack(&self, device: *mut LIBMTP_mtpdevice_t) -> *mut LIBMTP_error_t {
        (self.get_errorstack)(device)
    }

    unsafe fn dump_errorstack(&self, device: *mut LIBMTP_mtpdevice_t) {
        (self.dump_errorstack)(device)
    }

    unsafe fn clear_errorstack(&self, device: *mut LIBMTP_mtpdevice_t) {
        (self.clear_errorstack)(device)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_library_is_reported_not_panicked() {
        let result = LibMtp::open(Some(Path::new("/nonexistent/libmtp-missing.so")));
        assert!(matches!(result, Err(MtpError::LibraryUnavailable(_))));
    }
}
