//! Raw libmtp record layouts and constants
//!
//! These mirror `libmtp.h` (1.1.x) field for field. Only the adapter and the
//! engines touch them; everything above works with the owned types in
//! [`super::types`].

#![allow(non_camel_case_types, non_snake_case)]

use libc::{c_char, c_int, c_void, time_t};
use std::ptr;

/// Parent id that addresses the device root in `Get_Files_And_Folders`
pub const LIBMTP_FILES_AND_FOLDERS_ROOT: u32 = 0xFFFF_FFFF;

/// `LIBMTP_STORAGE_SORTBY_NOTSORTED`
pub const LIBMTP_STORAGE_SORTBY_NOTSORTED: c_int = 0;

/// `LIBMTP_error_number_t` values
pub const LIBMTP_ERROR_NONE: c_int = 0;
pub const LIBMTP_ERROR_GENERAL: c_int = 1;
pub const LIBMTP_ERROR_PTP_LAYER: c_int = 2;
pub const LIBMTP_ERROR_USB_LAYER: c_int = 3;
pub const LIBMTP_ERROR_MEMORY_ALLOCATION: c_int = 4;
pub const LIBMTP_ERROR_NO_DEVICE_ATTACHED: c_int = 5;
pub const LIBMTP_ERROR_STORAGE_FULL: c_int = 6;
pub const LIBMTP_ERROR_CONNECTING: c_int = 7;
pub const LIBMTP_ERROR_CANCELLED: c_int = 8;

/// `LIBMTP_progressfunc_t`. A non-zero return asks the engine to cancel.
pub type LIBMTP_progressfunc_t =
    Option<unsafe extern "C" fn(sent: u64, total: u64, data: *const c_void) -> c_int>;

#[repr(C)]
#[derive(Debug, Clone, Copy)]
pub struct LIBMTP_device_entry_t {
    pub vendor: *mut c_char,
    pub vendor_id: u16,
    pub product: *mut c_char,
    pub product_id: u16,
    pub device_flags: u32,
}

#[repr(C)]
#[derive(Debug, Clone, Copy)]
pub struct LIBMTP_raw_device_t {
    pub device_entry: LIBMTP_device_entry_t,
    pub bus_location: u32,
    pub devnum: u8,
}

#[repr(C)]
#[derive(Debug)]
pub struct LIBMTP_error_t {
    pub errornumber: c_int,
    pub error_text: *mut c_char,
    pub next: *mut LIBMTP_error_t,
}

#[repr(C)]
#[derive(Debug)]
pub struct LIBMTP_devicestorage_t {
    pub id: u32,
    pub StorageType: u16,
    pub FilesystemType: u16,
    pub AccessCapability: u16,
    pub MaxCapacity: u64,
    pub FreeSpaceInBytes: u64,
    pub FreeSpaceInObjects: u64,
    pub StorageDescription: *mut c_char,
    pub VolumeIdentifier: *mut c_char,
    pub next: *mut LIBMTP_devicestorage_t,
    pub prev: *mut LIBMTP_devicestorage_t,
}

#[repr(C)]
#[derive(Debug)]
pub struct LIBMTP_mtpdevice_t {
    pub object_bitsize: u8,
    pub params: *mut c_void,
    pub usbinfo: *mut c_void,
    pub storage: *mut LIBMTP_devicestorage_t,
    pub errorstack: *mut LIBMTP_error_t,
    pub maximum_battery_level: u8,
    pub default_music_folder: u32,
    pub default_playlist_folder: u32,
    pub default_picture_folder: u32,
    pub default_video_folder: u32,
    pub default_organizer_folder: u32,
    pub default_zencast_folder: u32,
    pub default_album_folder: u32,
    pub default_text_folder: u32,
    pub cd: *mut c_void,
    pub extensions: *mut c_void,
    pub cached: c_int,
    pub next: *mut LIBMTP_mtpdevice_t,
}

#[repr(C)]
#[derive(Debug)]
pub struct LIBMTP_file_t {
    pub item_id: u32,
    pub parent_id: u32,
    pub storage_id: u32,
    pub filename: *mut c_char,
    pub filesize: u64,
    pub modificationdate: time_t,
    pub filetype: c_int,
    pub next: *mut LIBMTP_file_t,
}

#[repr(C)]
#[derive(Debug)]
pub struct LIBMTP_folder_t {
    pub folder_id: u32,
    pub parent_id: u32,
    pub storage_id: u32,
    pub name: *mut c_char,
    pub sibling: *mut LIBMTP_folder_t,
    pub child: *mut LIBMTP_folder_t,
}

impl LIBMTP_raw_device_t {
    pub fn empty() -> Self {
        Self {
            device_entry: LIBMTP_device_entry_t {
                vendor: ptr::null_mut(),
                vendor_id: 0,
                product: ptr::null_mut(),
                product_id: 0,
                device_flags: 0,
            },
            bus_location: 0,
            devnum: 0,
        }
    }
}

impl LIBMTP_mtpdevice_t {
    pub fn empty() -> Self {
        Self {
            object_bitsize: 32,
            params: ptr::null_mut(),
            usbinfo: ptr::null_mut(),
            storage: ptr::null_mut(),
            errorstack: ptr::null_mut(),
            maximum_battery_level: 0,
            default_music_folder: 0,
            default_playlist_folder: 0,
            default_picture_folder: 0,
            default_video_folder: 0,
            default_organizer_folder: 0,
            default_zencast_folder: 0,
            default_album_folder: 0,
            default_text_folder: 0,
            cd: ptr::null_mut(),
            extensions: ptr::null_mut(),
            cached: 0,
            next: ptr::null_mut(),
        }
    }
}

impl LIBMTP_file_t {
    /// A zeroed record, as `LIBMTP_new_file_t` would return
    pub fn empty() -> Self {
        Self {
            item_id: 0,
            parent_id: 0,
            storage_id: 0,
            filename: ptr::null_mut(),
            filesize: 0,
            modificationdate: 0,
            filetype: 44,
            next: ptr::null_mut(),
        }
    }
}

impl LIBMTP_folder_t {
    pub fn empty() -> Self {
        Self {
            folder_id: 0,
            parent_id: 0,
            storage_id: 0,
            name: ptr::null_mut(),
            sibling: ptr::null_mut(),
            child: ptr::null_mut(),
        }
    }
}

impl LIBMTP_devicestorage_t {
    pub fn empty() -> Self {
        Self {
            id: 0,
            StorageType: 0,
            FilesystemType: 0,
            AccessCapability: 0,
            MaxCapacity: 0,
            FreeSpaceInBytes: 0,
            FreeSpaceInObjects: 0,
            StorageDescription: ptr::null_mut(),
            VolumeIdentifier: ptr::null_mut(),
            next: ptr::null_mut(),
            prev: ptr::null_mut(),
        }
    }
}

impl LIBMTP_error_t {
    pub fn empty() -> Self {
        Self {
            errornumber: LIBMTP_ERROR_NONE,
            error_text: ptr::null_mut(),
            next: ptr::null_mut(),
        }
    }
}
