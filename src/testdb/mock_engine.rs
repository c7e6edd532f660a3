//! Mock MTP engine for testing without a real device
//!
//! [`MockEngine`] implements [`MtpEngine`] over an in-memory model of one or
//! more devices. It hands out the same `#[repr(C)]` records libmtp would,
//! linked with raw pointers, and takes them back through the matching release
//! functions. Every allocation is tracked, so tests can assert that nothing
//! leaked and nothing was released twice (a second release panics).
//!
//! Failures are scripted per engine entry point with
//! [`MockEngine::fail_operation`]; a failing call pushes a record onto the
//! device's error stack just like the real engine.

use libc::{c_char, c_int, c_void};
use log::debug;
use std::collections::{HashMap, HashSet};
use std::ffi::{CStr, CString};
use std::fs;
use std::path::PathBuf;
use std::ptr;
use std::sync::{Mutex, MutexGuard};

use crate::core::error::ErrorCode;
use crate::core::filetype::{classify_filename, FileType};
use crate::device::engine::MtpEngine;
use crate::device::sys::{
    LIBMTP_devicestorage_t, LIBMTP_error_t, LIBMTP_file_t, LIBMTP_folder_t, LIBMTP_mtpdevice_t,
    LIBMTP_progressfunc_t, LIBMTP_raw_device_t, LIBMTP_FILES_AND_FOLDERS_ROOT,
};
use crate::device::types::RawDeviceDescriptor;

/// Parent id of top-level objects in the mock model
const ROOT: u32 = 0;

/// Modification time given to every mock object
const MOCK_TIMESTAMP: i64 = 1_700_000_000;

/// One simulated storage area
#[derive(Debug, Clone)]
pub struct MockStorage {
    pub id: u32,
    pub description: String,
    /// Capacity in bytes
    pub capacity: u64,
    /// Free bytes before any object stored on it is counted
    pub free: u64,
}

/// A file or folder on a simulated device
#[derive(Debug, Clone, PartialEq)]
pub struct MockObject {
    pub object_id: u32,
    /// `0` for top-level objects
    pub parent_id: u32,
    pub storage_id: u32,
    pub name: String,
    pub is_folder: bool,
    /// File size in bytes (0 for folders)
    pub size: u64,
    /// File content; downloads write `size` zero bytes when absent
    pub content: Option<Vec<u8>>,
    pub file_type: FileType,
}

impl MockObject {
    pub fn folder(object_id: u32, parent_id: u32, storage_id: u32, name: &str) -> Self {
        Self {
            object_id,
            parent_id,
            storage_id,
            name: name.to_string(),
            is_folder: true,
            size: 0,
            content: None,
            file_type: FileType::Folder,
        }
    }

    pub fn file(object_id: u32, parent_id: u32, storage_id: u32, name: &str, size: u64) -> Self {
        Self {
            object_id,
            parent_id,
            storage_id,
            name: name.to_string(),
            is_folder: false,
            size,
            content: None,
            file_type: classify_filename(name),
        }
    }
}

/// A simulated device and everything on it
#[derive(Debug, Clone)]
pub struct MockDevice {
    pub vendor: String,
    pub product: String,
    pub vendor_id: u16,
    pub product_id: u16,
    pub bus_location: u32,
    pub device_number: u8,
    pub friendly_name: Option<String>,
    pub model: Option<String>,
    pub serial: Option<String>,
    pub manufacturer: Option<String>,
    pub version: Option<String>,
    /// `(maximum, current)`
    pub battery: (u8, u8),
    pub storages: Vec<MockStorage>,
    pub objects: Vec<MockObject>,
}

impl MockDevice {
    /// A device with no storage. Friendly and model names default to the
    /// product, the manufacturer to the vendor.
    pub fn new(vendor: &str, product: &str) -> Self {
        Self {
            vendor: vendor.to_string(),
            product: product.to_string(),
            vendor_id: 0x18d1,
            product_id: 0x4ee1,
            bus_location: 1,
            device_number: 1,
            friendly_name: Some(product.to_string()),
            model: Some(product.to_string()),
            serial: Some("MOCK00000001".to_string()),
            manufacturer: Some(vendor.to_string()),
            version: Some("1.0".to_string()),
            battery: (100, 100),
            storages: Vec::new(),
            objects: Vec::new(),
        }
    }

    pub fn at(mut self, bus_location: u32, device_number: u8) -> Self {
        self.bus_location = bus_location;
        self.device_number = device_number;
        self
    }

    pub fn with_ids(mut self, vendor_id: u16, product_id: u16) -> Self {
        self.vendor_id = vendor_id;
        self.product_id = product_id;
        self
    }

    pub fn with_serial(mut self, serial: &str) -> Self {
        self.serial = Some(serial.to_string());
        self
    }

    pub fn without_serial(mut self) -> Self {
        self.serial = None;
        self
    }

    pub fn with_version(mut self, version: &str) -> Self {
        self.version = Some(version.to_string());
        self
    }

    pub fn with_battery(mut self, maximum: u8, current: u8) -> Self {
        self.battery = (maximum, current);
        self
    }

    pub fn with_storage(mut self, id: u32, description: &str, capacity: u64, free: u64) -> Self {
        self.storages.push(MockStorage {
            id,
            description: description.to_string(),
            capacity,
            free,
        });
        self
    }

    pub fn with_folder(self, id: u32, parent: u32, storage: u32, name: &str) -> Self {
        self.with_object(MockObject::folder(id, parent, storage, name))
    }

    pub fn with_file(self, id: u32, parent: u32, storage: u32, name: &str, size: u64) -> Self {
        self.with_object(MockObject::file(id, parent, storage, name, size))
    }

    pub fn with_object(mut self, object: MockObject) -> Self {
        self.objects.push(object);
        self
    }

    fn descriptor(&self) -> RawDeviceDescriptor {
        RawDeviceDescriptor {
            bus_location: self.bus_location,
            device_number: self.device_number,
            vendor_id: self.vendor_id,
            product_id: self.product_id,
            vendor: Some(self.vendor.clone()),
            product: Some(self.product.clone()),
            device_flags: 0,
        }
    }

    fn used_on(&self, storage_id: u32) -> u64 {
        self.objects
            .iter()
            .filter(|o| o.storage_id == storage_id)
            .map(|o| o.size)
            .sum()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Allocation {
    RawDevices(usize),
    Device,
    Storage,
    Error,
    File,
    Folder,
    Text,
}

struct DeviceSlot {
    device: MockDevice,
    vendor: CString,
    product: CString,
}

struct State {
    devices: Vec<DeviceSlot>,
    /// Open device record address -> index into `devices`
    open: HashMap<usize, usize>,
    allocations: HashMap<usize, Allocation>,
    calls: HashMap<&'static str, usize>,
    failing: HashSet<&'static str>,
    detect_status: ErrorCode,
    raw_device_padding: usize,
    open_fails: bool,
    cyclic_listing: bool,
    next_object_id: u32,
    last_create_folder_parent: Option<u32>,
    last_listing_parent: Option<u32>,
}

impl State {
    fn record(&mut self, call: &'static str) {
        *self.calls.entry(call).or_insert(0) += 1;
    }

    fn fails(&self, call: &'static str) -> bool {
        self.failing.contains(call)
    }

    fn track<T>(&mut self, ptr: *mut T, kind: Allocation) {
        self.allocations.insert(ptr as usize, kind);
    }

    fn untrack<T>(&mut self, ptr: *mut T, kind: Allocation) -> Allocation {
        match self.allocations.remove(&(ptr as usize)) {
            Some(found) if std::mem::discriminant(&found) == std::mem::discriminant(&kind) => found,
            Some(found) => panic!("{:?} at {:p} released as {:?}", found, ptr, kind),
            None => panic!("{:?} at {:p} released twice or never allocated", kind, ptr),
        }
    }

    fn index_of(&self, device: *mut LIBMTP_mtpdevice_t) -> usize {
        match self.open.get(&(device as usize)) {
            Some(index) => *index,
            None => panic!("device {:p} is not open", device),
        }
    }

    fn device_mut(&mut self, device: *mut LIBMTP_mtpdevice_t) -> &mut MockDevice {
        let index = self.index_of(device);
        &mut self.devices[index].device
    }

    fn take_object_id(&mut self) -> u32 {
        let id = self.next_object_id;
        self.next_object_id += 1;
        id
    }

    fn alloc_text(&mut self, text: Option<&str>) -> *mut c_char {
        match text.and_then(|t| CString::new(t).ok()) {
            Some(text) => {
                let ptr = text.into_raw();
                self.track(ptr, Allocation::Text);
                ptr
            }
            None => ptr::null_mut(),
        }
    }

    /// Append a record to the device's error stack
    unsafe fn push_error(&mut self, device: *mut LIBMTP_mtpdevice_t, code: ErrorCode, text: &str) {
        let node = Box::into_raw(Box::new(LIBMTP_error_t {
            errornumber: code.raw(),
            error_text: owned_text(text),
            next: ptr::null_mut(),
        }));
        self.track(node, Allocation::Error);

        let mut slot: *mut *mut LIBMTP_error_t = &mut (*device).errorstack;
        while !(*slot).is_null() {
            slot = &mut (**slot).next;
        }
        *slot = node;
    }

    unsafe fn free_error_stack(&mut self, device: *mut LIBMTP_mtpdevice_t) {
        let mut cursor = (*device).errorstack;
        (*device).errorstack = ptr::null_mut();
        while !cursor.is_null() {
            self.untrack(cursor, Allocation::Error);
            let node = Box::from_raw(cursor);
            free_owned_text(node.error_text);
            cursor = node.next;
        }
    }

    unsafe fn free_storage_list(&mut self, device: *mut LIBMTP_mtpdevice_t) {
        let mut cursor = (*device).storage;
        (*device).storage = ptr::null_mut();
        while !cursor.is_null() {
            self.untrack(cursor, Allocation::Storage);
            let node = Box::from_raw(cursor);
            free_owned_text(node.StorageDescription);
            free_owned_text(node.VolumeIdentifier);
            cursor = node.next;
        }
    }

    fn file_node(&mut self, object: &MockObject) -> *mut LIBMTP_file_t {
        let node = Box::into_raw(Box::new(LIBMTP_file_t {
            item_id: object.object_id,
            parent_id: object.parent_id,
            storage_id: object.storage_id,
            filename: owned_text(&object.name),
            filesize: object.size,
            modificationdate: MOCK_TIMESTAMP as libc::time_t,
            filetype: object.file_type.raw(),
            next: ptr::null_mut(),
        }));
        self.track(node, Allocation::File);
        node
    }

    /// Folders under `parent`, siblings linked in model order
    fn folder_level(&mut self, folders: &[MockObject], parent: u32) -> *mut LIBMTP_folder_t {
        let mut head: *mut LIBMTP_folder_t = ptr::null_mut();
        let mut tail: *mut LIBMTP_folder_t = ptr::null_mut();
        for folder in folders.iter().filter(|f| f.parent_id == parent) {
            let child = self.folder_level(folders, folder.object_id);
            let node = Box::into_raw(Box::new(LIBMTP_folder_t {
                folder_id: folder.object_id,
                parent_id: folder.parent_id,
                storage_id: folder.storage_id,
                name: owned_text(&folder.name),
                sibling: ptr::null_mut(),
                child,
            }));
            self.track(node, Allocation::Folder);
            if tail.is_null() {
                head = node;
            } else {
                // SAFETY: `tail` was allocated just above in this loop.
                unsafe { (*tail).sibling = node };
            }
            tail = node;
        }
        head
    }

    /// Release a folder with its whole `child`/`sibling` closure
    unsafe fn free_folder(&mut self, folder: *mut LIBMTP_folder_t) {
        if folder.is_null() {
            return;
        }
        self.untrack(folder, Allocation::Folder);
        let node = Box::from_raw(folder);
        free_owned_text(node.name);
        self.free_folder(node.child);
        self.free_folder(node.sibling);
    }
}

fn owned_text(text: &str) -> *mut c_char {
    CString::new(text)
        .map(CString::into_raw)
        .unwrap_or(ptr::null_mut())
}

unsafe fn free_owned_text(text: *mut c_char) {
    if !text.is_null() {
        drop(CString::from_raw(text));
    }
}

/// Drive the progress callback; `false` once it asked to cancel
unsafe fn report_progress(
    callback: LIBMTP_progressfunc_t,
    data: *const c_void,
    total: u64,
) -> bool {
    if let Some(callback) = callback {
        for sent in [0, total / 2, total] {
            if callback(sent, total, data) != 0 {
                return false;
            }
        }
    }
    true
}

/// In-memory MTP engine
pub struct MockEngine {
    state: Mutex<State>,
}

impl Default for MockEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl MockEngine {
    /// An engine with no devices attached
    pub fn new() -> Self {
        Self {
            state: Mutex::new(State {
                devices: Vec::new(),
                open: HashMap::new(),
                allocations: HashMap::new(),
                calls: HashMap::new(),
                failing: HashSet::new(),
                detect_status: ErrorCode::Success,
                raw_device_padding: 0,
                open_fails: false,
                cyclic_listing: false,
                next_object_id: 1000,
                last_create_folder_parent: None,
                last_listing_parent: None,
            }),
        }
    }

    /// A single media player with some music and photos, used by `--simulate`
    pub fn demo() -> Self {
        let engine = Self::new();
        const GIB: u64 = 1024 * 1024 * 1024;
        let device = MockDevice::new("Mock Devices", "Demo Player")
            .at(1, 4)
            .with_ids(0x0e8d, 0x2008)
            .with_serial("DEMO-0001")
            .with_battery(100, 76)
            .with_storage(0x10001, "Internal shared storage", 32 * GIB, 21 * GIB)
            .with_storage(0x20001, "SD Card", 64 * GIB, 60 * GIB)
            .with_folder(1, ROOT, 0x10001, "Music")
            .with_folder(2, 1, 0x10001, "Field Recordings")
            .with_file(3, 2, 0x10001, "harbour.flac", 28_400_112)
            .with_file(4, 1, 0x10001, "intro.mp3", 4_102_330)
            .with_folder(5, ROOT, 0x10001, "DCIM")
            .with_folder(6, 5, 0x10001, "Camera")
            .with_file(7, 6, 0x10001, "IMG_20240101_101500.jpg", 3_481_220)
            .with_file(8, 6, 0x10001, "VID_20240101_101612.mp4", 58_220_004)
            .with_file(9, ROOT, 0x10001, "notes.txt", 1_204)
            .with_folder(10, ROOT, 0x20001, "Podcasts")
            .with_file(11, 10, 0x20001, "episode-12.m4a", 41_002_118);
        engine.add_device(device);
        engine.set_next_object_id(100);
        engine
    }

    fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn add_device(&self, device: MockDevice) {
        let vendor = CString::new(device.vendor.as_str()).unwrap_or_default();
        let product = CString::new(device.product.as_str()).unwrap_or_default();
        self.lock().devices.push(DeviceSlot {
            device,
            vendor,
            product,
        });
    }

    /// Descriptors of every attached device, without going through the engine
    pub fn descriptors(&self) -> Vec<RawDeviceDescriptor> {
        self.lock()
            .devices
            .iter()
            .map(|slot| slot.device.descriptor())
            .collect()
    }

    /// Make an engine entry point (by its trait method name) fail
    pub fn fail_operation(&self, call: &'static str) {
        self.lock().failing.insert(call);
    }

    pub fn clear_failures(&self) {
        self.lock().failing.clear();
    }

    /// Status returned by `detect_raw_devices`
    pub fn set_detect_status(&self, status: ErrorCode) {
        self.lock().detect_status = status;
    }

    /// Extra entries allocated after the real ones in the raw device array
    pub fn set_raw_device_padding(&self, padding: usize) {
        self.lock().raw_device_padding = padding;
    }

    pub fn set_open_fails(&self, fails: bool) {
        self.lock().open_fails = fails;
    }

    /// Link the last node of every file listing back to the first
    pub fn set_cyclic_listing(&self, cyclic: bool) {
        self.lock().cyclic_listing = cyclic;
    }

    /// Id given to the next created folder or uploaded file
    pub fn set_next_object_id(&self, id: u32) {
        self.lock().next_object_id = id;
    }

    /// How many times an entry point was called
    pub fn calls(&self, call: &str) -> usize {
        self.lock().calls.get(call).copied().unwrap_or(0)
    }

    pub fn total_calls(&self) -> usize {
        self.lock().calls.values().sum()
    }

    /// Engine records currently handed out and not yet released
    pub fn live_allocations(&self) -> usize {
        self.lock().allocations.len()
    }

    /// Raw parent id passed to the last `create_folder`
    pub fn last_create_folder_parent(&self) -> Option<u32> {
        self.lock().last_create_folder_parent
    }

    /// Raw parent id passed to the last `get_files_and_folders`
    pub fn last_listing_parent(&self) -> Option<u32> {
        self.lock().last_listing_parent
    }

    /// Look up an object on any device
    pub fn object(&self, object_id: u32) -> Option<MockObject> {
        self.lock()
            .devices
            .iter()
            .flat_map(|slot| slot.device.objects.iter())
            .find(|o| o.object_id == object_id)
            .cloned()
    }
}

impl MtpEngine for MockEngine {
    fn initialize(&self) {
        self.lock().record("initialize");
    }

    fn detect_raw_devices(
        &self,
        devices: &mut *mut LIBMTP_raw_device_t,
        count: &mut c_int,
    ) -> c_int {
        let mut state = self.lock();
        state.record("detect_raw_devices");
        *devices = ptr::null_mut();
        *count = 0;

        match state.detect_status {
            ErrorCode::Success | ErrorCode::StorageFull => {}
            other => return other.raw(),
        }
        if state.devices.is_empty() {
            return ErrorCode::NoDeviceAttached.raw();
        }

        let mut records: Vec<LIBMTP_raw_device_t> = state
            .devices
            .iter()
            .map(|slot| {
                let mut raw = LIBMTP_raw_device_t::empty();
                raw.device_entry.vendor = slot.vendor.as_ptr() as *mut c_char;
                raw.device_entry.vendor_id = slot.device.vendor_id;
                raw.device_entry.product = slot.product.as_ptr() as *mut c_char;
                raw.device_entry.product_id = slot.device.product_id;
                raw.bus_location = slot.device.bus_location;
                raw.devnum = slot.device.device_number;
                raw
            })
            .collect();
        let found = records.len();
        for _ in 0..state.raw_device_padding {
            let mut junk = LIBMTP_raw_device_t::empty();
            junk.bus_location = u32::MAX;
            junk.devnum = u8::MAX;
            records.push(junk);
        }

        let len = records.len();
        let array = Box::into_raw(records.into_boxed_slice()) as *mut LIBMTP_raw_device_t;
        state.track(array, Allocation::RawDevices(len));
        *devices = array;
        *count = found as c_int;
        state.detect_status.raw()
    }

    unsafe fn free_raw_devices(&self, devices: *mut LIBMTP_raw_device_t) {
        let mut state = self.lock();
        state.record("free_raw_devices");
        if devices.is_null() {
            return;
        }
        if let Allocation::RawDevices(len) = state.untrack(devices, Allocation::RawDevices(0)) {
            drop(Box::from_raw(ptr::slice_from_raw_parts_mut(devices, len)));
        }
    }

    unsafe fn open_raw_device_uncached(
        &self,
        raw: *mut LIBMTP_raw_device_t,
    ) -> *mut LIBMTP_mtpdevice_t {
        let mut state = self.lock();
        state.record("open_raw_device_uncached");
        if state.open_fails || raw.is_null() {
            return ptr::null_mut();
        }
        let (bus, devnum) = ((*raw).bus_location, (*raw).devnum);
        let index = match state.devices.iter().position(|slot| {
            slot.device.bus_location == bus && slot.device.device_number == devnum
        }) {
            Some(index) => index,
            None => return ptr::null_mut(),
        };

        let mut record = LIBMTP_mtpdevice_t::empty();
        record.maximum_battery_level = state.devices[index].device.battery.0;
        let device = Box::into_raw(Box::new(record));
        state.track(device, Allocation::Device);
        state.open.insert(device as usize, index);
        debug!("Mock device {}:{} opened", bus, devnum);
        device
    }

    unsafe fn release_device(&self, device: *mut LIBMTP_mtpdevice_t) {
        let mut state = self.lock();
        state.record("release_device");
        state.index_of(device);
        state.free_storage_list(device);
        state.free_error_stack(device);
        state.open.remove(&(device as usize));
        state.untrack(device, Allocation::Device);
        drop(Box::from_raw(device));
    }

    unsafe fn get_friendly_name(&self, device: *mut LIBMTP_mtpdevice_t) -> *mut c_char {
        let mut state = self.lock();
        state.record("get_friendly_name");
        let name = state.device_mut(device).friendly_name.clone();
        state.alloc_text(name.as_deref())
    }

    unsafe fn set_friendly_name(
        &self,
        device: *mut LIBMTP_mtpdevice_t,
        name: *const c_char,
    ) -> c_int {
        let mut state = self.lock();
        state.record("set_friendly_name");
        if state.fails("set_friendly_name") {
            state.push_error(device, ErrorCode::GeneralFailure, "Could not set friendly name");
            return -1;
        }
        let name = CStr::from_ptr(name).to_string_lossy().into_owned();
        state.device_mut(device).friendly_name = Some(name);
        0
    }

    unsafe fn get_model_name(&self, device: *mut LIBMTP_mtpdevice_t) -> *mut c_char {
        let mut state = self.lock();
        state.record("get_model_name");
        let model = state.device_mut(device).model.clone();
        state.alloc_text(model.as_deref())
    }

    unsafe fn get_serial_number(&self, device: *mut LIBMTP_mtpdevice_t) -> *mut c_char {
        let mut state = self.lock();
        state.record("get_serial_number");
        let serial = state.device_mut(device).serial.clone();
        state.alloc_text(serial.as_deref())
    }

    unsafe fn get_manufacturer_name(&self, device: *mut LIBMTP_mtpdevice_t) -> *mut c_char {
        let mut state = self.lock();
        state.record("get_manufacturer_name");
        let manufacturer = state.device_mut(device).manufacturer.clone();
        state.alloc_text(manufacturer.as_deref())
    }

    unsafe fn get_device_version(&self, device: *mut LIBMTP_mtpdevice_t) -> *mut c_char {
        let mut state = self.lock();
        state.record("get_device_version");
        let version = state.device_mut(device).version.clone();
        state.alloc_text(version.as_deref())
    }

    unsafe fn free_string(&self, text: *mut c_char) {
        let mut state = self.lock();
        state.record("free_string");
        state.untrack(text, Allocation::Text);
        drop(CString::from_raw(text));
    }

    unsafe fn get_battery_level(
        &self,
        device: *mut LIBMTP_mtpdevice_t,
        maximum: &mut u8,
        current: &mut u8,
    ) -> c_int {
        let mut state = self.lock();
        state.record("get_battery_level");
        if state.fails("get_battery_level") {
            let text = "Battery level unsupported";
            state.push_error(device, ErrorCode::ProtocolLayerFailure, text);
            return -1;
        }
        let (max, now) = state.device_mut(device).battery;
        *maximum = max;
        *current = now;
        0
    }

    unsafe fn create_folder(
        &self,
        device: *mut LIBMTP_mtpdevice_t,
        name: *mut c_char,
        parent_id: u32,
        storage_id: u32,
    ) -> u32 {
        let mut state = self.lock();
        state.record("create_folder");
        state.last_create_folder_parent = Some(parent_id);
        if state.fails("create_folder") {
            state.push_error(device, ErrorCode::GeneralFailure, "Could not create folder");
            return 0;
        }

        let name = CStr::from_ptr(name).to_string_lossy().into_owned();
        let id = state.take_object_id();
        let target = state.device_mut(device);
        let storage_id = match storage_id {
            0 => target.storages.first().map_or(0, |s| s.id),
            id => id,
        };
        target
            .objects
            .push(MockObject::folder(id, parent_id, storage_id, &name));
        id
    }

    unsafe fn send_file_from_file(
        &self,
        device: *mut LIBMTP_mtpdevice_t,
        path: *const c_char,
        metadata: *mut LIBMTP_file_t,
        callback: LIBMTP_progressfunc_t,
        data: *const c_void,
    ) -> c_int {
        let mut state = self.lock();
        state.record("send_file_from_file");
        let source = PathBuf::from(CStr::from_ptr(path).to_string_lossy().into_owned());
        let content = match fs::read(&source) {
            Ok(content) if !state.fails("send_file_from_file") => content,
            _ => {
                state.push_error(device, ErrorCode::GeneralFailure, "Could not send object");
                return -1;
            }
        };

        let meta = &mut *metadata;
        let id = state.take_object_id();
        let target = state.device_mut(device);
        let storage_id = match meta.storage_id {
            0 => target.storages.first().map_or(0, |s| s.id),
            id => id,
        };
        let name = if meta.filename.is_null() {
            String::new()
        } else {
            CStr::from_ptr(meta.filename).to_string_lossy().into_owned()
        };
        target.objects.push(MockObject {
            object_id: id,
            parent_id: meta.parent_id,
            storage_id,
            name,
            is_folder: false,
            size: meta.filesize,
            content: Some(content),
            file_type: FileType::from_raw(meta.filetype),
        });
        meta.item_id = id;
        drop(state);

        if !report_progress(callback, data, meta.filesize) {
            let mut state = self.lock();
            state.device_mut(device).objects.retain(|o| o.object_id != id);
            state.push_error(device, ErrorCode::Cancelled, "Transfer cancelled");
            meta.item_id = 0;
            return -1;
        }
        0
    }

    unsafe fn get_file_to_file(
        &self,
        device: *mut LIBMTP_mtpdevice_t,
        file_id: u32,
        path: *const c_char,
        callback: LIBMTP_progressfunc_t,
        data: *const c_void,
    ) -> c_int {
        let mut state = self.lock();
        state.record("get_file_to_file");
        let found = state
            .device_mut(device)
            .objects
            .iter()
            .find(|o| o.object_id == file_id && !o.is_folder)
            .map(|o| o.content.clone().unwrap_or_else(|| vec![0; o.size as usize]));
        let content = match found {
            Some(content) if !state.fails("get_file_to_file") => content,
            _ => {
                let text = "Could not get file from device";
                state.push_error(device, ErrorCode::GeneralFailure, text);
                return -1;
            }
        };

        let target = PathBuf::from(CStr::from_ptr(path).to_string_lossy().into_owned());
        if fs::write(&target, &content).is_err() {
            state.push_error(device, ErrorCode::GeneralFailure, "Could not write local file");
            return -1;
        }
        drop(state);

        if !report_progress(callback, data, content.len() as u64) {
            let _ = fs::remove_file(&target);
            let mut state = self.lock();
            state.push_error(device, ErrorCode::Cancelled, "Transfer cancelled");
            return -1;
        }
        0
    }

    unsafe fn delete_object(&self, device: *mut LIBMTP_mtpdevice_t, object_id: u32) -> c_int {
        let mut state = self.lock();
        state.record("delete_object");
        let exists = state
            .device_mut(device)
            .objects
            .iter()
            .any(|o| o.object_id == object_id);
        if !exists || state.fails("delete_object") {
            state.push_error(device, ErrorCode::ProtocolLayerFailure, "Delete object failed");
            return -1;
        }

        let objects = &mut state.device_mut(device).objects;
        let mut doomed = vec![object_id];
        while let Some(id) = doomed.pop() {
            doomed.extend(objects.iter().filter(|o| o.parent_id == id).map(|o| o.object_id));
            objects.retain(|o| o.object_id != id);
        }
        0
    }

    unsafe fn get_files_and_folders(
        &self,
        device: *mut LIBMTP_mtpdevice_t,
        storage_id: u32,
        parent_id: u32,
    ) -> *mut LIBMTP_file_t {
        let mut state = self.lock();
        state.record("get_files_and_folders");
        state.last_listing_parent = Some(parent_id);
        if state.fails("get_files_and_folders") {
            state.push_error(device, ErrorCode::GeneralFailure, "Could not list objects");
            return ptr::null_mut();
        }

        let parent = match parent_id {
            LIBMTP_FILES_AND_FOLDERS_ROOT => ROOT,
            id => id,
        };
        let listed: Vec<MockObject> = state
            .device_mut(device)
            .objects
            .iter()
            .filter(|o| o.parent_id == parent && (storage_id == 0 || o.storage_id == storage_id))
            .cloned()
            .collect();

        let nodes: Vec<*mut LIBMTP_file_t> = listed.iter().map(|o| state.file_node(o)).collect();
        for pair in nodes.windows(2) {
            (*pair[0]).next = pair[1];
        }
        if state.cyclic_listing {
            if let (Some(&first), Some(&last)) = (nodes.first(), nodes.last()) {
                (*last).next = first;
            }
        }
        nodes.first().copied().unwrap_or(ptr::null_mut())
    }

    unsafe fn get_file_metadata(
        &self,
        device: *mut LIBMTP_mtpdevice_t,
        file_id: u32,
    ) -> *mut LIBMTP_file_t {
        let mut state = self.lock();
        state.record("get_file_metadata");
        let found = state
            .device_mut(device)
            .objects
            .iter()
            .find(|o| o.object_id == file_id)
            .cloned();
        match found {
            Some(object) if !state.fails("get_file_metadata") => state.file_node(&object),
            _ => {
                state.push_error(device, ErrorCode::GeneralFailure, "Object not found");
                ptr::null_mut()
            }
        }
    }

    unsafe fn destroy_file(&self, file: *mut LIBMTP_file_t) {
        let mut state = self.lock();
        state.record("destroy_file");
        state.untrack(file, Allocation::File);
        let node = Box::from_raw(file);
        free_owned_text(node.filename);
    }

    unsafe fn get_storage(&self, device: *mut LIBMTP_mtpdevice_t, _sort_by: c_int) -> c_int {
        let mut state = self.lock();
        state.record("get_storage");
        if state.fails("get_storage") {
            state.push_error(device, ErrorCode::ProtocolLayerFailure, "Get storage failed");
            return -1;
        }

        state.free_storage_list(device);
        let target = state.device_mut(device).clone();
        let mut prev: *mut LIBMTP_devicestorage_t = ptr::null_mut();
        for storage in &target.storages {
            let node = Box::into_raw(Box::new(LIBMTP_devicestorage_t {
                id: storage.id,
                StorageType: 3,
                FilesystemType: 2,
                AccessCapability: 0,
                MaxCapacity: storage.capacity,
                FreeSpaceInBytes: storage.free.saturating_sub(target.used_on(storage.id)),
                FreeSpaceInObjects: u32::MAX as u64,
                StorageDescription: owned_text(&storage.description),
                VolumeIdentifier: ptr::null_mut(),
                next: ptr::null_mut(),
                prev,
            }));
            state.track(node, Allocation::Storage);
            if prev.is_null() {
                (*device).storage = node;
            } else {
                (*prev).next = node;
            }
            prev = node;
        }
        0
    }

    unsafe fn get_folder_list(&self, device: *mut LIBMTP_mtpdevice_t) -> *mut LIBMTP_folder_t {
        let mut state = self.lock();
        state.record("get_folder_list");
        let folders: Vec<MockObject> = state
            .device_mut(device)
            .objects
            .iter()
            .filter(|o| o.is_folder)
            .cloned()
            .collect();
        state.folder_level(&folders, ROOT)
    }

    unsafe fn destroy_folder(&self, folder: *mut LIBMTP_folder_t) {
        let mut state = self.lock();
        state.record("destroy_folder");
        state.free_folder(folder);
    }

    unsafe fn get_errorstack(&self, device: *mut LIBMTP_mtpdevice_t) -> *mut LIBMTP_error_t {
        let mut state = self.lock();
        state.record("get_errorstack");
        state.index_of(device);
        (*device).errorstack
    }

    unsafe fn dump_errorstack(&self, device: *mut LIBMTP_mtpdevice_t) {
        let mut state = self.lock();
        state.record("dump_errorstack");
        state.index_of(device);
        let mut cursor = (*device).errorstack;
        while !cursor.is_null() {
            let text = if (*cursor).error_text.is_null() {
                String::new()
            } else {
                CStr::from_ptr((*cursor).error_text).to_string_lossy().into_owned()
            };
            debug!("mock error stack: {} {}", (*cursor).errornumber, text);
            cursor = (*cursor).next;
        }
    }

    unsafe fn clear_errorstack(&self, device: *mut LIBMTP_mtpdevice_t) {
        let mut state = self.lock();
        state.record("clear_errorstack");
        state.index_of(device);
        state.free_error_stack(device);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_raw_device_array_round_trip() {
        let engine = MockEngine::new();
        engine.add_device(MockDevice::new("Acme", "Player"));
        engine.set_raw_device_padding(2);

        let mut devices = ptr::null_mut();
        let mut count = 0;
        assert_eq!(engine.detect_raw_devices(&mut devices, &mut count), 0);
        assert_eq!(count, 1);
        assert_eq!(engine.live_allocations(), 1);

        unsafe { engine.free_raw_devices(devices) };
        assert_eq!(engine.live_allocations(), 0);
    }

    #[test]
    #[should_panic(expected = "released twice")]
    fn test_double_release_panics() {
        let engine = MockEngine::new();
        engine.add_device(MockDevice::new("Acme", "Player"));
        let mut devices = ptr::null_mut();
        let mut count = 0;
        engine.detect_raw_devices(&mut devices, &mut count);

        unsafe {
            engine.free_raw_devices(devices);
            engine.free_raw_devices(devices);
        }
    }

    #[test]
    fn test_error_stack_accumulates_until_cleared() {
        let engine = MockEngine::new();
        engine.add_device(MockDevice::new("Acme", "Player").with_storage(1, "Main", 10, 10));
        engine.fail_operation("delete_object");

        let mut raw = LIBMTP_raw_device_t::empty();
        raw.bus_location = 1;
        raw.devnum = 1;
        unsafe {
            let device = engine.open_raw_device_uncached(&mut raw);
            assert!(!device.is_null());
            engine.delete_object(device, 1);
            engine.delete_object(device, 2);
            let head = engine.get_errorstack(device);
            assert!(!head.is_null());
            assert!(!(*head).next.is_null());
            assert_eq!(engine.live_allocations(), 3);

            engine.clear_errorstack(device);
            assert!(engine.get_errorstack(device).is_null());
            engine.release_device(device);
        }
        assert_eq!(engine.live_allocations(), 0);
    }

    #[test]
    fn test_demo_engine_has_a_device() {
        let engine = MockEngine::demo();
        let descriptors = engine.descriptors();
        assert_eq!(descriptors.len(), 1);
        assert_eq!(descriptors[0].product.as_deref(), Some("Demo Player"));
        assert!(engine.object(7).is_some());
    }
}
