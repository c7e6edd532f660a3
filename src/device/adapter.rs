//! Foreign record adapter
//!
//! Turns the engine's pointer-linked records into owned, finite values:
//!
//! - `next`-linked lists (files, storages, error stack) become `Vec`s in link order
//! - `child`/`sibling`-linked folder trees become a forest of [`TreeNode`]s,
//!   walked pre-order (a node, its `child` subtree, then its `sibling`)
//! - nullable C strings become `Option<String>`, rejecting invalid UTF-8
//!
//! Every walk tracks the nodes it has seen. Visiting a node twice (a cycle or
//! a shared node) or exceeding [`AdapterLimits`] yields
//! [`MtpError::MalformedForeignData`] instead of looping.
//!
//! The `materialize_owned_*` variants also take over an engine release
//! contract: every node reachable from the head is unlinked and released
//! exactly once when the walk finishes, whether it succeeded or not. When a
//! walk stops early, an unbounded sweep that only stops on already-walked
//! nodes picks up the rest of the list or tree before release.

use libc::{c_char, c_int};
use log::trace;
use std::collections::HashSet;
use std::ffi::CStr;
use std::ptr;

use super::sys::{
    LIBMTP_devicestorage_t, LIBMTP_error_t, LIBMTP_file_t, LIBMTP_folder_t, LIBMTP_raw_device_t,
};
use super::types::{
    ErrorRecord, FileEntry, FolderEntry, ParentId, RawDeviceDescriptor, StorageVolume, TreeNode,
};
use crate::core::error::{ErrorCode, MtpError, Result};
use crate::core::filetype::FileType;

/// Default bound on the number of nodes in any single foreign structure
pub const DEFAULT_MAX_NODES: usize = 1 << 20;

/// Default bound on folder tree depth
pub const DEFAULT_MAX_DEPTH: usize = 512;

/// Traversal bounds for foreign structures
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AdapterLimits {
    pub max_nodes: usize,
    pub max_depth: usize,
}

impl Default for AdapterLimits {
    fn default() -> Self {
        Self {
            max_nodes: DEFAULT_MAX_NODES,
            max_depth: DEFAULT_MAX_DEPTH,
        }
    }
}

/// A foreign record that can be cut loose from its neighbours before release
pub trait ForeignRecord {
    /// Used in diagnostics ("file list", "folder tree", ...)
    const KIND: &'static str;

    /// Null out every link field
    fn unlink(&mut self);
}

/// A record in a singly `next`-linked list
pub trait LinkedRecord: ForeignRecord {
    fn next(&self) -> *mut Self;
}

/// A record in a `child`/`sibling` linked tree
pub trait TreeRecord: ForeignRecord {
    fn child(&self) -> *mut Self;
    fn sibling(&self) -> *mut Self;
}

impl ForeignRecord for LIBMTP_file_t {
    const KIND: &'static str = "file list";

    fn unlink(&mut self) {
        self.next = ptr::null_mut();
    }
}

impl LinkedRecord for LIBMTP_file_t {
    fn next(&self) -> *mut Self {
        self.next
    }
}

impl ForeignRecord for LIBMTP_devicestorage_t {
    const KIND: &'static str = "storage list";

    fn unlink(&mut self) {
        self.next = ptr::null_mut();
        self.prev = ptr::null_mut();
    }
}

impl LinkedRecord for LIBMTP_devicestorage_t {
    fn next(&self) -> *mut Self {
        self.next
    }
}

impl ForeignRecord for LIBMTP_error_t {
    const KIND: &'static str = "error stack";

    fn unlink(&mut self) {
        self.next = ptr::null_mut();
    }
}

impl LinkedRecord for LIBMTP_error_t {
    fn next(&self) -> *mut Self {
        self.next
    }
}

impl ForeignRecord for LIBMTP_folder_t {
    const KIND: &'static str = "folder tree";

    fn unlink(&mut self) {
        self.child = ptr::null_mut();
        self.sibling = ptr::null_mut();
    }
}

impl TreeRecord for LIBMTP_folder_t {
    fn child(&self) -> *mut Self {
        self.child
    }

    fn sibling(&self) -> *mut Self {
        self.sibling
    }
}

/// Seen-set and node budget for one walk
struct Walk {
    kind: &'static str,
    seen: HashSet<usize>,
    limits: AdapterLimits,
}

impl Walk {
    fn new(kind: &'static str, limits: &AdapterLimits) -> Self {
        Self {
            kind,
            seen: HashSet::new(),
            limits: *limits,
        }
    }

    fn visit<T>(&mut self, node: *mut T) -> Result<()> {
        if !self.seen.insert(node as usize) {
            return Err(MtpError::MalformedForeignData(format!(
                "{} links back to an already visited node after {} nodes",
                self.kind,
                self.seen.len()
            )));
        }
        if self.seen.len() > self.limits.max_nodes {
            return Err(MtpError::MalformedForeignData(format!(
                "{} exceeds {} nodes",
                self.kind, self.limits.max_nodes
            )));
        }
        Ok(())
    }
}

/// Releases visited nodes through the engine when dropped
struct ReleaseGuard<T: ForeignRecord, R: FnMut(*mut T)> {
    nodes: Vec<*mut T>,
    release: R,
}

impl<T: ForeignRecord, R: FnMut(*mut T)> Drop for ReleaseGuard<T, R> {
    fn drop(&mut self) {
        trace!("Releasing {} {} node(s)", self.nodes.len(), T::KIND);
        for node in self.nodes.drain(..) {
            // SAFETY: every pointer was collected exactly once from engine
            // memory the caller handed us ownership of. Unlinking first
            // keeps recursive engine destructors from reaching other nodes.
            unsafe {
                (*node).unlink();
            }
            (self.release)(node);
        }
    }
}

unsafe fn collect_list<T: LinkedRecord>(
    head: *mut T,
    limits: &AdapterLimits,
    nodes: &mut Vec<*mut T>,
) -> Result<()> {
    let mut walk = Walk::new(T::KIND, limits);
    let mut cursor = head;
    while !cursor.is_null() {
        walk.visit(cursor)?;
        nodes.push(cursor);
        cursor = (*cursor).next();
    }
    trace!("Walked {} with {} node(s)", T::KIND, nodes.len());
    Ok(())
}

unsafe fn collect_tree<T, U, F>(
    first: *mut T,
    depth: usize,
    walk: &mut Walk,
    visited: &mut Vec<*mut T>,
    convert: &mut F,
) -> Result<Vec<TreeNode<U>>>
where
    T: TreeRecord,
    F: FnMut(&T) -> Result<U>,
{
    let mut level = Vec::new();
    let mut cursor = first;
    while !cursor.is_null() {
        walk.visit(cursor)?;
        visited.push(cursor);

        let record = &*cursor;
        let value = convert(record)?;
        let child = record.child();
        let children = if child.is_null() {
            Vec::new()
        } else if depth + 1 >= walk.limits.max_depth {
            return Err(MtpError::MalformedForeignData(format!(
                "{} is deeper than {} levels",
                walk.kind, walk.limits.max_depth
            )));
        } else {
            collect_tree(child, depth + 1, walk, visited, convert)?
        };

        level.push(TreeNode { value, children });
        cursor = record.sibling();
    }
    Ok(level)
}

/// Append every node reachable from `head` that is not yet in `nodes`
unsafe fn sweep_list<T: LinkedRecord>(head: *mut T, nodes: &mut Vec<*mut T>) {
    let owned: HashSet<usize> = nodes.iter().map(|&node| node as usize).collect();
    let mut walked = HashSet::new();
    let mut cursor = head;
    while !cursor.is_null() && walked.insert(cursor as usize) {
        if !owned.contains(&(cursor as usize)) {
            nodes.push(cursor);
        }
        cursor = (*cursor).next();
    }
    trace!(
        "Swept {} to {} node(s) after an early stop",
        T::KIND,
        nodes.len()
    );
}

/// Tree counterpart of [`sweep_list`], iterative so depth cannot overflow the stack
unsafe fn sweep_tree<T: TreeRecord>(root: *mut T, nodes: &mut Vec<*mut T>) {
    let owned: HashSet<usize> = nodes.iter().map(|&node| node as usize).collect();
    let mut walked = HashSet::new();
    let mut pending = vec![root];
    while let Some(node) = pending.pop() {
        if node.is_null() || !walked.insert(node as usize) {
            continue;
        }
        if !owned.contains(&(node as usize)) {
            nodes.push(node);
        }
        pending.push((*node).sibling());
        pending.push((*node).child());
    }
    trace!(
        "Swept {} to {} node(s) after an early stop",
        T::KIND,
        nodes.len()
    );
}

/// Copy a `next`-linked list the caller does not own.
///
/// # Safety
/// `head` must be null or point to a list of valid records that stays alive
/// and unmodified for the duration of the call.
pub unsafe fn materialize_list<T, U, F>(
    head: *const T,
    limits: &AdapterLimits,
    mut convert: F,
) -> Result<Vec<U>>
where
    T: LinkedRecord,
    F: FnMut(&T) -> Result<U>,
{
    let mut nodes = Vec::new();
    collect_list(head as *mut T, limits, &mut nodes)?;
    nodes.into_iter().map(|node| convert(&*node)).collect()
}

/// Copy a `next`-linked list and release every node through `release`.
///
/// # Safety
/// As for [`materialize_list`]; in addition the caller transfers ownership of
/// every node to this function and `release` must be the matching engine
/// destructor for a single node.
pub unsafe fn materialize_owned_list<T, U, F, R>(
    head: *mut T,
    limits: &AdapterLimits,
    mut convert: F,
    release: R,
) -> Result<Vec<U>>
where
    T: LinkedRecord,
    F: FnMut(&T) -> Result<U>,
    R: FnMut(*mut T),
{
    let mut guard = ReleaseGuard {
        nodes: Vec::new(),
        release,
    };
    if let Err(e) = collect_list(head, limits, &mut guard.nodes) {
        sweep_list(head, &mut guard.nodes);
        return Err(e);
    }
    let converted = guard.nodes.iter().map(|&node| convert(&*node)).collect();
    converted
}

/// Copy a `child`/`sibling` tree the caller does not own, pre-order.
///
/// # Safety
/// `root` must be null or point to a tree of valid records that stays alive
/// and unmodified for the duration of the call.
pub unsafe fn materialize_tree<T, U, F>(
    root: *const T,
    limits: &AdapterLimits,
    mut convert: F,
) -> Result<Vec<TreeNode<U>>>
where
    T: TreeRecord,
    F: FnMut(&T) -> Result<U>,
{
    let mut walk = Walk::new(T::KIND, limits);
    let mut visited = Vec::new();
    collect_tree(root as *mut T, 0, &mut walk, &mut visited, &mut convert)
}

/// Copy a `child`/`sibling` tree and release every reachable node.
///
/// # Safety
/// As for [`materialize_tree`]; ownership of the whole tree passes to this
/// function. Nodes are unlinked before `release`, so a recursive engine
/// destructor frees exactly one node per call.
pub unsafe fn materialize_owned_tree<T, U, F, R>(
    root: *mut T,
    limits: &AdapterLimits,
    mut convert: F,
    release: R,
) -> Result<Vec<TreeNode<U>>>
where
    T: TreeRecord,
    F: FnMut(&T) -> Result<U>,
    R: FnMut(*mut T),
{
    let mut guard = ReleaseGuard {
        nodes: Vec::new(),
        release,
    };
    let mut walk = Walk::new(T::KIND, limits);
    let forest = collect_tree(root, 0, &mut walk, &mut guard.nodes, &mut convert);
    if forest.is_err() {
        sweep_tree(root, &mut guard.nodes);
    }
    trace!("Walked {} with {} node(s)", T::KIND, guard.nodes.len());
    forest
}

/// Decode a nullable C string. Null is `None`; invalid UTF-8 is an error.
///
/// # Safety
/// `text` must be null or point to a NUL-terminated string.
pub unsafe fn decode_c_string(text: *const c_char, field: &'static str) -> Result<Option<String>> {
    if text.is_null() {
        return Ok(None);
    }
    CStr::from_ptr(text)
        .to_str()
        .map(|s| Some(s.to_owned()))
        .map_err(|source| MtpError::Encoding { field, source })
}

/// Decode an engine-allocated string and hand it back to the engine.
///
/// # Safety
/// As for [`decode_c_string`]; `release` must be the engine's string destructor.
pub unsafe fn take_engine_string<R>(
    text: *mut c_char,
    field: &'static str,
    release: R,
) -> Result<Option<String>>
where
    R: FnOnce(*mut c_char),
{
    if text.is_null() {
        return Ok(None);
    }
    let decoded = decode_c_string(text, field);
    release(text);
    decoded
}

/// Copy exactly `count` raw device records.
///
/// The count is authoritative: entries past it are never read, even when the
/// engine allocated a larger array.
///
/// # Safety
/// `devices` must be null or point to at least `count` valid records.
pub unsafe fn copy_raw_devices(
    devices: *const LIBMTP_raw_device_t,
    count: c_int,
    limits: &AdapterLimits,
) -> Result<Vec<RawDeviceDescriptor>> {
    let count = usize::try_from(count).map_err(|_| {
        MtpError::MalformedForeignData(format!("negative raw device count {}", count))
    })?;
    if count == 0 {
        return Ok(Vec::new());
    }
    if devices.is_null() {
        return Err(MtpError::MalformedForeignData(format!(
            "{} raw device(s) reported without a device array",
            count
        )));
    }
    if count > limits.max_nodes {
        return Err(MtpError::MalformedForeignData(format!(
            "raw device count {} exceeds {}",
            count, limits.max_nodes
        )));
    }
    std::slice::from_raw_parts(devices, count)
        .iter()
        .map(|raw| raw_device_from_raw(raw))
        .collect()
}

/// # Safety
/// String fields must be null or NUL-terminated.
pub unsafe fn raw_device_from_raw(raw: &LIBMTP_raw_device_t) -> Result<RawDeviceDescriptor> {
    let entry = &raw.device_entry;
    Ok(RawDeviceDescriptor {
        bus_location: raw.bus_location,
        device_number: raw.devnum,
        vendor_id: entry.vendor_id,
        product_id: entry.product_id,
        vendor: decode_c_string(entry.vendor, "vendor")?,
        product: decode_c_string(entry.product, "product")?,
        device_flags: entry.device_flags,
    })
}

/// # Safety
/// String fields must be null or NUL-terminated.
pub unsafe fn storage_from_raw(raw: &LIBMTP_devicestorage_t) -> Result<StorageVolume> {
    Ok(StorageVolume {
        id: raw.id,
        description: decode_c_string(raw.StorageDescription, "StorageDescription")?,
        volume_identifier: decode_c_string(raw.VolumeIdentifier, "VolumeIdentifier")?,
        storage_type: raw.StorageType,
        filesystem_type: raw.FilesystemType,
        access_capability: raw.AccessCapability,
        max_capacity: raw.MaxCapacity,
        free_space_bytes: raw.FreeSpaceInBytes,
        free_space_objects: raw.FreeSpaceInObjects,
    })
}

/// # Safety
/// `filename` must be null or NUL-terminated.
pub unsafe fn file_from_raw(raw: &LIBMTP_file_t) -> Result<FileEntry> {
    Ok(FileEntry {
        item_id: raw.item_id,
        parent_id: ParentId::from_raw(raw.parent_id),
        storage_id: raw.storage_id,
        filename: decode_c_string(raw.filename, "filename")?,
        size: raw.filesize,
        modified: chrono::DateTime::from_timestamp(raw.modificationdate as i64, 0),
        file_type: FileType::from_raw(raw.filetype),
    })
}

/// # Safety
/// `name` must be null or NUL-terminated.
pub unsafe fn folder_from_raw(raw: &LIBMTP_folder_t) -> Result<FolderEntry> {
    Ok(FolderEntry {
        folder_id: raw.folder_id,
        parent_id: ParentId::from_raw(raw.parent_id),
        storage_id: raw.storage_id,
        name: decode_c_string(raw.name, "name")?,
    })
}

/// # Safety
/// `error_text` must be null or NUL-terminated.
pub unsafe fn error_from_raw(raw: &LIBMTP_error_t) -> Result<ErrorRecord> {
    Ok(ErrorRecord {
        code: ErrorCode::from_raw(raw.errornumber),
        text: decode_c_string(raw.error_text, "error_text")?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::ffi::CString;

    fn file_node(id: u32, name: &CString) -> LIBMTP_file_t {
        LIBMTP_file_t {
            item_id: id,
            parent_id: 0xFFFF_FFFF,
            storage_id: 0x10001,
            filename: name.as_ptr() as *mut c_char,
            filesize: id as u64 * 100,
            modificationdate: 1_700_000_000,
            filetype: FileType::Mp3.raw(),
            ..LIBMTP_file_t::empty()
        }
    }

    fn folder_node(id: u32, parent: u32) -> LIBMTP_folder_t {
        LIBMTP_folder_t {
            folder_id: id,
            parent_id: parent,
            storage_id: 0x10001,
            ..LIBMTP_folder_t::empty()
        }
    }

    /// Link `nodes[i].next = nodes[i + 1]`
    fn chain(nodes: &mut [LIBMTP_file_t]) -> *mut LIBMTP_file_t {
        let base = nodes.as_mut_ptr();
        for i in 0..nodes.len().saturating_sub(1) {
            unsafe {
                (*base.add(i)).next = base.add(i + 1);
            }
        }
        base
    }

    fn convert_file(raw: &LIBMTP_file_t) -> Result<FileEntry> {
        unsafe { file_from_raw(raw) }
    }

    fn convert_folder_id(raw: &LIBMTP_folder_t) -> Result<u32> {
        Ok(raw.folder_id)
    }

    #[test]
    fn test_three_node_list_keeps_order() {
        let names: Vec<CString> = ["a.mp3", "b.mp3", "c.mp3"]
            .iter()
            .map(|n| CString::new(*n).unwrap())
            .collect();
        let mut nodes: Vec<LIBMTP_file_t> = names
            .iter()
            .enumerate()
            .map(|(i, n)| file_node(i as u32 + 1, n))
            .collect();
        let head = chain(&mut nodes);

        let files =
            unsafe { materialize_list(head, &AdapterLimits::default(), convert_file) }.unwrap();

        assert_eq!(files.len(), 3);
        let ids: Vec<u32> = files.iter().map(|f| f.item_id).collect();
        assert_eq!(ids, vec![1, 2, 3]);
        assert_eq!(files[0].filename.as_deref(), Some("a.mp3"));
        assert_eq!(files[2].size, 300);
        assert_eq!(files[0].parent_id, ParentId::Root);
        assert_eq!(files[0].file_type, FileType::Mp3);
        assert_eq!(files[0].modified.unwrap().timestamp(), 1_700_000_000);
    }

    #[test]
    fn test_null_head_is_empty() {
        let files = unsafe {
            materialize_list(
                ptr::null::<LIBMTP_file_t>(),
                &AdapterLimits::default(),
                convert_file,
            )
        }
        .unwrap();
        assert!(files.is_empty());
    }

    #[test]
    fn test_cyclic_list_is_malformed() {
        let name = CString::new("loop.mp3").unwrap();
        let mut nodes = vec![file_node(1, &name), file_node(2, &name), file_node(3, &name)];
        let head = chain(&mut nodes);
        unsafe {
            (*head.add(2)).next = head;
        }

        let result = unsafe { materialize_list(head, &AdapterLimits::default(), convert_file) };
        assert!(matches!(result, Err(MtpError::MalformedForeignData(_))));
    }

    #[test]
    fn test_self_loop_is_malformed() {
        let name = CString::new("self.mp3").unwrap();
        let mut node = file_node(1, &name);
        let head: *mut LIBMTP_file_t = &mut node;
        unsafe {
            (*head).next = head;
        }

        let result = unsafe { materialize_list(head, &AdapterLimits::default(), convert_file) };
        assert!(matches!(result, Err(MtpError::MalformedForeignData(_))));
    }

    #[test]
    fn test_list_longer_than_bound_is_malformed() {
        let name = CString::new("x.mp3").unwrap();
        let mut nodes: Vec<LIBMTP_file_t> = (1..=5).map(|i| file_node(i, &name)).collect();
        let head = chain(&mut nodes);
        let limits = AdapterLimits {
            max_nodes: 4,
            ..AdapterLimits::default()
        };

        let result = unsafe { materialize_list(head, &limits, convert_file) };
        match result {
            Err(MtpError::MalformedForeignData(msg)) => assert!(msg.contains("exceeds 4")),
            other => panic!("expected malformed data, got {:?}", other),
        }

        let exact = AdapterLimits {
            max_nodes: 5,
            ..AdapterLimits::default()
        };
        let files = unsafe { materialize_list(head, &exact, convert_file) }.unwrap();
        assert_eq!(files.len(), 5);
    }

    #[test]
    fn test_owned_list_releases_each_node_once() {
        let name = CString::new("owned.mp3").unwrap();
        let n3 = Box::into_raw(Box::new(file_node(3, &name)));
        let n2 = Box::into_raw(Box::new(LIBMTP_file_t {
            next: n3,
            ..file_node(2, &name)
        }));
        let n1 = Box::into_raw(Box::new(LIBMTP_file_t {
            next: n2,
            ..file_node(1, &name)
        }));

        let mut released = Vec::new();
        let files = unsafe {
            materialize_owned_list(n1, &AdapterLimits::default(), convert_file, |node| {
                assert!((*node).next.is_null());
                released.push(node as usize);
                drop(Box::from_raw(node));
            })
        }
        .unwrap();

        assert_eq!(files.len(), 3);
        assert_eq!(released, vec![n1 as usize, n2 as usize, n3 as usize]);
    }

    #[test]
    fn test_owned_cyclic_list_still_releases_every_node_once() {
        let name = CString::new("cycle.mp3").unwrap();
        let n2 = Box::into_raw(Box::new(file_node(2, &name)));
        let n1 = Box::into_raw(Box::new(LIBMTP_file_t {
            next: n2,
            ..file_node(1, &name)
        }));
        unsafe {
            (*n2).next = n1;
        }

        let mut released = HashSet::new();
        let result = unsafe {
            materialize_owned_list(n1, &AdapterLimits::default(), convert_file, |node| {
                assert!(released.insert(node as usize), "node released twice");
                drop(Box::from_raw(node));
            })
        };

        assert!(matches!(result, Err(MtpError::MalformedForeignData(_))));
        assert_eq!(released.len(), 2);
    }

    #[test]
    fn test_owned_list_releases_on_conversion_error() {
        let bad = CString::new(vec![b'o', b'k', 0xFF, b'!']).unwrap();
        let n1 = Box::into_raw(Box::new(file_node(1, &bad)));

        let mut released = 0;
        let result = unsafe {
            materialize_owned_list(n1, &AdapterLimits::default(), convert_file, |node| {
                released += 1;
                drop(Box::from_raw(node));
            })
        };

        assert!(matches!(
            result,
            Err(MtpError::Encoding {
                field: "filename",
                ..
            })
        ));
        assert_eq!(released, 1);
    }

    #[test]
    fn test_folder_tree_is_preorder_child_before_sibling() {
        // root(1) -> child1(2) -> subchild1(3)
        //         -> child2(4)
        let mut nodes = vec![
            folder_node(1, 0),
            folder_node(2, 1),
            folder_node(3, 2),
            folder_node(4, 1),
        ];
        let base = nodes.as_mut_ptr();
        unsafe {
            (*base).child = base.add(1);
            (*base.add(1)).child = base.add(2);
            (*base.add(1)).sibling = base.add(3);
        }

        let forest =
            unsafe { materialize_tree(base, &AdapterLimits::default(), convert_folder_id) }
                .unwrap();

        assert_eq!(forest.len(), 1);
        assert_eq!(forest[0].preorder(), vec![&1, &2, &3, &4]);
        assert_eq!(forest[0].children.len(), 2);
        assert_eq!(forest[0].children[0].children[0].value, 3);
    }

    #[test]
    fn test_top_level_siblings_form_a_forest() {
        let mut nodes = vec![folder_node(10, 0), folder_node(11, 10), folder_node(20, 0)];
        let base = nodes.as_mut_ptr();
        unsafe {
            (*base).child = base.add(1);
            (*base).sibling = base.add(2);
        }

        let forest = unsafe {
            materialize_tree(base, &AdapterLimits::default(), |raw: &LIBMTP_folder_t| unsafe {
                folder_from_raw(raw)
            })
        }
        .unwrap();

        assert_eq!(forest.len(), 2);
        assert_eq!(forest[0].value.folder_id, 10);
        assert_eq!(forest[0].value.parent_id, ParentId::Root);
        assert_eq!(forest[0].children[0].value.parent_id, ParentId::Object(10));
        assert_eq!(forest[1].value.folder_id, 20);
        assert_eq!(forest[0].value.name, None);
    }

    #[test]
    fn test_tree_cycle_is_malformed() {
        let mut nodes = vec![folder_node(1, 0), folder_node(2, 1)];
        let base = nodes.as_mut_ptr();
        unsafe {
            (*base).child = base.add(1);
            (*base.add(1)).sibling = base;
        }

        let result =
            unsafe { materialize_tree(base, &AdapterLimits::default(), convert_folder_id) };
        assert!(matches!(result, Err(MtpError::MalformedForeignData(_))));
    }

    #[test]
    fn test_tree_depth_bound() {
        let mut nodes: Vec<LIBMTP_folder_t> = (1..=4).map(|i| folder_node(i, i - 1)).collect();
        let base = nodes.as_mut_ptr();
        for i in 0..3 {
            unsafe {
                (*base.add(i)).child = base.add(i + 1);
            }
        }

        let shallow = AdapterLimits {
            max_depth: 3,
            ..AdapterLimits::default()
        };
        let result = unsafe { materialize_tree(base, &shallow, convert_folder_id) };
        assert!(matches!(result, Err(MtpError::MalformedForeignData(_))));

        let deep_enough = AdapterLimits {
            max_depth: 4,
            ..AdapterLimits::default()
        };
        let forest = unsafe { materialize_tree(base, &deep_enough, convert_folder_id) }.unwrap();
        assert_eq!(forest[0].len(), 4);
    }

    #[test]
    fn test_owned_tree_releases_every_node_unlinked() {
        let c2 = Box::into_raw(Box::new(folder_node(4, 1)));
        let s1 = Box::into_raw(Box::new(folder_node(3, 2)));
        let c1 = Box::into_raw(Box::new(LIBMTP_folder_t {
            child: s1,
            sibling: c2,
            ..folder_node(2, 1)
        }));
        let root = Box::into_raw(Box::new(LIBMTP_folder_t {
            child: c1,
            ..folder_node(1, 0)
        }));

        let mut released = Vec::new();
        let forest = unsafe {
            materialize_owned_tree(root, &AdapterLimits::default(), convert_folder_id, |node| {
                assert!((*node).child.is_null() && (*node).sibling.is_null());
                released.push((*node).folder_id);
                drop(Box::from_raw(node));
            })
        }
        .unwrap();

        assert_eq!(forest[0].preorder(), vec![&1, &2, &3, &4]);
        assert_eq!(released, vec![1, 2, 3, 4]);
    }

    fn boxed_file_chain(len: u32, name: &CString) -> *mut LIBMTP_file_t {
        let mut head: *mut LIBMTP_file_t = ptr::null_mut();
        for id in (1..=len).rev() {
            head = Box::into_raw(Box::new(LIBMTP_file_t {
                next: head,
                ..file_node(id, name)
            }));
        }
        head
    }

    #[test]
    fn test_owned_list_over_bound_releases_the_tail_too() {
        let name = CString::new("long.mp3").unwrap();
        let head = boxed_file_chain(6, &name);
        let limits = AdapterLimits {
            max_nodes: 3,
            ..AdapterLimits::default()
        };

        let mut released = HashSet::new();
        let result = unsafe {
            materialize_owned_list(head, &limits, convert_file, |node| {
                assert!((*node).next.is_null());
                assert!(released.insert((*node).item_id), "node released twice");
                drop(Box::from_raw(node));
            })
        };

        assert!(matches!(result, Err(MtpError::MalformedForeignData(_))));
        assert_eq!(released, (1..=6).collect::<HashSet<u32>>());
    }

    #[test]
    fn test_owned_cyclic_list_over_bound_releases_each_node_once() {
        let name = CString::new("ring.mp3").unwrap();
        let head = boxed_file_chain(5, &name);
        unsafe {
            let mut last = head;
            while !(*last).next.is_null() {
                last = (*last).next;
            }
            (*last).next = (*head).next;
        }
        let limits = AdapterLimits {
            max_nodes: 2,
            ..AdapterLimits::default()
        };

        let mut released = HashSet::new();
        let result = unsafe {
            materialize_owned_list(head, &limits, convert_file, |node| {
                assert!(released.insert((*node).item_id), "node released twice");
                drop(Box::from_raw(node));
            })
        };

        assert!(result.is_err());
        assert_eq!(released.len(), 5);
    }

    #[test]
    fn test_owned_tree_over_depth_releases_unvisited_subtrees() {
        // chain 1 -> 2 -> 3 -> 4 -> 5 through `child`, plus sibling 6 of node 2
        let mut nodes: Vec<*mut LIBMTP_folder_t> = (1..=6)
            .map(|id| Box::into_raw(Box::new(folder_node(id, 0))))
            .collect();
        unsafe {
            for i in 0..4 {
                (*nodes[i]).child = nodes[i + 1];
            }
            (*nodes[1]).sibling = nodes[5];
        }
        let root = nodes[0];
        nodes.clear();
        let limits = AdapterLimits {
            max_depth: 2,
            ..AdapterLimits::default()
        };

        let mut released = HashSet::new();
        let result = unsafe {
            materialize_owned_tree(root, &limits, convert_folder_id, |node| {
                assert!((*node).child.is_null() && (*node).sibling.is_null());
                assert!(released.insert((*node).folder_id), "node released twice");
                drop(Box::from_raw(node));
            })
        };

        assert!(matches!(result, Err(MtpError::MalformedForeignData(_))));
        assert_eq!(released, (1..=6).collect::<HashSet<u32>>());
    }

    #[test]
    fn test_owned_tree_releases_rest_on_conversion_error() {
        let c2 = Box::into_raw(Box::new(folder_node(3, 1)));
        let c1 = Box::into_raw(Box::new(LIBMTP_folder_t {
            sibling: c2,
            ..folder_node(2, 1)
        }));
        let root = Box::into_raw(Box::new(LIBMTP_folder_t {
            child: c1,
            ..folder_node(1, 0)
        }));

        let mut released = 0;
        let result = unsafe {
            materialize_owned_tree(
                root,
                &AdapterLimits::default(),
                |raw: &LIBMTP_folder_t| {
                    if raw.folder_id == 2 {
                        Err(MtpError::MalformedForeignData("bad folder".to_string()))
                    } else {
                        Ok(raw.folder_id)
                    }
                },
                |node| {
                    released += 1;
                    drop(Box::from_raw(node));
                },
            )
        };

        assert!(result.is_err());
        assert_eq!(released, 3);
    }

    #[test]
    fn test_decode_null_is_absent_not_empty() {
        assert_eq!(unsafe { decode_c_string(ptr::null(), "name") }.unwrap(), None);

        let empty = CString::new("").unwrap();
        assert_eq!(
            unsafe { decode_c_string(empty.as_ptr(), "name") }.unwrap(),
            Some(String::new())
        );

        let unicode = CString::new("Füchtenhans").unwrap();
        assert_eq!(
            unsafe { decode_c_string(unicode.as_ptr(), "name") }.unwrap(),
            Some("Füchtenhans".to_string())
        );
    }

    #[test]
    fn test_decode_invalid_utf8_fails() {
        let invalid = CString::new(vec![0xC3, 0x28]).unwrap();
        let result = unsafe { decode_c_string(invalid.as_ptr(), "StorageDescription") };
        assert!(matches!(
            result,
            Err(MtpError::Encoding {
                field: "StorageDescription",
                ..
            })
        ));
    }

    #[test]
    fn test_take_engine_string_releases_on_error_too() {
        let invalid = CString::new(vec![0xFF]).unwrap().into_raw();
        let mut released = false;
        let result = unsafe {
            take_engine_string(invalid, "friendly name", |text| {
                released = true;
                drop(CString::from_raw(text));
            })
        };
        assert!(result.is_err());
        assert!(released);
    }

    #[test]
    fn test_copy_raw_devices_honours_count() {
        let vendor = CString::new("Google").unwrap();
        let mut devices = vec![LIBMTP_raw_device_t::empty(); 4];
        for (i, device) in devices.iter_mut().enumerate() {
            device.bus_location = 1;
            device.devnum = i as u8 + 5;
            device.device_entry.vendor = vendor.as_ptr() as *mut c_char;
            device.device_entry.vendor_id = 0x18d1;
        }

        let copied =
            unsafe { copy_raw_devices(devices.as_ptr(), 2, &AdapterLimits::default()) }.unwrap();
        assert_eq!(copied.len(), 2);
        assert_eq!(copied[1].device_number, 6);
        assert_eq!(copied[0].vendor.as_deref(), Some("Google"));
        assert_eq!(copied[0].product, None);

        let negative = unsafe { copy_raw_devices(devices.as_ptr(), -1, &AdapterLimits::default()) };
        assert!(matches!(negative, Err(MtpError::MalformedForeignData(_))));

        let missing = unsafe { copy_raw_devices(ptr::null(), 1, &AdapterLimits::default()) };
        assert!(matches!(missing, Err(MtpError::MalformedForeignData(_))));
    }

    #[test]
    fn test_storage_list_materializes_in_order() {
        let internal = CString::new("Internal").unwrap();
        let card = CString::new("SD Card").unwrap();
        let mut second = LIBMTP_devicestorage_t {
            id: 2,
            StorageDescription: card.as_ptr() as *mut c_char,
            ..LIBMTP_devicestorage_t::empty()
        };
        let first = LIBMTP_devicestorage_t {
            id: 1,
            StorageDescription: internal.as_ptr() as *mut c_char,
            next: &mut second,
            ..LIBMTP_devicestorage_t::empty()
        };

        let volumes = unsafe {
            materialize_list(&first, &AdapterLimits::default(), |raw| unsafe {
                storage_from_raw(raw)
            })
        }
        .unwrap();
        let pairs: Vec<(Option<&str>, u32)> = volumes
            .iter()
            .map(|v| (v.description.as_deref(), v.id))
            .collect();
        assert_eq!(pairs, vec![(Some("Internal"), 1), (Some("SD Card"), 2)]);
    }
}
