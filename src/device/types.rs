//! Owned records copied out of the engine
//!
//! Nothing here points into engine memory. Optional text fields are `None`
//! when the engine handed back a null pointer, which is not the same thing as
//! an empty string.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::fmt;

use super::sys::LIBMTP_FILES_AND_FOLDERS_ROOT;
use crate::core::error::ErrorCode;
use crate::core::filetype::FileType;

/// Storage id that lets the engine pick the primary storage
pub const PRIMARY_STORAGE: u32 = 0;

/// Parent of an object on the device
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum ParentId {
    /// No parent folder: the object sits at the top of its storage
    Root,
    /// A real folder id
    Object(u32),
}

impl ParentId {
    /// Decode a parent id from an engine record.
    ///
    /// Engines report top-level objects with either `0xFFFFFFFF` or `0`;
    /// neither is ever a valid object handle, so both become `Root`.
    pub fn from_raw(raw: u32) -> Self {
        match raw {
            LIBMTP_FILES_AND_FOLDERS_ROOT | 0 => ParentId::Root,
            id => ParentId::Object(id),
        }
    }

    /// Encoding for listing calls, where the root is `0xFFFFFFFF`
    pub fn for_listing(self) -> u32 {
        match self {
            ParentId::Root => LIBMTP_FILES_AND_FOLDERS_ROOT,
            ParentId::Object(id) => id,
        }
    }

    /// Encoding for create/send calls, where 0 means the root (or the
    /// engine's default folder for the file type)
    pub fn for_creation(self) -> u32 {
        match self {
            ParentId::Root => 0,
            ParentId::Object(id) => id,
        }
    }

    pub fn is_root(self) -> bool {
        matches!(self, ParentId::Root)
    }
}

impl From<u32> for ParentId {
    fn from(raw: u32) -> Self {
        ParentId::from_raw(raw)
    }
}

impl fmt::Display for ParentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ParentId::Root => f.write_str("root"),
            ParentId::Object(id) => write!(f, "{}", id),
        }
    }
}

/// A device seen on the bus before any session is opened
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RawDeviceDescriptor {
    pub bus_location: u32,
    pub device_number: u8,
    pub vendor_id: u16,
    pub product_id: u16,
    pub vendor: Option<String>,
    pub product: Option<String>,
    /// libmtp `DEVICE_FLAG_*` quirk bits
    pub device_flags: u32,
}

impl RawDeviceDescriptor {
    /// Stable identifier for this USB position, e.g. `mtp-1-5`
    pub fn id(&self) -> String {
        format!("mtp-{}-{}", self.bus_location, self.device_number)
    }

    /// Prefers the product name, then the vendor, then the USB ids
    pub fn display_name(&self) -> String {
        match (&self.vendor, &self.product) {
            (Some(vendor), Some(product)) => format!("{} {}", vendor, product),
            (None, Some(product)) => product.clone(),
            (Some(vendor), None) => format!("{} device", vendor),
            (None, None) => format!(
                "MTP device ({:04x}:{:04x})",
                self.vendor_id, self.product_id
            ),
        }
    }
}

/// One storage area (internal memory, SD card, ...)
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StorageVolume {
    pub id: u32,
    pub description: Option<String>,
    pub volume_identifier: Option<String>,
    pub storage_type: u16,
    pub filesystem_type: u16,
    /// 0 = read/write, 1 = read-only without delete, 2 = read-only with delete
    pub access_capability: u16,
    pub max_capacity: u64,
    pub free_space_bytes: u64,
    pub free_space_objects: u64,
}

impl StorageVolume {
    pub fn is_read_only(&self) -> bool {
        self.access_capability != 0
    }

    pub fn used_bytes(&self) -> u64 {
        self.max_capacity.saturating_sub(self.free_space_bytes)
    }
}

/// Capacity figures of one storage, read fresh from the device
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct StorageUsage {
    pub total: u64,
    pub free: u64,
    pub used: u64,
}

impl StorageUsage {
    pub fn from_volume(volume: &StorageVolume) -> Self {
        Self {
            total: volume.max_capacity,
            free: volume.free_space_bytes,
            used: volume.used_bytes(),
        }
    }

    /// Percentage of the capacity in use; 0 for a zero-capacity storage
    pub fn used_percent(&self) -> f64 {
        if self.total == 0 {
            return 0.0;
        }
        self.used as f64 / self.total as f64 * 100.0
    }
}

/// A file or folder listed from the device
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FileEntry {
    pub item_id: u32,
    pub parent_id: ParentId,
    pub storage_id: u32,
    pub filename: Option<String>,
    pub size: u64,
    /// `None` when the engine's timestamp is out of range
    pub modified: Option<DateTime<Utc>>,
    pub file_type: FileType,
}

impl FileEntry {
    pub fn is_folder(&self) -> bool {
        self.file_type.is_folder()
    }
}

/// A folder from the device's folder tree
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FolderEntry {
    pub folder_id: u32,
    pub parent_id: ParentId,
    pub storage_id: u32,
    pub name: Option<String>,
}

/// Owned tree node produced from a `child`/`sibling` linked foreign tree
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TreeNode<T> {
    pub value: T,
    pub children: Vec<TreeNode<T>>,
}

impl<T> TreeNode<T> {
    pub fn leaf(value: T) -> Self {
        Self {
            value,
            children: Vec::new(),
        }
    }

    /// Number of nodes in this subtree, including this one
    pub fn len(&self) -> usize {
        1 + self.children.iter().map(TreeNode::len).sum::<usize>()
    }

    /// Pre-order walk: a node, then its children (first to last) recursively
    pub fn preorder(&self) -> Vec<&T> {
        let mut out = Vec::new();
        let mut stack = vec![self];
        while let Some(node) = stack.pop() {
            out.push(&node.value);
            stack.extend(node.children.iter().rev());
        }
        out
    }
}

/// Pre-order flattening of a whole forest, with each node's depth
pub fn flatten_forest<T>(forest: &[TreeNode<T>]) -> Vec<(usize, &T)> {
    let mut out = Vec::new();
    let mut stack: Vec<(usize, &TreeNode<T>)> = forest.iter().rev().map(|n| (0, n)).collect();
    while let Some((depth, node)) = stack.pop() {
        out.push((depth, &node.value));
        stack.extend(node.children.iter().rev().map(|c| (depth + 1, c)));
    }
    out
}

/// Folder forest as returned by `Session::list_folders`
pub type FolderTree = Vec<TreeNode<FolderEntry>>;

/// One entry of the engine's error stack
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ErrorRecord {
    pub code: ErrorCode,
    pub text: Option<String>,
}

impl fmt::Display for ErrorRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.text {
            Some(text) => write!(f, "{}: {}", self.code, text),
            None => write!(f, "{}", self.code),
        }
    }
}

/// Battery levels as reported by the device
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct BatteryLevel {
    pub maximum: u8,
    pub current: u8,
}

impl BatteryLevel {
    pub fn percent(&self) -> Option<u8> {
        if self.maximum == 0 {
            return None;
        }
        Some(((self.current as u32 * 100) / self.maximum as u32).min(100) as u8)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parent_id_root_encodings() {
        assert_eq!(ParentId::from_raw(0xFFFF_FFFF), ParentId::Root);
        assert_eq!(ParentId::from_raw(0), ParentId::Root);
        assert_eq!(ParentId::from_raw(7), ParentId::Object(7));
        assert_eq!(ParentId::Root.for_listing(), 0xFFFF_FFFF);
        assert_eq!(ParentId::Root.for_creation(), 0);
        assert_eq!(ParentId::Object(9).for_listing(), 9);
        assert_eq!(ParentId::Object(9).for_creation(), 9);
    }

    #[test]
    fn test_descriptor_display_name() {
        let mut descriptor = RawDeviceDescriptor {
            bus_location: 1,
            device_number: 5,
            vendor_id: 0x18d1,
            product_id: 0x4ee1,
            vendor: Some("Google".to_string()),
            product: Some("Pixel 8".to_string()),
            device_flags: 0,
        };
        assert_eq!(descriptor.id(), "mtp-1-5");
        assert_eq!(descriptor.display_name(), "Google Pixel 8");

        descriptor.product = None;
        assert_eq!(descriptor.display_name(), "Google device");

        descriptor.vendor = None;
        assert_eq!(descriptor.display_name(), "MTP device (18d1:4ee1)");
    }

    #[test]
    fn test_storage_usage() {
        let volume = StorageVolume {
            id: 0x10001,
            description: Some("Internal".to_string()),
            volume_identifier: None,
            storage_type: 3,
            filesystem_type: 2,
            access_capability: 0,
            max_capacity: 1000,
            free_space_bytes: 250,
            free_space_objects: 10,
        };
        let usage = StorageUsage::from_volume(&volume);
        assert_eq!(usage.used, 750);
        assert!((usage.used_percent() - 75.0).abs() < f64::EPSILON);
        assert!(!volume.is_read_only());

        let empty = StorageUsage {
            total: 0,
            free: 0,
            used: 0,
        };
        assert_eq!(empty.used_percent(), 0.0);
    }

    #[test]
    fn test_tree_preorder_and_flatten() {
        let tree = TreeNode {
            value: "root",
            children: vec![
                TreeNode {
                    value: "child1",
                    children: vec![TreeNode::leaf("subchild1")],
                },
                TreeNode::leaf("child2"),
            ],
        };
        assert_eq!(tree.preorder(), vec![&"root", &"child1", &"subchild1", &"child2"]);
        assert_eq!(tree.len(), 4);

        let forest = vec![tree, TreeNode::leaf("other")];
        let flat: Vec<(usize, &str)> = flatten_forest(&forest)
            .into_iter()
            .map(|(d, v)| (d, *v))
            .collect();
        assert_eq!(
            flat,
            vec![
                (0, "root"),
                (1, "child1"),
                (2, "subchild1"),
                (1, "child2"),
                (0, "other")
            ]
        );
    }

    #[test]
    fn test_battery_percent() {
        let level = BatteryLevel {
            maximum: 4,
            current: 3,
        };
        assert_eq!(level.percent(), Some(75));
        let unknown = BatteryLevel {
            maximum: 0,
            current: 0,
        };
        assert_eq!(unknown.percent(), None);
    }
}
