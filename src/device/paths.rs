//! Path-based navigation over a connected session
//!
//! A device path starts with a storage description and continues with folder
//! names, for example `Internal shared storage/DCIM/Camera`. Components are
//! separated by `/` or `\` and empty components are ignored. Names match
//! exactly, case included.
//!
//! Nothing is cached: every step is a fresh [`Session::list_files_and_folders`]
//! call, so paths always reflect the device as it is now.

use log::{debug, info, warn};
use serde::Serialize;
use std::collections::{HashSet, VecDeque};

use super::engine::MtpEngine;
use super::session::Session;
use super::types::{FileEntry, ParentId, StorageVolume};
use crate::core::error::{MtpError, Result};

/// Split a device path into components.
///
/// Fails on a path without components and on `.` or `..`, which have no
/// meaning on the device.
pub fn split_device_path(path: &str) -> Result<Vec<&str>> {
    let parts: Vec<&str> = path
        .split(['/', '\\'])
        .filter(|part| !part.is_empty())
        .collect();
    if let Some(part) = parts.iter().find(|part| matches!(**part, "." | "..")) {
        return Err(MtpError::InvalidArgument(format!(
            "device path {:?} contains {:?}",
            path, part
        )));
    }
    if parts.is_empty() {
        return Err(MtpError::InvalidArgument(format!(
            "device path {:?} names no storage",
            path
        )));
    }
    Ok(parts)
}

/// What a device path points at
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum DeviceObject {
    /// The top of a storage
    Storage(StorageVolume),
    /// A file or folder
    Entry(FileEntry),
}

impl DeviceObject {
    pub fn storage_id(&self) -> u32 {
        match self {
            DeviceObject::Storage(volume) => volume.id,
            DeviceObject::Entry(entry) => entry.storage_id,
        }
    }

    pub fn is_folder(&self) -> bool {
        match self {
            DeviceObject::Storage(_) => true,
            DeviceObject::Entry(entry) => entry.is_folder(),
        }
    }

    /// Parent id for listing or creating inside this object; `None` for a file
    pub fn as_parent(&self) -> Option<ParentId> {
        match self {
            DeviceObject::Storage(_) => Some(ParentId::Root),
            DeviceObject::Entry(entry) if entry.is_folder() => {
                Some(ParentId::Object(entry.item_id))
            }
            DeviceObject::Entry(_) => None,
        }
    }
}

/// One folder visited by [`Session::walk`]
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct WalkLevel {
    /// Device path of this folder, components joined with `/`
    pub path: String,
    pub storage_id: u32,
    pub folder: ParentId,
    /// Sub-folders, sorted by name
    pub folders: Vec<FileEntry>,
    /// Files, sorted by name
    pub files: Vec<FileEntry>,
}

/// Breadth-first walk returned by [`Session::walk`].
///
/// Yields one [`WalkLevel`] per folder, parents before children. A folder
/// that cannot be listed yields an `Err` and the walk goes on with the
/// others; stop early by dropping the iterator. Each folder id is entered at
/// most once, and the session's adapter limits bound both the depth and the
/// total number of objects listed.
pub struct DeviceWalk<'s, E: MtpEngine + ?Sized> {
    session: &'s Session<E>,
    storage_id: u32,
    pending: VecDeque<(String, ParentId, usize)>,
    entered: HashSet<u32>,
    listed: usize,
}

impl<E: MtpEngine + ?Sized> Iterator for DeviceWalk<'_, E> {
    type Item = Result<WalkLevel>;

    fn next(&mut self) -> Option<Self::Item> {
        let (path, folder, depth) = self.pending.pop_front()?;
        let limits = self.session.options().limits;
        if depth >= limits.max_depth {
            return Some(Err(MtpError::MalformedForeignData(format!(
                "{} is deeper than {} folder levels",
                path, limits.max_depth
            ))));
        }

        let listing = match self.session.list_files_and_folders(self.storage_id, folder) {
            Ok(listing) => listing,
            Err(e) => return Some(Err(e)),
        };
        self.listed += listing.len();
        if self.listed > limits.max_nodes {
            self.pending.clear();
            return Some(Err(MtpError::MalformedForeignData(format!(
                "walk exceeded {} objects at {}",
                limits.max_nodes, path
            ))));
        }

        let (mut folders, mut files): (Vec<FileEntry>, Vec<FileEntry>) =
            listing.into_iter().partition(FileEntry::is_folder);
        folders.sort_by(|a, b| a.filename.cmp(&b.filename));
        files.sort_by(|a, b| a.filename.cmp(&b.filename));

        for sub in &folders {
            if !self.entered.insert(sub.item_id) {
                warn!(
                    "Folder {} appears again under {}, not entering it twice",
                    sub.item_id, path
                );
                continue;
            }
            let name = sub
                .filename
                .clone()
                .unwrap_or_else(|| format!("object-{}", sub.item_id));
            self.pending.push_back((
                format!("{}/{}", path, name),
                ParentId::Object(sub.item_id),
                depth + 1,
            ));
        }

        Some(Ok(WalkLevel {
            path,
            storage_id: self.storage_id,
            folder,
            folders,
            files,
        }))
    }
}

impl<E: MtpEngine + ?Sized> Session<E> {
    /// The storage whose description is exactly `description`
    pub fn find_storage(&self, description: &str) -> Result<StorageVolume> {
        self.storage_volumes()?
            .into_iter()
            .find(|volume| volume.description.as_deref() == Some(description))
            .ok_or_else(|| MtpError::PathNotFound(description.to_string()))
    }

    /// The object named `name` directly under `parent`, if there is one
    pub fn get_child(
        &self,
        storage_id: u32,
        parent: ParentId,
        name: &str,
    ) -> Result<Option<FileEntry>> {
        Ok(self
            .list_files_and_folders(storage_id, parent)?
            .into_iter()
            .find(|entry| entry.filename.as_deref() == Some(name)))
    }

    /// Look up the storage, folder or file at `path`
    pub fn resolve_path(&self, path: &str) -> Result<DeviceObject> {
        let parts = split_device_path(path)?;
        let mut current = DeviceObject::Storage(self.find_storage(parts[0])?);

        for depth in 1..parts.len() {
            let parent = current
                .as_parent()
                .ok_or_else(|| MtpError::NotAFolder(parts[..depth].join("/")))?;
            let child = self
                .get_child(current.storage_id(), parent, parts[depth])?
                .ok_or_else(|| MtpError::PathNotFound(parts[..=depth].join("/")))?;
            current = DeviceObject::Entry(child);
        }

        debug!("Resolved {:?} on storage {:#x}", path, current.storage_id());
        Ok(current)
    }

    /// Create every missing folder along `path`.
    ///
    /// Returns the parent id of the last folder, `Root` when `path` names
    /// only a storage. Existing folders are reused; a file in the way fails
    /// with `NotAFolder` before anything below it is created.
    pub fn makedirs(&self, path: &str) -> Result<ParentId> {
        let parts = split_device_path(path)?;
        let storage = self.find_storage(parts[0])?;

        let mut parent = ParentId::Root;
        for depth in 1..parts.len() {
            let name = parts[depth];
            parent = match self.get_child(storage.id, parent, name)? {
                Some(entry) if entry.is_folder() => ParentId::Object(entry.item_id),
                Some(_) => return Err(MtpError::NotAFolder(parts[..=depth].join("/"))),
                None => ParentId::Object(self.create_folder(name, parent, storage.id)?),
            };
        }

        info!("Folder path {:?} is {}", path, parent);
        Ok(parent)
    }

    /// Walk every folder at and below `path`, top-down
    pub fn walk(&self, path: &str) -> Result<DeviceWalk<'_, E>> {
        let parts = split_device_path(path)?;
        let top = self.resolve_path(path)?;
        let folder = top
            .as_parent()
            .ok_or_else(|| MtpError::NotAFolder(parts.join("/")))?;

        let mut entered = HashSet::new();
        if let ParentId::Object(id) = folder {
            entered.insert(id);
        }
        Ok(DeviceWalk {
            session: self,
            storage_id: top.storage_id(),
            pending: VecDeque::from([(parts.join("/"), folder, 0)]),
            entered,
            listed: 0,
        })
    }
}
