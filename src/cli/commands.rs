//! Command handler implementations
//!
//! This module contains the implementation of all CLI commands.

use crate::cli::progress::{
    format_bytes, print_header, print_info, print_success, print_warning, BatchProgress,
    TransferProgress,
};
use crate::cli::{Args, Commands};
use crate::core::config::{init_config, Config};
use crate::core::filetype::classify_filename;
use crate::device::{
    detect_devices, flatten_forest, DeviceObject, FileEntry, LibMtp, MtpEngine, ParentId,
    RawDeviceDescriptor, Session, StorageUsage, WalkLevel,
};
use crate::testdb::MockEngine;
use anyhow::{anyhow, bail, Context, Result};
use log::{debug, info, warn};
use serde::Serialize;
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use walkdir::WalkDir;

/// Run the appropriate command based on CLI arguments
pub fn run_command(args: &Args, config: &Config, shutdown_flag: Arc<AtomicBool>) -> Result<()> {
    match &args.command {
        None | Some(Commands::List) => list_devices(args, config),
        Some(Commands::Info) => show_device_info(args, config),
        Some(Commands::Storage) => list_storage(args, config),
        Some(Commands::Ls {
            path: Some(path),
            recursive,
            ..
        }) => list_path(args, config, path, *recursive, &shutdown_flag),
        Some(Commands::Ls {
            path: None,
            parent,
            storage,
            ..
        }) => list_folder(args, config, *storage, parent_id(*parent)),
        Some(Commands::Tree) => show_tree(args, config),
        Some(Commands::Stat { id }) => show_metadata(args, config, *id),
        Some(Commands::Mkdir {
            name,
            parents: true,
            ..
        }) => make_folder_path(args, config, name),
        Some(Commands::Mkdir {
            name,
            parent,
            storage,
            ..
        }) => make_folder(args, config, name, parent_id(*parent), *storage),
        Some(Commands::Put {
            source,
            name,
            parent,
            storage,
        }) => upload_file(
            args,
            config,
            source,
            name.as_deref(),
            parent_id(*parent),
            *storage,
        ),
        Some(Commands::Push {
            source,
            parent,
            storage,
        }) => upload_directory(
            args,
            config,
            source,
            parent_id(*parent),
            *storage,
            &shutdown_flag,
        ),
        Some(Commands::Get { id, target }) => download_file(args, config, *id, target.clone()),
        Some(Commands::Rm { id }) => delete_object(args, config, *id),
        Some(Commands::SetName { name }) => rename_device(args, config, name),
        Some(Commands::Classify { files }) => classify_files(files, args.json),
        Some(Commands::ShowConfig) => {
            show_config(config);
            Ok(())
        }
        Some(Commands::GenerateConfig { output }) => generate_config_file(output.clone()),
    }
}

fn parent_id(parent: Option<u32>) -> ParentId {
    parent.map_or(ParentId::Root, ParentId::from_raw)
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn show_progress(args: &Args, config: &Config) -> bool {
    config.transfer.show_progress && !args.no_progress && !args.json
}

// ============================================================================
// Engine and session setup
// ============================================================================

/// The simulated engine for `--simulate`, libmtp otherwise
fn load_engine(args: &Args, config: &Config) -> Result<Arc<dyn MtpEngine>> {
    if args.simulate {
        info!("Using a simulated device (no libmtp required)");
        let engine: Arc<dyn MtpEngine> = Arc::new(MockEngine::demo());
        return Ok(engine);
    }

    let library_path = args
        .library
        .as_deref()
        .or_else(|| config.engine.library_path());
    let library = LibMtp::shared(library_path)
        .context("Could not load libmtp (install it, set engine.library_path, or use --simulate)")?;
    let engine: Arc<dyn MtpEngine> = library;
    Ok(engine)
}

/// Pick a device by id, 1-based position or name fragment.
///
/// Without a selector the only device is used; with several, the first one
/// is used and a hint is printed.
pub fn select_device<'a>(
    devices: &'a [RawDeviceDescriptor],
    wanted: Option<&str>,
) -> Result<&'a RawDeviceDescriptor> {
    if let Some(wanted) = wanted {
        if let Ok(position) = wanted.parse::<usize>() {
            if (1..=devices.len()).contains(&position) {
                return Ok(&devices[position - 1]);
            }
        }
        return devices
            .iter()
            .find(|d| d.id() == wanted || d.display_name().contains(wanted))
            .ok_or_else(|| anyhow!("Device '{}' not found", wanted));
    }

    match devices {
        [] => bail!("No MTP devices found"),
        [only] => Ok(only),
        [first, ..] => {
            println!();
            print_info(&format!(
                "Multiple devices found, using first one: {}",
                first.display_name()
            ));
            println!("    Use --device to specify a different device.");
            println!();
            Ok(first)
        }
    }
}

/// Open the selected device, run `action`, then disconnect
fn with_session<T>(
    args: &Args,
    config: &Config,
    action: impl FnOnce(&Session, &RawDeviceDescriptor) -> Result<T>,
) -> Result<T> {
    let engine = load_engine(args, config)?;
    let options = config.session_options();

    let detected = detect_devices(engine.as_ref(), &options.limits)?;
    if detected.storage_full {
        warn!("The device engine reported full storage during discovery");
    }
    let descriptor = select_device(&detected.devices, args.device.as_deref())?.clone();
    info!(
        "Selected device: {} ({})",
        descriptor.display_name(),
        descriptor.id()
    );

    let mut session = Session::open(engine, descriptor.clone(), options)
        .with_context(|| format!("Failed to open {}", descriptor.display_name()))?;
    let result = action(&session, &descriptor);
    if let Err(e) = session.disconnect() {
        warn!("Disconnect failed: {}", e);
    }
    result
}

// ============================================================================
// Device commands
// ============================================================================

/// List attached devices
pub fn list_devices(args: &Args, config: &Config) -> Result<()> {
    let engine = load_engine(args, config)?;
    info!("Scanning for connected devices...");

    let detected = detect_devices(engine.as_ref(), &config.session_options().limits)?;
    if args.json {
        return print_json(&detected);
    }

    if detected.is_empty() {
        info!("No MTP devices found.");
        info!("");
        info!("Make sure the device is:");
        info!("  1. Connected via USB cable");
        info!("  2. Unlocked");
        info!("  3. Set to file transfer (MTP) mode");
        return Ok(());
    }

    if detected.storage_full {
        print_warning("The device engine reported full storage");
    }

    info!("Found {} device(s):", detected.len());
    info!("");
    for (i, device) in detected.devices.iter().enumerate() {
        info!("[{}] {}", i + 1, device.display_name());
        info!("    Device ID: {}", device.id());
        info!(
            "    USB: {:04x}:{:04x} on bus {}, device {}",
            device.vendor_id, device.product_id, device.bus_location, device.device_number
        );
        if device.device_flags != 0 {
            debug!("    Quirk flags: {:#010x}", device.device_flags);
        }
        info!("");
    }

    Ok(())
}

#[derive(Debug, Serialize)]
struct DeviceReport {
    id: String,
    friendly_name: Option<String>,
    model: Option<String>,
    serial_number: Option<String>,
    manufacturer: Option<String>,
    version: Option<String>,
    battery_percent: Option<u8>,
    primary_storage: Option<StorageUsage>,
}

/// Show device properties
pub fn show_device_info(args: &Args, config: &Config) -> Result<()> {
    let report = with_session(args, config, |session, descriptor| {
        let battery_percent = match session.get_battery_level() {
            Ok(level) => level.percent(),
            Err(e) => {
                debug!("Battery level unavailable: {}", e);
                None
            }
        };
        let primary_storage = match session.storage_usage() {
            Ok(usage) => Some(usage),
            Err(e) => {
                debug!("Storage usage unavailable: {}", e);
                None
            }
        };

        Ok(DeviceReport {
            id: descriptor.id(),
            friendly_name: session.get_device_name()?,
            model: session.get_model_name()?,
            serial_number: session.get_serial_number()?,
            manufacturer: session.get_manufacturer_name()?,
            version: session.get_device_version()?,
            battery_percent,
            primary_storage,
        })
    })?;

    if args.json {
        return print_json(&report);
    }

    let unknown = "(unknown)";
    print_header(report.friendly_name.as_deref().unwrap_or("MTP device"));
    println!("  Device ID:     {}", report.id);
    println!(
        "  Model:         {}",
        report.model.as_deref().unwrap_or(unknown)
    );
    println!(
        "  Manufacturer:  {}",
        report.manufacturer.as_deref().unwrap_or(unknown)
    );
    println!(
        "  Serial number: {}",
        report.serial_number.as_deref().unwrap_or(unknown)
    );
    println!(
        "  Version:       {}",
        report.version.as_deref().unwrap_or(unknown)
    );
    match report.battery_percent {
        Some(percent) => println!("  Battery:       {}%", percent),
        None => println!("  Battery:       {}", unknown),
    }
    if let Some(usage) = report.primary_storage {
        println!(
            "  Storage:       {} used of {} ({:.1}%), {} free",
            format_bytes(usage.used),
            format_bytes(usage.total),
            usage.used_percent(),
            format_bytes(usage.free)
        );
    }
    println!();

    Ok(())
}

/// List storages
pub fn list_storage(args: &Args, config: &Config) -> Result<()> {
    let volumes = with_session(args, config, |session, _| Ok(session.storage_volumes()?))?;

    if args.json {
        return print_json(&volumes);
    }

    if volumes.is_empty() {
        info!("The device reports no storage (is it locked?)");
        return Ok(());
    }

    for volume in &volumes {
        let usage = StorageUsage::from_volume(volume);
        println!(
            "  {:#010x}  {:<28} {:>10} free of {:>10} ({:.1}% used){}",
            volume.id,
            volume.description.as_deref().unwrap_or("(no description)"),
            format_bytes(usage.free),
            format_bytes(usage.total),
            usage.used_percent(),
            if volume.is_read_only() { "  [read-only]" } else { "" }
        );
    }

    Ok(())
}

fn print_entries(entries: &[FileEntry]) {
    for entry in entries {
        let kind = if entry.is_folder() { "dir" } else { "file" };
        let size = if entry.is_folder() {
            String::new()
        } else {
            format_bytes(entry.size)
        };
        let modified = entry
            .modified
            .map(|m| m.format("%Y-%m-%d %H:%M").to_string())
            .unwrap_or_default();
        println!(
            "  {:>10}  {:<4}  {:>10}  {:<16}  {}",
            entry.item_id,
            kind,
            size,
            modified,
            entry.filename.as_deref().unwrap_or("(unnamed)")
        );
    }
}

/// List the contents of one folder
pub fn list_folder(args: &Args, config: &Config, storage: u32, parent: ParentId) -> Result<()> {
    let entries = with_session(args, config, |session, _| {
        Ok(session.list_files_and_folders(storage, parent)?)
    })?;

    if args.json {
        return print_json(&entries);
    }

    if entries.is_empty() {
        info!("Folder {} is empty", parent);
        return Ok(());
    }
    print_entries(&entries);
    info!("{} object(s)", entries.len());
    Ok(())
}

/// List the folder at a device path (or the file itself), or with
/// `recursive` every folder below it
pub fn list_path(
    args: &Args,
    config: &Config,
    path: &str,
    recursive: bool,
    shutdown_flag: &AtomicBool,
) -> Result<()> {
    if recursive {
        return walk_path(args, config, path, shutdown_flag);
    }

    let entries = with_session(args, config, |session, _| {
        let target = session.resolve_path(path)?;
        if let Some(parent) = target.as_parent() {
            return Ok(session.list_files_and_folders(target.storage_id(), parent)?);
        }
        match target {
            DeviceObject::Entry(entry) => Ok(vec![entry]),
            DeviceObject::Storage(_) => Ok(Vec::new()),
        }
    })?;

    if args.json {
        return print_json(&entries);
    }

    if entries.is_empty() {
        info!("{} is empty", path);
        return Ok(());
    }
    print_entries(&entries);
    info!("{} object(s)", entries.len());
    Ok(())
}

fn walk_path(
    args: &Args,
    config: &Config,
    path: &str,
    shutdown_flag: &AtomicBool,
) -> Result<()> {
    let levels: Vec<WalkLevel> = with_session(args, config, |session, _| {
        let mut levels = Vec::new();
        for level in session.walk(path)? {
            if shutdown_flag.load(Ordering::SeqCst) {
                warn!("Listing interrupted");
                break;
            }
            match level {
                Ok(level) => levels.push(level),
                Err(e) => warn!("Skipping a folder: {}", e),
            }
        }
        Ok(levels)
    })?;

    if args.json {
        return print_json(&levels);
    }

    let mut objects = 0;
    for level in &levels {
        println!("{}:", level.path);
        print_entries(&level.folders);
        print_entries(&level.files);
        println!();
        objects += level.folders.len() + level.files.len();
    }
    info!("{} folder(s), {} object(s)", levels.len(), objects);
    Ok(())
}

/// Print the folder tree
pub fn show_tree(args: &Args, config: &Config) -> Result<()> {
    let forest = with_session(args, config, |session, _| Ok(session.list_folders()?))?;

    if args.json {
        return print_json(&forest);
    }

    let folders = flatten_forest(&forest);
    if folders.is_empty() {
        info!("The device reports no folders");
        return Ok(());
    }
    for (depth, folder) in &folders {
        println!(
            "  {}{} [{}]",
            "  ".repeat(*depth),
            folder.name.as_deref().unwrap_or("(unnamed)"),
            folder.folder_id
        );
    }
    info!("{} folder(s)", folders.len());
    Ok(())
}

/// Show the metadata of one object
pub fn show_metadata(args: &Args, config: &Config, id: u32) -> Result<()> {
    let entry = with_session(args, config, |session, _| {
        Ok(session.get_file_metadata(id)?)
    })?;

    if args.json {
        return print_json(&entry);
    }

    println!(
        "  Name:     {}",
        entry.filename.as_deref().unwrap_or("(unnamed)")
    );
    println!("  Id:       {}", entry.item_id);
    println!("  Parent:   {}", entry.parent_id);
    println!("  Storage:  {:#010x}", entry.storage_id);
    println!("  Size:     {}", format_bytes(entry.size));
    println!("  Type:     {}", entry.file_type);
    if let Some(modified) = entry.modified {
        println!("  Modified: {}", modified.to_rfc3339());
    }
    Ok(())
}

/// Create a folder
pub fn make_folder(
    args: &Args,
    config: &Config,
    name: &str,
    parent: ParentId,
    storage: u32,
) -> Result<()> {
    let folder_id = with_session(args, config, |session, _| {
        Ok(session.create_folder(name, parent, storage)?)
    })?;

    if args.json {
        return print_json(&serde_json::json!({ "folder_id": folder_id }));
    }
    print_success(&format!("Created folder '{}' with id {}", name, folder_id));
    Ok(())
}

/// Create every missing folder along a device path
pub fn make_folder_path(args: &Args, config: &Config, path: &str) -> Result<()> {
    let folder = with_session(args, config, |session, _| Ok(session.makedirs(path)?))?;

    if args.json {
        return print_json(&serde_json::json!({ "path": path, "folder": folder }));
    }
    print_success(&format!("Folder path '{}' is ready ({})", path, folder));
    Ok(())
}

/// Upload a single file
pub fn upload_file(
    args: &Args,
    config: &Config,
    source: &Path,
    name: Option<&str>,
    parent: ParentId,
    storage: u32,
) -> Result<()> {
    let target_name = match name {
        Some(name) => name.to_string(),
        None => source
            .file_name()
            .and_then(|n| n.to_str())
            .map(str::to_string)
            .ok_or_else(|| anyhow!("Cannot derive a device name from {}", source.display()))?,
    };
    let size = fs::metadata(source).map(|m| m.len()).unwrap_or(0);
    let visible = show_progress(args, config);

    let object_id = with_session(args, config, |session, _| {
        let progress = TransferProgress::new(&target_name, size, visible);
        let mut report = |sent: u64, total: u64| progress.update(sent, total);
        match session.send_file_from_local_with_progress(
            source,
            &target_name,
            storage,
            parent,
            &mut report,
        ) {
            Ok(id) => {
                progress.finish();
                Ok(id)
            }
            Err(e) => {
                progress.finish_with_error("upload failed");
                Err(e.into())
            }
        }
    })?;

    if args.json {
        return print_json(&serde_json::json!({ "object_id": object_id }));
    }
    print_success(&format!("Uploaded '{}' as object {}", target_name, object_id));
    Ok(())
}

/// Counters of a directory upload
#[derive(Debug, Default, Clone, PartialEq, Eq, Serialize)]
pub struct PushStats {
    pub folders: usize,
    pub files: usize,
    pub bytes: u64,
    pub failed: usize,
    pub interrupted: bool,
}

/// Upload `source` as a new folder under `parent`, recreating its subfolders.
///
/// Individual failures are counted and skipped. Contents of a folder that
/// could not be created are skipped as well. The shutdown flag is checked
/// between entries.
pub fn push_directory(
    session: &Session,
    source: &Path,
    parent: ParentId,
    storage: u32,
    shutdown_flag: &AtomicBool,
    visible: bool,
) -> Result<PushStats> {
    if !source.is_dir() {
        bail!("Not a directory: {}", source.display());
    }
    let root_name = source
        .canonicalize()
        .ok()
        .and_then(|p| p.file_name().and_then(|n| n.to_str()).map(str::to_string))
        .ok_or_else(|| anyhow!("Cannot derive a folder name from {}", source.display()))?;

    let mut stats = PushStats::default();
    let root_id = session.create_folder(&root_name, parent, storage)?;
    stats.folders += 1;

    let mut folders: HashMap<PathBuf, u32> = HashMap::new();
    folders.insert(source.to_path_buf(), root_id);

    let entries: Vec<walkdir::DirEntry> = WalkDir::new(source)
        .min_depth(1)
        .sort_by_file_name()
        .into_iter()
        .filter_map(|entry| match entry {
            Ok(entry) => Some(entry),
            Err(e) => {
                warn!("Skipping unreadable entry: {}", e);
                None
            }
        })
        .collect();
    let total_files = entries.iter().filter(|e| e.file_type().is_file()).count();
    let mut progress = BatchProgress::new(total_files as u64, visible);

    for entry in entries {
        if shutdown_flag.load(Ordering::SeqCst) {
            stats.interrupted = true;
            progress.log_warning("Upload stopped by user");
            break;
        }

        let Some(folder_id) = entry.path().parent().and_then(|p| folders.get(p)).copied() else {
            debug!("Skipping {}: its folder was not created", entry.path().display());
            continue;
        };
        let name = entry.file_name().to_string_lossy().into_owned();
        let target = ParentId::Object(folder_id);

        if entry.file_type().is_dir() {
            match session.create_folder(&name, target, storage) {
                Ok(id) => {
                    folders.insert(entry.path().to_path_buf(), id);
                    stats.folders += 1;
                }
                Err(e) => {
                    stats.failed += 1;
                    progress.log_warning(&format!("Folder '{}' failed: {}", name, e));
                }
            }
        } else if entry.file_type().is_file() {
            match session.send_file_from_local(entry.path(), &name, storage, target) {
                Ok(_) => {
                    let size = entry.metadata().map(|m| m.len()).unwrap_or(0);
                    stats.files += 1;
                    stats.bytes += size;
                    progress.file_completed(&name, size);
                }
                Err(e) => {
                    stats.failed += 1;
                    progress.log_warning(&format!("File '{}' failed: {}", name, e));
                }
            }
        }
    }

    progress.finish();
    Ok(stats)
}

/// Upload a directory tree
pub fn upload_directory(
    args: &Args,
    config: &Config,
    source: &Path,
    parent: ParentId,
    storage: u32,
    shutdown_flag: &AtomicBool,
) -> Result<()> {
    let visible = show_progress(args, config);
    let stats = with_session(args, config, |session, _| {
        push_directory(session, source, parent, storage, shutdown_flag, visible)
    })?;

    if args.json {
        return print_json(&stats);
    }
    print_success(&format!(
        "Uploaded {} file(s) ({}) into {} folder(s)",
        stats.files,
        format_bytes(stats.bytes),
        stats.folders
    ));
    if stats.failed > 0 {
        print_warning(&format!("{} item(s) failed", stats.failed));
    }
    if stats.interrupted {
        print_warning("Upload was interrupted before all files were sent");
    }
    Ok(())
}

/// Download a file
pub fn download_file(
    args: &Args,
    config: &Config,
    id: u32,
    target: Option<PathBuf>,
) -> Result<()> {
    let visible = show_progress(args, config);
    let target = with_session(args, config, |session, _| {
        let metadata = session.get_file_metadata(id)?;
        if metadata.is_folder() {
            bail!("Object {} is a folder", id);
        }
        let target =
            target.unwrap_or_else(|| local_file_name(metadata.filename.as_deref(), id));

        let label = metadata.filename.as_deref().unwrap_or("download");
        let progress = TransferProgress::new(label, metadata.size, visible);
        let mut report = |sent: u64, total: u64| progress.update(sent, total);
        match session.get_file_to_local_with_progress(id, &target, &mut report) {
            Ok(()) => {
                progress.finish();
                Ok(target)
            }
            Err(e) => {
                progress.finish_with_error("download failed");
                Err(e.into())
            }
        }
    })?;

    if args.json {
        return print_json(&serde_json::json!({ "path": target }));
    }
    print_success(&format!("Saved object {} to {}", id, target.display()));
    Ok(())
}

/// Local name for a download with no explicit target.
///
/// Device names are untrusted: only the last path segment is kept, so the
/// file always lands in the current directory. Names that leave nothing
/// usable fall back to `object-<id>`.
fn local_file_name(filename: Option<&str>, id: u32) -> PathBuf {
    let segment = filename
        .and_then(|name| name.rsplit(|c: char| c == '/' || c == '\\').next())
        .filter(|segment| !matches!(*segment, "" | "." | ".."));
    match segment {
        Some(segment) => {
            if filename != Some(segment) {
                warn!(
                    "Device name {:?} for object {} reduced to {:?}",
                    filename.unwrap_or_default(),
                    id,
                    segment
                );
            }
            PathBuf::from(segment)
        }
        None => PathBuf::from(format!("object-{}", id)),
    }
}

/// Delete an object
pub fn delete_object(args: &Args, config: &Config, id: u32) -> Result<()> {
    with_session(args, config, |session, _| Ok(session.delete_object(id)?))?;
    if !args.json {
        print_success(&format!("Deleted object {}", id));
    }
    Ok(())
}

/// Change the device's friendly name
pub fn rename_device(args: &Args, config: &Config, name: &str) -> Result<()> {
    with_session(args, config, |session, _| {
        Ok(session.set_device_name(name)?)
    })?;
    if !args.json {
        print_success(&format!("Device renamed to '{}'", name));
    }
    Ok(())
}

#[derive(Debug, Serialize)]
struct Classification {
    file: PathBuf,
    code: i32,
    description: &'static str,
}

/// Show the upload file type of each name
pub fn classify_files(files: &[PathBuf], json: bool) -> Result<()> {
    let results: Vec<Classification> = files
        .iter()
        .map(|file| {
            let file_type = classify_filename(file);
            Classification {
                file: file.clone(),
                code: file_type.raw(),
                description: file_type.description(),
            }
        })
        .collect();

    if json {
        return print_json(&results);
    }
    for result in &results {
        println!(
            "  {}: {} ({})",
            result.file.display(),
            result.description,
            result.code
        );
    }
    Ok(())
}

// ============================================================================
// Configuration commands
// ============================================================================

/// Generate a configuration file at the specified or default location
pub fn generate_config_file(output: Option<PathBuf>) -> Result<()> {
    let output_path = match output {
        Some(path) => {
            fs::write(&path, Config::generate_default_config())?;
            path
        }
        None => init_config()?,
    };

    info!("Configuration file: {}", output_path.display());
    info!("Edit this file to customize the engine and transfer settings.");
    Ok(())
}

/// Show the current configuration settings
pub fn show_config(config: &Config) {
    let config_path = Config::get_active_config_path();
    info!("Configuration file: {}", config_path.display());
    if !config_path.exists() {
        info!("(Using default settings - no config file found)");
    }
    info!("");
    info!("Current Configuration:");
    info!("----------------------");
    info!("[engine]");
    match config.engine.library_path() {
        Some(path) => info!("  library_path = \"{}\"", path.display()),
        None => info!("  library_path = (search default names)"),
    }
    info!("");
    info!("[adapter]");
    info!("  max_list_nodes = {}", config.adapter.max_list_nodes);
    info!("  max_folder_depth = {}", config.adapter.max_folder_depth);
    info!("");
    info!("[diagnostics]");
    info!(
        "  dump_error_stack = {}",
        config.diagnostics.dump_error_stack
    );
    info!("");
    info!("[transfer]");
    info!("  show_progress = {}", config.transfer.show_progress);
    info!("");
    info!("[logging]");
    info!("  level = \"{}\"", config.logging.level);
    info!("  log_to_file = {}", config.logging.log_to_file);
    info!("  log_file = \"{}\"", config.logging.log_file.display());
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::SessionOptions;
    use crate::testdb::MockDevice;
    use clap::Parser;
    use tempfile::TempDir;

    fn descriptor(bus: u32, devnum: u8, product: &str) -> RawDeviceDescriptor {
        RawDeviceDescriptor {
            bus_location: bus,
            device_number: devnum,
            vendor_id: 0x18d1,
            product_id: 0x4ee1,
            vendor: Some("Acme".to_string()),
            product: Some(product.to_string()),
            device_flags: 0,
        }
    }

    fn connected(engine: &Arc<MockEngine>) -> Session {
        let dynamic: Arc<dyn MtpEngine> = engine.clone();
        let descriptor = engine.descriptors()[0].clone();
        Session::open(dynamic, descriptor, SessionOptions::default()).unwrap()
    }

    #[test]
    fn test_select_device() {
        let devices = vec![descriptor(1, 4, "Phone"), descriptor(2, 7, "Player")];

        assert_eq!(select_device(&devices, None).unwrap().id(), "mtp-1-4");
        assert_eq!(select_device(&devices, Some("2")).unwrap().id(), "mtp-2-7");
        assert_eq!(
            select_device(&devices, Some("mtp-2-7")).unwrap().id(),
            "mtp-2-7"
        );
        assert_eq!(
            select_device(&devices, Some("Player")).unwrap().id(),
            "mtp-2-7"
        );
        assert!(select_device(&devices, Some("Camera")).is_err());
        assert!(select_device(&[], None).is_err());
    }

    #[test]
    fn test_push_directory_recreates_structure() {
        let dir = TempDir::new().unwrap();
        let root = dir.path().join("holiday");
        fs::create_dir_all(root.join("day1")).unwrap();
        fs::write(root.join("day1").join("beach.jpg"), vec![0u8; 300]).unwrap();
        fs::write(root.join("notes.txt"), b"sunny").unwrap();

        let engine = Arc::new(MockEngine::new());
        engine.add_device(MockDevice::new("Acme", "Phone").with_storage(
            0x10001,
            "Internal",
            1 << 30,
            1 << 29,
        ));
        let mut session = connected(&engine);
        let stop = AtomicBool::new(false);

        let stats = push_directory(&session, &root, ParentId::Root, 0, &stop, false).unwrap();
        assert_eq!(stats.folders, 2);
        assert_eq!(stats.files, 2);
        assert_eq!(stats.bytes, 305);
        assert_eq!(stats.failed, 0);
        assert!(!stats.interrupted);

        let top = session
            .list_files_and_folders(0, ParentId::Root)
            .unwrap();
        assert_eq!(top.len(), 1);
        assert_eq!(top[0].filename.as_deref(), Some("holiday"));
        assert!(top[0].is_folder());

        let inside = session
            .list_files_and_folders(0, ParentId::Object(top[0].item_id))
            .unwrap();
        let mut names: Vec<_> = inside.iter().filter_map(|e| e.filename.clone()).collect();
        names.sort();
        assert_eq!(names, vec!["day1".to_string(), "notes.txt".to_string()]);

        session.disconnect().unwrap();
        assert_eq!(engine.live_allocations(), 0);
    }

    #[test]
    fn test_push_directory_stops_on_shutdown() {
        let dir = TempDir::new().unwrap();
        let root = dir.path().join("music");
        fs::create_dir_all(&root).unwrap();
        fs::write(root.join("a.mp3"), b"a").unwrap();

        let engine = Arc::new(MockEngine::demo());
        let session = connected(&engine);
        let stop = AtomicBool::new(true);

        let stats = push_directory(&session, &root, ParentId::Root, 0, &stop, false).unwrap();
        assert!(stats.interrupted);
        assert_eq!(stats.files, 0);
        assert_eq!(stats.folders, 1);
    }

    #[test]
    fn test_push_directory_counts_failures() {
        let dir = TempDir::new().unwrap();
        let root = dir.path().join("docs");
        fs::create_dir_all(&root).unwrap();
        fs::write(root.join("a.txt"), b"a").unwrap();
        fs::write(root.join("b.txt"), b"b").unwrap();

        let engine = Arc::new(MockEngine::demo());
        let session = connected(&engine);
        engine.fail_operation("send_file_from_file");

        let stop = AtomicBool::new(false);
        let stats = push_directory(&session, &root, ParentId::Root, 0, &stop, false).unwrap();
        assert_eq!(stats.files, 0);
        assert_eq!(stats.failed, 2);
    }

    #[test]
    fn test_push_rejects_plain_file() {
        let dir = TempDir::new().unwrap();
        let file = dir.path().join("single.txt");
        fs::write(&file, b"x").unwrap();

        let engine = Arc::new(MockEngine::demo());
        let session = connected(&engine);
        let stop = AtomicBool::new(false);
        assert!(push_directory(&session, &file, ParentId::Root, 0, &stop, false).is_err());
    }

    #[test]
    fn test_simulated_commands_run() {
        let stop = Arc::new(AtomicBool::new(false));
        let config = Config::default();
        for argv in [
            vec!["mtp-tool", "--simulate", "list"],
            vec!["mtp-tool", "--simulate", "--json", "info"],
            vec!["mtp-tool", "--simulate", "storage"],
            vec!["mtp-tool", "--simulate", "ls", "--parent", "1"],
            vec!["mtp-tool", "--simulate", "--json", "tree"],
            vec!["mtp-tool", "--simulate", "stat", "3"],
            vec!["mtp-tool", "--simulate", "mkdir", "Backups"],
            vec!["mtp-tool", "--simulate", "ls", "Internal shared storage/Music"],
            vec!["mtp-tool", "--simulate", "ls", "SD Card/Podcasts/episode-12.m4a"],
            vec!["mtp-tool", "--simulate", "ls", "-R", "Internal shared storage"],
            vec!["mtp-tool", "--simulate", "--json", "ls", "-R", "SD Card"],
            vec!["mtp-tool", "--simulate", "mkdir", "-p", "SD Card/Backups/2024"],
            vec!["mtp-tool", "--simulate", "rm", "9"],
            vec!["mtp-tool", "--simulate", "set-name", "Kitchen"],
        ] {
            let args = Args::try_parse_from(argv.iter().copied()).unwrap();
            run_command(&args, &config, stop.clone())
                .unwrap_or_else(|e| panic!("{:?} failed: {:#}", argv, e));
        }
    }

    #[test]
    fn test_simulated_get_writes_file() {
        let dir = TempDir::new().unwrap();
        let target = dir.path().join("intro.mp3");
        let args = Args::try_parse_from([
            "mtp-tool",
            "--simulate",
            "--no-progress",
            "get",
            "4",
            target.to_str().unwrap(),
        ])
        .unwrap();

        run_command(&args, &Config::default(), Arc::new(AtomicBool::new(false))).unwrap();
        assert!(target.exists());
    }

    #[test]
    fn test_local_file_name_stays_in_current_directory() {
        assert_eq!(local_file_name(Some("song.mp3"), 7), PathBuf::from("song.mp3"));
        assert_eq!(
            local_file_name(Some("../escape.txt"), 7),
            PathBuf::from("escape.txt")
        );
        assert_eq!(
            local_file_name(Some("/etc/passwd"), 7),
            PathBuf::from("passwd")
        );
        assert_eq!(
            local_file_name(Some("..\\..\\boot.ini"), 7),
            PathBuf::from("boot.ini")
        );
        for hostile in ["..", ".", "", "dir/", "a/.."] {
            assert_eq!(
                local_file_name(Some(hostile), 7),
                PathBuf::from("object-7"),
                "{:?}",
                hostile
            );
        }
        assert_eq!(local_file_name(None, 9), PathBuf::from("object-9"));
    }

    #[test]
    fn test_hostile_device_name_downloads_inside_target_dir() {
        let engine = Arc::new(MockEngine::new());
        engine.add_device(
            MockDevice::new("Acme", "Phone")
                .with_storage(0x10001, "Internal", 1 << 30, 1 << 29)
                .with_file(40, 0, 0x10001, "../escape.txt", 12),
        );
        let session = connected(&engine);
        let dir = TempDir::new().unwrap();
        let inner = dir.path().join("downloads");
        fs::create_dir_all(&inner).unwrap();

        let metadata = session.get_file_metadata(40).unwrap();
        let target = inner.join(local_file_name(metadata.filename.as_deref(), 40));
        session.get_file_to_local(40, &target).unwrap();

        assert!(inner.join("escape.txt").exists());
        assert!(!dir.path().join("escape.txt").exists());
    }

    #[test]
    fn test_simulated_missing_path_fails() {
        let args =
            Args::try_parse_from(["mtp-tool", "--simulate", "ls", "Internal shared storage/Nope"])
                .unwrap();
        let err = run_command(&args, &Config::default(), Arc::new(AtomicBool::new(false)))
            .unwrap_err();
        assert!(err.to_string().contains("No such path"), "{:#}", err);
    }

    #[test]
    fn test_simulated_missing_object_fails() {
        let args = Args::try_parse_from(["mtp-tool", "--simulate", "stat", "4242"]).unwrap();
        let err = run_command(&args, &Config::default(), Arc::new(AtomicBool::new(false)))
            .unwrap_err();
        assert!(err.to_string().contains("not found"));
    }

    #[test]
    fn test_generate_config_to_path() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("generated.toml");
        generate_config_file(Some(path.clone())).unwrap();
        assert_eq!(Config::load(&path).unwrap(), Config::default());
    }
}
