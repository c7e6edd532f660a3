//! Command-line argument definitions
//!
//! This module defines all CLI arguments and subcommands using clap.

use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// Browse and transfer files on MTP devices (phones, media players, cameras) through libmtp
#[derive(Parser, Debug)]
#[command(name = "mtp-tool")]
#[command(author = "Vihaan Reddy M")]
#[command(version = "1.0.0")]
#[command(about = "Browse and transfer files on MTP devices through libmtp", long_about = None)]
pub struct Args {
    #[command(subcommand)]
    pub command: Option<Commands>,

    /// Path to configuration file
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    /// Device to use: its id (mtp-BUS-DEVNUM), its position in `list`, or part of its name
    #[arg(short, long, global = true)]
    pub device: Option<String>,

    /// Path to the libmtp shared library (overrides config)
    #[arg(long, global = true)]
    pub library: Option<PathBuf>,

    /// Log level: error, warn, info, debug, trace (overrides config)
    #[arg(short, long, global = true)]
    pub log_level: Option<String>,

    /// Print results as JSON
    #[arg(long, global = true)]
    pub json: bool,

    /// Use a simulated device instead of libmtp
    #[arg(long, global = true)]
    pub simulate: bool,

    /// Hide transfer progress bars (overrides config)
    #[arg(long, global = true)]
    pub no_progress: bool,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// List attached MTP devices
    List,

    /// Show device properties, battery and storage usage
    Info,

    /// List the storages of the device
    Storage,

    /// List files and folders under a folder
    Ls {
        /// Device path such as "Internal shared storage/DCIM" (instead of --parent/--storage)
        #[arg(conflicts_with_all = ["parent", "storage"])]
        path: Option<String>,

        /// List every folder below the path too
        #[arg(short = 'R', long, requires = "path")]
        recursive: bool,

        /// Parent folder id (defaults to the storage root)
        #[arg(short, long)]
        parent: Option<u32>,

        /// Storage id (0 = all storages)
        #[arg(short, long, default_value = "0")]
        storage: u32,
    },

    /// Show the folder tree of the device
    Tree,

    /// Show metadata of one object
    Stat {
        /// Object id
        id: u32,
    },

    /// Create a folder
    Mkdir {
        /// Folder name, or a device path with --parents
        name: String,

        /// Treat the name as a device path and create every missing folder on it
        #[arg(short = 'p', long, conflicts_with_all = ["parent", "storage"])]
        parents: bool,

        /// Parent folder id (defaults to the storage root)
        #[arg(long)]
        parent: Option<u32>,

        /// Storage id (0 = primary storage)
        #[arg(short, long, default_value = "0")]
        storage: u32,
    },

    /// Upload a local file
    Put {
        /// Local file to upload
        source: PathBuf,

        /// Name on the device (defaults to the local file name)
        #[arg(short, long)]
        name: Option<String>,

        /// Parent folder id (defaults to the storage root)
        #[arg(short, long)]
        parent: Option<u32>,

        /// Storage id (0 = primary storage)
        #[arg(short, long, default_value = "0")]
        storage: u32,
    },

    /// Upload a local directory, recreating its folder structure
    Push {
        /// Local directory to upload
        source: PathBuf,

        /// Parent folder id (defaults to the storage root)
        #[arg(short, long)]
        parent: Option<u32>,

        /// Storage id (0 = primary storage)
        #[arg(short, long, default_value = "0")]
        storage: u32,
    },

    /// Download a file
    Get {
        /// Object id of the file
        id: u32,

        /// Local target path (defaults to the device file name in the current directory)
        target: Option<PathBuf>,
    },

    /// Delete a file or folder
    Rm {
        /// Object id
        id: u32,
    },

    /// Change the friendly name of the device
    SetName {
        /// New name
        name: String,
    },

    /// Show the MTP file type a file name would be sent as
    Classify {
        /// File names or paths
        #[arg(required = true)]
        files: Vec<PathBuf>,
    },

    /// Show current configuration
    ShowConfig,

    /// Generate a configuration file at a specific location
    GenerateConfig {
        /// Output path for the config file (defaults to standard location)
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_global_flags_after_subcommand() {
        let args = Args::try_parse_from([
            "mtp-tool", "ls", "--parent", "12", "--device", "mtp-1-4", "--json",
        ])
        .unwrap();
        assert_eq!(args.device.as_deref(), Some("mtp-1-4"));
        assert!(args.json);
        match args.command {
            Some(Commands::Ls {
                path,
                recursive,
                parent,
                storage,
            }) => {
                assert!(path.is_none());
                assert!(!recursive);
                assert_eq!(parent, Some(12));
                assert_eq!(storage, 0);
            }
            other => panic!("unexpected command: {:?}", other),
        }
    }

    #[test]
    fn test_put_defaults() {
        let args = Args::try_parse_from(["mtp-tool", "--simulate", "put", "song.mp3"]).unwrap();
        assert!(args.simulate);
        match args.command {
            Some(Commands::Put {
                source,
                name,
                parent,
                storage,
            }) => {
                assert_eq!(source, PathBuf::from("song.mp3"));
                assert!(name.is_none());
                assert!(parent.is_none());
                assert_eq!(storage, 0);
            }
            other => panic!("unexpected command: {:?}", other),
        }
    }

    #[test]
    fn test_ls_path_conflicts_with_ids() {
        let args =
            Args::try_parse_from(["mtp-tool", "ls", "-R", "SD Card/Podcasts"]).unwrap();
        match args.command {
            Some(Commands::Ls {
                path, recursive, ..
            }) => {
                assert_eq!(path.as_deref(), Some("SD Card/Podcasts"));
                assert!(recursive);
            }
            other => panic!("unexpected command: {:?}", other),
        }

        assert!(Args::try_parse_from(["mtp-tool", "ls", "SD Card", "--parent", "3"]).is_err());
        assert!(Args::try_parse_from(["mtp-tool", "ls", "--recursive"]).is_err());
    }

    #[test]
    fn test_mkdir_parents_flag() {
        let args =
            Args::try_parse_from(["mtp-tool", "mkdir", "-p", "SD Card/Backups/2024"]).unwrap();
        match args.command {
            Some(Commands::Mkdir { name, parents, .. }) => {
                assert_eq!(name, "SD Card/Backups/2024");
                assert!(parents);
            }
            other => panic!("unexpected command: {:?}", other),
        }

        assert!(
            Args::try_parse_from(["mtp-tool", "mkdir", "-p", "SD Card/x", "--storage", "2"])
                .is_err()
        );
    }

    #[test]
    fn test_classify_requires_files() {
        assert!(Args::try_parse_from(["mtp-tool", "classify"]).is_err());
    }
}
