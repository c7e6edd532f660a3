//! Configuration module for the MTP session tool
//!
//! Supports loading configuration from a TOML file.
//! Configuration is stored in a standard location:
//! - Windows: %APPDATA%\mtp_session\config.toml
//! - Linux/macOS: ~/.config/mtp_session/config.toml

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

use crate::device::adapter::{AdapterLimits, DEFAULT_MAX_DEPTH, DEFAULT_MAX_NODES};
use crate::device::SessionOptions;

/// Application name used for config directory
const APP_NAME: &str = "mtp_session";

/// Default config file name
const CONFIG_FILE_NAME: &str = "config.toml";

/// Config file looked up in the current directory first
const LOCAL_CONFIG_FILE: &str = "./mtp_session.toml";

/// Get the standard configuration directory for the application.
///
/// Returns:
/// - Windows: %APPDATA%\mtp_session
/// - Linux/macOS: ~/.config/mtp_session
pub fn get_config_dir() -> Option<PathBuf> {
    #[cfg(target_os = "windows")]
    {
        std::env::var("APPDATA")
            .ok()
            .map(|appdata| PathBuf::from(appdata).join(APP_NAME))
    }

    #[cfg(not(target_os = "windows"))]
    {
        std::env::var("HOME")
            .ok()
            .map(|home| PathBuf::from(home).join(".config").join(APP_NAME))
    }
}

/// Get the standard configuration file path.
pub fn get_config_path() -> Option<PathBuf> {
    get_config_dir().map(|dir| dir.join(CONFIG_FILE_NAME))
}

/// Ensure the configuration directory exists.
pub fn ensure_config_dir() -> Result<PathBuf, ConfigError> {
    let config_dir = get_config_dir().ok_or(ConfigError::ConfigDirNotFound)?;

    if !config_dir.exists() {
        fs::create_dir_all(&config_dir)
            .map_err(|e| ConfigError::WriteError(config_dir.clone(), e.to_string()))?;
    }

    Ok(config_dir)
}

/// Initialize the configuration file if it doesn't exist.
///
/// Creates the config directory and writes the default config template.
/// Returns the path to the config file.
pub fn init_config() -> Result<PathBuf, ConfigError> {
    let config_dir = ensure_config_dir()?;
    let config_path = config_dir.join(CONFIG_FILE_NAME);

    if !config_path.exists() {
        fs::write(&config_path, Config::generate_default_config())
            .map_err(|e| ConfigError::WriteError(config_path.clone(), e.to_string()))?;
    }

    Ok(config_path)
}

/// Main configuration structure
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct Config {
    /// Which libmtp to load
    pub engine: EngineConfig,

    /// Bounds for walking lists and trees returned by the engine
    pub adapter: AdapterConfig,

    /// Error stack handling
    pub diagnostics: DiagnosticsConfig,

    /// Transfer display settings
    pub transfer: TransferConfig,

    /// Logging settings
    pub logging: LoggingConfig,
}

/// libmtp location
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct EngineConfig {
    /// Explicit path to the libmtp shared library.
    /// Empty means search the standard library names.
    pub library_path: PathBuf,
}

/// Traversal bounds for foreign data
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct AdapterConfig {
    /// Maximum nodes in any single list or tree
    pub max_list_nodes: usize,

    /// Maximum depth of the folder tree
    pub max_folder_depth: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct DiagnosticsConfig {
    /// Ask the engine to print its error stack when a command fails
    pub dump_error_stack: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct TransferConfig {
    /// Show progress bars during uploads and downloads
    pub show_progress: bool,
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level: error, warn, info, debug, trace
    pub level: String,

    /// Log to file
    pub log_to_file: bool,

    /// Log file path
    pub log_file: PathBuf,
}

impl Default for AdapterConfig {
    fn default() -> Self {
        Self {
            max_list_nodes: DEFAULT_MAX_NODES,
            max_folder_depth: DEFAULT_MAX_DEPTH,
        }
    }
}

impl Default for DiagnosticsConfig {
    fn default() -> Self {
        Self {
            dump_error_stack: true,
        }
    }
}

impl Default for TransferConfig {
    fn default() -> Self {
        Self {
            show_progress: true,
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            log_to_file: false,
            log_file: PathBuf::from("./mtp_session.log"),
        }
    }
}

impl EngineConfig {
    /// The configured library path, if one was set
    pub fn library_path(&self) -> Option<&Path> {
        if self.library_path.as_os_str().is_empty() {
            None
        } else {
            Some(&self.library_path)
        }
    }
}

impl Config {
    /// Session options derived from the adapter and diagnostics sections
    pub fn session_options(&self) -> SessionOptions {
        SessionOptions {
            limits: AdapterLimits {
                max_nodes: self.adapter.max_list_nodes.max(1),
                max_depth: self.adapter.max_folder_depth.max(1),
            },
            dump_error_stack: self.diagnostics.dump_error_stack,
        }
    }

    /// Load configuration from a TOML file
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let path = path.as_ref();

        if !path.exists() {
            return Err(ConfigError::FileNotFound(path.to_path_buf()));
        }

        let content = fs::read_to_string(path)
            .map_err(|e| ConfigError::ReadError(path.to_path_buf(), e.to_string()))?;

        let config: Config = toml::from_str(&content)
            .map_err(|e| ConfigError::ParseError(path.to_path_buf(), e.to_string()))?;

        Ok(config)
    }

    /// Load configuration from default locations
    ///
    /// Search order:
    /// 1. ./mtp_session.toml (current directory)
    /// 2. Standard config location
    ///
    /// If no config file is found, returns default configuration.
    pub fn load_default() -> Result<Self, ConfigError> {
        let local = PathBuf::from(LOCAL_CONFIG_FILE);
        if local.exists() {
            return Self::load(&local);
        }

        if let Some(config_path) = get_config_path() {
            if config_path.exists() {
                return Self::load(&config_path);
            }
        }

        Ok(Self::default())
    }

    /// Get the path where the config file is (or would be) located.
    pub fn get_active_config_path() -> PathBuf {
        let local = PathBuf::from(LOCAL_CONFIG_FILE);
        if local.exists() {
            return local;
        }

        get_config_path().unwrap_or(local)
    }

    /// Save configuration to a TOML file
    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<(), ConfigError> {
        let content =
            toml::to_string_pretty(self).map_err(|e| ConfigError::SerializeError(e.to_string()))?;

        fs::write(path.as_ref(), content)
            .map_err(|e| ConfigError::WriteError(path.as_ref().to_path_buf(), e.to_string()))?;

        Ok(())
    }

    /// Generate a default config file with comments
    pub fn generate_default_config() -> String {
        include_str!("../../config.example.toml").to_string()
    }
}

/// Configuration error types
#[derive(Debug)]
pub enum ConfigError {
    /// Configuration file was not found at the specified path
    FileNotFound(PathBuf),
    /// Failed to read the configuration file
    ReadError(PathBuf, String),
    /// Failed to parse the configuration file (invalid TOML)
    ParseError(PathBuf, String),
    /// Failed to serialize configuration to TOML
    SerializeError(String),
    /// Failed to write configuration file
    WriteError(PathBuf, String),
    /// Neither HOME nor APPDATA is set
    ConfigDirNotFound,
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigError::FileNotFound(path) => {
                write!(f, "Configuration file not found: {}", path.display())
            }
            ConfigError::ReadError(path, err) => {
                write!(
                    f,
                    "Failed to read config file '{}': {}",
                    path.display(),
                    err
                )
            }
            ConfigError::ParseError(path, err) => {
                write!(
                    f,
                    "Failed to parse config file '{}': {}",
                    path.display(),
                    err
                )
            }
            ConfigError::SerializeError(err) => {
                write!(f, "Failed to serialize configuration: {}", err)
            }
            ConfigError::WriteError(path, err) => {
                write!(
                    f,
                    "Failed to write config file '{}': {}",
                    path.display(),
                    err
                )
            }
            ConfigError::ConfigDirNotFound => {
                write!(f, "Could not determine the configuration directory")
            }
        }
    }
}

impl std::error::Error for ConfigError {}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_defaults() {
        let config = Config::default();
        assert!(config.engine.library_path().is_none());
        assert_eq!(config.adapter.max_list_nodes, 1 << 20);
        assert_eq!(config.adapter.max_folder_depth, 512);
        assert!(config.diagnostics.dump_error_stack);
        assert!(config.transfer.show_progress);
        assert_eq!(config.logging.level, "info");
    }

    #[test]
    fn test_example_config_parses_to_defaults() {
        let parsed: Config = toml::from_str(&Config::generate_default_config()).unwrap();
        assert_eq!(parsed, Config::default());
    }

    #[test]
    fn test_partial_file_keeps_other_defaults() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("config.toml");
        fs::write(
            &path,
            "[engine]\nlibrary_path = \"/opt/lib/libmtp.so.9\"\n\n[diagnostics]\ndump_error_stack = false\n",
        )
        .unwrap();

        let config = Config::load(&path).unwrap();
        assert_eq!(
            config.engine.library_path(),
            Some(Path::new("/opt/lib/libmtp.so.9"))
        );
        assert!(!config.diagnostics.dump_error_stack);
        assert_eq!(config.adapter.max_folder_depth, 512);
    }

    #[test]
    fn test_session_options_from_config() {
        let mut config = Config::default();
        config.adapter.max_list_nodes = 0;
        config.adapter.max_folder_depth = 16;
        config.diagnostics.dump_error_stack = false;

        let options = config.session_options();
        assert_eq!(options.limits.max_nodes, 1);
        assert_eq!(options.limits.max_depth, 16);
        assert!(!options.dump_error_stack);
    }

    #[test]
    fn test_load_errors() {
        let dir = TempDir::new().unwrap();
        let missing = dir.path().join("missing.toml");
        assert!(matches!(
            Config::load(&missing),
            Err(ConfigError::FileNotFound(_))
        ));

        let broken = dir.path().join("broken.toml");
        fs::write(&broken, "[adapter\nmax_list_nodes = ").unwrap();
        let err = Config::load(&broken).unwrap_err();
        assert!(matches!(err, ConfigError::ParseError(_, _)));
        assert!(err.to_string().contains("broken.toml"));
    }

    #[test]
    fn test_save_round_trip() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("saved.toml");
        let mut config = Config::default();
        config.logging.level = "debug".to_string();
        config.transfer.show_progress = false;

        config.save(&path).unwrap();
        assert_eq!(Config::load(&path).unwrap(), config);
    }
}
