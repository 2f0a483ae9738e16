//! Configuration loading and root folder resolution
//!
//! Root folder priority order:
//! 1. `ENCORE_ROOT_FOLDER` environment variable
//! 2. `ENCORE_ROOT` environment variable
//! 3. `root_folder` key in the module TOML file
//! 4. OS-dependent compiled default

use crate::{Error, Result};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

/// Database file name inside the root folder
pub const DATABASE_FILE_NAME: &str = "encore.db";

/// Logging section shared by every module's TOML file
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct LoggingConfig {
    /// Default filter directive when `RUST_LOG` is unset
    #[serde(default = "default_log_level")]
    pub level: String,
    /// Optional log file path
    #[serde(default)]
    pub file: Option<PathBuf>,
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            file: None,
        }
    }
}

/// Fields every module TOML file may carry
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct TomlConfig {
    /// Data directory holding the database
    #[serde(default)]
    pub root_folder: Option<PathBuf>,
    /// Logging settings
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Compiled defaults used when nothing else is configured
#[derive(Debug, Clone)]
pub struct CompiledDefaults {
    pub root_folder: PathBuf,
    pub log_level: String,
}

impl CompiledDefaults {
    pub fn for_current_platform() -> Self {
        Self {
            root_folder: default_root_folder(),
            log_level: default_log_level(),
        }
    }
}

fn default_root_folder() -> PathBuf {
    if cfg!(target_os = "linux") {
        // ~/.local/share/encore (or /var/lib/encore for system-wide)
        dirs::data_local_dir()
            .map(|d| d.join("encore"))
            .unwrap_or_else(|| PathBuf::from("/var/lib/encore"))
    } else if cfg!(target_os = "macos") {
        dirs::data_dir()
            .map(|d| d.join("encore"))
            .unwrap_or_else(|| PathBuf::from("/Library/Application Support/encore"))
    } else if cfg!(target_os = "windows") {
        dirs::data_local_dir()
            .map(|d| d.join("encore"))
            .unwrap_or_else(|| PathBuf::from("C:\\ProgramData\\encore"))
    } else {
        PathBuf::from("./encore_data")
    }
}

/// Location of a module's TOML file (`~/.config/encore/<module>.toml`)
pub fn config_file_path(module_name: &str) -> Option<PathBuf> {
    dirs::config_dir().map(|d| d.join("encore").join(format!("{}.toml", module_name)))
}

/// Read and deserialize a TOML file
pub fn read_toml_file<T: DeserializeOwned>(path: &Path) -> Result<T> {
    let content = std::fs::read_to_string(path)
        .map_err(|e| Error::Config(format!("Read {} failed: {}", path.display(), e)))?;
    toml::from_str(&content)
        .map_err(|e| Error::Config(format!("Parse {} failed: {}", path.display(), e)))
}

/// Read a TOML file, falling back to `T::default()` when it is missing or invalid
///
/// A missing file is not an error; an unparsable one is logged and ignored.
pub fn load_toml_or_default<T: DeserializeOwned + Default>(path: &Path) -> T {
    if !path.exists() {
        debug!("Config file not found, using defaults: {}", path.display());
        return T::default();
    }
    match read_toml_file(path) {
        Ok(config) => config,
        Err(e) => {
            warn!("{}; using defaults", e);
            T::default()
        }
    }
}

/// Resolves the root folder for a module
pub struct RootFolderResolver {
    module_name: String,
}

impl RootFolderResolver {
    pub fn new(module_name: impl Into<String>) -> Self {
        Self {
            module_name: module_name.into(),
        }
    }

    pub fn resolve(&self) -> PathBuf {
        if let Ok(path) = std::env::var("ENCORE_ROOT_FOLDER") {
            if !path.trim().is_empty() {
                return PathBuf::from(path);
            }
        }

        if let Ok(path) = std::env::var("ENCORE_ROOT") {
            if !path.trim().is_empty() {
                return PathBuf::from(path);
            }
        }

        if let Some(config_path) = config_file_path(&self.module_name) {
            let config: TomlConfig = load_toml_or_default(&config_path);
            if let Some(root_folder) = config.root_folder {
                return root_folder;
            }
        }

        CompiledDefaults::for_current_platform().root_folder
    }
}

/// Creates the root folder and locates the database inside it
pub struct RootFolderInitializer {
    root_folder: PathBuf,
}

impl RootFolderInitializer {
    pub fn new(root_folder: PathBuf) -> Self {
        Self { root_folder }
    }

    pub fn root_folder(&self) -> &Path {
        &self.root_folder
    }

    /// Create the root folder if missing (idempotent)
    pub fn ensure_directory_exists(&self) -> Result<()> {
        std::fs::create_dir_all(&self.root_folder)?;
        Ok(())
    }

    pub fn database_path(&self) -> PathBuf {
        self.root_folder.join(DATABASE_FILE_NAME)
    }

    pub fn database_exists(&self) -> bool {
        self.database_path().exists()
    }
}
