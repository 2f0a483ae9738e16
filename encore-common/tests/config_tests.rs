//! Unit tests for configuration and graceful degradation
//!
//! Tests that manipulate ENCORE_ROOT_FOLDER or ENCORE_ROOT are marked with
//! #[serial] so they run sequentially, not in parallel.

use encore_common::config::{
    load_toml_or_default, read_toml_file, CompiledDefaults, LoggingConfig, RootFolderInitializer,
    RootFolderResolver, TomlConfig,
};
use serial_test::serial;
use std::env;
use std::path::PathBuf;
use tempfile::TempDir;

#[test]
fn test_compiled_defaults_for_current_platform() {
    let defaults = CompiledDefaults::for_current_platform();

    assert!(!defaults.root_folder.as_os_str().is_empty());
    assert_eq!(defaults.log_level, "info");
    assert!(defaults.root_folder.to_string_lossy().contains("encore"));
}

#[test]
#[serial]
fn test_resolver_env_var_root_folder() {
    env::remove_var("ENCORE_ROOT");
    let test_path = "/tmp/encore-test-env-folder";
    env::set_var("ENCORE_ROOT_FOLDER", test_path);

    let root_folder = RootFolderResolver::new("test-module").resolve();
    assert_eq!(root_folder, PathBuf::from(test_path));

    env::remove_var("ENCORE_ROOT_FOLDER");
}

#[test]
#[serial]
fn test_resolver_env_var_root() {
    env::remove_var("ENCORE_ROOT_FOLDER");
    let test_path = "/tmp/encore-test-env-root";
    env::set_var("ENCORE_ROOT", test_path);

    let root_folder = RootFolderResolver::new("test-module").resolve();
    assert_eq!(root_folder, PathBuf::from(test_path));

    env::remove_var("ENCORE_ROOT");
}

#[test]
#[serial]
fn test_resolver_root_folder_takes_precedence() {
    env::set_var("ENCORE_ROOT_FOLDER", "/tmp/encore-priority-1");
    env::set_var("ENCORE_ROOT", "/tmp/encore-priority-2");

    let root_folder = RootFolderResolver::new("test-module").resolve();
    assert_eq!(root_folder, PathBuf::from("/tmp/encore-priority-1"));

    env::remove_var("ENCORE_ROOT_FOLDER");
    env::remove_var("ENCORE_ROOT");
}

#[test]
#[serial]
fn test_resolver_missing_config_file_falls_back_to_default() {
    env::remove_var("ENCORE_ROOT_FOLDER");
    env::remove_var("ENCORE_ROOT");

    let root_folder = RootFolderResolver::new("nonexistent-module-xyz-12345").resolve();
    assert_eq!(root_folder, CompiledDefaults::for_current_platform().root_folder);
}

#[test]
fn test_initializer_database_path() {
    let root = PathBuf::from("/tmp/encore-test-root");
    let initializer = RootFolderInitializer::new(root.clone());

    assert_eq!(initializer.database_path(), root.join("encore.db"));
    assert_eq!(initializer.root_folder(), root.as_path());
}

#[test]
fn test_initializer_database_exists() {
    let initializer = RootFolderInitializer::new(PathBuf::from("/tmp/encore-test-nonexistent"));
    assert!(!initializer.database_exists());
}

#[test]
fn test_initializer_idempotent_directory_creation() {
    let temp_dir = TempDir::new().unwrap();
    let root = temp_dir.path().join("nested").join("root");
    let initializer = RootFolderInitializer::new(root.clone());

    assert!(initializer.ensure_directory_exists().is_ok());
    assert!(initializer.ensure_directory_exists().is_ok());
    assert!(root.is_dir());
}

#[test]
fn test_read_toml_file_parses_common_fields() {
    let temp_dir = TempDir::new().unwrap();
    let path = temp_dir.path().join("module.toml");
    std::fs::write(
        &path,
        "root_folder = \"/srv/encore\"\n\n[logging]\nlevel = \"debug\"\n",
    )
    .unwrap();

    let config: TomlConfig = read_toml_file(&path).unwrap();
    assert_eq!(config.root_folder, Some(PathBuf::from("/srv/encore")));
    assert_eq!(config.logging.level, "debug");
    assert!(config.logging.file.is_none());
}

#[test]
fn test_read_toml_file_reports_parse_error() {
    let temp_dir = TempDir::new().unwrap();
    let path = temp_dir.path().join("broken.toml");
    std::fs::write(&path, "root_folder = [unterminated").unwrap();

    let result: encore_common::Result<TomlConfig> = read_toml_file(&path);
    let err = result.unwrap_err().to_string();
    assert!(err.contains("Configuration error"), "unexpected error: {}", err);
}

#[test]
fn test_load_toml_or_default_on_missing_and_invalid_files() {
    let temp_dir = TempDir::new().unwrap();

    let missing: TomlConfig = load_toml_or_default(&temp_dir.path().join("missing.toml"));
    assert_eq!(missing, TomlConfig::default());

    let invalid_path = temp_dir.path().join("invalid.toml");
    std::fs::write(&invalid_path, "this is = = not toml").unwrap();
    let invalid: TomlConfig = load_toml_or_default(&invalid_path);
    assert_eq!(invalid.logging, LoggingConfig::default());
}
