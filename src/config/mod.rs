//! Configuration module
//!
//! Handles the client configuration file: transport, timing, parameter
//! catalogs and database layouts.

mod settings;

pub use settings::{ClientConfig, FirmwareEntry, LoggingConfig};

use directories::ProjectDirs;
use std::path::PathBuf;
use thiserror::Error;

/// Configuration errors
#[derive(Error, Debug)]
pub enum ConfigError {
    /// No home directory to derive the config location from
    #[error("Could not determine config directory")]
    NoConfigDir,

    /// Reading or writing the file failed
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// File is not valid TOML for this schema
    #[error("Parse error: {0}")]
    Parse(#[from] toml::de::Error),

    /// Serializing the config failed
    #[error("Serialize error: {0}")]
    Serialize(#[from] toml::ser::Error),

    /// A value is syntactically valid but unusable
    #[error("Invalid value for {field}: {reason}")]
    Invalid {
        /// Config key
        field: &'static str,
        /// What is wrong with it
        reason: String,
    },
}

/// Get the application configuration directory
pub fn config_dir() -> Option<PathBuf> {
    ProjectDirs::from("org", "iflag", "iflag").map(|dirs| dirs.config_dir().to_path_buf())
}

/// Default configuration file path
pub fn config_path() -> Option<PathBuf> {
    config_dir().map(|d| d.join("config.toml"))
}

/// Create the configuration directory
pub fn init_directories() -> std::io::Result<()> {
    if let Some(dir) = config_dir() {
        std::fs::create_dir_all(dir)?;
    }
    Ok(())
}
