//! CLI command implementations.
//!
//! - [`config`] - Show or initialize the configuration file
//! - [`simulate`] - Drive the resilience layer with a synthetic workload

pub mod config;
pub mod simulate;

use crate::error::CliError;
use genrelay::config::config_file_path;
use genrelay::ConfigFile;
use std::path::{Path, PathBuf};

/// Resolves `--config`, falling back to `~/.genrelay/config.ini`.
pub fn resolve_config_path(path: Option<&Path>) -> PathBuf {
    path.map(Path::to_path_buf).unwrap_or_else(config_file_path)
}

/// Loads the config file, or defaults if it does not exist.
pub fn load_config(path: Option<&Path>) -> Result<ConfigFile, CliError> {
    Ok(ConfigFile::load_from(&resolve_config_path(path))?)
}
