//! User configuration.
//!
//! Runtime components take typed configs ([`crate::OrchestratorConfig`] and
//! its parts). This module loads those from an INI file:
//!
//! ```ini
//! [cache]
//! max_size = 64MB
//!
//! [scheduler]
//! max_concurrency = 8
//!
//! [degradation]
//! recovery = cooldown
//! cooldown_ms = 30000
//! ```
//!
//! Missing keys keep their defaults; a missing file is all defaults.

mod defaults;
mod file;
mod parser;
mod settings;
mod size;
mod writer;

pub use defaults::{
    default_concurrency, num_cpus, DEFAULT_COOLDOWN_MS, DEFAULT_REPORT_INTERVAL_MS,
};
pub use file::{config_directory, config_file_path, ConfigFileError};
pub use settings::{ConfigFile, TelemetrySettings};
pub use size::{format_size, parse_size, SizeParseError};
