//! `genrelay config` subcommands.

use clap::Subcommand;
use genrelay::ConfigFile;
use std::path::PathBuf;

use super::{load_config, resolve_config_path};
use crate::error::CliError;

#[derive(Debug, Subcommand)]
pub enum ConfigCommands {
    /// Print the effective configuration
    Show {
        /// Config file to read (default: ~/.genrelay/config.ini)
        #[arg(long)]
        config: Option<PathBuf>,
    },

    /// Write a config file with default values
    Init {
        /// Config file to write (default: ~/.genrelay/config.ini)
        #[arg(long)]
        config: Option<PathBuf>,

        /// Overwrite an existing file
        #[arg(long)]
        force: bool,
    },

    /// Print the config file path
    Path,
}

pub fn run(command: ConfigCommands) -> Result<(), CliError> {
    match command {
        ConfigCommands::Show { config } => run_show(config),
        ConfigCommands::Init { config, force } => run_init(config, force).map(|path| {
            println!("Wrote default configuration to {}", path.display());
        }),
        ConfigCommands::Path => {
            println!("{}", resolve_config_path(None).display());
            Ok(())
        }
    }
}

fn run_show(path: Option<PathBuf>) -> Result<(), CliError> {
    let resolved = resolve_config_path(path.as_deref());
    let config = load_config(path.as_deref())?;

    if resolved.exists() {
        println!("; Loaded from {}", resolved.display());
    } else {
        println!("; {} not found, showing defaults", resolved.display());
    }
    println!();
    print!("{}", config.to_config_string());
    Ok(())
}

/// Writes defaults to the config path. Returns the path written.
fn run_init(path: Option<PathBuf>, force: bool) -> Result<PathBuf, CliError> {
    let path = resolve_config_path(path.as_deref());
    if path.exists() && !force {
        return Err(CliError::ConfigExists(path));
    }

    ConfigFile::default().save_to(&path)?;
    Ok(path)
}
