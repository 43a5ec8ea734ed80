//! genrelay CLI - drive and configure the resilience layer.

mod commands;
mod error;

use clap::{Parser, Subcommand};
use commands::config::ConfigCommands;
use commands::simulate::SimulateArgs;

#[derive(Parser)]
#[command(name = "genrelay")]
#[command(version = genrelay::VERSION)]
#[command(about = "Client-side resilience layer for remote AI generation services", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a synthetic workload against a simulated remote service
    Simulate(SimulateArgs),

    /// Show or initialize the configuration file
    Config {
        #[command(subcommand)]
        command: ConfigCommands,
    },
}

fn main() {
    let cli = Cli::parse();

    let result = match cli.command {
        Commands::Simulate(args) => commands::simulate::run(args),
        Commands::Config { command } => commands::config::run(command),
    };

    if let Err(e) = result {
        e.exit();
    }
}
