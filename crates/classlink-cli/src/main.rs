//! classlink command-line tool
//!
//! Links classes described by JSON manifests and prints the resulting
//! layouts, or just reports link errors.

use clap::{Parser, Subcommand};
use std::path::PathBuf;

mod commands;
mod manifest;
mod tracing_config;

#[derive(Parser)]
#[command(name = "classlink")]
#[command(about = "Link class manifests and inspect the resulting layouts", long_about = None)]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Link every class and print its layout
    Link {
        /// Manifest files
        #[arg(required = true)]
        manifests: Vec<PathBuf>,
        /// Linker options (TOML)
        #[arg(short, long)]
        config: Option<PathBuf>,
        /// Print reflection snapshots as JSON
        #[arg(long)]
        json: bool,
    },

    /// Link every class and report errors only
    Check {
        /// Manifest files
        #[arg(required = true)]
        manifests: Vec<PathBuf>,
        /// Linker options (TOML)
        #[arg(short, long)]
        config: Option<PathBuf>,
    },
}

fn main() -> anyhow::Result<()> {
    tracing_config::init_tracing();
    let cli = Cli::parse();

    match cli.command {
        Commands::Link {
            manifests,
            config,
            json,
        } => commands::link::execute(&manifests, config.as_deref(), json),

        Commands::Check { manifests, config } => {
            let failures = commands::check::execute(&manifests, config.as_deref())?;
            if failures > 0 {
                std::process::exit(1);
            }
            Ok(())
        }
    }
}
