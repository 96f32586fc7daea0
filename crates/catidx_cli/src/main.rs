//! catidx CLI
//!
//! Command-line tools for catidx part stores.
//!
//! # Commands
//!
//! - `inspect` - List every stored part with its kind, id, size and key
//! - `verify` - Reload every directory and check index invariants

mod commands;

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

/// catidx command-line store tools.
#[derive(Parser)]
#[command(name = "catidx")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Path to the part file
    #[arg(global = true, short, long)]
    path: Option<PathBuf>,

    /// Enable verbose output
    #[arg(global = true, short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// List stored parts
    Inspect {
        /// Output format (text, json)
        #[arg(short, long, default_value = "text")]
        format: String,
    },

    /// Reload every directory and check index invariants
    Verify,

    /// Show version information
    Version,
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    let filter = if cli.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::new("info")
    };
    tracing_subscriber::fmt().with_env_filter(filter).init();

    match cli.command {
        Commands::Inspect { format } => {
            let path = cli.path.ok_or("Part file path required for inspect")?;
            commands::inspect::run(&path, &format)?;
        }
        Commands::Verify => {
            let path = cli.path.ok_or("Part file path required for verify")?;
            commands::verify::run(&path)?;
        }
        Commands::Version => {
            println!("catidx CLI v{}", env!("CARGO_PKG_VERSION"));
            println!("catidx core v{}", catidx_core::VERSION);
        }
    }

    Ok(())
}
