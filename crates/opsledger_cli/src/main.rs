//! opsledger CLI
//!
//! Diagnostics for a persisted event queue.
//!
//! # Commands
//!
//! - `inspect` - Summarize the queue by status, kind and scope
//! - `dump` - Print queued events
//! - `verify` - Check that the queue blob decodes and ids are ordered
//! - `version` - Show version information

mod commands;

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

/// opsledger queue diagnostics.
#[derive(Parser)]
#[command(name = "opsledger")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Path to the store directory
    #[arg(global = true, short, long)]
    path: Option<PathBuf>,

    /// Storage key the queue blob is written under
    #[arg(global = true, short, long, default_value = "event_queue")]
    key: String,

    /// Enable verbose output
    #[arg(global = true, short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Summarize the queue by status, kind and scope
    Inspect {
        /// Output format (text, json)
        #[arg(short, long, default_value = "text")]
        format: String,
    },

    /// Print queued events in stored order
    Dump {
        /// Only show events with this status (pending, synced, failed)
        #[arg(short, long)]
        status: Option<String>,

        /// Maximum number of events to print
        #[arg(short, long)]
        limit: Option<usize>,

        /// Output format (text, json)
        #[arg(short, long, default_value = "text")]
        format: String,
    },

    /// Check that the queue decodes and ids are unique and increasing
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
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    match cli.command {
        Commands::Inspect { format } => {
            let path = cli.path.ok_or("Store path required for inspect")?;
            commands::inspect::run(&path, &cli.key, &format)?;
        }
        Commands::Dump {
            status,
            limit,
            format,
        } => {
            let path = cli.path.ok_or("Store path required for dump")?;
            commands::dump::run(&path, &cli.key, status.as_deref(), limit, &format)?;
        }
        Commands::Verify => {
            let path = cli.path.ok_or("Store path required for verify")?;
            commands::verify::run(&path, &cli.key)?;
        }
        Commands::Version => {
            println!("opsledger CLI v{}", env!("CARGO_PKG_VERSION"));
        }
    }

    Ok(())
}
