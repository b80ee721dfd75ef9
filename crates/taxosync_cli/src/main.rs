//! taxosync CLI
//!
//! Command-line tools for checklist revision synchronization.
//!
//! # Commands
//!
//! - `validate` - Check a snapshot's records and references
//! - `diff` - Show the change set between two snapshots
//! - `sync` - Synchronize a snapshot into a SQLite store
//! - `ledger` - Dump revision ledger entries

mod commands;

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

/// taxosync command-line tools.
#[derive(Parser)]
#[command(name = "taxosync")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Enable verbose output
    #[arg(global = true, short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Check a snapshot's records and references
    Validate {
        /// Snapshot JSON file
        snapshot: PathBuf,
    },

    /// Show the change set between two snapshots
    Diff {
        /// Previous snapshot JSON file
        previous: PathBuf,

        /// Next snapshot JSON file
        next: PathBuf,

        /// Output format (text, json)
        #[arg(short, long, default_value = "text")]
        format: String,
    },

    /// Synchronize a snapshot into a SQLite store
    Sync {
        /// SQLite database file
        #[arg(long)]
        db: PathBuf,

        /// Revision ledger file
        #[arg(long)]
        ledger: PathBuf,

        /// Index batch size
        #[arg(long, default_value = "500")]
        batch_size: usize,

        /// Snapshot JSON file
        snapshot: PathBuf,
    },

    /// Dump revision ledger entries
    Ledger {
        /// Revision ledger file
        #[arg(long)]
        ledger: PathBuf,

        /// Only entries of this dataset
        #[arg(short, long)]
        dataset: Option<u32>,

        /// Only entries in this status
        #[arg(short, long)]
        status: Option<String>,

        /// Output format (text, json)
        #[arg(short, long, default_value = "text")]
        format: String,
    },

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
        Commands::Validate { snapshot } => {
            commands::validate::run(&snapshot)?;
        }
        Commands::Diff {
            previous,
            next,
            format,
        } => {
            commands::diff::run(&previous, &next, &format)?;
        }
        Commands::Sync {
            db,
            ledger,
            batch_size,
            snapshot,
        } => {
            commands::sync::run(&db, &ledger, batch_size, &snapshot)?;
        }
        Commands::Ledger {
            ledger,
            dataset,
            status,
            format,
        } => {
            commands::ledger::run(&ledger, dataset, status.as_deref(), &format)?;
        }
        Commands::Version => {
            println!("taxosync CLI v{}", env!("CARGO_PKG_VERSION"));
        }
    }

    Ok(())
}
