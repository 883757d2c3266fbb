//! Tessera CLI
//!
//! Command-line tools for inspecting a Tessera write-ahead log.
//!
//! # Commands
//!
//! - `dump-log` - Print log records for debugging
//! - `inspect` - Show the master record and the last checkpoint
//! - `verify` - Check every record and every transaction's log chain

mod commands;

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

/// Tessera write-ahead log tools.
#[derive(Parser)]
#[command(name = "tessera")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Path to the log file
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
    /// Print log records for debugging
    DumpLog {
        /// Start from this LSN
        #[arg(short, long)]
        from: Option<u64>,

        /// Maximum number of records to print
        #[arg(short, long)]
        limit: Option<usize>,

        /// Output format (text, json)
        #[arg(long, default_value = "text")]
        format: String,
    },

    /// Show the master record and the last checkpoint
    Inspect {
        /// Output format (text, json)
        #[arg(long, default_value = "text")]
        format: String,
    },

    /// Check every record and every transaction's log chain
    Verify,

    /// Show version information
    Version,
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    // Initialize logging
    let filter = if cli.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::new("info")
    };
    tracing_subscriber::fmt().with_env_filter(filter).init();

    match cli.command {
        Commands::DumpLog {
            from,
            limit,
            format,
        } => {
            let path = cli.path.ok_or("Log path required for dump-log")?;
            commands::dump_log::run(&path, from, limit, &format)?;
        }
        Commands::Inspect { format } => {
            let path = cli.path.ok_or("Log path required for inspect")?;
            commands::inspect::run(&path, &format)?;
        }
        Commands::Verify => {
            let path = cli.path.ok_or("Log path required for verify")?;
            commands::verify::run(&path)?;
        }
        Commands::Version => {
            println!("Tessera CLI v{}", env!("CARGO_PKG_VERSION"));
        }
    }

    Ok(())
}
