//! stashdb CLI
//!
//! Command-line tools for inspecting and maintaining stashdb cache stores.
//!
//! # Commands
//!
//! - `inspect` - Display store statistics
//! - `dump-binlog` - Dump decoded binlog records
//! - `verify` - Check every live value against its checksum
//! - `get` / `put` / `remove` - Single value access
//! - `clear` / `clear-tag` - Drop all values, or all values with one tag

mod commands;

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

/// stashdb command-line cache tools.
#[derive(Parser)]
#[command(name = "stashdb")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Path to the store root
    #[arg(global = true, short, long)]
    path: Option<PathBuf>,

    /// Enable verbose output
    #[arg(global = true, short, long)]
    verbose: bool,

    /// File holding the raw 256-byte store key
    #[arg(global = true, long, conflicts_with = "passphrase")]
    key_file: Option<PathBuf>,

    /// Passphrase to derive the store key from
    #[arg(global = true, long)]
    passphrase: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Display store statistics
    Inspect {
        /// Output format (text, json)
        #[arg(short, long, default_value = "text")]
        format: String,
    },

    /// Dump binlog records for debugging
    DumpBinlog {
        /// Maximum number of records to dump
        #[arg(short, long)]
        limit: Option<usize>,

        /// Output format (text, json)
        #[arg(short, long, default_value = "text")]
        format: String,
    },

    /// Check every live value against its checksum
    Verify,

    /// Print a value to stdout
    Get {
        /// Key as up to 32 hex digits
        key: String,
    },

    /// Store the contents of a file
    Put {
        /// Key as up to 32 hex digits
        key: String,

        /// File holding the value
        file: PathBuf,

        /// Tag of the value
        #[arg(short, long, default_value = "0")]
        tag: u8,
    },

    /// Remove a value
    Remove {
        /// Key as up to 32 hex digits
        key: String,
    },

    /// Drop every value by switching to a new generation
    Clear,

    /// Drop every value with a tag
    ClearTag {
        /// Tag to clear
        tag: u8,
    },

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
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    if let Commands::Version = cli.command {
        println!("stashdb CLI v{}", env!("CARGO_PKG_VERSION"));
        return Ok(());
    }

    let path = cli.path.ok_or("Store path required (--path)")?;
    let key = commands::key::load(&path, cli.key_file.as_deref(), cli.passphrase.as_deref())?;

    match cli.command {
        Commands::Inspect { format } => commands::inspect::run(&path, key, &format)?,
        Commands::DumpBinlog { limit, format } => {
            commands::dump_binlog::run(&path, &key, limit, &format)?;
        }
        Commands::Verify => commands::verify::run(&path, key)?,
        Commands::Get { key: hex } => commands::values::get(&path, key, &hex)?,
        Commands::Put {
            key: hex,
            file,
            tag,
        } => commands::values::put(&path, key, &hex, &file, tag)?,
        Commands::Remove { key: hex } => commands::values::remove(&path, key, &hex)?,
        Commands::Clear => commands::values::clear(&path, key)?,
        Commands::ClearTag { tag } => commands::values::clear_tag(&path, key, tag)?,
        Commands::Version => {}
    }

    Ok(())
}
