//! ShelfDB CLI
//!
//! Command-line tools for ShelfDB database maintenance.
//!
//! # Commands
//!
//! - `inspect` - List tables and entry counts
//! - `keys` - List the keys of one table
//! - `get` - Print one entry as JSON
//! - `verify` - Read and validate every record
//! - `import` - Load CSV or JSON Lines rows into a table
//! - `backup` - Copy the database record by record
//! - `compact` - Reclaim space held by stale records

mod commands;

use clap::{Parser, Subcommand};
use shelfdb_core::BackendKind;
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

/// ShelfDB command-line database tools.
#[derive(Parser)]
#[command(name = "shelfdb")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Storage base name of the database (without suffix)
    #[arg(global = true, short, long)]
    path: Option<PathBuf>,

    /// Backend variant (file, split, whole)
    #[arg(global = true, short, long, default_value = "file")]
    backend: BackendKind,

    /// Enable verbose output
    #[arg(global = true, short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// List tables and entry counts
    Inspect {
        /// Output format (text, json)
        #[arg(short, long, default_value = "text")]
        format: String,
    },

    /// List the keys of a table
    Keys {
        /// Table name
        table: String,
    },

    /// Print one entry as JSON
    Get {
        /// Table name
        table: String,

        /// Record key
        key: String,

        /// Print on a single line
        #[arg(short, long)]
        compact: bool,
    },

    /// Read and validate every record
    Verify,

    /// Load CSV or JSON Lines rows into a table
    Import {
        /// Table name
        table: String,

        /// Input file: CSV with a header row, or one JSON object per line
        input: PathBuf,

        /// Column whose value becomes the record key
        #[arg(short, long)]
        key: String,

        /// Input format (csv, jsonl)
        #[arg(short, long, default_value = "csv")]
        format: String,

        /// Store CSV cells as text, keeping empty ones
        #[arg(long)]
        raw: bool,

        /// Do not recognize dates in CSV cells
        #[arg(long)]
        no_dates: bool,
    },

    /// Copy every record into a new database
    Backup {
        /// Storage base name of the destination
        dest: PathBuf,

        /// Backend variant of the destination
        #[arg(long, default_value = "file")]
        to: BackendKind,
    },

    /// Reclaim space held by overwritten and deleted records
    Compact,

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
        Commands::Inspect { format } => {
            let path = cli.path.ok_or("Database path required for inspect")?;
            commands::inspect::run(&path, cli.backend, &format)?;
        }
        Commands::Keys { table } => {
            let path = cli.path.ok_or("Database path required for keys")?;
            commands::get::keys(&path, cli.backend, &table)?;
        }
        Commands::Get {
            table,
            key,
            compact,
        } => {
            let path = cli.path.ok_or("Database path required for get")?;
            commands::get::run(&path, cli.backend, &table, &key, !compact)?;
        }
        Commands::Verify => {
            let path = cli.path.ok_or("Database path required for verify")?;
            commands::verify::run(&path, cli.backend)?;
        }
        Commands::Import {
            table,
            input,
            key,
            format,
            raw,
            no_dates,
        } => {
            let path = cli.path.ok_or("Database path required for import")?;
            let conversion = commands::import::CellConversion {
                typed: !raw,
                dates: !no_dates,
            };
            commands::import::run(&path, cli.backend, &table, &input, &key, &format, conversion)?;
        }
        Commands::Backup { dest, to } => {
            let path = cli.path.ok_or("Database path required for backup")?;
            commands::backup::run(&path, cli.backend, &dest, to)?;
        }
        Commands::Compact => {
            let path = cli.path.ok_or("Database path required for compact")?;
            commands::compact::run(&path, cli.backend)?;
        }
        Commands::Version => {
            println!("ShelfDB CLI v{}", env!("CARGO_PKG_VERSION"));
            println!("ShelfDB Core v{}", shelfdb_core::VERSION);
        }
    }

    Ok(())
}
