//! # docjson CLI Module
//!
//! ## Available Commands
//!
//! - `init` - Initialize a new document database
//! - `status` - Show collections and document counts
//! - `import` - Decode and cascade-save documents from a JSON file
//! - `export` - Write a collection in its flat bulk form
//! - `show` - Render one document, optionally following references

mod commands;

use crate::config;
use clap::{Parser, Subcommand};
use docjson_core::DocjsonError;
use std::path::PathBuf;

pub use commands::*;

// =============================================================================
// CLI STRUCTURE
// =============================================================================

/// docjson - human-readable JSON for document graphs
///
/// Stores schema-declared documents and renders them as plain JSON,
/// following references up to a depth policy.
#[derive(Parser, Debug)]
#[command(name = "docjson")]
#[command(version, about, long_about = None)]
pub struct Cli {
    /// Enable verbose output
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Suppress banner output
    #[arg(short, long, global = true)]
    pub quiet: bool,

    /// Path to the TOML configuration (schemas, storage, encode defaults)
    #[arg(short = 'C', long, global = true)]
    pub config: Option<PathBuf>,

    /// Path to the document database (overrides the config file)
    #[arg(short = 'D', long, global = true)]
    pub database: Option<PathBuf>,

    /// Storage backend: "redb" (ACID database) or "memory" (volatile)
    #[arg(short = 'B', long, global = true)]
    pub backend: Option<String>,

    /// Output in JSON format (for programmatic access)
    #[arg(long, global = true)]
    pub json_mode: bool,

    /// Subcommand to execute
    #[command(subcommand)]
    pub command: Option<Commands>,
}

/// Available CLI commands.
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Initialize a new empty database
    Init {
        /// Force initialization even if database exists
        #[arg(short, long)]
        force: bool,
    },

    /// Show collections and document counts
    Status,

    /// Import documents from a JSON file (one object or an array)
    Import {
        /// Target collection
        #[arg(short, long)]
        collection: String,

        /// Input file path
        #[arg(short, long)]
        file: PathBuf,
    },

    /// Export a collection as a flat JSON array
    Export {
        /// Collection to export
        #[arg(short, long)]
        collection: String,

        /// Output file path (stdout when omitted)
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Show one document
    Show {
        /// Collection of the document
        #[arg(short, long)]
        collection: String,

        /// Document identifier
        #[arg(long)]
        id: String,

        /// Follow every reference field
        #[arg(long)]
        follow: bool,

        /// Follow depth; negative means unchecked
        #[arg(long, allow_negative_numbers = true)]
        max_depth: Option<i64>,

        /// Emit date/times as epoch milliseconds
        #[arg(long)]
        epoch: bool,

        /// Emit Extended JSON
        #[arg(long)]
        raw: bool,

        /// Pretty-print the output
        #[arg(long)]
        pretty: bool,
    },
}

// =============================================================================
// COMMAND EXECUTION
// =============================================================================

/// Execute the CLI with parsed arguments.
pub fn execute(cli: Cli) -> Result<(), DocjsonError> {
    let loaded = config::load_config(cli.config.as_deref())?;
    let config = config::apply_overrides(loaded, cli.database, cli.backend.as_deref())?;
    let json_mode = cli.json_mode;

    match cli.command {
        Some(Commands::Init { force }) => cmd_init(&config, force),
        Some(Commands::Status) => cmd_status(&config, json_mode),
        Some(Commands::Import { collection, file }) => {
            cmd_import(&config, json_mode, cli.verbose, &collection, &file)
        }
        Some(Commands::Export { collection, output }) => {
            cmd_export(&config, &collection, output.as_deref())
        }
        Some(Commands::Show {
            collection,
            id,
            follow,
            max_depth,
            epoch,
            raw,
            pretty,
        }) => cmd_show(
            &config,
            &collection,
            &id,
            ShowOptions {
                follow,
                max_depth,
                epoch,
                raw,
                pretty,
            },
        ),
        None => {
            // No subcommand - show status by default
            cmd_status(&config, json_mode)
        }
    }
}
