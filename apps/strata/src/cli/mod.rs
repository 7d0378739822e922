//! # Strata CLI Module
//!
//! This module implements the CLI interface for Strata.
//!
//! ## Available Commands
//!
//! - `status` - Show snapshot statistics
//! - `entities` - List entity keys
//! - `get` - Print one entity record
//! - `gc` - Collect unreachable entities and write the snapshot back
//! - `evict` - Remove an entity or field and write the snapshot back
//! - `export` - Convert a snapshot to another format
//! - `import` - Replace the working snapshot from a file
//! - `identify` - Compute the entity key of a response object

mod commands;

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use strata_core::CacheError;

pub use commands::*;

// =============================================================================
// CLI STRUCTURE
// =============================================================================

/// Strata - cache snapshot tooling
///
/// Works on snapshots produced by the cache: the JSON rendering
/// (references tagged as {"__ref": ...}) or the binary persistence
/// format. The format is detected from the file contents.
#[derive(Parser, Debug)]
#[command(name = "strata")]
#[command(version, about, long_about = None)]
pub struct Cli {
    /// Enable verbose output
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Suppress banner output
    #[arg(short, long, global = true)]
    pub quiet: bool,

    /// Path to the working snapshot file
    #[arg(short = 'S', long, global = true, default_value = "strata.snapshot.json")]
    pub snapshot: PathBuf,

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
    /// Show snapshot statistics
    Status,

    /// List entity keys in the snapshot
    Entities {
        /// Only list keys starting with this prefix
        #[arg(short, long)]
        prefix: Option<String>,

        /// Maximum number of keys to print
        #[arg(short, long, default_value = "100")]
        limit: usize,
    },

    /// Print one entity record as JSON
    Get {
        /// The entity key (e.g. "Item:5" or "ROOT_QUERY")
        key: String,
    },

    /// Collect unreachable entities and write the snapshot back
    Gc {
        /// Write the collected snapshot here instead of in place
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Remove an entity (or one of its fields) and write the snapshot back
    Evict {
        /// The entity key to evict from
        key: String,

        /// Evict only this field (every argument variant of it)
        #[arg(short, long)]
        field: Option<String>,

        /// Write the modified snapshot here instead of in place
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Convert the snapshot to another format
    Export {
        /// Output file path
        #[arg(short, long)]
        output: PathBuf,

        /// Output format (json, binary)
        #[arg(short = 't', long, default_value = "binary")]
        format: String,
    },

    /// Replace the working snapshot from a file (any supported format)
    Import {
        /// Input file path
        #[arg(short, long)]
        input: PathBuf,
    },

    /// Compute the entity key a response object normalizes to
    Identify {
        /// Path to a JSON file holding the response object
        file: PathBuf,

        /// TOML file declaring per-type key fields
        #[arg(short, long)]
        policies: Option<PathBuf>,
    },
}

// =============================================================================
// COMMAND EXECUTION
// =============================================================================

/// Execute the CLI with parsed arguments.
pub fn execute(cli: Cli) -> Result<(), CacheError> {
    let json_mode = cli.json_mode;

    match cli.command {
        Some(Commands::Status) => cmd_status(&cli.snapshot, json_mode),
        Some(Commands::Entities { prefix, limit }) => {
            cmd_entities(&cli.snapshot, json_mode, prefix.as_deref(), limit)
        }
        Some(Commands::Get { key }) => cmd_get(&cli.snapshot, &key),
        Some(Commands::Gc { output }) => cmd_gc(&cli.snapshot, output.as_deref(), json_mode),
        Some(Commands::Evict { key, field, output }) => {
            cmd_evict(&cli.snapshot, &key, field.as_deref(), output.as_deref(), json_mode)
        }
        Some(Commands::Export { output, format }) => {
            cmd_export(&cli.snapshot, &output, &format)
        }
        Some(Commands::Import { input }) => cmd_import(&cli.snapshot, &input),
        Some(Commands::Identify { file, policies }) => {
            cmd_identify(&file, policies.as_deref(), json_mode)
        }
        None => cmd_status(&cli.snapshot, json_mode),
    }
}
