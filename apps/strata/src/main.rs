//! # Strata - Cache Snapshot Tooling
//!
//! The Strata binary works on cache snapshots produced by
//! `Cache::extract` (JSON rendering or the binary persistence format):
//! inspection, offline garbage collection and eviction, format
//! conversion, and entity identity checks against a policy file.
//!
//! ## Usage
//!
//! ```bash
//! # Inspect a snapshot
//! strata -S cache.snapshot.json status
//! strata -S cache.snapshot.json get ROOT_QUERY
//!
//! # Offline maintenance (writes the snapshot back)
//! strata -S cache.snapshot.json gc
//! strata -S cache.snapshot.json evict Item:5 --field tags
//!
//! # Format conversion
//! strata -S cache.snapshot.json export -o cache.snapshot.bin
//! ```

mod cli;

use clap::Parser;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

// =============================================================================
// APPLICATION ENTRY POINT
// =============================================================================

fn main() {
    let cli = cli::Cli::parse();

    // Initialize tracing — STRATA_LOG_FORMAT=json enables machine-parseable output.
    let log_format = std::env::var("STRATA_LOG_FORMAT").unwrap_or_else(|_| "text".to_string());

    let default_filter = if cli.verbose {
        "strata=debug,strata_core=debug"
    } else {
        "strata=info,strata_core=warn"
    };
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| default_filter.into());

    match log_format.as_str() {
        "json" => {
            tracing_subscriber::registry()
                .with(filter)
                .with(tracing_subscriber::fmt::layer().json())
                .init();
        }
        _ => {
            tracing_subscriber::registry()
                .with(filter)
                .with(tracing_subscriber::fmt::layer())
                .init();
        }
    }

    if !cli.quiet {
        print_banner();
    }

    if let Err(e) = cli::execute(cli) {
        tracing::error!("Error: {}", e);
        std::process::exit(1);
    }
}

/// Print the Strata startup banner.
fn print_banner() {
    println!(
        "strata v{} — normalized cache snapshot tooling",
        env!("CARGO_PKG_VERSION")
    );
}
