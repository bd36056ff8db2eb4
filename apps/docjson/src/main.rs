//! # docjson - Human-Readable Document JSON
//!
//! The main binary for importing, exporting and inspecting document graphs.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────┐
//! │                 apps/docjson (THE BINARY)            │
//! │                                                      │
//! │   ┌─────────────┐          ┌──────────────────┐      │
//! │   │    CLI      │          │  TOML config     │      │
//! │   │   (clap)    │          │  (schemas, store)│      │
//! │   └──────┬──────┘          └────────┬─────────┘      │
//! │          └─────────────┬────────────┘                │
//! │                        ▼                             │
//! │                ┌───────────────┐                     │
//! │                │ docjson-core  │                     │
//! │                │ (THE LOGIC)   │                     │
//! │                └───────────────┘                     │
//! └──────────────────────────────────────────────────────┘
//! ```
//!
//! ## Usage
//!
//! ```bash
//! docjson -C library.toml init
//! docjson -C library.toml import -c books -f books.json
//! docjson -C library.toml show -c books --id 1 --follow --max-depth 2
//! docjson -C library.toml export -c books -o books.flat.json
//! ```

use clap::Parser;
use docjson::cli;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

// =============================================================================
// APPLICATION ENTRY POINT
// =============================================================================

fn main() {
    // DOCJSON_LOG_FORMAT=json enables machine-parseable output.
    let log_format = std::env::var("DOCJSON_LOG_FORMAT").unwrap_or_else(|_| "text".to_string());

    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "docjson=info,docjson_core=info".into());

    // Logs go to stderr so exported JSON on stdout stays clean.
    match log_format.as_str() {
        "json" => {
            tracing_subscriber::registry()
                .with(filter)
                .with(tracing_subscriber::fmt::layer().json().with_writer(std::io::stderr))
                .init();
        }
        _ => {
            tracing_subscriber::registry()
                .with(filter)
                .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
                .init();
        }
    }

    let cli = cli::Cli::parse();

    if !cli.quiet && !cli.json_mode {
        print_banner();
    }

    if let Err(e) = cli::execute(cli) {
        tracing::error!("Error: {}", e);
        std::process::exit(1);
    }
}

/// Print the startup banner to stderr.
fn print_banner() {
    eprintln!(
        r#"
  docjson v{}
  documents in, plain JSON out
"#,
        env!("CARGO_PKG_VERSION")
    );
}
