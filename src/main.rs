//! oracle-forge CLI entry point.
//!
//! Initializes logging and delegates to the CLI module for command handling.

use std::process::ExitCode;

use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[tokio::main]
async fn main() -> ExitCode {
    // Parse CLI arguments first to get log_level
    let cli = oracle_forge::cli::parse_cli();

    // Initialize tracing with environment filter
    // Priority: RUST_LOG env var > --log-level CLI arg > default "info"
    let log_filter = std::env::var("RUST_LOG").unwrap_or_else(|_| cli.log_level.clone());

    // Logs go to stderr; stdout carries reports.
    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(std::io::stderr))
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&log_filter)))
        .init();

    match oracle_forge::cli::run_with_cli(cli).await {
        Ok(code) => code,
        Err(e) => {
            tracing::error!(error = %format!("{e:#}"), "oracle-forge failed");
            eprintln!("error: {e:#}");
            ExitCode::from(oracle_forge::cli::EXIT_FATAL)
        }
    }
}
