//! Command-line interface for oracle-forge.
//!
//! Provides commands for listing and showing problems, running validation
//! and grading a working copy.

mod commands;

pub use commands::{parse_cli, run_with_cli, Cli, Commands, RunArgs, EXIT_FATAL};
