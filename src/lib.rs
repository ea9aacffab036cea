//! oracle-forge: golden-sequence validator for git agent-evaluation tasks.
//!
//! Every problem declares a base commit, a golden action sequence and the
//! graders that recognise its solved state. The validator builds an isolated
//! environment per problem, checks that the graders reject the initial state
//! and accept the state the golden sequence produces, and writes one
//! consolidated report.

pub mod cli;
pub mod config;
pub mod environment;
pub mod error;
pub mod grading;
pub mod problem;
pub mod registry;
pub mod report;
pub mod scheduler;
pub mod validation;

// Re-export commonly used error types
pub use error::{ConfigError, EnvironmentError, GradeError, PushError, RegistryError, ReportError};
