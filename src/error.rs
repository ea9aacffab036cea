//! Error types for oracle-forge operations.
//!
//! Defines error types for the major subsystems:
//! - Problem registry loading and selection
//! - Environment construction and command execution
//! - Grading (environment-integrity faults, not failing scores)
//! - Artifact push
//! - Report output and configuration

use thiserror::Error;

/// Errors that can occur during registry operations.
///
/// All of these are fatal at load time: an inconsistent task set aborts the
/// run before any environment is built.
#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("Problem '{0}' not found in registry")]
    NotFound(String),

    #[error("Problem '{0}' already exists in registry")]
    DuplicateId(String),

    #[error("Selection '{0}' matched no registered problem")]
    NoMatch(String),

    #[error("Invalid problem '{id}': {reason}")]
    InvalidSpec { id: String, reason: String },

    #[error("Failed to load problem file '{path}': {message}")]
    Load { path: String, message: String },

    #[error("Invalid selection pattern '{pattern}': {message}")]
    InvalidPattern { pattern: String, message: String },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Errors raised by an environment builder.
#[derive(Debug, Error)]
pub enum EnvironmentError {
    #[error("Environment build failed: {0}")]
    BuildFailed(String),

    #[error("Command execution failed: {0}")]
    ExecFailed(String),

    /// `step` is one-based; `None` when the script exited without naming it.
    #[error("Golden {} failed with exit code {exit_code}: {stderr}", step_label(.step))]
    GoldenFailed {
        step: Option<usize>,
        exit_code: i64,
        stderr: String,
    },

    #[error("Docker daemon not available: {0}")]
    DaemonUnavailable(String),

    #[error("Environment '{0}' was never built or is already destroyed")]
    UnknownHandle(String),

    #[error("Recipe rendering failed: {0}")]
    Recipe(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

fn step_label(step: &Option<usize>) -> String {
    match step {
        Some(step) => format!("action {step}"),
        None => "sequence (unknown step)".to_string(),
    }
}

/// Errors raised while grading.
///
/// These are environment-integrity faults or grader crashes. A grading
/// criterion that is simply not met is a `0.0` subscore, never an error.
#[derive(Debug, Error)]
pub enum GradeError {
    #[error("Working directory does not exist: {0}")]
    WorkingDirMissing(String),

    #[error("Not a git repository: {0}")]
    NotARepository(String),

    #[error("Base commit '{commit}' is not reachable in {dir}")]
    BaseUnreachable { commit: String, dir: String },

    #[error("Repository inspection failed ({command}): {stderr}")]
    Inspection { command: String, stderr: String },

    #[error("Invalid grader configuration: {0}")]
    InvalidConfig(String),

    #[error("Environment error during grading: {0}")]
    Environment(#[from] EnvironmentError),
}

/// Errors that can occur while building or pushing an image artifact.
#[derive(Debug, Error)]
pub enum PushError {
    #[error("No artifact was built for '{0}'")]
    MissingArtifact(String),

    #[error("Failed to tag '{image}' as '{target}': {message}")]
    TagFailed {
        image: String,
        target: String,
        message: String,
    },

    #[error("Registry rejected push of '{image}': {message}")]
    Rejected { image: String, message: String },

    #[error("Artifact push is not supported by the {0} backend")]
    Unsupported(String),
}

/// Errors that can occur while writing a report.
#[derive(Debug, Error)]
pub enum ReportError {
    #[error("JSON serialization error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Errors that can occur while loading or validating configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Invalid configuration value for '{field}': {reason}")]
    InvalidValue { field: String, reason: String },

    #[error("Failed to read config file '{path}': {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("YAML parsing error: {0}")]
    Yaml(#[from] serde_yaml::Error),
}
