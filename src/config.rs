//! Validator configuration.
//!
//! Settings come from built-in defaults, optionally overlaid by a YAML file
//! (`--config`), then by command-line flags and their environment variables.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::environment::DockerSettings;
use crate::error::ConfigError;

/// Environment backend.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum Backend {
    /// One container per problem.
    #[default]
    Docker,
    /// One scratch clone of a host repository per problem.
    Local,
}

/// Per-phase time limits, in seconds.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PhaseTimeouts {
    /// Environment build and artifact build.
    pub build_secs: u64,
    pub golden_secs: u64,
    /// Each grading pass.
    pub grade_secs: u64,
    pub push_secs: u64,
}

impl Default for PhaseTimeouts {
    fn default() -> Self {
        Self {
            build_secs: 900,
            golden_secs: 600,
            grade_secs: 120,
            push_secs: 900,
        }
    }
}

impl PhaseTimeouts {
    pub fn build(&self) -> Duration {
        Duration::from_secs(self.build_secs)
    }

    pub fn golden(&self) -> Duration {
        Duration::from_secs(self.golden_secs)
    }

    pub fn grade(&self) -> Duration {
        Duration::from_secs(self.grade_secs)
    }

    pub fn push(&self) -> Duration {
        Duration::from_secs(self.push_secs)
    }
}

/// Which phases a run performs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PhaseToggles {
    /// Build the per-problem image artifact.
    pub build: bool,
    /// Build an environment, grade, apply golden, grade again.
    pub validate: bool,
    /// Push artifacts of passing problems.
    pub push: bool,
}

impl Default for PhaseToggles {
    fn default() -> Self {
        Self {
            build: false,
            validate: true,
            push: false,
        }
    }
}

impl PhaseToggles {
    /// Applies command-line phase flags. Giving no flag at all keeps the
    /// current toggles.
    pub fn overridden_by(self, build: bool, validate: bool, push: bool) -> Self {
        if !(build || validate || push) {
            return self;
        }
        Self { build, validate, push }
    }

    pub fn any(&self) -> bool {
        self.build || self.validate || self.push
    }
}

/// Local backend settings.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LocalSettings {
    /// Repository cloned for every environment.
    pub repo_source: Option<PathBuf>,
    /// Where scratch clones live. Defaults to the system temp directory.
    pub scratch_dir: Option<PathBuf>,
}

/// Complete validator configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ValidatorConfig {
    /// Number of concurrent validation workers.
    pub jobs: usize,
    /// Composite a grade must reach to count as passing.
    pub pass_threshold: f64,
    pub timeouts: PhaseTimeouts,
    pub phases: PhaseToggles,
    pub backend: Backend,
    pub docker: DockerSettings,
    pub local: LocalSettings,
    /// Extra problem files, registered after the built-in catalog.
    pub problems_dir: Option<PathBuf>,
}

impl Default for ValidatorConfig {
    fn default() -> Self {
        Self {
            jobs: 1,
            pass_threshold: 1.0,
            timeouts: PhaseTimeouts::default(),
            phases: PhaseToggles::default(),
            backend: Backend::default(),
            docker: DockerSettings::default(),
            local: LocalSettings::default(),
            problems_dir: None,
        }
    }
}

impl ValidatorConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Loads a configuration file. Missing keys keep their defaults.
    pub fn from_yaml_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.display().to_string(),
            source,
        })?;
        Self::from_yaml_str(&content)
    }

    pub fn from_yaml_str(content: &str) -> Result<Self, ConfigError> {
        if content.trim().is_empty() {
            return Ok(Self::default());
        }
        Ok(serde_yaml::from_str(content)?)
    }

    /// Validates the configuration values.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::InvalidValue` naming the first offending field.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.jobs == 0 {
            return Err(invalid("jobs", "must be greater than 0"));
        }

        if !self.pass_threshold.is_finite() || self.pass_threshold <= 0.0 || self.pass_threshold > 1.0 {
            return Err(invalid(
                "pass_threshold",
                format!("must be in (0, 1], got {}", self.pass_threshold),
            ));
        }

        let timeouts = [
            ("timeouts.build_secs", self.timeouts.build_secs),
            ("timeouts.golden_secs", self.timeouts.golden_secs),
            ("timeouts.grade_secs", self.timeouts.grade_secs),
            ("timeouts.push_secs", self.timeouts.push_secs),
        ];
        for (field, secs) in timeouts {
            if secs == 0 {
                return Err(invalid(field, "must be greater than 0"));
            }
        }

        if !self.phases.any() {
            return Err(invalid("phases", "at least one of build, validate, push must be enabled"));
        }

        match self.backend {
            Backend::Docker => {
                if self.docker.image.trim().is_empty() {
                    return Err(invalid("docker.image", "cannot be empty"));
                }
            }
            Backend::Local => {
                if self.phases.build || self.phases.push {
                    return Err(invalid("backend", "build and push phases need the docker backend"));
                }
                if self.local.repo_source.is_none() {
                    return Err(invalid("local.repo_source", "required by the local backend"));
                }
            }
        }

        Ok(())
    }

    /// Builder method to set the number of workers.
    pub fn with_jobs(mut self, jobs: usize) -> Self {
        self.jobs = jobs;
        self
    }

    pub fn with_pass_threshold(mut self, threshold: f64) -> Self {
        self.pass_threshold = threshold;
        self
    }

    pub fn with_phases(mut self, phases: PhaseToggles) -> Self {
        self.phases = phases;
        self
    }

    pub fn with_timeouts(mut self, timeouts: PhaseTimeouts) -> Self {
        self.timeouts = timeouts;
        self
    }

    pub fn with_backend(mut self, backend: Backend) -> Self {
        self.backend = backend;
        self
    }

    pub fn with_docker(mut self, docker: DockerSettings) -> Self {
        self.docker = docker;
        self
    }

    /// Selects the local backend cloning `repo_source`.
    pub fn with_local_source(mut self, repo_source: impl Into<PathBuf>) -> Self {
        self.backend = Backend::Local;
        self.local.repo_source = Some(repo_source.into());
        self
    }

    pub fn with_problems_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.problems_dir = Some(dir.into());
        self
    }
}

fn invalid(field: &str, reason: impl Into<String>) -> ConfigError {
    ConfigError::InvalidValue {
        field: field.to_string(),
        reason: reason.into(),
    }
}
