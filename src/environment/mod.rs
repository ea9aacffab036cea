//! Isolated task environments.
//!
//! An [`EnvironmentBuilder`] turns a problem's base commit into a live,
//! exclusively owned workspace (a container or a scratch clone), runs
//! commands in it and destroys it. Graders only see the narrower
//! [`EnvironmentState`] view.

pub mod artifact;
pub mod docker;
pub mod local;
pub mod recipe;
pub mod script;

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::EnvironmentError;
use crate::problem::ProblemSpec;

pub use artifact::{substitute_prefix, ArtifactPipeline, ArtifactRef};
pub use docker::{DockerBuilder, DockerSettings};
pub use local::{LocalBuilder, WorkingCopy};

/// Identifies one environment instance.
///
/// Allocated before the environment is built so that it can always be
/// destroyed, even when the build times out or is interrupted.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct EnvironmentHandle {
    /// Unique instance name (container name or scratch directory name).
    pub name: String,
    pub problem_id: String,
    /// Filesystem root commands are resolved against.
    pub root: PathBuf,
    /// Repository checkout inside the environment.
    pub repo_dir: PathBuf,
    /// Image the instance is created from, for container backends.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image: Option<String>,
}

/// Output of a single command.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommandOutput {
    pub exit_code: i64,
    pub stdout: String,
    pub stderr: String,
}

impl CommandOutput {
    pub fn success(&self) -> bool {
        self.exit_code == 0
    }
}

/// Output of an action sequence that ran to completion.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecOutput {
    pub steps: usize,
    pub stdout: String,
    pub stderr: String,
}

/// Builds, drives and destroys environments for one backend.
#[async_trait]
pub trait EnvironmentBuilder: Send + Sync {
    /// Backend name, used in logs and reports.
    fn backend(&self) -> &'static str;

    /// Reserves a unique handle. Creates nothing yet.
    fn allocate(&self, spec: &ProblemSpec, artifact: Option<&ArtifactRef>) -> EnvironmentHandle;

    /// Creates the instance, resets the repository to `spec.base` and runs
    /// the setup actions.
    async fn build(&self, handle: &EnvironmentHandle, spec: &ProblemSpec) -> Result<(), EnvironmentError>;

    /// Runs a single program without a shell.
    async fn run(
        &self,
        handle: &EnvironmentHandle,
        program: &str,
        args: &[&str],
        cwd: &Path,
    ) -> Result<CommandOutput, EnvironmentError>;

    /// Runs `actions` in order as one shell transaction rooted at the
    /// repository directory. The first failing action aborts the rest.
    async fn exec(&self, handle: &EnvironmentHandle, actions: &[String]) -> Result<ExecOutput, EnvironmentError> {
        let script = script::compose_script(actions);
        let output = self
            .run(handle, "bash", &["-c", script.as_str()], &handle.repo_dir)
            .await?;
        if output.success() {
            return Ok(ExecOutput {
                steps: actions.len(),
                stdout: output.stdout,
                stderr: output.stderr,
            });
        }
        Err(EnvironmentError::GoldenFailed {
            step: script::failed_step(&output.stderr),
            exit_code: output.exit_code,
            stderr: script::truncate(&script::strip_markers(&output.stderr), 2000),
        })
    }

    /// Maps a path from a grader configuration onto this environment.
    /// Relative paths are taken from the repository directory.
    fn resolve_path(&self, handle: &EnvironmentHandle, path: &str) -> PathBuf {
        let path = Path::new(path);
        if path.is_absolute() {
            path.to_path_buf()
        } else {
            handle.repo_dir.join(path)
        }
    }

    /// Tears the instance down. Destroying an absent instance succeeds.
    async fn destroy(&self, handle: &EnvironmentHandle) -> Result<(), EnvironmentError>;
}

/// Resets the repository to `spec.base` and applies the setup actions.
///
/// Shared by every backend once its instance is running.
pub async fn prepare_repository<B>(
    builder: &B,
    handle: &EnvironmentHandle,
    spec: &ProblemSpec,
) -> Result<(), EnvironmentError>
where
    B: EnvironmentBuilder + ?Sized,
{
    script::validate_git_ref(&spec.base).map_err(EnvironmentError::BuildFailed)?;

    let reset = builder
        .run(handle, "bash", &["-c", script::reset_script(&spec.base).as_str()], &handle.repo_dir)
        .await?;
    if !reset.success() {
        return Err(EnvironmentError::BuildFailed(format!(
            "reset to {} failed: {}",
            spec.base,
            script::truncate(reset.stderr.trim(), 1000)
        )));
    }

    if !spec.setup.is_empty() {
        debug!(problem_id = %spec.id, actions = spec.setup.len(), "Running setup actions");
        builder
            .exec(handle, &spec.setup)
            .await
            .map_err(|e| EnvironmentError::BuildFailed(format!("setup: {e}")))?;
    }
    Ok(())
}

/// Read-only view of an environment handed to graders.
#[async_trait]
pub trait EnvironmentState: Send + Sync {
    fn root(&self) -> &Path;

    fn repo_dir(&self) -> &Path;

    /// Maps a configured path onto this environment.
    fn resolve(&self, path: &str) -> PathBuf {
        let path = Path::new(path);
        if path.is_absolute() {
            path.to_path_buf()
        } else {
            self.repo_dir().join(path)
        }
    }

    async fn run(&self, program: &str, args: &[&str], cwd: &Path) -> Result<CommandOutput, EnvironmentError>;
}

/// A built environment as seen by a grader.
pub struct BoundEnvironment<'a> {
    builder: &'a dyn EnvironmentBuilder,
    handle: &'a EnvironmentHandle,
}

impl<'a> BoundEnvironment<'a> {
    pub fn new(builder: &'a dyn EnvironmentBuilder, handle: &'a EnvironmentHandle) -> Self {
        Self { builder, handle }
    }
}

#[async_trait]
impl EnvironmentState for BoundEnvironment<'_> {
    fn root(&self) -> &Path {
        &self.handle.root
    }

    fn repo_dir(&self) -> &Path {
        &self.handle.repo_dir
    }

    fn resolve(&self, path: &str) -> PathBuf {
        self.builder.resolve_path(self.handle, path)
    }

    async fn run(&self, program: &str, args: &[&str], cwd: &Path) -> Result<CommandOutput, EnvironmentError> {
        self.builder.run(self.handle, program, args, cwd).await
    }
}

/// Builds a unique, Docker-safe instance name for a problem.
pub fn instance_name(prefix: &str, problem_id: &str) -> String {
    let slug: String = problem_id
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '-' { c.to_ascii_lowercase() } else { '-' })
        .take(48)
        .collect();
    let suffix = uuid::Uuid::new_v4().simple().to_string();
    format!("{prefix}-{slug}-{}", &suffix[..12])
}
