//! Local backend: each environment is a scratch clone of a source repository.
//!
//! Commands run as host processes with an isolated `HOME`, so global git
//! configuration written by actions never leaks out of the environment.
//! Every command leads its own process group, which is killed once the
//! command returns or its future is dropped on a timeout or abort.

use std::ffi::OsStr;
use std::path::{Path, PathBuf};
use std::process::Stdio;

use async_trait::async_trait;
use tokio::process::Command;
use tracing::{debug, info, warn};

use crate::error::EnvironmentError;
use crate::problem::{ProblemSpec, DEFAULT_REPO_DIR};

use super::{
    instance_name, prepare_repository, ArtifactRef, CommandOutput, EnvironmentBuilder,
    EnvironmentHandle, EnvironmentState,
};

const HOME_DIR: &str = "home";
const REPO_DIR: &str = "repo";

const GITCONFIG: &str = "[user]\n\tname = oracle-forge\n\temail = oracle-forge@localhost\n\
[safe]\n\tdirectory = *\n[init]\n\tdefaultBranch = master\n[advice]\n\tdetachedHead = false\n";

/// Kills whatever is left of a process group when dropped.
struct ProcessGroup {
    #[cfg(unix)]
    leader: Option<nix::unistd::Pid>,
}

impl ProcessGroup {
    fn led_by(child: &tokio::process::Child) -> Self {
        #[cfg(unix)]
        {
            Self {
                leader: child
                    .id()
                    .and_then(|id| i32::try_from(id).ok())
                    .map(nix::unistd::Pid::from_raw),
            }
        }
        #[cfg(not(unix))]
        {
            let _ = child;
            Self {}
        }
    }
}

impl Drop for ProcessGroup {
    fn drop(&mut self) {
        #[cfg(unix)]
        if let Some(leader) = self.leader {
            // ESRCH once every member has exited.
            let _ = nix::sys::signal::killpg(leader, nix::sys::signal::Signal::SIGKILL);
        }
    }
}

/// Runs `program` on the host and captures its output.
///
/// Background processes the command leaves behind are killed with it.
pub async fn run_host_command(
    program: &str,
    args: &[&str],
    cwd: &Path,
    envs: &[(&str, &OsStr)],
) -> Result<CommandOutput, EnvironmentError> {
    let mut cmd = Command::new(program);
    cmd.args(args)
        .current_dir(cwd)
        .env("GIT_TERMINAL_PROMPT", "0")
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);
    for (key, value) in envs {
        cmd.env(key, value);
    }
    #[cfg(unix)]
    cmd.process_group(0);

    let child = cmd
        .spawn()
        .map_err(|e| EnvironmentError::ExecFailed(format!("{program}: {e}")))?;
    let _group = ProcessGroup::led_by(&child);
    let output = child
        .wait_with_output()
        .await
        .map_err(|e| EnvironmentError::ExecFailed(format!("{program}: {e}")))?;

    Ok(CommandOutput {
        exit_code: output.status.code().map(i64::from).unwrap_or(-1),
        stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
        stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
    })
}

/// Builds environments by cloning a repository into a scratch directory.
pub struct LocalBuilder {
    source: PathBuf,
    scratch_root: PathBuf,
    image_repo_dir: PathBuf,
}

impl LocalBuilder {
    /// `source` is the repository every environment is cloned from and
    /// `scratch_root` the directory instances are created under.
    pub fn new(source: impl Into<PathBuf>, scratch_root: impl Into<PathBuf>) -> Self {
        Self {
            source: source.into(),
            scratch_root: scratch_root.into(),
            image_repo_dir: PathBuf::from(DEFAULT_REPO_DIR),
        }
    }

    /// Absolute grader paths under this directory are mapped onto the clone.
    pub fn with_image_repo_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.image_repo_dir = dir.into();
        self
    }

    fn home_dir(handle: &EnvironmentHandle) -> PathBuf {
        handle.root.join(HOME_DIR)
    }
}

#[async_trait]
impl EnvironmentBuilder for LocalBuilder {
    fn backend(&self) -> &'static str {
        "local"
    }

    fn allocate(&self, spec: &ProblemSpec, _artifact: Option<&ArtifactRef>) -> EnvironmentHandle {
        let name = instance_name("oracle-forge", &spec.id);
        let root = self.scratch_root.join(&name);
        EnvironmentHandle {
            name,
            problem_id: spec.id.clone(),
            repo_dir: root.join(REPO_DIR),
            root,
            image: None,
        }
    }

    async fn build(&self, handle: &EnvironmentHandle, spec: &ProblemSpec) -> Result<(), EnvironmentError> {
        let home = Self::home_dir(handle);
        tokio::fs::create_dir_all(&home).await?;
        tokio::fs::write(home.join(".gitconfig"), GITCONFIG).await?;

        let source = self.source.to_string_lossy().into_owned();
        let repo_dir = handle.repo_dir.to_string_lossy().into_owned();
        debug!(problem_id = %spec.id, source = %source, dest = %repo_dir, "Cloning source repository");
        let clone = run_host_command(
            "git",
            &["clone", "--quiet", "--no-local", source.as_str(), repo_dir.as_str()],
            &handle.root,
            &[("HOME", home.as_os_str())],
        )
        .await?;
        if !clone.success() {
            return Err(EnvironmentError::BuildFailed(format!(
                "git clone {source} failed: {}",
                clone.stderr.trim()
            )));
        }

        prepare_repository(self, handle, spec).await?;
        info!(problem_id = %spec.id, env = %handle.name, "Local environment ready");
        Ok(())
    }

    async fn run(
        &self,
        handle: &EnvironmentHandle,
        program: &str,
        args: &[&str],
        cwd: &Path,
    ) -> Result<CommandOutput, EnvironmentError> {
        if !handle.root.is_dir() {
            return Err(EnvironmentError::UnknownHandle(handle.name.clone()));
        }
        let home = Self::home_dir(handle);
        run_host_command(
            program,
            args,
            cwd,
            &[
                ("HOME", home.as_os_str()),
                ("XDG_CONFIG_HOME", home.as_os_str()),
                ("GIT_CONFIG_NOSYSTEM", OsStr::new("1")),
            ],
        )
        .await
    }

    fn resolve_path(&self, handle: &EnvironmentHandle, path: &str) -> PathBuf {
        map_into_checkout(Path::new(path), &self.image_repo_dir, &handle.repo_dir)
    }

    async fn destroy(&self, handle: &EnvironmentHandle) -> Result<(), EnvironmentError> {
        match tokio::fs::remove_dir_all(&handle.root).await {
            Ok(()) => {
                debug!(env = %handle.name, "Removed local environment");
                Ok(())
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => {
                warn!(env = %handle.name, error = %e, "Failed to remove local environment");
                Err(EnvironmentError::Io(e))
            }
        }
    }
}

fn map_into_checkout(path: &Path, image_repo_dir: &Path, repo_dir: &Path) -> PathBuf {
    if path.is_absolute() {
        match path.strip_prefix(image_repo_dir) {
            Ok(rest) => repo_dir.join(rest),
            Err(_) => path.to_path_buf(),
        }
    } else {
        repo_dir.join(path)
    }
}

/// An existing working copy on the host, graded in place.
pub struct WorkingCopy {
    root: PathBuf,
    repo_dir: PathBuf,
    image_repo_dir: PathBuf,
}

impl WorkingCopy {
    pub fn new(repo_dir: impl Into<PathBuf>) -> Self {
        Self {
            root: PathBuf::from("/"),
            repo_dir: repo_dir.into(),
            image_repo_dir: PathBuf::from(DEFAULT_REPO_DIR),
        }
    }

    /// Absolute grader paths under this directory are mapped onto the copy.
    pub fn with_image_repo_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.image_repo_dir = dir.into();
        self
    }
}

#[async_trait]
impl EnvironmentState for WorkingCopy {
    fn root(&self) -> &Path {
        &self.root
    }

    fn repo_dir(&self) -> &Path {
        &self.repo_dir
    }

    fn resolve(&self, path: &str) -> PathBuf {
        map_into_checkout(Path::new(path), &self.image_repo_dir, &self.repo_dir)
    }

    async fn run(&self, program: &str, args: &[&str], cwd: &Path) -> Result<CommandOutput, EnvironmentError> {
        run_host_command(program, args, cwd, &[]).await
    }
}
