//! Docker backend using the bollard crate.
//!
//! Each environment is one long-running container (`sleep infinity`) created
//! from the base image or the problem's artifact. Commands run through the
//! exec API; teardown force-removes the container.
//!
//! Container creation runs in its own task that teardown waits for, so a
//! build interrupted while the daemon is still creating the container
//! cannot leave that container behind.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use bollard::auth::DockerCredentials;
use bollard::container::{Config, CreateContainerOptions, LogOutput, RemoveContainerOptions, StartContainerOptions};
use bollard::exec::{CreateExecOptions, StartExecResults};
use bollard::image::{BuildImageOptions, CreateImageOptions, PushImageOptions, TagImageOptions};
use bollard::models::HostConfig;
use bollard::Docker;
use futures::StreamExt;
use serde::{Deserialize, Serialize};
use tokio::sync::{oneshot, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::error::{EnvironmentError, PushError};
use crate::problem::{ProblemSpec, DEFAULT_REPO_DIR};

use super::artifact::split_image_ref;
use super::recipe::{build_context, Recipe};
use super::{
    instance_name, prepare_repository, substitute_prefix, ArtifactPipeline, ArtifactRef, CommandOutput,
    EnvironmentBuilder, EnvironmentHandle,
};

/// Docker backend settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DockerSettings {
    /// Base image holding the repository checkout.
    pub image: String,
    /// Repository directory inside the image.
    pub repo_dir: String,
    /// Prefix of locally built artifact tags.
    pub local_prefix: String,
    /// Registry prefix artifacts are re-tagged with on push.
    pub registry_prefix: Option<String>,
    pub registry_username: Option<String>,
    pub registry_password: Option<String>,
    /// Network mode for environment containers.
    pub network_mode: Option<String>,
    /// Custom Dockerfile recipe (tera template).
    pub recipe: Option<PathBuf>,
    /// Extra `KEY=VALUE` environment for containers.
    pub env: Vec<String>,
}

impl Default for DockerSettings {
    fn default() -> Self {
        Self {
            image: "oracle-forge/clickhouse-git:latest".to_string(),
            repo_dir: DEFAULT_REPO_DIR.to_string(),
            local_prefix: "oracle-forge".to_string(),
            registry_prefix: None,
            registry_username: None,
            registry_password: None,
            network_mode: Some("bridge".to_string()),
            recipe: None,
            env: Vec::new(),
        }
    }
}

fn is_not_found(err: &bollard::errors::Error) -> bool {
    matches!(
        err,
        bollard::errors::Error::DockerResponseServerError { status_code: 404, .. }
    )
}

async fn create_and_start(docker: &Docker, name: &str, config: Config<String>) -> Result<(), EnvironmentError> {
    let options = CreateContainerOptions {
        name: name.to_string(),
        platform: None,
    };
    docker
        .create_container(Some(options), config)
        .await
        .map_err(|e| EnvironmentError::BuildFailed(format!("Failed to create container: {e}")))?;
    docker
        .start_container(name, None::<StartContainerOptions<String>>)
        .await
        .map_err(|e| EnvironmentError::BuildFailed(format!("Failed to start container: {e}")))?;
    Ok(())
}

/// Docker-backed environment builder and artifact pipeline.
pub struct DockerBuilder {
    docker: Docker,
    settings: DockerSettings,
    recipe: Recipe,
    /// Creation tasks by container name, awaited by `destroy`.
    creating: Mutex<HashMap<String, JoinHandle<()>>>,
}

impl DockerBuilder {
    /// Connects to the local Docker daemon.
    pub fn connect(settings: DockerSettings) -> Result<Self, EnvironmentError> {
        let docker = Docker::connect_with_local_defaults()
            .map_err(|e| EnvironmentError::DaemonUnavailable(format!("Failed to connect: {e}")))?;
        Self::from_docker(docker, settings)
    }

    /// Wraps an existing bollard client.
    pub fn from_docker(docker: Docker, settings: DockerSettings) -> Result<Self, EnvironmentError> {
        let recipe = match &settings.recipe {
            Some(path) => Recipe::from_file(path)?,
            None => Recipe::default(),
        };
        Ok(Self {
            docker,
            settings,
            recipe,
            creating: Mutex::new(HashMap::new()),
        })
    }

    /// Verifies the daemon answers.
    pub async fn ping(&self) -> Result<(), EnvironmentError> {
        self.docker
            .ping()
            .await
            .map(|_| ())
            .map_err(|e| EnvironmentError::DaemonUnavailable(e.to_string()))
    }

    async fn ensure_image(&self, image: &str) -> Result<(), EnvironmentError> {
        if self.docker.inspect_image(image).await.is_ok() {
            return Ok(());
        }
        info!(image = %image, "Pulling image");
        let options = CreateImageOptions {
            from_image: image,
            ..Default::default()
        };
        let mut stream = self.docker.create_image(Some(options), None, None);
        while let Some(result) = stream.next().await {
            result.map_err(|e| EnvironmentError::BuildFailed(format!("Failed to pull image {image}: {e}")))?;
        }
        Ok(())
    }

    fn credentials(&self) -> Option<DockerCredentials> {
        match (&self.settings.registry_username, &self.settings.registry_password) {
            (Some(username), Some(password)) => Some(DockerCredentials {
                username: Some(username.clone()),
                password: Some(password.clone()),
                ..Default::default()
            }),
            _ => None,
        }
    }
}

#[async_trait]
impl EnvironmentBuilder for DockerBuilder {
    fn backend(&self) -> &'static str {
        "docker"
    }

    fn allocate(&self, spec: &ProblemSpec, artifact: Option<&ArtifactRef>) -> EnvironmentHandle {
        EnvironmentHandle {
            name: instance_name("oracle-forge", &spec.id),
            problem_id: spec.id.clone(),
            root: PathBuf::from("/"),
            repo_dir: PathBuf::from(&self.settings.repo_dir),
            image: Some(
                artifact
                    .map(|a| a.image.clone())
                    .unwrap_or_else(|| self.settings.image.clone()),
            ),
        }
    }

    async fn build(&self, handle: &EnvironmentHandle, spec: &ProblemSpec) -> Result<(), EnvironmentError> {
        let image = handle.image.as_deref().unwrap_or(&self.settings.image);
        self.ensure_image(image).await?;

        let host_config = HostConfig {
            network_mode: self.settings.network_mode.clone(),
            ..Default::default()
        };
        let config = Config {
            image: Some(image.to_string()),
            cmd: Some(vec!["sleep".to_string(), "infinity".to_string()]),
            env: if self.settings.env.is_empty() {
                None
            } else {
                Some(self.settings.env.clone())
            },
            working_dir: Some(self.settings.repo_dir.clone()),
            host_config: Some(host_config),
            tty: Some(true),
            ..Default::default()
        };

        let (tx, rx) = oneshot::channel();
        let docker = self.docker.clone();
        let name = handle.name.clone();
        {
            let mut creating = self.creating.lock().await;
            let task = tokio::spawn(async move {
                let _ = tx.send(create_and_start(&docker, &name, config).await);
            });
            creating.insert(handle.name.clone(), task);
        }
        rx.await
            .map_err(|_| EnvironmentError::BuildFailed("container creation task ended unexpectedly".to_string()))??;
        debug!(problem_id = %spec.id, container = %handle.name, image = %image, "Container started");

        prepare_repository(self, handle, spec).await?;
        info!(problem_id = %spec.id, container = %handle.name, "Docker environment ready");
        Ok(())
    }

    async fn run(
        &self,
        handle: &EnvironmentHandle,
        program: &str,
        args: &[&str],
        cwd: &Path,
    ) -> Result<CommandOutput, EnvironmentError> {
        let mut cmd = Vec::with_capacity(args.len() + 1);
        cmd.push(program);
        cmd.extend_from_slice(args);
        let cwd = cwd.to_string_lossy().into_owned();

        let exec_options = CreateExecOptions {
            cmd: Some(cmd),
            working_dir: Some(cwd.as_str()),
            env: Some(vec!["GIT_TERMINAL_PROMPT=0"]),
            attach_stdout: Some(true),
            attach_stderr: Some(true),
            tty: Some(false),
            ..Default::default()
        };

        let exec = self
            .docker
            .create_exec(&handle.name, exec_options)
            .await
            .map_err(|e| {
                if is_not_found(&e) {
                    EnvironmentError::UnknownHandle(handle.name.clone())
                } else {
                    EnvironmentError::ExecFailed(format!("Failed to create exec: {e}"))
                }
            })?;

        let start_result = self
            .docker
            .start_exec(&exec.id, None)
            .await
            .map_err(|e| EnvironmentError::ExecFailed(format!("Failed to start exec: {e}")))?;

        let mut stdout = String::new();
        let mut stderr = String::new();
        if let StartExecResults::Attached { mut output, .. } = start_result {
            while let Some(chunk) = output.next().await {
                match chunk {
                    Ok(LogOutput::StdOut { message }) => stdout.push_str(&String::from_utf8_lossy(&message)),
                    Ok(LogOutput::StdErr { message }) => stderr.push_str(&String::from_utf8_lossy(&message)),
                    Ok(_) => {}
                    Err(e) => {
                        return Err(EnvironmentError::ExecFailed(format!("Error reading output: {e}")));
                    }
                }
            }
        }

        let exec_info = self
            .docker
            .inspect_exec(&exec.id)
            .await
            .map_err(|e| EnvironmentError::ExecFailed(format!("Failed to inspect exec: {e}")))?;

        Ok(CommandOutput {
            exit_code: exec_info.exit_code.unwrap_or(-1),
            stdout,
            stderr,
        })
    }

    async fn destroy(&self, handle: &EnvironmentHandle) -> Result<(), EnvironmentError> {
        let pending = self.creating.lock().await.remove(&handle.name);
        if let Some(task) = pending {
            if let Err(e) = task.await {
                warn!(container = %handle.name, error = %e, "Container creation task failed");
            }
        }

        let options = RemoveContainerOptions {
            force: true,
            v: true,
            ..Default::default()
        };
        match self.docker.remove_container(&handle.name, Some(options)).await {
            Ok(()) => {
                debug!(container = %handle.name, "Container removed");
                Ok(())
            }
            Err(e) if is_not_found(&e) => Ok(()),
            Err(e) => {
                warn!(container = %handle.name, error = %e, "Failed to remove container");
                Err(EnvironmentError::ExecFailed(format!("Failed to remove container: {e}")))
            }
        }
    }
}

#[async_trait]
impl ArtifactPipeline for DockerBuilder {
    fn artifact_ref(&self, spec: &ProblemSpec) -> ArtifactRef {
        ArtifactRef::for_problem(&self.settings.local_prefix, &spec.id)
    }

    async fn build_artifact(&self, spec: &ProblemSpec) -> Result<ArtifactRef, EnvironmentError> {
        let artifact = self.artifact_ref(spec);
        let dockerfile = self
            .recipe
            .render(spec, &self.settings.image, &self.settings.repo_dir)?;
        let context = build_context(&dockerfile, spec)?;

        let options = BuildImageOptions {
            dockerfile: "Dockerfile".to_string(),
            t: artifact.image.clone(),
            rm: true,
            forcerm: true,
            ..Default::default()
        };

        info!(problem_id = %spec.id, image = %artifact.image, "Building artifact");
        let mut stream = self.docker.build_image(options, None, Some(context.into()));
        while let Some(item) = stream.next().await {
            let info = item.map_err(|e| EnvironmentError::BuildFailed(format!("Image build failed: {e}")))?;
            if let Some(error) = info.error {
                return Err(EnvironmentError::BuildFailed(error));
            }
            if let Some(line) = info.stream.as_deref().map(str::trim).filter(|l| !l.is_empty()) {
                debug!(problem_id = %spec.id, "{line}");
            }
        }
        Ok(artifact)
    }

    async fn push_artifact(&self, artifact: &ArtifactRef, remote_prefix: Option<&str>) -> Result<String, PushError> {
        if self.docker.inspect_image(&artifact.image).await.is_err() {
            return Err(PushError::MissingArtifact(artifact.problem_id.clone()));
        }

        let target = match remote_prefix {
            Some(prefix) => substitute_prefix(&artifact.image, &self.settings.local_prefix, prefix),
            None => artifact.image.clone(),
        };
        let (repo, tag) = split_image_ref(&target);
        let (repo, tag) = (repo.to_string(), tag.to_string());

        if target != artifact.image {
            let options = TagImageOptions {
                repo: repo.as_str(),
                tag: tag.as_str(),
            };
            self.docker
                .tag_image(&artifact.image, Some(options))
                .await
                .map_err(|e| PushError::TagFailed {
                    image: artifact.image.clone(),
                    target: target.clone(),
                    message: e.to_string(),
                })?;
        }

        info!(problem_id = %artifact.problem_id, target = %target, "Pushing artifact");
        let options = PushImageOptions { tag: tag.as_str() };
        let mut stream = self.docker.push_image(&repo, Some(options), self.credentials());
        while let Some(item) = stream.next().await {
            let info = item.map_err(|e| PushError::Rejected {
                image: target.clone(),
                message: e.to_string(),
            })?;
            if let Some(error) = info.error {
                return Err(PushError::Rejected {
                    image: target.clone(),
                    message: error,
                });
            }
        }
        Ok(target)
    }
}
