//! Shared fixtures for integration tests.

#![allow(dead_code)]

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use oracle_forge::environment::{
    substitute_prefix, ArtifactPipeline, ArtifactRef, CommandOutput, EnvironmentBuilder, EnvironmentHandle,
    ExecOutput,
};
use oracle_forge::grading::{CommandCheck, CommandGraderConfig, GraderSpec};
use oracle_forge::problem::{Difficulty, ProblemSpec};
use oracle_forge::{EnvironmentError, PushError};

/// Runs git in `dir` with a fixed identity and returns trimmed stdout.
pub fn git(dir: &Path, args: &[&str]) -> String {
    let out = std::process::Command::new("git")
        .args(args)
        .current_dir(dir)
        .env("GIT_AUTHOR_NAME", "Fixture")
        .env("GIT_AUTHOR_EMAIL", "fixture@example.com")
        .env("GIT_COMMITTER_NAME", "Fixture")
        .env("GIT_COMMITTER_EMAIL", "fixture@example.com")
        .env("GIT_CONFIG_NOSYSTEM", "1")
        .output()
        .expect("git should run");
    assert!(
        out.status.success(),
        "git {args:?} failed: {}",
        String::from_utf8_lossy(&out.stderr)
    );
    String::from_utf8_lossy(&out.stdout).trim().to_string()
}

/// A repository with a root commit followed by a linear run of commits.
pub struct LinearRepo {
    pub path: PathBuf,
    pub root_commit: String,
    pub tip_commit: String,
    pub tip_tree: String,
}

/// Creates a repository in `dir` with one root commit and `extra` commits
/// on top of it, each touching its own file.
pub fn linear_repo(dir: &Path, extra: usize) -> LinearRepo {
    git(dir, &["init", "--quiet", "--initial-branch=master"]);
    std::fs::write(dir.join("README.md"), "fixture\n").expect("write README");
    git(dir, &["add", "."]);
    git(dir, &["commit", "--quiet", "-m", "Initial commit"]);
    let root_commit = git(dir, &["rev-parse", "HEAD"]);

    for i in 1..=extra {
        std::fs::write(dir.join(format!("file{i}.txt")), format!("change {i}\n")).expect("write file");
        git(dir, &["add", "."]);
        git(dir, &["commit", "--quiet", "-m", &format!("Change {i}")]);
    }

    LinearRepo {
        path: dir.to_path_buf(),
        root_commit,
        tip_commit: git(dir, &["rev-parse", "HEAD"]),
        tip_tree: git(dir, &["rev-parse", "HEAD^{tree}"]),
    }
}

/// Golden action: marks the environment solved.
pub const SOLVE: &str = "solve";
/// Golden action: fails with exit status 1.
pub const FAIL: &str = "fail";
/// Golden action: never finishes on its own.
pub const HANG: &str = "hang";
/// Golden action: panics inside the builder.
pub const PANIC: &str = "panic";
/// Golden action: solves the environment, then every later command hangs.
pub const FREEZE: &str = "freeze";
/// Golden action: the environment stops answering with a non-step error.
pub const LOST: &str = "lost";

/// Grader command that never finishes.
pub const HANGING_CHECK: &str = "hang-check";

/// Problems whose id starts with this are solved right after build.
pub const PRESOLVED_PREFIX: &str = "presolved";
/// Problems whose id starts with this fail to build.
pub const BROKEN_PREFIX: &str = "broken";
/// Problems whose id starts with this never finish building.
pub const STUCK_PREFIX: &str = "stuck";
/// Problems whose id starts with this panic while building their artifact.
pub const EXPLODING_ARTIFACT_PREFIX: &str = "exploding-artifact";

/// A problem graded by whether the fake environment is solved.
pub fn fake_problem(id: &str, golden: &[&str]) -> ProblemSpec {
    ProblemSpec::new(id, "Solve the fake environment.", Difficulty::Easy, "abc123")
        .with_golden(golden.iter().copied())
        .with_grader(GraderSpec::Command(CommandGraderConfig::new(vec![CommandCheck::new(
            "solved", "is-solved",
        )])))
}

/// In-memory environment builder that counts its lifecycle calls.
#[derive(Default)]
pub struct FakeBuilder {
    pub allocated: AtomicUsize,
    pub builds: AtomicUsize,
    pub destroyed: AtomicUsize,
    solved: Mutex<HashSet<String>>,
    frozen: Mutex<HashSet<String>>,
    build_delay: Duration,
}

impl FakeBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_build_delay(mut self, delay: Duration) -> Self {
        self.build_delay = delay;
        self
    }

    pub fn allocated(&self) -> usize {
        self.allocated.load(Ordering::SeqCst)
    }

    pub fn builds(&self) -> usize {
        self.builds.load(Ordering::SeqCst)
    }

    pub fn destroyed(&self) -> usize {
        self.destroyed.load(Ordering::SeqCst)
    }

    fn is_solved(&self, handle: &EnvironmentHandle) -> bool {
        self.solved.lock().unwrap().contains(&handle.name)
    }

    fn mark_solved(&self, handle: &EnvironmentHandle) {
        self.solved.lock().unwrap().insert(handle.name.clone());
    }
}

#[async_trait]
impl EnvironmentBuilder for FakeBuilder {
    fn backend(&self) -> &'static str {
        "fake"
    }

    fn allocate(&self, spec: &ProblemSpec, _artifact: Option<&ArtifactRef>) -> EnvironmentHandle {
        let n = self.allocated.fetch_add(1, Ordering::SeqCst);
        let name = format!("fake-{}-{n}", spec.id);
        EnvironmentHandle {
            root: PathBuf::from("/"),
            repo_dir: PathBuf::from("/fake").join(&name),
            name,
            problem_id: spec.id.clone(),
            image: None,
        }
    }

    async fn build(&self, handle: &EnvironmentHandle, spec: &ProblemSpec) -> Result<(), EnvironmentError> {
        self.builds.fetch_add(1, Ordering::SeqCst);
        if !self.build_delay.is_zero() {
            tokio::time::sleep(self.build_delay).await;
        }
        if spec.id.starts_with(STUCK_PREFIX) {
            std::future::pending::<()>().await;
        }
        if spec.id.starts_with(BROKEN_PREFIX) {
            return Err(EnvironmentError::BuildFailed("base commit missing".to_string()));
        }
        if spec.id.starts_with(PRESOLVED_PREFIX) {
            self.mark_solved(handle);
        }
        Ok(())
    }

    async fn run(
        &self,
        handle: &EnvironmentHandle,
        _program: &str,
        args: &[&str],
        _cwd: &Path,
    ) -> Result<CommandOutput, EnvironmentError> {
        let frozen = self.frozen.lock().unwrap().contains(&handle.name);
        if frozen || args.contains(&HANGING_CHECK) {
            std::future::pending::<()>().await;
        }
        let solved_check = args.contains(&"is-solved");
        let exit_code = if solved_check && !self.is_solved(handle) { 1 } else { 0 };
        Ok(CommandOutput {
            exit_code,
            ..Default::default()
        })
    }

    async fn exec(&self, handle: &EnvironmentHandle, actions: &[String]) -> Result<ExecOutput, EnvironmentError> {
        for (step, action) in actions.iter().enumerate() {
            match action.as_str() {
                SOLVE => self.mark_solved(handle),
                FAIL => {
                    return Err(EnvironmentError::GoldenFailed {
                        step: Some(step + 1),
                        exit_code: 1,
                        stderr: "fatal: action failed".to_string(),
                    })
                }
                HANG => std::future::pending::<()>().await,
                FREEZE => {
                    self.mark_solved(handle);
                    self.frozen.lock().unwrap().insert(handle.name.clone());
                }
                LOST => return Err(EnvironmentError::ExecFailed("connection to environment lost".to_string())),
                PANIC => panic!("builder exploded at step {step}"),
                _ => {}
            }
        }
        Ok(ExecOutput {
            steps: actions.len(),
            ..Default::default()
        })
    }

    async fn destroy(&self, handle: &EnvironmentHandle) -> Result<(), EnvironmentError> {
        self.destroyed.fetch_add(1, Ordering::SeqCst);
        self.solved.lock().unwrap().remove(&handle.name);
        self.frozen.lock().unwrap().remove(&handle.name);
        Ok(())
    }
}

/// Local prefix of every fake artifact.
pub const ARTIFACT_PREFIX: &str = "local";

/// In-memory artifact pipeline that records every push.
#[derive(Default)]
pub struct FakePipeline {
    built: AtomicUsize,
    pushes: Mutex<Vec<(String, Option<String>)>>,
    reject_pushes: bool,
}

impl FakePipeline {
    pub fn new() -> Self {
        Self::default()
    }

    /// A pipeline whose registry refuses every push.
    pub fn rejecting() -> Self {
        Self {
            reject_pushes: true,
            ..Self::default()
        }
    }

    pub fn built(&self) -> usize {
        self.built.load(Ordering::SeqCst)
    }

    /// `(local image, remote prefix)` of every push attempt, in order.
    pub fn pushes(&self) -> Vec<(String, Option<String>)> {
        self.pushes.lock().unwrap().clone()
    }
}

#[async_trait]
impl ArtifactPipeline for FakePipeline {
    fn artifact_ref(&self, spec: &ProblemSpec) -> ArtifactRef {
        ArtifactRef::for_problem(ARTIFACT_PREFIX, &spec.id)
    }

    async fn build_artifact(&self, spec: &ProblemSpec) -> Result<ArtifactRef, EnvironmentError> {
        self.built.fetch_add(1, Ordering::SeqCst);
        if spec.id.starts_with(EXPLODING_ARTIFACT_PREFIX) {
            panic!("recipe exploded for {}", spec.id);
        }
        Ok(self.artifact_ref(spec))
    }

    async fn push_artifact(&self, artifact: &ArtifactRef, remote_prefix: Option<&str>) -> Result<String, PushError> {
        self.pushes
            .lock()
            .unwrap()
            .push((artifact.image.clone(), remote_prefix.map(str::to_string)));
        let target = match remote_prefix {
            Some(prefix) => substitute_prefix(&artifact.image, ARTIFACT_PREFIX, prefix),
            None => artifact.image.clone(),
        };
        if self.reject_pushes {
            return Err(PushError::Rejected {
                image: target,
                message: "denied: requested access to the resource is denied".to_string(),
            });
        }
        Ok(target)
    }
}
