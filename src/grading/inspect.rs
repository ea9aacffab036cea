//! Read-only git queries against an environment's repository.

use std::path::{Path, PathBuf};

use crate::environment::{CommandOutput, EnvironmentState};
use crate::error::GradeError;

/// Which identity field to list from commit history.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthorField {
    Email,
    Name,
}

impl AuthorField {
    fn format(self) -> &'static str {
        match self {
            AuthorField::Email => "--format=%ae",
            AuthorField::Name => "--format=%an",
        }
    }
}

/// Runs git inside an environment for one repository directory.
pub struct GitInspector<'a> {
    state: &'a dyn EnvironmentState,
    dir: PathBuf,
}

impl<'a> GitInspector<'a> {
    pub fn new(state: &'a dyn EnvironmentState, dir: impl Into<PathBuf>) -> Self {
        Self {
            state,
            dir: dir.into(),
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn dir_str(&self) -> String {
        self.dir.to_string_lossy().into_owned()
    }

    async fn git(&self, args: &[&str]) -> Result<CommandOutput, GradeError> {
        let dir = self.dir_str();
        let mut full = Vec::with_capacity(args.len() + 2);
        full.push("-C");
        full.push(dir.as_str());
        full.extend_from_slice(args);
        Ok(self.state.run("git", &full, self.state.root()).await?)
    }

    async fn git_stdout(&self, args: &[&str]) -> Result<String, GradeError> {
        let output = self.git(args).await?;
        if !output.success() {
            return Err(GradeError::Inspection {
                command: format!("git {}", args.join(" ")),
                stderr: output.stderr.trim().to_string(),
            });
        }
        Ok(output.stdout.trim().to_string())
    }

    /// Whether the directory exists.
    pub async fn dir_exists(&self) -> Result<bool, GradeError> {
        let dir = self.dir_str();
        let output = self.state.run("test", &["-d", dir.as_str()], self.state.root()).await?;
        Ok(output.success())
    }

    /// Whether the directory is inside a git work tree.
    pub async fn is_repository(&self) -> Result<bool, GradeError> {
        let output = self.git(&["rev-parse", "--is-inside-work-tree"]).await?;
        Ok(output.success() && output.stdout.trim() == "true")
    }

    /// Whether `rev` resolves to a commit.
    pub async fn commit_exists(&self, rev: &str) -> Result<bool, GradeError> {
        let spec = format!("{rev}^{{commit}}");
        Ok(self.git(&["cat-file", "-e", spec.as_str()]).await?.success())
    }

    /// Tree object id of `HEAD`.
    pub async fn tree_hash(&self) -> Result<String, GradeError> {
        self.git_stdout(&["rev-parse", "HEAD^{tree}"]).await
    }

    /// Commits in `base..HEAD`, optionally following first parents only.
    pub async fn count_commits(&self, base: &str, first_parent: bool) -> Result<u64, GradeError> {
        let range = format!("{base}..HEAD");
        let mut args = vec!["rev-list", "--count"];
        if first_parent {
            args.push("--first-parent");
        }
        args.push(range.as_str());
        let out = self.git_stdout(&args).await?;
        out.parse().map_err(|_| GradeError::Inspection {
            command: format!("git {}", args.join(" ")),
            stderr: format!("unexpected output: {out}"),
        })
    }

    /// Whether `ancestor` is reachable from `descendant`.
    pub async fn is_ancestor(&self, ancestor: &str, descendant: &str) -> Result<bool, GradeError> {
        let output = self.git(&["merge-base", "--is-ancestor", ancestor, descendant]).await?;
        match output.exit_code {
            0 => Ok(true),
            1 => Ok(false),
            _ => Err(GradeError::Inspection {
                command: format!("git merge-base --is-ancestor {ancestor} {descendant}"),
                stderr: output.stderr.trim().to_string(),
            }),
        }
    }

    /// Subject line of the `HEAD` commit.
    pub async fn head_subject(&self) -> Result<String, GradeError> {
        self.git_stdout(&["log", "-1", "--format=%s"]).await
    }

    /// Author identities of the commits in `base..HEAD`, newest first.
    pub async fn authors(&self, base: &str, field: AuthorField) -> Result<Vec<String>, GradeError> {
        let range = format!("{base}..HEAD");
        let out = self.git_stdout(&["log", field.format(), range.as_str()]).await?;
        Ok(out.lines().map(str::to_string).filter(|l| !l.is_empty()).collect())
    }

    /// `git diff-tree --stat` between two trees, or `None` when git cannot
    /// compare them.
    pub async fn diff_stat(&self, from: &str, to: &str) -> Result<Option<String>, GradeError> {
        let output = self.git(&["diff-tree", "--stat", from, to]).await?;
        Ok(output.success().then(|| output.stdout.trim().to_string()))
    }
}
