//! Git-state grader.
//!
//! Compares a repository against fingerprints captured from the golden end
//! state: the `HEAD` tree, the number of commits since a base, and optional
//! commit-subject and author constraints. Each check is its own subscore.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::debug;

use crate::environment::EnvironmentState;
use crate::error::GradeError;

use super::inspect::{AuthorField, GitInspector};
use super::{Grade, Grader, Subscore};

fn default_weight() -> f64 {
    1.0
}

/// Required and forbidden members of a listed identity field.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MembershipRule {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub must_contain: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub must_not_contain: Vec<String>,
}

impl MembershipRule {
    pub fn must_contain<I, S>(mut self, values: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.must_contain = values.into_iter().map(Into::into).collect();
        self
    }

    pub fn must_not_contain<I, S>(mut self, values: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.must_not_contain = values.into_iter().map(Into::into).collect();
        self
    }

    /// Returns the violations found in `actual`.
    fn violations(&self, actual: &[String]) -> Vec<String> {
        let mut problems = Vec::new();
        for required in &self.must_contain {
            if !actual.iter().any(|a| a == required) {
                problems.push(format!("missing {required}"));
            }
        }
        for forbidden in &self.must_not_contain {
            if actual.iter().any(|a| a == forbidden) {
                problems.push(format!("found {forbidden}"));
            }
        }
        problems
    }
}

/// Author identity checks over `base..HEAD`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MetadataChecks {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub author_emails: Option<MembershipRule>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub author_names: Option<MembershipRule>,
}

impl MetadataChecks {
    fn is_empty(&self) -> bool {
        self.author_emails.is_none() && self.author_names.is_none()
    }
}

/// Configuration of a [`GitGrader`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GitGraderConfig {
    /// Repository to inspect. Defaults to the environment's repository.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub working_dir: Option<String>,
    pub expected_tree_hash: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expected_commit_count: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub base_commit: Option<String>,
    #[serde(default)]
    pub first_parent: bool,
    /// Substring the `HEAD` subject must contain.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expected_commit_message: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub validate_metadata: Option<MetadataChecks>,
    #[serde(default = "default_weight")]
    pub weight: f64,
}

impl GitGraderConfig {
    pub fn new(expected_tree_hash: impl Into<String>) -> Self {
        Self {
            working_dir: None,
            expected_tree_hash: expected_tree_hash.into(),
            expected_commit_count: None,
            base_commit: None,
            first_parent: false,
            expected_commit_message: None,
            validate_metadata: None,
            weight: default_weight(),
        }
    }

    pub fn with_working_dir(mut self, dir: impl Into<String>) -> Self {
        self.working_dir = Some(dir.into());
        self
    }

    pub fn with_commit_count(mut self, base: impl Into<String>, count: u64, first_parent: bool) -> Self {
        self.base_commit = Some(base.into());
        self.expected_commit_count = Some(count);
        self.first_parent = first_parent;
        self
    }

    pub fn with_commit_message(mut self, message: impl Into<String>) -> Self {
        self.expected_commit_message = Some(message.into());
        self
    }

    pub fn with_author_emails(mut self, rule: MembershipRule) -> Self {
        self.validate_metadata.get_or_insert_with(MetadataChecks::default).author_emails = Some(rule);
        self
    }

    pub fn with_author_names(mut self, rule: MembershipRule) -> Self {
        self.validate_metadata.get_or_insert_with(MetadataChecks::default).author_names = Some(rule);
        self
    }

    pub fn with_weight(mut self, weight: f64) -> Self {
        self.weight = weight;
        self
    }

    pub fn validate(&self) -> Result<(), GradeError> {
        if self.expected_tree_hash.trim().is_empty() {
            return Err(GradeError::InvalidConfig("expected_tree_hash must not be empty".to_string()));
        }
        if !self.expected_tree_hash.chars().all(|c| c.is_ascii_hexdigit()) {
            return Err(GradeError::InvalidConfig(format!(
                "expected_tree_hash is not a hex object id: {}",
                self.expected_tree_hash
            )));
        }
        let needs_base = self.expected_commit_count.is_some()
            || self.validate_metadata.as_ref().is_some_and(|m| !m.is_empty());
        if needs_base && self.base_commit.is_none() {
            return Err(GradeError::InvalidConfig(
                "commit count and author checks require base_commit".to_string(),
            ));
        }
        if let Some(base) = &self.base_commit {
            crate::environment::script::validate_git_ref(base).map_err(GradeError::InvalidConfig)?;
        }
        if !self.weight.is_finite() || self.weight < 0.0 {
            return Err(GradeError::InvalidConfig(format!(
                "weight must be finite and non-negative, got {}",
                self.weight
            )));
        }
        Ok(())
    }
}

/// Grades a repository against git fingerprints.
#[derive(Debug, Clone)]
pub struct GitGrader {
    config: GitGraderConfig,
}

impl GitGrader {
    pub fn new(config: GitGraderConfig) -> Result<Self, GradeError> {
        config.validate()?;
        Ok(Self { config })
    }

    pub fn config(&self) -> &GitGraderConfig {
        &self.config
    }

    async fn author_subscore(
        &self,
        inspector: &GitInspector<'_>,
        base: &str,
        field: AuthorField,
        rule: &MembershipRule,
        name: &str,
        metadata: &mut serde_json::Map<String, serde_json::Value>,
    ) -> Result<Subscore, GradeError> {
        let mut actual = inspector.authors(base, field).await?;
        actual.sort();
        actual.dedup();
        let violations = rule.violations(&actual);
        metadata.insert(name.to_string(), json!(actual));
        if !violations.is_empty() {
            metadata.insert(format!("{name}_violations"), json!(violations));
        }
        Ok(Subscore::check(name, violations.is_empty(), self.config.weight))
    }
}

#[async_trait]
impl Grader for GitGrader {
    fn kind(&self) -> &'static str {
        "git"
    }

    async fn grade(&self, state: &dyn EnvironmentState) -> Result<Grade, GradeError> {
        let config = &self.config;
        let dir = match &config.working_dir {
            Some(dir) => state.resolve(dir),
            None => state.repo_dir().to_path_buf(),
        };
        let dir_display = dir.display().to_string();
        let inspector = GitInspector::new(state, dir);

        if !inspector.dir_exists().await? {
            return Err(GradeError::WorkingDirMissing(dir_display));
        }
        if !inspector.is_repository().await? {
            return Err(GradeError::NotARepository(dir_display));
        }
        if let Some(base) = &config.base_commit {
            if !inspector.commit_exists(base).await? {
                return Err(GradeError::BaseUnreachable {
                    commit: base.clone(),
                    dir: dir_display,
                });
            }
        }

        let mut subscores = Vec::new();
        let mut metadata = serde_json::Map::new();

        let tree = inspector.tree_hash().await?;
        let tree_matches = tree == config.expected_tree_hash;
        subscores.push(Subscore::check("tree_hash", tree_matches, config.weight));
        metadata.insert("tree_hash".to_string(), json!(tree));
        if !tree_matches {
            if let Some(stat) = inspector.diff_stat(&config.expected_tree_hash, &tree).await? {
                metadata.insert("tree_diff".to_string(), json!(stat));
            }
        }

        if let (Some(expected), Some(base)) = (config.expected_commit_count, &config.base_commit) {
            let count = inspector.count_commits(base, config.first_parent).await?;
            subscores.push(Subscore::check("commit_count", count == expected, config.weight));
            metadata.insert("commit_count".to_string(), json!(count));
        }

        if let Some(expected) = &config.expected_commit_message {
            let subject = inspector.head_subject().await?;
            subscores.push(Subscore::check(
                "commit_message",
                subject.contains(expected.as_str()),
                config.weight,
            ));
            metadata.insert("commit_message".to_string(), json!(subject));
        }

        if let (Some(checks), Some(base)) = (&config.validate_metadata, &config.base_commit) {
            if let Some(rule) = &checks.author_emails {
                subscores.push(
                    self.author_subscore(&inspector, base, AuthorField::Email, rule, "author_emails", &mut metadata)
                        .await?,
                );
            }
            if let Some(rule) = &checks.author_names {
                subscores.push(
                    self.author_subscore(&inspector, base, AuthorField::Name, rule, "author_names", &mut metadata)
                        .await?,
                );
            }
        }

        let mut grade = Grade::from_subscores(subscores);
        debug!(dir = %inspector.dir().display(), composite = grade.composite(), "Git grade computed");
        for (key, value) in metadata {
            grade = grade.with_metadata(key, value);
        }
        Ok(grade)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::environment::WorkingCopy;
    use std::path::Path;
    use tempfile::TempDir;

    fn git(dir: &Path, args: &[&str]) -> String {
        let out = std::process::Command::new("git")
            .args(args)
            .current_dir(dir)
            .env("GIT_AUTHOR_NAME", "Alice")
            .env("GIT_AUTHOR_EMAIL", "alice@example.com")
            .env("GIT_COMMITTER_NAME", "Alice")
            .env("GIT_COMMITTER_EMAIL", "alice@example.com")
            .output()
            .unwrap();
        assert!(out.status.success(), "git {args:?}: {}", String::from_utf8_lossy(&out.stderr));
        String::from_utf8_lossy(&out.stdout).trim().to_string()
    }

    /// Base commit plus three commits on `master`.
    fn repo() -> (TempDir, String) {
        let dir = TempDir::new().unwrap();
        git(dir.path(), &["init", "-q", "-b", "master"]);
        std::fs::write(dir.path().join("base.txt"), "base\n").unwrap();
        git(dir.path(), &["add", "."]);
        git(dir.path(), &["commit", "-q", "-m", "base"]);
        let base = git(dir.path(), &["rev-parse", "HEAD"]);
        for i in 1..=3 {
            std::fs::write(dir.path().join(format!("f{i}.txt")), format!("{i}\n")).unwrap();
            git(dir.path(), &["add", "."]);
            git(dir.path(), &["commit", "-q", "-m", &format!("change {i}")]);
        }
        (dir, base)
    }

    fn grader_for(dir: &Path, base: &str, count: u64) -> GitGrader {
        let tree = git(dir, &["rev-parse", "HEAD^{tree}"]);
        GitGrader::new(GitGraderConfig::new(tree).with_commit_count(base, count, true)).unwrap()
    }

    #[tokio::test]
    async fn test_matching_repository_scores_full() {
        let (dir, base) = repo();
        let grader = grader_for(dir.path(), &base, 3);
        let grade = grader.grade(&WorkingCopy::new(dir.path())).await.unwrap();
        assert_eq!(grade.composite(), 1.0);
        assert!(grade.subscore("tree_hash").unwrap().passed());
        assert!(grade.subscore("commit_count").unwrap().passed());
        assert_eq!(grade.metadata()["commit_count"], 3);
    }

    #[tokio::test]
    async fn test_amended_tip_changes_tree_only() {
        let (dir, base) = repo();
        let grader = grader_for(dir.path(), &base, 3);

        std::fs::write(dir.path().join("f3.txt"), "amended\n").unwrap();
        git(dir.path(), &["commit", "-q", "-a", "--amend", "--no-edit"]);

        let grade = grader.grade(&WorkingCopy::new(dir.path())).await.unwrap();
        assert_eq!(grade.subscore("tree_hash").unwrap().score, 0.0);
        assert_eq!(grade.subscore("commit_count").unwrap().score, 1.0);
        assert!((grade.composite() - 0.5).abs() < 1e-12);
        assert!(grade.metadata()["tree_diff"].as_str().unwrap().contains("f3.txt"));
    }

    #[tokio::test]
    async fn test_first_parent_counting() {
        let (dir, base) = repo();
        git(dir.path(), &["checkout", "-q", "-b", "feature"]);
        std::fs::write(dir.path().join("feature.txt"), "x\n").unwrap();
        git(dir.path(), &["add", "."]);
        git(dir.path(), &["commit", "-q", "-m", "feature 1"]);
        std::fs::write(dir.path().join("feature.txt"), "y\n").unwrap();
        git(dir.path(), &["commit", "-q", "-am", "feature 2"]);
        git(dir.path(), &["checkout", "-q", "master"]);
        git(dir.path(), &["merge", "-q", "--no-ff", "feature", "-m", "merge feature"]);

        let state = WorkingCopy::new(dir.path());
        let inspector = GitInspector::new(&state, dir.path());
        assert_eq!(inspector.count_commits(&base, true).await.unwrap(), 4);
        assert_eq!(inspector.count_commits(&base, false).await.unwrap(), 6);
        assert!(inspector.is_ancestor(&base, "HEAD").await.unwrap());
        assert!(!inspector.is_ancestor("HEAD", &base).await.unwrap());
        assert_eq!(inspector.head_subject().await.unwrap(), "merge feature");
    }

    #[tokio::test]
    async fn test_integrity_faults_are_errors() {
        let (dir, base) = repo();
        let grader = grader_for(dir.path(), &base, 3);

        let missing = WorkingCopy::new(dir.path().join("absent"));
        assert!(matches!(
            grader.grade(&missing).await,
            Err(GradeError::WorkingDirMissing(_))
        ));

        let plain = TempDir::new().unwrap();
        assert!(matches!(
            grader.grade(&WorkingCopy::new(plain.path())).await,
            Err(GradeError::NotARepository(_))
        ));

        let unknown = GitGrader::new(
            GitGraderConfig::new("abcd").with_commit_count("0123456789abcdef0123456789abcdef01234567", 1, true),
        )
        .unwrap();
        assert!(matches!(
            unknown.grade(&WorkingCopy::new(dir.path())).await,
            Err(GradeError::BaseUnreachable { .. })
        ));
    }

    #[tokio::test]
    async fn test_commit_message_and_author_checks() {
        let (dir, base) = repo();
        let tree = git(dir.path(), &["rev-parse", "HEAD^{tree}"]);
        let grader = GitGrader::new(
            GitGraderConfig::new(tree)
                .with_commit_count(&base, 3, true)
                .with_commit_message("change 3")
                .with_author_emails(
                    MembershipRule::default()
                        .must_contain(["alice@example.com"])
                        .must_not_contain(["bob@example.com"]),
                )
                .with_author_names(MembershipRule::default().must_contain(["Bob"])),
        )
        .unwrap();

        let grade = grader.grade(&WorkingCopy::new(dir.path())).await.unwrap();
        assert!(grade.subscore("commit_message").unwrap().passed());
        assert!(grade.subscore("author_emails").unwrap().passed());
        assert!(!grade.subscore("author_names").unwrap().passed());
        assert_eq!(grade.subscores().len(), 5);
        assert!((grade.composite() - 0.8).abs() < 1e-12);
    }

    #[test]
    fn test_config_validation() {
        assert!(GitGraderConfig::new("").validate().is_err());
        assert!(GitGraderConfig::new("not-hex").validate().is_err());
        assert!(GitGraderConfig::new("abc").with_weight(-1.0).validate().is_err());
        assert!(GitGraderConfig::new("abc").with_weight(f64::NAN).validate().is_err());
        assert!(GitGraderConfig::new("abc")
            .with_author_emails(MembershipRule::default())
            .validate()
            .is_err());
        assert!(GitGraderConfig::new("abc").with_commit_count("base", 1, false).validate().is_ok());
    }

    #[test]
    fn test_membership_violations() {
        let rule = MembershipRule::default()
            .must_contain(["a@x", "b@x"])
            .must_not_contain(["c@x"]);
        let found = rule.violations(&["a@x".to_string(), "c@x".to_string()]);
        assert_eq!(found, vec!["missing b@x".to_string(), "found c@x".to_string()]);
    }
}
