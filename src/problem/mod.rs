//! Problem specifications.
//!
//! A [`ProblemSpec`] is the immutable, data-only description of one
//! evaluable task: the prompt shown to the agent, the commit the environment
//! starts from, the reference ("golden") action sequence that is known to
//! reach the accepted end state, and the grader configurations bound to the
//! fingerprints of that end state.

pub mod catalog;
pub mod loader;
mod statement;

use serde::{Deserialize, Serialize};

use crate::environment::script::validate_git_ref;
use crate::error::RegistryError;
use crate::grading::GraderSpec;

pub use statement::DEFAULT_REPO_DIR;

/// The difficulty level of a problem.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Difficulty {
    Easy,
    Medium,
    Hard,
}

impl std::fmt::Display for Difficulty {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Difficulty::Easy => write!(f, "easy"),
            Difficulty::Medium => write!(f, "medium"),
            Difficulty::Hard => write!(f, "hard"),
        }
    }
}

/// How strictly human review gates acceptance of a problem.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ReviewLevel {
    /// Accepted on automatic validation alone.
    #[default]
    NoReview,
    /// The problem author signs off after validation.
    CreatorReview,
    /// An independent reviewer signs off after validation.
    ExpertReview,
}

impl std::fmt::Display for ReviewLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ReviewLevel::NoReview => write!(f, "no-review"),
            ReviewLevel::CreatorReview => write!(f, "creator-review"),
            ReviewLevel::ExpertReview => write!(f, "expert-review"),
        }
    }
}

fn default_task_type() -> String {
    "git".to_string()
}

/// Declarative description of one task.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProblemSpec {
    /// Unique identifier within a registry.
    pub id: String,
    /// Task prompt shown to the agent.
    pub description: String,
    /// Optional hints, in display order.
    #[serde(default)]
    pub hints: Vec<String>,
    pub difficulty: Difficulty,
    /// Free-form category tag.
    #[serde(default = "default_task_type")]
    pub task_type: String,
    #[serde(default)]
    pub review_level: ReviewLevel,
    /// Commit the environment is reset to before anything else runs.
    pub base: String,
    /// Pull request the task was derived from, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pr_number: Option<u64>,
    /// Auxiliary files the grader needs. `None` means none.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub test_files: Option<Vec<String>>,
    /// Shell actions that turn the base commit into the task's initial state.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub setup: Vec<String>,
    /// Reference shell actions, applied in order from the initial state.
    #[serde(default)]
    pub golden: Vec<String>,
    /// Grader configurations; their subscores are combined into one grade.
    #[serde(rename = "grade")]
    pub grading: Vec<GraderSpec>,
}

impl ProblemSpec {
    /// Creates a problem with the required fields and empty optional ones.
    pub fn new(
        id: impl Into<String>,
        description: impl Into<String>,
        difficulty: Difficulty,
        base: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            description: description.into(),
            hints: Vec::new(),
            difficulty,
            task_type: default_task_type(),
            review_level: ReviewLevel::default(),
            base: base.into(),
            pr_number: None,
            test_files: None,
            setup: Vec::new(),
            golden: Vec::new(),
            grading: Vec::new(),
        }
    }

    pub fn with_hints(mut self, hints: Vec<String>) -> Self {
        self.hints = hints;
        self
    }

    pub fn with_task_type(mut self, task_type: impl Into<String>) -> Self {
        self.task_type = task_type.into();
        self
    }

    pub fn with_review_level(mut self, level: ReviewLevel) -> Self {
        self.review_level = level;
        self
    }

    pub fn with_test_files(mut self, files: Vec<String>) -> Self {
        self.test_files = Some(files);
        self
    }

    pub fn with_setup<I, S>(mut self, actions: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.setup = actions.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_golden<I, S>(mut self, actions: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.golden = actions.into_iter().map(Into::into).collect();
        self
    }

    /// Adds a grader configuration.
    pub fn with_grader(mut self, grader: GraderSpec) -> Self {
        self.grading.push(grader);
        self
    }

    /// Checks the structural invariants a registry relies on.
    pub fn validate(&self) -> Result<(), RegistryError> {
        let invalid = |reason: String| RegistryError::InvalidSpec {
            id: self.id.clone(),
            reason,
        };

        if self.id.trim().is_empty() {
            return Err(invalid("id must not be empty".to_string()));
        }
        if !self
            .id
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'))
        {
            return Err(invalid(
                "id may only contain alphanumerics, '-', '_' and '.'".to_string(),
            ));
        }
        validate_git_ref(&self.base).map_err(|e| invalid(format!("base: {e}")))?;
        if self.grading.is_empty() {
            return Err(invalid("at least one grader is required".to_string()));
        }
        for grader in &self.grading {
            grader
                .validate()
                .map_err(|e| invalid(format!("grader: {e}")))?;
        }
        Ok(())
    }
}
