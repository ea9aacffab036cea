//! Grading protocol.
//!
//! A [`Grader`] inspects an environment through [`EnvironmentState`] and
//! returns a [`Grade`]. Graders never mutate the environment. A criterion
//! that is not met is a `0.0` subscore; an `Err` means the environment
//! itself could not be inspected.

mod command;
mod git;
mod grade;
mod inspect;
mod spec;

use std::sync::Arc;

use async_trait::async_trait;

use crate::environment::EnvironmentState;
use crate::error::GradeError;

pub use command::{CommandCheck, CommandGrader, CommandGraderConfig};
pub use git::{GitGrader, GitGraderConfig, MembershipRule, MetadataChecks};
pub use grade::{Grade, Subscore};
pub use inspect::GitInspector;
pub use spec::GraderSpec;

/// Scores an environment's state.
#[async_trait]
pub trait Grader: Send + Sync {
    /// Short grader kind, e.g. `"git"`.
    fn kind(&self) -> &'static str;

    async fn grade(&self, state: &dyn EnvironmentState) -> Result<Grade, GradeError>;
}

/// The resolved graders of one problem.
#[derive(Clone, Default)]
pub struct GradingPlan {
    graders: Vec<Arc<dyn Grader>>,
}

impl GradingPlan {
    pub fn new(graders: Vec<Arc<dyn Grader>>) -> Self {
        Self { graders }
    }

    pub fn len(&self) -> usize {
        self.graders.len()
    }

    pub fn is_empty(&self) -> bool {
        self.graders.is_empty()
    }

    /// Runs every grader in order and flattens their subscores.
    pub async fn grade(&self, state: &dyn EnvironmentState) -> Result<Grade, GradeError> {
        let mut grades = Vec::with_capacity(self.graders.len());
        for grader in &self.graders {
            grades.push(grader.grade(state).await?);
        }
        Ok(Grade::combine(grades))
    }
}

impl std::fmt::Debug for GradingPlan {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let kinds: Vec<_> = self.graders.iter().map(|g| g.kind()).collect();
        f.debug_struct("GradingPlan").field("graders", &kinds).finish()
    }
}
