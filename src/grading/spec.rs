use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::error::GradeError;

use super::{CommandGrader, CommandGraderConfig, GitGrader, GitGraderConfig, Grader};

/// Declarative grader configuration, tagged by `kind`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum GraderSpec {
    Git(GitGraderConfig),
    Command(CommandGraderConfig),
}

impl GraderSpec {
    pub fn validate(&self) -> Result<(), GradeError> {
        match self {
            GraderSpec::Git(config) => config.validate(),
            GraderSpec::Command(config) => config.validate(),
        }
    }

    /// Resolves the configuration into a grader.
    pub fn build(&self) -> Result<Arc<dyn Grader>, GradeError> {
        Ok(match self {
            GraderSpec::Git(config) => Arc::new(GitGrader::new(config.clone())?),
            GraderSpec::Command(config) => Arc::new(CommandGrader::new(config.clone())?),
        })
    }
}
