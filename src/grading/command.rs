//! Shell-check grader: each check is a command whose exit status is the score.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::json;

use crate::environment::EnvironmentState;
use crate::error::GradeError;

use super::{Grade, Grader, Subscore};

fn default_weight() -> f64 {
    1.0
}

/// One named shell check.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CommandCheck {
    pub name: String,
    pub command: String,
    /// Overrides the grader weight for this check.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub weight: Option<f64>,
}

impl CommandCheck {
    pub fn new(name: impl Into<String>, command: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            command: command.into(),
            weight: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CommandGraderConfig {
    /// Directory the checks run in. Defaults to the repository directory.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub working_dir: Option<String>,
    pub checks: Vec<CommandCheck>,
    #[serde(default = "default_weight")]
    pub weight: f64,
}

impl CommandGraderConfig {
    pub fn new(checks: Vec<CommandCheck>) -> Self {
        Self {
            working_dir: None,
            checks,
            weight: default_weight(),
        }
    }

    pub fn validate(&self) -> Result<(), GradeError> {
        if self.checks.is_empty() {
            return Err(GradeError::InvalidConfig("command grader needs at least one check".to_string()));
        }
        let weights = std::iter::once(self.weight).chain(self.checks.iter().filter_map(|c| c.weight));
        for weight in weights {
            if !weight.is_finite() || weight < 0.0 {
                return Err(GradeError::InvalidConfig(format!(
                    "weight must be finite and non-negative, got {weight}"
                )));
            }
        }
        for check in &self.checks {
            if check.name.trim().is_empty() || check.command.trim().is_empty() {
                return Err(GradeError::InvalidConfig("checks need a name and a command".to_string()));
            }
        }
        Ok(())
    }
}

/// Runs shell checks inside the environment; exit status 0 scores 1.0.
#[derive(Debug, Clone)]
pub struct CommandGrader {
    config: CommandGraderConfig,
}

impl CommandGrader {
    pub fn new(config: CommandGraderConfig) -> Result<Self, GradeError> {
        config.validate()?;
        Ok(Self { config })
    }
}

#[async_trait]
impl Grader for CommandGrader {
    fn kind(&self) -> &'static str {
        "command"
    }

    async fn grade(&self, state: &dyn EnvironmentState) -> Result<Grade, GradeError> {
        let cwd = match &self.config.working_dir {
            Some(dir) => state.resolve(dir),
            None => state.repo_dir().to_path_buf(),
        };

        let mut subscores = Vec::with_capacity(self.config.checks.len());
        let mut exit_codes = serde_json::Map::new();
        for check in &self.config.checks {
            let output = state.run("bash", &["-c", check.command.as_str()], &cwd).await?;
            let weight = check.weight.unwrap_or(self.config.weight);
            subscores.push(Subscore::check(check.name.as_str(), output.success(), weight));
            exit_codes.insert(check.name.clone(), json!(output.exit_code));
        }

        Ok(Grade::from_subscores(subscores).with_metadata("exit_codes", serde_json::Value::Object(exit_codes)))
    }
}
