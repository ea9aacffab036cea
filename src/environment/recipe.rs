//! Dockerfile recipe for problem images.
//!
//! The image pins the repository at the problem's base commit. Setup actions
//! are not baked in; they run when an environment is built from the image.

use std::path::Path;

use tera::{Context, Tera};

use crate::error::EnvironmentError;
use crate::problem::ProblemSpec;

use super::script;

/// Name of the preparation script inside the build context.
pub const PREPARE_SCRIPT: &str = "prepare.sh";

pub const DEFAULT_RECIPE: &str = r#"FROM {{ base_image }}

LABEL oracle_forge.problem.id="{{ problem_id }}"
LABEL oracle_forge.problem.difficulty="{{ difficulty }}"
LABEL oracle_forge.problem.base="{{ base }}"

WORKDIR {{ repo_dir }}
COPY {{ prepare_script }} /tmp/oracle-forge/{{ prepare_script }}
RUN bash /tmp/oracle-forge/{{ prepare_script }} && rm -rf /tmp/oracle-forge
"#;

/// A tera Dockerfile template.
#[derive(Debug, Clone)]
pub struct Recipe {
    template: String,
}

impl Default for Recipe {
    fn default() -> Self {
        Self::new(DEFAULT_RECIPE)
    }
}

impl Recipe {
    pub fn new(template: impl Into<String>) -> Self {
        Self {
            template: template.into(),
        }
    }

    pub fn from_file(path: &Path) -> Result<Self, EnvironmentError> {
        let template = std::fs::read_to_string(path)
            .map_err(|e| EnvironmentError::Recipe(format!("{}: {e}", path.display())))?;
        Ok(Self::new(template))
    }

    /// Renders the Dockerfile for `spec`.
    pub fn render(&self, spec: &ProblemSpec, base_image: &str, repo_dir: &str) -> Result<String, EnvironmentError> {
        let mut context = Context::new();
        context.insert("base_image", base_image);
        context.insert("problem_id", &spec.id);
        context.insert("difficulty", &spec.difficulty.to_string());
        context.insert("base", &spec.base);
        context.insert("repo_dir", repo_dir);
        context.insert("prepare_script", PREPARE_SCRIPT);
        Tera::one_off(&self.template, &context, false).map_err(|e| EnvironmentError::Recipe(e.to_string()))
    }
}

/// Packs the Dockerfile and preparation script into a tar build context.
pub fn build_context(dockerfile: &str, spec: &ProblemSpec) -> Result<Vec<u8>, EnvironmentError> {
    script::validate_git_ref(&spec.base).map_err(EnvironmentError::Recipe)?;
    let prepare = format!("set -e\n{}\n", script::reset_script(&spec.base));

    let mut archive = tar::Builder::new(Vec::new());
    for (name, content, mode) in [("Dockerfile", dockerfile, 0o644), (PREPARE_SCRIPT, prepare.as_str(), 0o755)] {
        let mut header = tar::Header::new_gnu();
        header.set_size(content.len() as u64);
        header.set_mode(mode);
        header.set_mtime(0);
        header.set_cksum();
        archive.append_data(&mut header, name, content.as_bytes())?;
    }
    Ok(archive.into_inner()?)
}
