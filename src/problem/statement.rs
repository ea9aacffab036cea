//! Agent-facing task statement rendering.

use tera::{Context, Tera};

use super::ProblemSpec;

/// Repository location inside the evaluation image.
pub const DEFAULT_REPO_DIR: &str = "/home/ubuntu/ClickHouse";

const STATEMENT_TEMPLATE: &str = r#"Use the tools provided to complete the following task:
The code is located in {{ repo_dir }}

IMPORTANT: There are no interactive editors available. Set GIT_EDITOR and
GIT_SEQUENCE_EDITOR to non-interactive commands (for example `sed` or `true`)
when a git command would open an editor.

{{ description }}
{%- if hints %}

<HINTS>
{%- for hint in hints %}
 - {{ hint }}
{%- endfor %}
</HINTS>
{%- endif %}
"#;

impl ProblemSpec {
    /// Renders the prompt for the default repository location.
    pub fn statement(&self, include_hints: bool) -> Result<String, tera::Error> {
        self.statement_for(DEFAULT_REPO_DIR, include_hints)
    }

    /// Renders the prompt for a repository checked out at `repo_dir`.
    pub fn statement_for(&self, repo_dir: &str, include_hints: bool) -> Result<String, tera::Error> {
        let mut context = Context::new();
        context.insert("repo_dir", repo_dir);
        context.insert("description", self.description.trim());
        let hints: &[String] = if include_hints { &self.hints } else { &[] };
        context.insert("hints", hints);
        Tera::one_off(STATEMENT_TEMPLATE, &context, false)
    }
}
