//! Shell script composition for action sequences.
//!
//! Actions run in one `bash` process so that `cd`, exported variables and
//! heredocs behave as they would in an interactive session. After each
//! action the exit status is checked; on failure a marker naming the
//! one-based step is written to stderr and the script exits with that status.

/// Prefix of the stderr line that names a failing step.
pub const STEP_FAILURE_MARKER: &str = "__oracle_forge_failed_step=";

/// Composes `actions` into one fail-fast script.
pub fn compose_script(actions: &[String]) -> String {
    let mut script = String::new();
    for (index, action) in actions.iter().enumerate() {
        script.push_str(action);
        script.push('\n');
        script.push_str(&format!(
            "__rc=$?; if [ $__rc -ne 0 ]; then echo \"{STEP_FAILURE_MARKER}{}\" >&2; exit $__rc; fi\n",
            index + 1
        ));
    }
    script
}

/// Returns the step named by the last failure marker in `stderr`.
pub fn failed_step(stderr: &str) -> Option<usize> {
    stderr
        .lines()
        .rev()
        .find_map(|line| line.trim().strip_prefix(STEP_FAILURE_MARKER))
        .and_then(|step| step.trim().parse().ok())
}

/// Removes failure markers from captured stderr.
pub fn strip_markers(stderr: &str) -> String {
    stderr
        .lines()
        .filter(|line| !line.trim().starts_with(STEP_FAILURE_MARKER))
        .collect::<Vec<_>>()
        .join("\n")
}

/// Script that resets the current branch to `base` and removes untracked
/// files. Callers validate `base` first.
pub fn reset_script(base: &str) -> String {
    format!(
        "git config --global --add safe.directory \"$PWD\" >/dev/null 2>&1 || true\n\
         git config --global user.email >/dev/null 2>&1 || git config --global user.email oracle-forge@localhost\n\
         git config --global user.name >/dev/null 2>&1 || git config --global user.name oracle-forge\n\
         git reset --hard {base} && git clean -fdx"
    )
}

/// Validate a git ref or commit to prevent shell injection.
pub fn validate_git_ref(s: &str) -> Result<(), String> {
    if s.is_empty() {
        return Err("git ref must not be empty".to_string());
    }
    if s.len() > 256 {
        return Err(format!("git ref too long ({} chars)", s.len()));
    }
    if s.starts_with('-') {
        return Err(format!("git ref must not start with '-': {s:?}"));
    }
    let allowed = |c: char| c.is_ascii_alphanumeric() || matches!(c, '/' | '.' | '_' | '-' | '~' | '^' | '@' | '{' | '}');
    if !s.chars().all(allowed) {
        return Err(format!("git ref contains disallowed characters: {s:?}"));
    }
    if s.contains("..") {
        return Err(format!("git ref must not contain '..': {s:?}"));
    }
    Ok(())
}

/// Truncates `s` to at most `max` bytes on a char boundary, marking the cut.
pub fn truncate(s: &str, max: usize) -> String {
    if s.len() <= max {
        return s.to_string();
    }
    let mut end = max;
    while !s.is_char_boundary(end) {
        end -= 1;
    }
    format!("{}...[truncated]", &s[..end])
}
