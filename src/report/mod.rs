//! Consolidated run report.
//!
//! One entry per requested problem, sorted by id, plus a summary, the run
//! configuration and an outcome digest. The digest hashes only verdicts,
//! reasons, failing phases and subscores, so two runs with the same outcomes
//! have the same digest regardless of timing or worker count.

use std::collections::BTreeMap;
use std::fmt::Write as _;
use std::io::Write;
use std::path::Path;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tracing::info;

use crate::config::{Backend, PhaseTimeouts, PhaseToggles, ValidatorConfig};
use crate::error::ReportError;
use crate::grading::{Grade, Subscore};
use crate::validation::{Phase, ReasonCode, ValidationResult, Verdict};

/// Process exit status for a finished run.
///
/// Push failures are reported in the summary and never change the status.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunStatus {
    /// Every problem passed.
    AllPassed,
    /// At least one problem failed.
    SomeFailed,
}

impl RunStatus {
    pub fn exit_code(&self) -> u8 {
        match self {
            RunStatus::AllPassed => 0,
            RunStatus::SomeFailed => 1,
        }
    }
}

/// Configuration the run used.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunConfigEcho {
    pub jobs: usize,
    pub pass_threshold: f64,
    pub backend: Backend,
    pub phases: PhaseToggles,
    pub timeouts: PhaseTimeouts,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub registry_prefix: Option<String>,
}

impl From<&ValidatorConfig> for RunConfigEcho {
    fn from(config: &ValidatorConfig) -> Self {
        Self {
            jobs: config.jobs,
            pass_threshold: config.pass_threshold,
            backend: config.backend,
            phases: config.phases,
            timeouts: config.timeouts.clone(),
            registry_prefix: config.docker.registry_prefix.clone(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReportSummary {
    pub total: usize,
    pub passed: usize,
    pub failed: usize,
    /// Failure count per reason code.
    pub by_reason: BTreeMap<String, usize>,
    pub push_failures: usize,
    pub teardown_failures: usize,
}

impl ReportSummary {
    fn from_results(results: &[ValidationResult]) -> Self {
        let mut summary = Self {
            total: results.len(),
            ..Default::default()
        };
        for result in results {
            match result.verdict {
                Verdict::Pass => summary.passed += 1,
                Verdict::Fail => summary.failed += 1,
            }
            if let Some(reason) = result.reason {
                *summary.by_reason.entry(reason.to_string()).or_insert(0) += 1;
            }
            if result.push_failed() {
                summary.push_failures += 1;
            }
            if result.teardown_error.is_some() {
                summary.teardown_failures += 1;
            }
        }
        summary
    }
}

/// The machine-readable outcome of one run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ValidationReport {
    pub tool: String,
    pub generated_at: DateTime<Utc>,
    pub config: RunConfigEcho,
    pub summary: ReportSummary,
    /// SHA-256 over the timing-free outcome of every entry.
    pub digest: String,
    pub results: Vec<ValidationResult>,
}

impl ValidationReport {
    pub fn new(mut results: Vec<ValidationResult>, config: &ValidatorConfig) -> Self {
        results.sort_by(|a, b| a.problem_id.cmp(&b.problem_id));
        Self {
            tool: format!("{} {}", env!("CARGO_PKG_NAME"), env!("CARGO_PKG_VERSION")),
            generated_at: Utc::now(),
            config: RunConfigEcho::from(config),
            summary: ReportSummary::from_results(&results),
            digest: outcome_digest(&results),
            results,
        }
    }

    pub fn status(&self) -> RunStatus {
        if self.summary.failed > 0 {
            RunStatus::SomeFailed
        } else {
            RunStatus::AllPassed
        }
    }
}

#[derive(Serialize)]
struct DigestEntry<'a> {
    problem_id: &'a str,
    verdict: Verdict,
    reason: Option<ReasonCode>,
    failed_phase: Option<Phase>,
    pre: Option<&'a [Subscore]>,
    post: Option<&'a [Subscore]>,
}

/// Hex SHA-256 of the outcome-only view of `results`, in id order.
pub fn outcome_digest(results: &[ValidationResult]) -> String {
    let mut sorted: Vec<&ValidationResult> = results.iter().collect();
    sorted.sort_by(|a, b| a.problem_id.cmp(&b.problem_id));

    let entries: Vec<DigestEntry<'_>> = sorted
        .into_iter()
        .map(|r| DigestEntry {
            problem_id: &r.problem_id,
            verdict: r.verdict,
            reason: r.reason,
            failed_phase: r.failed_phase,
            pre: r.pre_grade.as_ref().map(Grade::subscores),
            post: r.post_grade.as_ref().map(Grade::subscores),
        })
        .collect();

    let mut hasher = Sha256::new();
    for entry in &entries {
        // Serializing plain data into a Vec cannot fail.
        if let Ok(bytes) = serde_json::to_vec(entry) {
            hasher.update(&bytes);
        }
        hasher.update(b"\n");
    }
    hex::encode(hasher.finalize())
}

/// Writes reports as JSON files or human-readable summaries.
#[derive(Debug, Clone)]
pub struct ReportWriter {
    pretty: bool,
}

impl Default for ReportWriter {
    fn default() -> Self {
        Self { pretty: true }
    }
}

impl ReportWriter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Single-line JSON.
    pub fn compact(mut self) -> Self {
        self.pretty = false;
        self
    }

    pub fn to_json(&self, report: &ValidationReport) -> Result<String, ReportError> {
        let json = if self.pretty {
            serde_json::to_string_pretty(report)?
        } else {
            serde_json::to_string(report)?
        };
        Ok(json)
    }

    pub fn write_to<W: Write>(&self, report: &ValidationReport, mut out: W) -> Result<(), ReportError> {
        let json = self.to_json(report)?;
        out.write_all(json.as_bytes())?;
        out.write_all(b"\n")?;
        out.flush()?;
        Ok(())
    }

    /// Writes the report to `path`, creating parent directories.
    pub fn write_to_path(&self, report: &ValidationReport, path: &Path) -> Result<(), ReportError> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }
        let file = std::fs::File::create(path)?;
        self.write_to(report, std::io::BufWriter::new(file))?;
        info!(path = %path.display(), entries = report.results.len(), "Wrote report");
        Ok(())
    }

    /// One line per problem plus a totals line.
    pub fn summary_text(&self, report: &ValidationReport) -> String {
        let width = report
            .results
            .iter()
            .map(|r| r.problem_id.len())
            .max()
            .unwrap_or(0)
            .max(10);

        let mut text = String::new();
        for result in &report.results {
            let _ = write!(text, "{:<width$}  {}", result.problem_id, result.verdict);
            if let Some(reason) = result.reason {
                let _ = write!(text, "  {reason}");
            }
            if let Some(phase) = result.failed_phase {
                let _ = write!(text, " ({phase})");
            }
            if let Some(error) = result.artifact.as_ref().and_then(|a| a.push_error.as_ref()) {
                let _ = write!(text, "  push failed: {error}");
            }
            text.push('\n');
        }
        let summary = &report.summary;
        let _ = writeln!(
            text,
            "{} problems: {} passed, {} failed, {} push failures",
            summary.total, summary.passed, summary.failed, summary.push_failures
        );
        text
    }
}
