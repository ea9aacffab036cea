//! Per-problem validation results.

use std::fmt;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::grading::Grade;

/// Final verdict for one problem.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Verdict {
    Pass,
    Fail,
}

impl fmt::Display for Verdict {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Verdict::Pass => write!(f, "PASS"),
            Verdict::Fail => write!(f, "FAIL"),
        }
    }
}

/// Why a problem failed validation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ReasonCode {
    /// The grader accepts the untouched environment.
    PreCheckAlreadyPassing,
    /// The grader rejects the state the golden sequence produces.
    PostCheckNotPassing,
    BuildError,
    GoldenApplyError,
    GraderInternalError,
    Timeout,
    Cancelled,
}

impl ReasonCode {
    pub fn as_str(&self) -> &'static str {
        match self {
            ReasonCode::PreCheckAlreadyPassing => "pre-check-already-passing",
            ReasonCode::PostCheckNotPassing => "post-check-not-passing",
            ReasonCode::BuildError => "build-error",
            ReasonCode::GoldenApplyError => "golden-apply-error",
            ReasonCode::GraderInternalError => "grader-internal-error",
            ReasonCode::Timeout => "timeout",
            ReasonCode::Cancelled => "cancelled",
        }
    }
}

impl fmt::Display for ReasonCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Stages of a validation unit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Phase {
    Artifact,
    Build,
    PreGrade,
    Golden,
    PostGrade,
    Push,
    Teardown,
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Phase::Artifact => "artifact",
            Phase::Build => "build",
            Phase::PreGrade => "pre-grade",
            Phase::Golden => "golden",
            Phase::PostGrade => "post-grade",
            Phase::Push => "push",
            Phase::Teardown => "teardown",
        };
        f.write_str(name)
    }
}

/// Wall-clock milliseconds spent per phase. Phases that never ran are absent.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PhaseTimings {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub artifact_ms: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub build_ms: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pre_grade_ms: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub golden_ms: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub post_grade_ms: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub push_ms: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub teardown_ms: Option<u64>,
    pub total_ms: u64,
}

impl PhaseTimings {
    fn record(&mut self, phase: Phase, elapsed: Duration) {
        let ms = Some(elapsed.as_millis() as u64);
        match phase {
            Phase::Artifact => self.artifact_ms = ms,
            Phase::Build => self.build_ms = ms,
            Phase::PreGrade => self.pre_grade_ms = ms,
            Phase::Golden => self.golden_ms = ms,
            Phase::PostGrade => self.post_grade_ms = ms,
            Phase::Push => self.push_ms = ms,
            Phase::Teardown => self.teardown_ms = ms,
        }
    }
}

/// Image build and push outcome.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArtifactOutcome {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub image: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pushed_to: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub push_error: Option<String>,
}

/// Outcome of validating one problem.
///
/// Produced once per unit by the orchestrator and never modified afterwards.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ValidationResult {
    pub problem_id: String,
    pub verdict: Verdict,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<ReasonCode>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub failed_phase: Option<Phase>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pre_grade: Option<Grade>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub post_grade: Option<Grade>,
    pub timings: PhaseTimings,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub artifact: Option<ArtifactOutcome>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub teardown_error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub finished_at: Option<DateTime<Utc>>,
}

impl ValidationResult {
    /// Result for a problem that never started because the run was aborted.
    pub fn cancelled(problem_id: impl Into<String>) -> Self {
        Self {
            problem_id: problem_id.into(),
            verdict: Verdict::Fail,
            reason: Some(ReasonCode::Cancelled),
            failed_phase: None,
            message: Some("run aborted before this problem started".to_string()),
            pre_grade: None,
            post_grade: None,
            timings: PhaseTimings::default(),
            artifact: None,
            teardown_error: None,
            started_at: None,
            finished_at: None,
        }
    }

    pub fn passed(&self) -> bool {
        self.verdict == Verdict::Pass
    }

    pub fn push_failed(&self) -> bool {
        self.artifact
            .as_ref()
            .is_some_and(|a| a.push_error.is_some())
    }
}

/// Accumulates a result while a unit runs. Consumed by [`pass`] or
/// [`fail`], so a result is finalized exactly once.
///
/// [`pass`]: ResultBuilder::pass
/// [`fail`]: ResultBuilder::fail
#[derive(Debug)]
pub(crate) struct ResultBuilder {
    problem_id: String,
    started: Instant,
    started_at: DateTime<Utc>,
    current_phase: Option<Phase>,
    pre_grade: Option<Grade>,
    post_grade: Option<Grade>,
    timings: PhaseTimings,
    artifact: Option<ArtifactOutcome>,
    teardown_error: Option<String>,
}

impl ResultBuilder {
    pub(crate) fn new(problem_id: impl Into<String>) -> Self {
        Self {
            problem_id: problem_id.into(),
            started: Instant::now(),
            started_at: Utc::now(),
            current_phase: None,
            pre_grade: None,
            post_grade: None,
            timings: PhaseTimings::default(),
            artifact: None,
            teardown_error: None,
        }
    }

    pub(crate) fn enter(&mut self, phase: Phase) {
        self.current_phase = Some(phase);
    }

    pub(crate) fn current_phase(&self) -> Option<Phase> {
        self.current_phase
    }

    pub(crate) fn time(&mut self, phase: Phase, elapsed: Duration) {
        self.timings.record(phase, elapsed);
    }

    pub(crate) fn pre_grade(&mut self, grade: Grade) {
        self.pre_grade = Some(grade);
    }

    pub(crate) fn post_grade(&mut self, grade: Grade) {
        self.post_grade = Some(grade);
    }

    pub(crate) fn artifact_built(&mut self, image: impl Into<String>) {
        self.artifact.get_or_insert_with(ArtifactOutcome::default).image = Some(image.into());
    }

    pub(crate) fn pushed(&mut self, target: impl Into<String>) {
        self.artifact.get_or_insert_with(ArtifactOutcome::default).pushed_to = Some(target.into());
    }

    pub(crate) fn push_failed(&mut self, message: impl Into<String>) {
        self.artifact.get_or_insert_with(ArtifactOutcome::default).push_error = Some(message.into());
    }

    pub(crate) fn teardown_failed(&mut self, message: impl Into<String>) {
        self.teardown_error = Some(message.into());
    }

    pub(crate) fn pass(self) -> ValidationResult {
        self.finish(Verdict::Pass, None, None, None)
    }

    pub(crate) fn fail(self, reason: ReasonCode, phase: Option<Phase>, message: impl Into<String>) -> ValidationResult {
        self.finish(Verdict::Fail, Some(reason), phase, Some(message.into()))
    }

    fn finish(
        mut self,
        verdict: Verdict,
        reason: Option<ReasonCode>,
        failed_phase: Option<Phase>,
        message: Option<String>,
    ) -> ValidationResult {
        self.timings.total_ms = self.started.elapsed().as_millis() as u64;
        ValidationResult {
            problem_id: self.problem_id,
            verdict,
            reason,
            failed_phase,
            message,
            pre_grade: self.pre_grade,
            post_grade: self.post_grade,
            timings: self.timings,
            artifact: self.artifact,
            teardown_error: self.teardown_error,
            started_at: Some(self.started_at),
            finished_at: Some(Utc::now()),
        }
    }
}
