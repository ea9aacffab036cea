//! Validation orchestrator.
//!
//! Every selected problem is one unit of work on the worker pool:
//!
//! ```text
//! [artifact] -> allocate -> build -> pre-grade -> golden -> post-grade -> destroy -> [push]
//! ```
//!
//! A unit never aborts its siblings: every fault becomes a terminal
//! [`ValidationResult`] on the shared board. The environment is destroyed
//! whatever happened, including timeouts, aborts and panics.

use std::any::Any;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::{Duration, Instant};

use futures::FutureExt;
use tracing::{debug, info, warn};

use crate::config::{PhaseTimeouts, PhaseToggles, ValidatorConfig};
use crate::environment::{
    ArtifactPipeline, ArtifactRef, BoundEnvironment, EnvironmentBuilder, EnvironmentHandle,
};
use crate::error::{EnvironmentError, PushError};
use crate::grading::{Grade, GradingPlan};
use crate::problem::ProblemSpec;
use crate::registry::ProblemRegistry;
use crate::scheduler::{JobOutcome, PoolStats, ShutdownHandle, ShutdownSignal, WorkerPool, WorkerPoolConfig};

use super::board::ResultBoard;
use super::result::{Phase, ReasonCode, ResultBuilder, ValidationResult};

/// Settings the orchestrator needs from the full configuration.
#[derive(Debug, Clone, PartialEq)]
pub struct OrchestratorConfig {
    pub jobs: usize,
    pub pass_threshold: f64,
    pub timeouts: PhaseTimeouts,
    pub phases: PhaseToggles,
    /// Remote prefix artifacts are re-tagged with on push.
    pub registry_prefix: Option<String>,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self::from(&ValidatorConfig::default())
    }
}

impl From<&ValidatorConfig> for OrchestratorConfig {
    fn from(config: &ValidatorConfig) -> Self {
        Self {
            jobs: config.jobs,
            pass_threshold: config.pass_threshold,
            timeouts: config.timeouts.clone(),
            phases: config.phases,
            registry_prefix: config.docker.registry_prefix.clone(),
        }
    }
}

/// Results of one orchestrated run, in id order.
#[derive(Debug, Clone)]
pub struct RunOutcome {
    pub results: Vec<ValidationResult>,
    pub stats: PoolStats,
}

/// Why a unit stopped early.
#[derive(Debug)]
struct Failure {
    reason: ReasonCode,
    phase: Phase,
    message: String,
}

impl Failure {
    fn new(reason: ReasonCode, phase: Phase, message: impl Into<String>) -> Self {
        Self {
            reason,
            phase,
            message: message.into(),
        }
    }
}

/// Runs the golden-sequence validation for many problems concurrently.
#[derive(Clone)]
pub struct ValidationOrchestrator {
    registry: Arc<ProblemRegistry>,
    builder: Arc<dyn EnvironmentBuilder>,
    artifacts: Option<Arc<dyn ArtifactPipeline>>,
    config: OrchestratorConfig,
}

impl ValidationOrchestrator {
    pub fn new(registry: Arc<ProblemRegistry>, builder: Arc<dyn EnvironmentBuilder>, config: OrchestratorConfig) -> Self {
        Self {
            registry,
            builder,
            artifacts: None,
            config,
        }
    }

    /// Enables the artifact build and push phases.
    pub fn with_artifacts(mut self, pipeline: Arc<dyn ArtifactPipeline>) -> Self {
        self.artifacts = Some(pipeline);
        self
    }

    pub fn config(&self) -> &OrchestratorConfig {
        &self.config
    }

    /// Validates `specs` on a pool of `config.jobs` workers.
    ///
    /// Returns one result per distinct spec id, sorted by id. Problems that
    /// never started because of `shutdown` are reported as cancelled.
    pub async fn run(&self, specs: Vec<Arc<ProblemSpec>>, shutdown: &ShutdownHandle) -> RunOutcome {
        let board = Arc::new(ResultBoard::new(specs.iter().map(|s| s.id.clone())));
        info!(
            problems = board.len(),
            jobs = self.config.jobs,
            backend = self.builder.backend(),
            "Starting validation run"
        );

        let pool = WorkerPool::new(WorkerPoolConfig::new(self.config.jobs));
        let orchestrator = self.clone();
        let board_in = Arc::clone(&board);
        let stats = pool
            .run(specs, shutdown, move |spec: Arc<ProblemSpec>, signal| {
                let orchestrator = orchestrator.clone();
                let board = Arc::clone(&board_in);
                async move {
                    let result = orchestrator.validate_one(spec, signal).await;
                    let outcome = if result.passed() {
                        JobOutcome::Completed
                    } else {
                        JobOutcome::Failed
                    };
                    board.publish(result);
                    outcome
                }
            })
            .await;

        let results = board.results();
        let passed = results.iter().filter(|r| r.passed()).count();
        info!(
            total = results.len(),
            passed,
            failed = results.len() - passed,
            "Validation run finished"
        );
        RunOutcome { results, stats }
    }

    /// Runs every enabled phase for one problem.
    ///
    /// A panic anywhere in the unit becomes `grader-internal-error` at the
    /// phase it happened in.
    pub async fn validate_one(&self, spec: Arc<ProblemSpec>, mut signal: ShutdownSignal) -> ValidationResult {
        let mut result = ResultBuilder::new(spec.id.as_str());
        if signal.is_triggered() {
            return result.fail(ReasonCode::Cancelled, None, "run aborted before this problem started");
        }
        info!(problem_id = %spec.id, "Validating problem");

        let outcome = AssertUnwindSafe(self.run_phases(&spec, &mut result, &mut signal))
            .catch_unwind()
            .await;
        let outcome = match outcome {
            Ok(outcome) => outcome,
            Err(panic) => Err(Failure::new(
                ReasonCode::GraderInternalError,
                result.current_phase().unwrap_or(Phase::Build),
                format!("validation panicked: {}", panic_message(panic.as_ref())),
            )),
        };
        match outcome {
            Ok(()) => {
                info!(problem_id = %spec.id, verdict = "PASS", "Problem validated");
                result.pass()
            }
            Err(failure) => self.finish_failure(&spec, result, failure),
        }
    }

    async fn run_phases(
        &self,
        spec: &ProblemSpec,
        result: &mut ResultBuilder,
        signal: &mut ShutdownSignal,
    ) -> Result<(), Failure> {
        let artifact = if self.config.phases.build {
            Some(self.build_artifact(spec, result, signal).await?)
        } else {
            None
        };

        if self.config.phases.validate {
            let handle = self.builder.allocate(spec, artifact.as_ref());
            debug!(problem_id = %spec.id, environment = %handle.name, "Allocated environment");

            let exercised = AssertUnwindSafe(self.exercise(spec, &handle, result, signal))
                .catch_unwind()
                .await;
            let panicked_in = result.current_phase().unwrap_or(Phase::Build);

            result.enter(Phase::Teardown);
            let started = Instant::now();
            if let Err(e) = self.builder.destroy(&handle).await {
                warn!(problem_id = %spec.id, environment = %handle.name, error = %e, "Teardown failed");
                result.teardown_failed(e.to_string());
            }
            result.time(Phase::Teardown, started.elapsed());

            match exercised {
                Ok(outcome) => outcome?,
                Err(panic) => {
                    return Err(Failure::new(
                        ReasonCode::GraderInternalError,
                        panicked_in,
                        format!("validation panicked: {}", panic_message(panic.as_ref())),
                    ));
                }
            }
        }

        if self.config.phases.push {
            self.push(spec, artifact, result, signal).await;
        }
        Ok(())
    }

    fn finish_failure(&self, spec: &ProblemSpec, result: ResultBuilder, failure: Failure) -> ValidationResult {
        info!(
            problem_id = %spec.id,
            verdict = "FAIL",
            reason = %failure.reason,
            phase = %failure.phase,
            "Problem failed validation"
        );
        result.fail(failure.reason, Some(failure.phase), failure.message)
    }

    async fn build_artifact(
        &self,
        spec: &ProblemSpec,
        result: &mut ResultBuilder,
        signal: &mut ShutdownSignal,
    ) -> Result<ArtifactRef, Failure> {
        result.enter(Phase::Artifact);
        let Some(pipeline) = &self.artifacts else {
            return Err(Failure::new(
                ReasonCode::BuildError,
                Phase::Artifact,
                format!("the {} backend cannot build image artifacts", self.builder.backend()),
            ));
        };

        let started = Instant::now();
        let built = guarded(Phase::Artifact, self.config.timeouts.build(), signal, pipeline.build_artifact(spec)).await;
        result.time(Phase::Artifact, started.elapsed());

        let artifact = built?.map_err(|e| Failure::new(ReasonCode::BuildError, Phase::Artifact, e.to_string()))?;
        info!(problem_id = %spec.id, image = %artifact.image, "Built artifact");
        result.artifact_built(artifact.image.as_str());
        Ok(artifact)
    }

    /// Build, pre-grade, golden, post-grade. Teardown is the caller's job.
    async fn exercise(
        &self,
        spec: &ProblemSpec,
        handle: &EnvironmentHandle,
        result: &mut ResultBuilder,
        signal: &mut ShutdownSignal,
    ) -> Result<(), Failure> {
        let timeouts = &self.config.timeouts;
        let threshold = self.config.pass_threshold;
        let plan = self
            .registry
            .grading_plan(&spec.id)
            .map_err(|e| Failure::new(ReasonCode::GraderInternalError, Phase::PreGrade, e.to_string()))?;

        result.enter(Phase::Build);
        let started = Instant::now();
        let built = guarded(Phase::Build, timeouts.build(), signal, self.builder.build(handle, spec)).await;
        result.time(Phase::Build, started.elapsed());
        built?.map_err(|e| Failure::new(ReasonCode::BuildError, Phase::Build, e.to_string()))?;
        debug!(problem_id = %spec.id, base = %spec.base, "Environment built");

        let state = BoundEnvironment::new(self.builder.as_ref(), handle);

        let pre = self.grade_phase(Phase::PreGrade, &plan, &state, result, signal).await?;
        let pre_passing = pre.meets(threshold);
        let pre_composite = pre.composite();
        result.pre_grade(pre);
        if pre_passing {
            return Err(Failure::new(
                ReasonCode::PreCheckAlreadyPassing,
                Phase::PreGrade,
                format!("initial state already scores {pre_composite:.3} (threshold {threshold})"),
            ));
        }

        result.enter(Phase::Golden);
        let started = Instant::now();
        let applied = guarded(Phase::Golden, timeouts.golden(), signal, self.builder.exec(handle, &spec.golden)).await;
        result.time(Phase::Golden, started.elapsed());
        match applied? {
            Ok(output) => debug!(problem_id = %spec.id, steps = output.steps, "Golden sequence applied"),
            Err(e @ EnvironmentError::GoldenFailed { .. }) => {
                return Err(Failure::new(ReasonCode::GoldenApplyError, Phase::Golden, e.to_string()));
            }
            Err(e) => {
                return Err(Failure::new(
                    ReasonCode::GraderInternalError,
                    Phase::Golden,
                    format!("golden sequence could not run: {e}"),
                ));
            }
        }

        let post = self.grade_phase(Phase::PostGrade, &plan, &state, result, signal).await?;
        let post_passing = post.meets(threshold);
        let post_composite = post.composite();
        let missed: Vec<String> = post
            .subscores()
            .iter()
            .filter(|s| !s.passed())
            .map(|s| s.name.clone())
            .collect();
        result.post_grade(post);
        if !post_passing {
            return Err(Failure::new(
                ReasonCode::PostCheckNotPassing,
                Phase::PostGrade,
                format!(
                    "golden end state scores {post_composite:.3} (threshold {threshold}); failing: {}",
                    missed.join(", ")
                ),
            ));
        }
        Ok(())
    }

    async fn grade_phase(
        &self,
        phase: Phase,
        plan: &GradingPlan,
        state: &BoundEnvironment<'_>,
        result: &mut ResultBuilder,
        signal: &mut ShutdownSignal,
    ) -> Result<Grade, Failure> {
        result.enter(phase);
        let started = Instant::now();
        let graded = guarded(phase, self.config.timeouts.grade(), signal, plan.grade(state)).await;
        result.time(phase, started.elapsed());
        let grade = graded?.map_err(|e| Failure::new(ReasonCode::GraderInternalError, phase, e.to_string()))?;
        debug!(phase = %phase, composite = grade.composite(), "Graded");
        Ok(grade)
    }

    /// Pushes the artifact of a passing problem. Failures are recorded on
    /// the result and never change the verdict.
    async fn push(
        &self,
        spec: &ProblemSpec,
        artifact: Option<ArtifactRef>,
        result: &mut ResultBuilder,
        signal: &mut ShutdownSignal,
    ) {
        result.enter(Phase::Push);
        let Some(pipeline) = &self.artifacts else {
            result.push_failed(PushError::Unsupported(self.builder.backend().to_string()).to_string());
            return;
        };
        let artifact = artifact.unwrap_or_else(|| pipeline.artifact_ref(spec));

        let started = Instant::now();
        let attempt = AssertUnwindSafe(pipeline.push_artifact(&artifact, self.config.registry_prefix.as_deref()))
            .catch_unwind();
        let pushed = guarded(Phase::Push, self.config.timeouts.push(), signal, attempt).await;
        result.time(Phase::Push, started.elapsed());

        match pushed {
            Ok(Ok(Ok(target))) => {
                info!(problem_id = %spec.id, target = %target, "Pushed artifact");
                result.pushed(target);
            }
            Ok(Ok(Err(e))) => {
                warn!(problem_id = %spec.id, error = %e, "Push failed");
                result.push_failed(e.to_string());
            }
            Ok(Err(panic)) => {
                let message = panic_message(panic.as_ref());
                warn!(problem_id = %spec.id, panic = %message, "Push panicked");
                result.push_failed(format!("push panicked: {message}"));
            }
            Err(failure) => {
                warn!(problem_id = %spec.id, reason = %failure.reason, "Push interrupted");
                result.push_failed(failure.message);
            }
        }
    }
}

/// Runs `future` unless the run is aborted or the phase limit expires.
async fn guarded<F: Future>(
    phase: Phase,
    limit: Duration,
    signal: &mut ShutdownSignal,
    future: F,
) -> Result<F::Output, Failure> {
    tokio::select! {
        biased;
        _ = signal.triggered() => Err(Failure::new(
            ReasonCode::Cancelled,
            phase,
            format!("run aborted during {phase}"),
        )),
        outcome = tokio::time::timeout(limit, future) => outcome.map_err(|_| Failure::new(
            ReasonCode::Timeout,
            phase,
            format!("{phase} exceeded {}s", limit.as_secs()),
        )),
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}
