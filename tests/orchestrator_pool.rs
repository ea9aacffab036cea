//! Orchestrator behavior on the worker pool, using an in-memory builder.

mod common;

use std::sync::Arc;
use std::time::Duration;

use common::{
    fake_problem, FakeBuilder, FakePipeline, BROKEN_PREFIX, EXPLODING_ARTIFACT_PREFIX, FAIL, FREEZE, HANG,
    HANGING_CHECK, LOST, PANIC, SOLVE, STUCK_PREFIX,
};
use oracle_forge::config::PhaseTimeouts;
use oracle_forge::grading::{CommandCheck, CommandGraderConfig, GitGraderConfig, GraderSpec};
use oracle_forge::problem::{Difficulty, ProblemSpec};
use oracle_forge::registry::ProblemRegistry;
use oracle_forge::report::outcome_digest;
use oracle_forge::scheduler::ShutdownHandle;
use oracle_forge::validation::{
    OrchestratorConfig, Phase, ReasonCode, ValidationOrchestrator, ValidationResult, Verdict,
};

fn mixed_problems() -> Vec<ProblemSpec> {
    vec![
        fake_problem("alpha", &[SOLVE]),
        fake_problem("bravo", &["true", SOLVE]),
        fake_problem("presolved-charlie", &[SOLVE]),
        fake_problem("delta", &[FAIL, SOLVE]),
        fake_problem("echo", &[]),
        fake_problem(&format!("{BROKEN_PREFIX}-foxtrot"), &[SOLVE]),
        fake_problem("golf", &["true"]),
        fake_problem("hotel", &[SOLVE]),
    ]
}

fn setup(
    problems: Vec<ProblemSpec>,
    builder: Arc<FakeBuilder>,
    config: OrchestratorConfig,
) -> (ValidationOrchestrator, Vec<Arc<ProblemSpec>>) {
    let mut registry = ProblemRegistry::new();
    registry.register_all(problems).unwrap();
    let specs = registry.all();
    let orchestrator = ValidationOrchestrator::new(Arc::new(registry), builder, config);
    (orchestrator, specs)
}

fn config(jobs: usize) -> OrchestratorConfig {
    OrchestratorConfig {
        jobs,
        ..Default::default()
    }
}

fn by_id<'a>(results: &'a [ValidationResult], id: &str) -> &'a ValidationResult {
    results.iter().find(|r| r.problem_id == id).unwrap()
}

#[tokio::test]
async fn test_reason_codes_for_each_outcome() {
    let builder = Arc::new(FakeBuilder::new());
    let (orchestrator, specs) = setup(mixed_problems(), Arc::clone(&builder), config(2));
    let outcome = orchestrator.run(specs, &ShutdownHandle::new()).await;
    let results = outcome.results;

    assert_eq!(results.len(), 8);
    assert!(by_id(&results, "alpha").passed());
    assert!(by_id(&results, "bravo").passed());
    assert!(by_id(&results, "hotel").passed());

    let presolved = by_id(&results, "presolved-charlie");
    assert_eq!(presolved.reason, Some(ReasonCode::PreCheckAlreadyPassing));
    assert_eq!(presolved.failed_phase, Some(Phase::PreGrade));
    assert!(presolved.post_grade.is_none());

    let delta = by_id(&results, "delta");
    assert_eq!(delta.reason, Some(ReasonCode::GoldenApplyError));
    assert!(delta.message.as_deref().unwrap().contains("action 1"));

    let broken = by_id(&results, "broken-foxtrot");
    assert_eq!(broken.reason, Some(ReasonCode::BuildError));
    assert_eq!(broken.failed_phase, Some(Phase::Build));

    // No-op goldens leave the initial state, which the grader rejects.
    for id in ["echo", "golf"] {
        let result = by_id(&results, id);
        assert_eq!(result.verdict, Verdict::Fail);
        assert_eq!(result.reason, Some(ReasonCode::PostCheckNotPassing));
        assert_eq!(result.post_grade.as_ref().unwrap().composite(), 0.0);
    }

    let alpha = by_id(&results, "alpha");
    assert_eq!(alpha.pre_grade.as_ref().unwrap().composite(), 0.0);
    assert_eq!(alpha.post_grade.as_ref().unwrap().composite(), 1.0);
    assert!(alpha.timings.golden_ms.is_some());
    assert!(alpha.timings.teardown_ms.is_some());

    assert_eq!(builder.allocated(), 8);
    assert_eq!(builder.destroyed(), 8);
    assert_eq!(outcome.stats.jobs_completed, 3);
    assert_eq!(outcome.stats.jobs_failed, 5);
}

#[tokio::test]
async fn test_pool_size_does_not_change_outcomes() {
    let mut runs = Vec::new();
    for jobs in [1, 4] {
        let builder = Arc::new(FakeBuilder::new());
        let (orchestrator, specs) = setup(mixed_problems(), Arc::clone(&builder), config(jobs));
        let results = orchestrator.run(specs, &ShutdownHandle::new()).await.results;
        assert_eq!(builder.allocated(), builder.destroyed());
        runs.push(results);
    }

    let verdicts = |results: &[ValidationResult]| -> Vec<(String, Verdict, Option<ReasonCode>)> {
        results
            .iter()
            .map(|r| (r.problem_id.clone(), r.verdict, r.reason))
            .collect()
    };
    assert_eq!(verdicts(&runs[0]), verdicts(&runs[1]));
    assert_eq!(outcome_digest(&runs[0]), outcome_digest(&runs[1]));
}

#[tokio::test]
async fn test_abort_mid_run_balances_build_and_destroy() {
    let builder = Arc::new(FakeBuilder::new().with_build_delay(Duration::from_millis(100)));
    let problems: Vec<_> = (0..12).map(|i| fake_problem(&format!("p{i:02}"), &[SOLVE])).collect();
    let (orchestrator, specs) = setup(problems, Arc::clone(&builder), config(3));

    let shutdown = ShutdownHandle::new();
    let trigger = shutdown.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(150)).await;
        trigger.trigger();
    });
    let results = orchestrator.run(specs, &shutdown).await.results;

    assert_eq!(results.len(), 12);
    let ids: Vec<_> = results.iter().map(|r| r.problem_id.clone()).collect();
    let mut sorted = ids.clone();
    sorted.sort();
    assert_eq!(ids, sorted);

    assert!(results.iter().any(|r| r.reason == Some(ReasonCode::Cancelled)));
    assert!(builder.allocated() < 12);
    assert_eq!(builder.allocated(), builder.destroyed());
    assert!(builder.builds() <= builder.allocated());
}

#[tokio::test]
async fn test_abort_before_start_cancels_everything() {
    let builder = Arc::new(FakeBuilder::new());
    let problems: Vec<_> = (0..4).map(|i| fake_problem(&format!("p{i}"), &[SOLVE])).collect();
    let (orchestrator, specs) = setup(problems, Arc::clone(&builder), config(2));

    let shutdown = ShutdownHandle::new();
    shutdown.trigger();
    let results = orchestrator.run(specs, &shutdown).await.results;

    assert_eq!(results.len(), 4);
    assert!(results.iter().all(|r| r.reason == Some(ReasonCode::Cancelled)));
    assert_eq!(builder.allocated(), 0);
    assert_eq!(builder.destroyed(), 0);
}

#[tokio::test]
async fn test_faults_stay_inside_their_unit() {
    let builder = Arc::new(FakeBuilder::new());
    let problems = vec![
        fake_problem("exploding", &[PANIC]),
        fake_problem("hanging", &[HANG]),
        fake_problem("healthy", &[SOLVE]),
    ];
    let config = OrchestratorConfig {
        jobs: 3,
        timeouts: PhaseTimeouts {
            golden_secs: 1,
            ..Default::default()
        },
        ..Default::default()
    };
    let (orchestrator, specs) = setup(problems, Arc::clone(&builder), config);
    let results = orchestrator.run(specs, &ShutdownHandle::new()).await.results;

    let exploding = by_id(&results, "exploding");
    assert_eq!(exploding.reason, Some(ReasonCode::GraderInternalError));
    assert_eq!(exploding.failed_phase, Some(Phase::Golden));
    assert!(exploding.message.as_deref().unwrap().contains("builder exploded"));

    let hanging = by_id(&results, "hanging");
    assert_eq!(hanging.reason, Some(ReasonCode::Timeout));
    assert_eq!(hanging.failed_phase, Some(Phase::Golden));

    assert!(by_id(&results, "healthy").passed());
    assert_eq!(builder.allocated(), 3);
    assert_eq!(builder.destroyed(), 3);
}

#[tokio::test]
async fn test_pass_threshold_is_configurable() {
    // The second check always passes, so the initial state scores 0.5.
    let spec = fake_problem("half", &[SOLVE]).with_grader(GraderSpec::Command(CommandGraderConfig::new(vec![
        CommandCheck::new("always", "true"),
    ])));

    let builder = Arc::new(FakeBuilder::new());
    let (orchestrator, specs) = setup(vec![spec.clone()], Arc::clone(&builder), config(1));
    let results = orchestrator.run(specs, &ShutdownHandle::new()).await.results;
    assert!(results[0].passed());
    assert_eq!(results[0].pre_grade.as_ref().unwrap().composite(), 0.5);

    let lenient = OrchestratorConfig {
        pass_threshold: 0.5,
        ..config(1)
    };
    let (orchestrator, specs) = setup(vec![spec], Arc::clone(&builder), lenient);
    let results = orchestrator.run(specs, &ShutdownHandle::new()).await.results;
    assert_eq!(results[0].reason, Some(ReasonCode::PreCheckAlreadyPassing));
}

#[tokio::test]
async fn test_build_phase_without_artifact_pipeline_fails_cleanly() {
    let builder = Arc::new(FakeBuilder::new());
    let mut config = config(1);
    config.phases.build = true;
    let (orchestrator, specs) = setup(vec![fake_problem("alpha", &[SOLVE])], Arc::clone(&builder), config);
    let results = orchestrator.run(specs, &ShutdownHandle::new()).await.results;

    assert_eq!(results[0].reason, Some(ReasonCode::BuildError));
    assert_eq!(results[0].failed_phase, Some(Phase::Artifact));
    assert_eq!(builder.allocated(), 0);
}

const REGISTRY: &str = "registry.example.com/tasks";

fn pushing_config() -> OrchestratorConfig {
    let mut config = config(2);
    config.phases.push = true;
    config.registry_prefix = Some(REGISTRY.to_string());
    config
}

fn with_limits(timeouts: PhaseTimeouts) -> OrchestratorConfig {
    OrchestratorConfig {
        jobs: 4,
        timeouts,
        ..Default::default()
    }
}

#[tokio::test]
async fn test_only_passing_problems_are_pushed() {
    let builder = Arc::new(FakeBuilder::new());
    let pipeline = Arc::new(FakePipeline::new());
    let problems = vec![fake_problem("alpha", &[SOLVE]), fake_problem("echo", &[])];
    let (orchestrator, specs) = setup(problems, Arc::clone(&builder), pushing_config());
    let orchestrator = orchestrator.with_artifacts(pipeline.clone());
    let results = orchestrator.run(specs, &ShutdownHandle::new()).await.results;

    assert_eq!(
        pipeline.pushes(),
        vec![("local/alpha:latest".to_string(), Some(REGISTRY.to_string()))]
    );

    let alpha = by_id(&results, "alpha");
    assert!(alpha.passed());
    assert!(!alpha.push_failed());
    let artifact = alpha.artifact.as_ref().unwrap();
    assert_eq!(artifact.pushed_to.as_deref(), Some("registry.example.com/tasks/alpha:latest"));
    assert!(alpha.timings.push_ms.is_some());

    let echo = by_id(&results, "echo");
    assert_eq!(echo.reason, Some(ReasonCode::PostCheckNotPassing));
    assert!(echo.artifact.is_none());
    assert_eq!(builder.allocated(), builder.destroyed());
}

#[tokio::test]
async fn test_rejected_push_keeps_passing_verdict() {
    let builder = Arc::new(FakeBuilder::new());
    let pipeline = Arc::new(FakePipeline::rejecting());
    let (orchestrator, specs) = setup(vec![fake_problem("alpha", &[SOLVE])], builder, pushing_config());
    let orchestrator = orchestrator.with_artifacts(pipeline.clone());
    let results = orchestrator.run(specs, &ShutdownHandle::new()).await.results;

    let alpha = &results[0];
    assert_eq!(alpha.verdict, Verdict::Pass);
    assert!(alpha.reason.is_none());
    assert!(alpha.push_failed());
    let artifact = alpha.artifact.as_ref().unwrap();
    assert!(artifact.pushed_to.is_none());
    assert!(artifact.push_error.as_deref().unwrap().contains("denied"));
    assert_eq!(pipeline.pushes().len(), 1);
}

#[tokio::test]
async fn test_built_artifact_is_the_one_pushed() {
    let builder = Arc::new(FakeBuilder::new());
    let pipeline = Arc::new(FakePipeline::new());
    let mut config = pushing_config();
    config.phases.build = true;
    let (orchestrator, specs) = setup(vec![fake_problem("alpha", &[SOLVE])], builder, config);
    let orchestrator = orchestrator.with_artifacts(pipeline.clone());
    let results = orchestrator.run(specs, &ShutdownHandle::new()).await.results;

    assert!(results[0].passed());
    assert_eq!(pipeline.built(), 1);
    let artifact = results[0].artifact.as_ref().unwrap();
    assert_eq!(artifact.image.as_deref(), Some("local/alpha:latest"));
    assert_eq!(artifact.pushed_to.as_deref(), Some("registry.example.com/tasks/alpha:latest"));
}

#[tokio::test]
async fn test_push_without_pipeline_is_recorded_not_fatal() {
    let builder = Arc::new(FakeBuilder::new());
    let (orchestrator, specs) = setup(vec![fake_problem("alpha", &[SOLVE])], builder, pushing_config());
    let results = orchestrator.run(specs, &ShutdownHandle::new()).await.results;

    assert!(results[0].passed());
    assert!(results[0].push_failed());
}

#[tokio::test]
async fn test_artifact_panic_is_grader_internal_error() {
    let builder = Arc::new(FakeBuilder::new());
    let pipeline = Arc::new(FakePipeline::new());
    let mut config = config(2);
    config.phases.build = true;
    let problems = vec![
        fake_problem(&format!("{EXPLODING_ARTIFACT_PREFIX}-alpha"), &[SOLVE]),
        fake_problem("bravo", &[SOLVE]),
    ];
    let (orchestrator, specs) = setup(problems, Arc::clone(&builder), config);
    let orchestrator = orchestrator.with_artifacts(pipeline.clone());
    let results = orchestrator.run(specs, &ShutdownHandle::new()).await.results;

    let exploded = by_id(&results, "exploding-artifact-alpha");
    assert_eq!(exploded.reason, Some(ReasonCode::GraderInternalError));
    assert_eq!(exploded.failed_phase, Some(Phase::Artifact));
    assert!(exploded.message.as_deref().unwrap().contains("recipe exploded"));

    assert!(by_id(&results, "bravo").passed());
    assert_eq!(pipeline.built(), 2);
    // The exploded problem never reached allocation.
    assert_eq!(builder.allocated(), 1);
    assert_eq!(builder.destroyed(), 1);
}

#[tokio::test]
async fn test_stuck_build_times_out() {
    let builder = Arc::new(FakeBuilder::new());
    let problems = vec![
        fake_problem(&format!("{STUCK_PREFIX}-alpha"), &[SOLVE]),
        fake_problem("bravo", &[SOLVE]),
    ];
    let config = with_limits(PhaseTimeouts {
        build_secs: 1,
        ..Default::default()
    });
    let (orchestrator, specs) = setup(problems, Arc::clone(&builder), config);
    let results = orchestrator.run(specs, &ShutdownHandle::new()).await.results;

    let stuck = by_id(&results, "stuck-alpha");
    assert_eq!(stuck.reason, Some(ReasonCode::Timeout));
    assert_eq!(stuck.failed_phase, Some(Phase::Build));
    assert!(stuck.pre_grade.is_none());
    assert!(by_id(&results, "bravo").passed());
    assert_eq!(builder.allocated(), 2);
    assert_eq!(builder.destroyed(), 2);
}

#[tokio::test]
async fn test_grading_passes_time_out() {
    let builder = Arc::new(FakeBuilder::new());
    let hanging_grader = ProblemSpec::new("hanging-grader", "Never graded.", Difficulty::Easy, "abc123")
        .with_golden([SOLVE])
        .with_grader(GraderSpec::Command(CommandGraderConfig::new(vec![CommandCheck::new(
            "hangs",
            HANGING_CHECK,
        )])));
    let problems = vec![hanging_grader, fake_problem("frozen-after-golden", &[FREEZE])];
    let config = with_limits(PhaseTimeouts {
        grade_secs: 1,
        ..Default::default()
    });
    let (orchestrator, specs) = setup(problems, Arc::clone(&builder), config);
    let results = orchestrator.run(specs, &ShutdownHandle::new()).await.results;

    let pre = by_id(&results, "hanging-grader");
    assert_eq!(pre.reason, Some(ReasonCode::Timeout));
    assert_eq!(pre.failed_phase, Some(Phase::PreGrade));
    assert!(pre.pre_grade.is_none());

    let post = by_id(&results, "frozen-after-golden");
    assert_eq!(post.reason, Some(ReasonCode::Timeout));
    assert_eq!(post.failed_phase, Some(Phase::PostGrade));
    assert!(post.pre_grade.is_some());
    assert!(post.post_grade.is_none());

    assert_eq!(builder.allocated(), 2);
    assert_eq!(builder.destroyed(), 2);
}

#[tokio::test]
async fn test_integrity_faults_are_grader_internal_errors() {
    let builder = Arc::new(FakeBuilder::new());
    let not_a_repo = ProblemSpec::new("not-a-repo", "Graded by git.", Difficulty::Easy, "abc123")
        .with_golden([SOLVE])
        .with_grader(GraderSpec::Git(GitGraderConfig::new("abc")));
    let problems = vec![not_a_repo, fake_problem("lost", &[LOST])];
    let (orchestrator, specs) = setup(problems, Arc::clone(&builder), config(2));
    let results = orchestrator.run(specs, &ShutdownHandle::new()).await.results;

    let grader = by_id(&results, "not-a-repo");
    assert_eq!(grader.reason, Some(ReasonCode::GraderInternalError));
    assert_eq!(grader.failed_phase, Some(Phase::PreGrade));
    assert!(grader.message.as_deref().unwrap().contains("Not a git repository"));

    let lost = by_id(&results, "lost");
    assert_eq!(lost.reason, Some(ReasonCode::GraderInternalError));
    assert_eq!(lost.failed_phase, Some(Phase::Golden));
    assert!(lost.message.as_deref().unwrap().contains("connection to environment lost"));

    assert_eq!(builder.allocated(), builder.destroyed());
}
