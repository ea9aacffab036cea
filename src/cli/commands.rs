//! CLI command definitions for oracle-forge.
//!
//! `list` and `show` inspect the problem registry, `run` validates problems
//! end to end and writes the report, `grade` scores a live working copy.

use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use serde::Serialize;
use tracing::{info, warn};

use crate::config::{Backend, ValidatorConfig};
use crate::environment::{DockerBuilder, LocalBuilder, WorkingCopy};
use crate::problem::{Difficulty, ProblemSpec, ReviewLevel};
use crate::registry::{ProblemRegistry, Selector};
use crate::report::{ReportWriter, ValidationReport};
use crate::scheduler::ShutdownHandle;
use crate::validation::{OrchestratorConfig, ValidationOrchestrator};

/// Exit status for orchestration-level failures (registry, config, IO).
pub const EXIT_FATAL: u8 = 2;

/// Golden-sequence validator for git agent-evaluation tasks.
#[derive(Parser, Debug)]
#[command(name = "oracle-forge")]
#[command(about = "Validate git agent-evaluation tasks against their golden solutions")]
#[command(version)]
#[command(
    long_about = "oracle-forge builds an isolated environment for every task, checks that the grader rejects the initial state, applies the golden action sequence and checks that the grader accepts the result.\n\nExample usage:\n  oracle-forge list squash\n  oracle-forge run --jobs 4 --report report.json\n  oracle-forge run --backend local --repo-source ~/src/ClickHouse squash-commits-first-parent"
)]
pub struct Cli {
    /// The subcommand to execute.
    #[command(subcommand)]
    pub command: Commands,

    /// Log level (trace, debug, info, warn, error).
    #[arg(short, long, default_value = "info", global = true)]
    pub log_level: String,

    /// YAML configuration file; command-line flags override its values.
    #[arg(short, long, global = true, env = "ORACLE_FORGE_CONFIG")]
    pub config: Option<PathBuf>,

    /// Directory of additional problem files (*.yaml).
    #[arg(long, global = true, env = "ORACLE_FORGE_PROBLEMS_DIR")]
    pub problems_dir: Option<PathBuf>,
}

/// Available CLI subcommands.
#[derive(clap::Subcommand, Debug)]
pub enum Commands {
    /// List registered problems.
    #[command(alias = "ls")]
    List(ListArgs),

    /// Print the agent-facing statement of a problem.
    Show(ShowArgs),

    /// Validate problems: build, grade, apply golden, grade again.
    #[command(alias = "validate")]
    Run(Box<RunArgs>),

    /// Grade an existing working copy with a problem's graders.
    Grade(GradeArgs),
}

/// Arguments for `oracle-forge list`.
#[derive(Parser, Debug)]
pub struct ListArgs {
    /// Problem ids, id prefixes or globs. Lists everything when omitted.
    pub patterns: Vec<String>,

    /// Print JSON instead of a table.
    #[arg(long)]
    pub json: bool,
}

/// Arguments for `oracle-forge show`.
#[derive(Parser, Debug)]
pub struct ShowArgs {
    /// Problem id.
    pub id: String,

    /// Include the hints block.
    #[arg(long)]
    pub hints: bool,

    /// Repository location to mention in the statement.
    #[arg(long)]
    pub repo_dir: Option<String>,
}

/// Arguments for `oracle-forge run`.
#[derive(Parser, Debug, Default)]
pub struct RunArgs {
    /// Problem ids, id prefixes or globs. Runs everything when omitted.
    pub patterns: Vec<String>,

    /// Build per-problem image artifacts.
    #[arg(long)]
    pub build: bool,

    /// Run golden-sequence validation (the default when no phase flag is given).
    #[arg(long)]
    pub validate: bool,

    /// Push artifacts of passing problems.
    #[arg(long)]
    pub push: bool,

    /// Number of problems validated concurrently.
    #[arg(short, long, env = "ORACLE_FORGE_JOBS")]
    pub jobs: Option<usize>,

    /// Print the JSON report to stdout, on one line, instead of a summary.
    #[arg(long)]
    pub json: bool,

    /// Write the JSON report to this path.
    #[arg(short, long)]
    pub report: Option<PathBuf>,

    /// Remote prefix replacing the local artifact prefix on push.
    #[arg(long, env = "ORACLE_FORGE_REGISTRY_PREFIX")]
    pub registry_prefix: Option<String>,

    /// Composite score a grade must reach to pass, in (0, 1].
    #[arg(long)]
    pub pass_threshold: Option<f64>,

    /// Environment backend.
    #[arg(long, value_enum)]
    pub backend: Option<Backend>,

    /// Base image for the docker backend.
    #[arg(long, env = "ORACLE_FORGE_IMAGE")]
    pub image: Option<String>,

    /// Repository cloned by the local backend (selects the local backend).
    #[arg(long, env = "ORACLE_FORGE_REPO_SOURCE")]
    pub repo_source: Option<PathBuf>,

    /// Scratch directory for local environments.
    #[arg(long)]
    pub scratch_dir: Option<PathBuf>,

    /// Build phase timeout in seconds.
    #[arg(long)]
    pub build_timeout: Option<u64>,

    /// Golden phase timeout in seconds.
    #[arg(long)]
    pub golden_timeout: Option<u64>,

    /// Timeout of each grading pass in seconds.
    #[arg(long)]
    pub grade_timeout: Option<u64>,

    /// Push timeout in seconds.
    #[arg(long)]
    pub push_timeout: Option<u64>,
}

impl RunArgs {
    /// Overlays these flags on `config`.
    pub fn apply(&self, mut config: ValidatorConfig) -> ValidatorConfig {
        config.phases = config.phases.overridden_by(self.build, self.validate, self.push);
        if let Some(jobs) = self.jobs {
            config.jobs = jobs;
        }
        if let Some(threshold) = self.pass_threshold {
            config.pass_threshold = threshold;
        }
        if let Some(prefix) = &self.registry_prefix {
            config.docker.registry_prefix = Some(prefix.clone());
        }
        if let Some(image) = &self.image {
            config.docker.image = image.clone();
        }
        if let Some(source) = &self.repo_source {
            config = config.with_local_source(source.clone());
        }
        if let Some(backend) = self.backend {
            config.backend = backend;
        }
        if let Some(dir) = &self.scratch_dir {
            config.local.scratch_dir = Some(dir.clone());
        }
        let timeouts = &mut config.timeouts;
        if let Some(secs) = self.build_timeout {
            timeouts.build_secs = secs;
        }
        if let Some(secs) = self.golden_timeout {
            timeouts.golden_secs = secs;
        }
        if let Some(secs) = self.grade_timeout {
            timeouts.grade_secs = secs;
        }
        if let Some(secs) = self.push_timeout {
            timeouts.push_secs = secs;
        }
        config
    }
}

/// Arguments for `oracle-forge grade`.
#[derive(Parser, Debug)]
pub struct GradeArgs {
    /// Problem id.
    pub id: String,

    /// Working copy to grade. Defaults to the current directory.
    #[arg(short, long)]
    pub workdir: Option<PathBuf>,

    /// Write the grade JSON to this path instead of stdout.
    #[arg(short, long)]
    pub output: Option<PathBuf>,
}

/// Parse CLI arguments.
pub fn parse_cli() -> Cli {
    Cli::parse()
}

/// Run the CLI with the parsed arguments and return the process exit code.
pub async fn run_with_cli(cli: Cli) -> anyhow::Result<ExitCode> {
    let mut config = match &cli.config {
        Some(path) => ValidatorConfig::from_yaml_file(path)?,
        None => ValidatorConfig::default(),
    };
    if let Some(dir) = &cli.problems_dir {
        config.problems_dir = Some(dir.clone());
    }
    let registry = load_registry(config.problems_dir.as_deref())?;

    let code = match cli.command {
        Commands::List(args) => run_list_command(&registry, args)?,
        Commands::Show(args) => run_show_command(&registry, &config, args)?,
        Commands::Run(args) => run_validation_command(registry, config, *args).await?,
        Commands::Grade(args) => run_grade_command(&registry, &config, args).await?,
    };
    Ok(ExitCode::from(code))
}

fn load_registry(problems_dir: Option<&Path>) -> anyhow::Result<ProblemRegistry> {
    let mut registry = ProblemRegistry::with_builtin().context("Failed to load the built-in catalog")?;
    if let Some(dir) = problems_dir {
        registry
            .load_dir(dir)
            .with_context(|| format!("Failed to load problems from {}", dir.display()))?;
    }
    Ok(registry)
}

// ============================================================================
// list / show
// ============================================================================

#[derive(Debug, Serialize)]
struct ProblemSummary<'a> {
    id: &'a str,
    difficulty: Difficulty,
    task_type: &'a str,
    review_level: ReviewLevel,
    base: &'a str,
    hints: usize,
    golden_steps: usize,
    graders: usize,
    /// Auxiliary files the graders need.
    test_files: &'a [String],
}

impl<'a> From<&'a ProblemSpec> for ProblemSummary<'a> {
    fn from(spec: &'a ProblemSpec) -> Self {
        Self {
            id: &spec.id,
            difficulty: spec.difficulty,
            task_type: &spec.task_type,
            review_level: spec.review_level,
            base: &spec.base,
            hints: spec.hints.len(),
            golden_steps: spec.golden.len(),
            graders: spec.grading.len(),
            test_files: spec.test_files.as_deref().unwrap_or_default(),
        }
    }
}

fn run_list_command(registry: &ProblemRegistry, args: ListArgs) -> anyhow::Result<u8> {
    let specs = registry.select(&Selector::from_patterns(args.patterns))?;
    if args.json {
        let summaries: Vec<ProblemSummary<'_>> = specs.iter().map(|s| ProblemSummary::from(s.as_ref())).collect();
        println!("{}", serde_json::to_string_pretty(&summaries)?);
        return Ok(0);
    }

    let width = specs.iter().map(|s| s.id.len()).max().unwrap_or(0);
    for spec in &specs {
        let summary = spec.description.lines().next().unwrap_or_default();
        println!("{:<width$}  {:<6}  {}", spec.id, spec.difficulty, summary);
    }
    Ok(0)
}

fn run_show_command(registry: &ProblemRegistry, config: &ValidatorConfig, args: ShowArgs) -> anyhow::Result<u8> {
    let spec = registry.get(&args.id)?;
    let repo_dir = args.repo_dir.unwrap_or_else(|| config.docker.repo_dir.clone());
    let statement = spec
        .statement_for(&repo_dir, args.hints)
        .with_context(|| format!("Failed to render statement for '{}'", spec.id))?;
    println!("{statement}");
    Ok(0)
}

// ============================================================================
// run
// ============================================================================

async fn run_validation_command(registry: ProblemRegistry, config: ValidatorConfig, args: RunArgs) -> anyhow::Result<u8> {
    let config = args.apply(config);
    config.validate().context("Invalid configuration")?;

    let specs = registry.select(&Selector::from_patterns(args.patterns.clone()))?;
    let orchestrator = build_orchestrator(Arc::new(registry), &config).await?;

    let shutdown = ShutdownHandle::new();
    let interrupt = {
        let shutdown = shutdown.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                warn!("Interrupt received, aborting run");
                shutdown.trigger();
            }
        })
    };

    let outcome = orchestrator.run(specs, &shutdown).await;
    interrupt.abort();

    let report = ValidationReport::new(outcome.results, &config);
    let writer = ReportWriter::new();
    if let Some(path) = &args.report {
        writer
            .write_to_path(&report, path)
            .with_context(|| format!("Failed to write report to {}", path.display()))?;
    }
    if args.json {
        writer.compact().write_to(&report, std::io::stdout().lock())?;
    } else {
        print!("{}", writer.summary_text(&report));
    }

    info!(digest = %report.digest, status = ?report.status(), "Run complete");
    Ok(report.status().exit_code())
}

async fn build_orchestrator(
    registry: Arc<ProblemRegistry>,
    config: &ValidatorConfig,
) -> anyhow::Result<ValidationOrchestrator> {
    let settings = OrchestratorConfig::from(config);
    match config.backend {
        Backend::Docker => {
            let docker = Arc::new(DockerBuilder::connect(config.docker.clone())?);
            docker.ping().await.context("Docker daemon is not reachable")?;
            Ok(ValidationOrchestrator::new(registry, docker.clone(), settings).with_artifacts(docker))
        }
        Backend::Local => {
            let source = config
                .local
                .repo_source
                .clone()
                .context("The local backend needs --repo-source")?;
            let scratch = config
                .local
                .scratch_dir
                .clone()
                .unwrap_or_else(|| std::env::temp_dir().join("oracle-forge"));
            std::fs::create_dir_all(&scratch)
                .with_context(|| format!("Failed to create scratch directory {}", scratch.display()))?;
            let builder = LocalBuilder::new(source, scratch).with_image_repo_dir(config.docker.repo_dir.as_str());
            Ok(ValidationOrchestrator::new(registry, Arc::new(builder), settings))
        }
    }
}

// ============================================================================
// grade
// ============================================================================

async fn run_grade_command(registry: &ProblemRegistry, config: &ValidatorConfig, args: GradeArgs) -> anyhow::Result<u8> {
    let spec = registry.get(&args.id)?;
    let plan = registry.grading_plan(&args.id)?;
    let workdir = match args.workdir {
        Some(dir) => dir,
        None => std::env::current_dir()?,
    };
    let workdir = workdir
        .canonicalize()
        .with_context(|| format!("Working copy {} does not exist", workdir.display()))?;

    let copy = WorkingCopy::new(&workdir).with_image_repo_dir(config.docker.repo_dir.as_str());
    let grade = plan
        .grade(&copy)
        .await
        .with_context(|| format!("Failed to grade {}", workdir.display()))?;
    let passed = grade.meets(config.pass_threshold);

    let output = serde_json::json!({
        "problem_id": args.id,
        "score": grade.composite(),
        "passed": passed,
        "subscores": grade.subscores(),
        "metadata": grade.metadata(),
        "test_files": spec.test_files,
    });
    let json = serde_json::to_string_pretty(&output)?;
    match &args.output {
        Some(path) => {
            std::fs::write(path, format!("{json}\n"))
                .with_context(|| format!("Failed to write {}", path.display()))?;
            info!(path = %path.display(), score = grade.composite(), "Wrote grade");
        }
        None => println!("{json}"),
    }
    Ok(if passed { 0 } else { 1 })
}
