//! Golden-sequence validation.
//!
//! For each problem: build the environment at its base commit, confirm the
//! grader rejects it, apply the golden actions, confirm the grader accepts
//! the result, tear down. Results land on a [`ResultBoard`] and come back in
//! id order.

pub mod board;
pub mod orchestrator;
pub mod result;

pub use board::ResultBoard;
pub use orchestrator::{OrchestratorConfig, RunOutcome, ValidationOrchestrator};
pub use result::{ArtifactOutcome, Phase, PhaseTimings, ReasonCode, ValidationResult, Verdict};
