//! The conversational agent: turn orchestration, prompt context assembly,
//! rate limiting, reply validation, and the LLM failure breaker.
//!
//! [`orchestrator::Orchestrator`] is the entry point; everything else in this
//! module exists to serve one of its pipeline stages.

pub mod breaker;
pub mod context;
pub mod orchestrator;
pub mod ratelimit;
pub mod validator;

pub use orchestrator::{Orchestrator, OrchestratorDeps, PipelineError, TurnOutcome, TurnRequest};
