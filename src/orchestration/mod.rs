//! Orchestration layer: goal decomposition, work execution and the agent
//! drive loop on top of the graph engine.

mod decompose;
mod executor;
mod orchestrator;

pub use decompose::{
    fallback_plan, validate_plan, CandidateTask, DecompositionProvider, KeywordDecomposer,
    RESEARCH_TITLE, REVIEW_TITLE,
};
pub use executor::{SimulatedWork, WorkExecutor, WorkOutcome};
pub use orchestrator::{AgentPlan, DriveReport, NewTask, Orchestrator, DEFAULT_DECOMPOSE_TIMEOUT};
