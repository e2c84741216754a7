use thiserror::Error;

use crate::core::agent::AgentId;
use crate::core::task::TaskId;

#[derive(Error, Debug)]
pub enum Error {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("TOML parse error: {0}")]
    TomlParse(#[from] toml::de::Error),

    #[error("TOML serialize error: {0}")]
    TomlSerialize(#[from] toml::ser::Error),

    #[error("No home directory")]
    NoHomeDir,

    /// Cycle, unknown node, duplicate edge, or delete with dependents.
    #[error("Structural violation: {0}")]
    Structural(String),

    #[error("Task store unavailable: {0}")]
    StoreUnavailable(String),

    #[error("Invalid transition for task {task}: cannot {event} from {from}")]
    InvalidTransition {
        task: TaskId,
        from: String,
        event: String,
    },

    #[error("Goal decomposition failed: {0}")]
    Decomposition(String),

    #[error("Task not found: {0}")]
    TaskNotFound(TaskId),

    #[error("Agent not found: {0}")]
    AgentNotFound(AgentId),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Operation timed out after {0:?}")]
    Timeout(std::time::Duration),

    #[error("Task join error: {0}")]
    TaskJoin(String),
}

impl Error {
    /// Whether the caller may retry the same request later.
    ///
    /// Only store-layer failures and timeouts are transient; structural
    /// and guard violations need a different request.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Error::StoreUnavailable(_) | Error::Timeout(_) | Error::Io(_)
        )
    }
}

pub type Result<T> = std::result::Result<T, Error>;
