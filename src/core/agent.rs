//! Agent records and agent status derivation.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Unique identifier for an agent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AgentId(pub Uuid);

impl AgentId {
    /// Create a new unique agent identifier.
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Return first 8 characters of the UUID for display.
    pub fn short(&self) -> String {
        self.0.to_string()[..8].to_string()
    }
}

impl Default for AgentId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for AgentId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl std::str::FromStr for AgentId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        Ok(Self(Uuid::parse_str(s)?))
    }
}

/// Orchestration status of an agent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum AgentStatus {
    #[default]
    Active,
    Paused,
    Blocked,
    Completed,
}

impl std::fmt::Display for AgentStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AgentStatus::Active => write!(f, "active"),
            AgentStatus::Paused => write!(f, "paused"),
            AgentStatus::Blocked => write!(f, "blocked"),
            AgentStatus::Completed => write!(f, "completed"),
        }
    }
}

/// Counts over an agent's tasks, as seen by the graph.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TaskSummary {
    pub total: usize,
    pub done: usize,
    pub in_progress: usize,
    pub blocked: usize,
}

impl AgentStatus {
    /// Derive the status an agent should have given its tasks.
    ///
    /// `Paused` is sticky: only an explicit resume leaves it. Otherwise the
    /// agent is `Blocked` exactly when some task is blocked and none is in
    /// progress. An agent with no tasks stays `Active`.
    pub fn derive(current: AgentStatus, summary: &TaskSummary) -> AgentStatus {
        if summary.total > 0 && summary.done == summary.total {
            return AgentStatus::Completed;
        }
        if current == AgentStatus::Paused {
            return AgentStatus::Paused;
        }
        if summary.blocked > 0 && summary.in_progress == 0 {
            AgentStatus::Blocked
        } else {
            AgentStatus::Active
        }
    }
}

/// An agent: an immutable goal plus the tasks created to reach it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Agent {
    pub id: AgentId,
    pub goal: String,
    pub workspace: String,
    pub status: AgentStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Agent {
    pub fn new(goal: &str, workspace: &str) -> Self {
        let now = Utc::now();
        Self {
            id: AgentId::new(),
            goal: goal.to_string(),
            workspace: workspace.to_string(),
            status: AgentStatus::Active,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn set_status(&mut self, status: AgentStatus) {
        self.status = status;
        self.updated_at = Utc::now();
    }

    pub fn is_paused(&self) -> bool {
        self.status == AgentStatus::Paused
    }
}
