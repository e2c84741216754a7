//! Task data model for the dependency graph.
//!
//! Tasks are the units of work owned by an agent. Each task tracks its
//! lifecycle status, scheduling attributes, and whether resolving it
//! needs a human.

use crate::core::agent::AgentId;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Unique identifier for a task.
///
/// Uses UUID v4 for generation and provides a short form display
/// for human-readable output.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TaskId(pub Uuid);

impl TaskId {
    /// Create a new unique task identifier.
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Return first 8 characters of the UUID for display.
    pub fn short(&self) -> String {
        self.0.to_string()[..8].to_string()
    }
}

impl Default for TaskId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for TaskId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl std::str::FromStr for TaskId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        Ok(Self(Uuid::parse_str(s)?))
    }
}

/// Task status in its lifecycle.
///
/// "Ready" is not a stored status: a `Todo` task whose blockers are all
/// `Done` is ready. See [`crate::core::dag::TaskGraph::is_ready`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    /// Created and not started.
    #[default]
    Todo,
    /// Currently being worked on.
    InProgress,
    /// Waiting on prerequisites or on a human.
    Blocked,
    /// Finished. Terminal.
    Done,
}

impl TaskStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TaskStatus::Todo => "todo",
            TaskStatus::InProgress => "in_progress",
            TaskStatus::Blocked => "blocked",
            TaskStatus::Done => "done",
        }
    }
}

impl std::fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for TaskStatus {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "todo" => Ok(TaskStatus::Todo),
            "in_progress" => Ok(TaskStatus::InProgress),
            "blocked" => Ok(TaskStatus::Blocked),
            "done" => Ok(TaskStatus::Done),
            other => Err(format!("unknown task status: {}", other)),
        }
    }
}

/// Scheduling priority. Variants are ordered most urgent first.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, Default,
)]
#[serde(rename_all = "snake_case")]
pub enum Priority {
    Urgent,
    High,
    #[default]
    Medium,
    Low,
}

impl std::fmt::Display for Priority {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Priority::Urgent => write!(f, "urgent"),
            Priority::High => write!(f, "high"),
            Priority::Medium => write!(f, "medium"),
            Priority::Low => write!(f, "low"),
        }
    }
}

/// A single task node.
///
/// Owned by the agent that created it; the graph only refers to it by id.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Task {
    /// Unique identifier for this task.
    pub id: TaskId,
    /// Short human-readable title.
    pub title: String,
    /// What the task should accomplish.
    #[serde(default)]
    pub description: String,
    /// Workspace the task lives in.
    pub workspace: String,
    /// Owning agent, if any. Tasks created directly by a human may have none.
    #[serde(default)]
    pub agent_id: Option<AgentId>,
    /// Current lifecycle status.
    pub status: TaskStatus,
    #[serde(default)]
    pub priority: Priority,
    #[serde(default)]
    pub due_at: Option<DateTime<Utc>>,
    /// True when resolution requires a human.
    #[serde(default)]
    pub is_dependency: bool,
    /// Why the task is blocked, when it is.
    #[serde(default)]
    pub blocked_reason: Option<String>,
    /// Single upstream task (finish-to-start).
    #[serde(default)]
    pub depends_on: Option<TaskId>,
    /// Number of failed execution attempts.
    #[serde(default)]
    pub attempts: u32,
    /// Append-only completion notes.
    #[serde(default)]
    pub notes: Vec<String>,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub completed_at: Option<DateTime<Utc>>,
}

impl Task {
    /// Create a new autonomous task in `Todo` status.
    pub fn new(title: &str, description: &str) -> Self {
        Self {
            id: TaskId::new(),
            title: title.to_string(),
            description: description.to_string(),
            workspace: String::new(),
            agent_id: None,
            status: TaskStatus::Todo,
            priority: Priority::default(),
            due_at: None,
            is_dependency: false,
            blocked_reason: None,
            depends_on: None,
            attempts: 0,
            notes: Vec::new(),
            created_at: Utc::now(),
            started_at: None,
            completed_at: None,
        }
    }

    /// Create a human-gated task. It starts `Blocked` with the given reason.
    pub fn human(title: &str, reason: &str) -> Self {
        let mut task = Self::new(title, reason);
        task.is_dependency = true;
        task.status = TaskStatus::Blocked;
        task.blocked_reason = Some(reason.to_string());
        task
    }

    pub fn in_workspace(mut self, workspace: &str) -> Self {
        self.workspace = workspace.to_string();
        self
    }

    pub fn owned_by(mut self, agent_id: AgentId) -> Self {
        self.agent_id = Some(agent_id);
        self
    }

    pub fn with_priority(mut self, priority: Priority) -> Self {
        self.priority = priority;
        self
    }

    pub fn with_due(mut self, due_at: DateTime<Utc>) -> Self {
        self.due_at = Some(due_at);
        self
    }

    pub fn depending_on(mut self, upstream: TaskId) -> Self {
        self.depends_on = Some(upstream);
        self
    }

    /// Check if the task is in its terminal state.
    pub fn is_done(&self) -> bool {
        self.status == TaskStatus::Done
    }

    /// Human-gated and not yet resolved.
    pub fn awaiting_human(&self) -> bool {
        self.is_dependency && self.status != TaskStatus::Done
    }

    /// Check the status/metadata consistency rules.
    ///
    /// A human-gated task must be `Blocked` with a non-empty reason until it
    /// is resolved, and only a `Blocked` task carries a reason.
    pub fn check_consistency(&self) -> std::result::Result<(), String> {
        if self.awaiting_human() {
            if self.status != TaskStatus::Blocked {
                return Err(format!(
                    "human-gated task {} must be blocked, found {}",
                    self.id.short(),
                    self.status
                ));
            }
            if self.blocked_reason.as_deref().map_or(true, |r| r.trim().is_empty()) {
                return Err(format!(
                    "human-gated task {} has no blocked reason",
                    self.id.short()
                ));
            }
        }
        if self.status != TaskStatus::Blocked && self.blocked_reason.is_some() {
            return Err(format!(
                "task {} carries a blocked reason while {}",
                self.id.short(),
                self.status
            ));
        }
        Ok(())
    }
}
