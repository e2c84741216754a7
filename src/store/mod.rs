//! Task Store collaborator.
//!
//! The engine never owns durability: it reads and writes tasks, edges and
//! agents through the [`TaskStore`] trait. Two implementations ship with
//! the crate: [`MemoryStore`] for tests and embedding, and
//! [`JsonFileStore`] for the CLI.

mod json;
mod memory;

pub use json::JsonFileStore;
pub use memory::MemoryStore;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::core::{Agent, AgentId, Edge, Task, TaskId};
use crate::error::{Error, Result};

/// The set of tasks a graph engine serves.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "kind", content = "id")]
pub enum Scope {
    /// Every task in a workspace, across agents.
    Workspace(String),
    /// Only the tasks owned by one agent.
    Agent(AgentId),
}

impl Scope {
    pub fn workspace(name: &str) -> Self {
        Scope::Workspace(name.to_string())
    }

    pub fn contains(&self, task: &Task) -> bool {
        match self {
            Scope::Workspace(name) => task.workspace == *name,
            Scope::Agent(agent) => task.agent_id.as_ref() == Some(agent),
        }
    }
}

impl std::fmt::Display for Scope {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Scope::Workspace(name) => write!(f, "workspace:{}", name),
            Scope::Agent(agent) => write!(f, "agent:{}", agent.short()),
        }
    }
}

/// Durable record of agents, tasks and explicit dependency edges.
///
/// Implementations report transport or disk failures as
/// [`Error::StoreUnavailable`] and refuse to delete a task that other
/// tasks depend on with [`Error::Structural`].
#[async_trait]
pub trait TaskStore: Send + Sync {
    async fn create_task(&self, task: &Task) -> Result<()>;

    /// Persist the full task record after a status transition.
    async fn update_task_status(&self, task: &Task) -> Result<()>;

    async fn get_task(&self, id: &TaskId) -> Result<Option<Task>>;

    async fn list_tasks_by_scope(&self, scope: &Scope) -> Result<Vec<Task>>;

    async fn list_edges_by_scope(&self, scope: &Scope) -> Result<Vec<Edge>>;

    async fn create_edge(&self, edge: &Edge) -> Result<()>;

    async fn delete_task(&self, id: &TaskId) -> Result<()>;

    async fn create_agent(&self, agent: &Agent) -> Result<()>;

    async fn get_agent(&self, id: &AgentId) -> Result<Option<Agent>>;

    async fn update_agent(&self, agent: &Agent) -> Result<()>;

    async fn list_agents(&self, workspace: Option<&str>) -> Result<Vec<Agent>>;
}

/// Plain-data contents of a store, shared by the bundled implementations.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StoreState {
    #[serde(default)]
    pub agents: Vec<Agent>,
    #[serde(default)]
    pub tasks: Vec<Task>,
    #[serde(default)]
    pub edges: Vec<Edge>,
}

impl StoreState {
    pub fn insert_task(&mut self, task: &Task) -> Result<()> {
        if self.tasks.iter().any(|t| t.id == task.id) {
            return Err(Error::Validation(format!("task {} already exists", task.id)));
        }
        self.tasks.push(task.clone());
        Ok(())
    }

    pub fn update_task(&mut self, task: &Task) -> Result<()> {
        let slot = self
            .tasks
            .iter_mut()
            .find(|t| t.id == task.id)
            .ok_or(Error::TaskNotFound(task.id))?;
        *slot = task.clone();
        Ok(())
    }

    pub fn get_task(&self, id: &TaskId) -> Option<Task> {
        self.tasks.iter().find(|t| t.id == *id).cloned()
    }

    pub fn tasks_in(&self, scope: &Scope) -> Vec<Task> {
        self.tasks
            .iter()
            .filter(|t| scope.contains(t))
            .cloned()
            .collect()
    }

    /// Edges touching at least one task of the scope.
    pub fn edges_in(&self, scope: &Scope) -> Vec<Edge> {
        let in_scope = |id: &TaskId| {
            self.tasks
                .iter()
                .any(|t| t.id == *id && scope.contains(t))
        };
        self.edges
            .iter()
            .filter(|e| in_scope(&e.source) || in_scope(&e.target))
            .copied()
            .collect()
    }

    pub fn insert_edge(&mut self, edge: &Edge) -> Result<()> {
        for id in [edge.source, edge.target] {
            if !self.tasks.iter().any(|t| t.id == id) {
                return Err(Error::TaskNotFound(id));
            }
        }
        if self
            .edges
            .iter()
            .any(|e| e.source == edge.source && e.target == edge.target)
        {
            return Err(Error::Structural(format!(
                "edge {} -> {} already exists",
                edge.source.short(),
                edge.target.short()
            )));
        }
        self.edges.push(*edge);
        Ok(())
    }

    /// Remove a task nothing depends on, along with its incoming edges.
    pub fn remove_task(&mut self, id: &TaskId) -> Result<()> {
        if !self.tasks.iter().any(|t| t.id == *id) {
            return Err(Error::TaskNotFound(*id));
        }
        let has_dependents = self.edges.iter().any(|e| e.source == *id)
            || self.tasks.iter().any(|t| t.depends_on == Some(*id));
        if has_dependents {
            return Err(Error::Structural(format!(
                "task {} has dependent tasks",
                id
            )));
        }
        self.tasks.retain(|t| t.id != *id);
        self.edges.retain(|e| e.target != *id);
        Ok(())
    }

    pub fn insert_agent(&mut self, agent: &Agent) -> Result<()> {
        if self.agents.iter().any(|a| a.id == agent.id) {
            return Err(Error::Validation(format!(
                "agent {} already exists",
                agent.id
            )));
        }
        self.agents.push(agent.clone());
        Ok(())
    }

    pub fn update_agent(&mut self, agent: &Agent) -> Result<()> {
        let slot = self
            .agents
            .iter_mut()
            .find(|a| a.id == agent.id)
            .ok_or(Error::AgentNotFound(agent.id))?;
        *slot = agent.clone();
        Ok(())
    }

    pub fn get_agent(&self, id: &AgentId) -> Option<Agent> {
        self.agents.iter().find(|a| a.id == *id).cloned()
    }

    pub fn agents_in(&self, workspace: Option<&str>) -> Vec<Agent> {
        self.agents
            .iter()
            .filter(|a| workspace.map_or(true, |w| a.workspace == w))
            .cloned()
            .collect()
    }
}
