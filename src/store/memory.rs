//! In-process task store.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;

use super::{Scope, StoreState, TaskStore};
use crate::core::{Agent, AgentId, Edge, Task, TaskId};
use crate::error::{Error, Result};

/// A [`TaskStore`] kept in memory.
///
/// Can be switched offline to exercise store-failure paths, and counts
/// task writes so callers can check that no-op recomputations stay silent.
#[derive(Debug)]
pub struct MemoryStore {
    state: Mutex<StoreState>,
    available: AtomicBool,
    task_writes: AtomicUsize,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::with_state(StoreState::default())
    }

    pub fn with_state(state: StoreState) -> Self {
        Self {
            state: Mutex::new(state),
            available: AtomicBool::new(true),
            task_writes: AtomicUsize::new(0),
        }
    }

    /// Simulate the store going offline (`false`) or coming back (`true`).
    pub fn set_available(&self, available: bool) {
        self.available.store(available, Ordering::SeqCst);
    }

    /// Number of successful task create/update/delete calls.
    pub fn task_writes(&self) -> usize {
        self.task_writes.load(Ordering::SeqCst)
    }

    /// Copy of the current contents.
    pub fn snapshot(&self) -> StoreState {
        self.state
            .lock()
            .map(|s| s.clone())
            .unwrap_or_default()
    }

    fn with<T>(&self, f: impl FnOnce(&mut StoreState) -> Result<T>) -> Result<T> {
        if !self.available.load(Ordering::SeqCst) {
            return Err(Error::StoreUnavailable("memory store is offline".to_string()));
        }
        let mut state = self
            .state
            .lock()
            .map_err(|_| Error::StoreUnavailable("memory store lock poisoned".to_string()))?;
        f(&mut state)
    }

    fn write_task<T>(&self, f: impl FnOnce(&mut StoreState) -> Result<T>) -> Result<T> {
        let out = self.with(f)?;
        self.task_writes.fetch_add(1, Ordering::SeqCst);
        Ok(out)
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl TaskStore for MemoryStore {
    async fn create_task(&self, task: &Task) -> Result<()> {
        self.write_task(|s| s.insert_task(task))
    }

    async fn update_task_status(&self, task: &Task) -> Result<()> {
        self.write_task(|s| s.update_task(task))
    }

    async fn get_task(&self, id: &TaskId) -> Result<Option<Task>> {
        self.with(|s| Ok(s.get_task(id)))
    }

    async fn list_tasks_by_scope(&self, scope: &Scope) -> Result<Vec<Task>> {
        self.with(|s| Ok(s.tasks_in(scope)))
    }

    async fn list_edges_by_scope(&self, scope: &Scope) -> Result<Vec<Edge>> {
        self.with(|s| Ok(s.edges_in(scope)))
    }

    async fn create_edge(&self, edge: &Edge) -> Result<()> {
        self.with(|s| s.insert_edge(edge))
    }

    async fn delete_task(&self, id: &TaskId) -> Result<()> {
        self.write_task(|s| s.remove_task(id))
    }

    async fn create_agent(&self, agent: &Agent) -> Result<()> {
        self.with(|s| s.insert_agent(agent))
    }

    async fn get_agent(&self, id: &AgentId) -> Result<Option<Agent>> {
        self.with(|s| Ok(s.get_agent(id)))
    }

    async fn update_agent(&self, agent: &Agent) -> Result<()> {
        self.with(|s| s.update_agent(agent))
    }

    async fn list_agents(&self, workspace: Option<&str>) -> Result<Vec<Agent>> {
        self.with(|s| Ok(s.agents_in(workspace)))
    }
}
