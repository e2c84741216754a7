//! Task store persisted as a single JSON document.

use std::fs;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tokio::sync::Mutex;
use tracing::debug;

use super::{Scope, StoreState, TaskStore};
use crate::core::{Agent, AgentId, Edge, Task, TaskId};
use crate::error::{Error, Result};
use crate::util::blocking;

/// File name used inside the data directory.
pub const STORE_FILE: &str = "store.json";

/// A [`TaskStore`] backed by `<data_dir>/store.json`.
///
/// Each write applies the change to a copy of the cached state, persists
/// the copy (temp file + rename), and only then replaces the cache.
pub struct JsonFileStore {
    path: PathBuf,
    cache: Mutex<StoreState>,
}

impl JsonFileStore {
    /// Open the store in `data_dir`, creating an empty one if missing.
    pub async fn open(data_dir: &Path) -> Result<Self> {
        let path = data_dir.join(STORE_FILE);
        let dir = data_dir.to_path_buf();
        let read_path = path.clone();
        let state = blocking(move || {
            fs::create_dir_all(&dir)?;
            if !read_path.exists() {
                return Ok(StoreState::default());
            }
            let raw = fs::read_to_string(&read_path)?;
            if raw.trim().is_empty() {
                return Ok(StoreState::default());
            }
            Ok(serde_json::from_str(&raw)?)
        })
        .await?;
        debug!(
            path = %path.display(),
            tasks = state.tasks.len(),
            agents = state.agents.len(),
            "opened json store"
        );
        Ok(Self {
            path,
            cache: Mutex::new(state),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    async fn persist(&self, state: StoreState) -> Result<StoreState> {
        let path = self.path.clone();
        blocking(move || {
            let tmp = path.with_extension("json.tmp");
            fs::write(&tmp, serde_json::to_string_pretty(&state)?)?;
            fs::rename(&tmp, &path)?;
            Ok(state)
        })
        .await
        .map_err(|e| match e {
            Error::Io(io) => Error::StoreUnavailable(io.to_string()),
            other => other,
        })
    }

    async fn write<T>(&self, f: impl FnOnce(&mut StoreState) -> Result<T>) -> Result<T> {
        let mut cache = self.cache.lock().await;
        let mut next = cache.clone();
        let out = f(&mut next)?;
        *cache = self.persist(next).await?;
        Ok(out)
    }

    async fn read<T>(&self, f: impl FnOnce(&StoreState) -> T) -> T {
        let cache = self.cache.lock().await;
        f(&cache)
    }
}

#[async_trait]
impl TaskStore for JsonFileStore {
    async fn create_task(&self, task: &Task) -> Result<()> {
        self.write(|s| s.insert_task(task)).await
    }

    async fn update_task_status(&self, task: &Task) -> Result<()> {
        self.write(|s| s.update_task(task)).await
    }

    async fn get_task(&self, id: &TaskId) -> Result<Option<Task>> {
        Ok(self.read(|s| s.get_task(id)).await)
    }

    async fn list_tasks_by_scope(&self, scope: &Scope) -> Result<Vec<Task>> {
        Ok(self.read(|s| s.tasks_in(scope)).await)
    }

    async fn list_edges_by_scope(&self, scope: &Scope) -> Result<Vec<Edge>> {
        Ok(self.read(|s| s.edges_in(scope)).await)
    }

    async fn create_edge(&self, edge: &Edge) -> Result<()> {
        self.write(|s| s.insert_edge(edge)).await
    }

    async fn delete_task(&self, id: &TaskId) -> Result<()> {
        self.write(|s| s.remove_task(id)).await
    }

    async fn create_agent(&self, agent: &Agent) -> Result<()> {
        self.write(|s| s.insert_agent(agent)).await
    }

    async fn get_agent(&self, id: &AgentId) -> Result<Option<Agent>> {
        Ok(self.read(|s| s.get_agent(id)).await)
    }

    async fn update_agent(&self, agent: &Agent) -> Result<()> {
        self.write(|s| s.update_agent(agent)).await
    }

    async fn list_agents(&self, workspace: Option<&str>) -> Result<Vec<Agent>> {
        Ok(self.read(|s| s.agents_in(workspace)).await)
    }
}
