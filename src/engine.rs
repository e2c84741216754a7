//! Dependency graph engine.
//!
//! A `GraphEngine` serves one [`Scope`]: it mirrors the scope's tasks and
//! edges in a [`TaskGraph`], validates structural changes against it, and
//! drives status transitions through the lifecycle state machine.
//!
//! All mutations for a scope run under one async mutex, held across the
//! store write, so two cycle checks can never both pass against a stale
//! edge set. Every mutation writes to the store first and only then
//! updates the in-memory graph and emits notifications.
//!
//! Upstream tasks of other scopes that a task here waits on are loaded as
//! read-only external nodes and re-read from the store whenever the
//! readiness of their dependents is decided.

use std::collections::HashSet;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::core::{
    Agent, AgentId, AgentStatus, Edge, EdgeCheck, EdgeKind, GraphMetrics, Guard, Task, TaskEvent,
    TaskGraph, TaskId, TaskStatus, TaskSummary, Transition,
};
use crate::error::{Error, Result};
use crate::notify::{Notification, NotificationKind, NotificationSink};
use crate::store::{Scope, TaskStore};

/// The nodes and edges of a scope after a load.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GraphSnapshot {
    pub nodes: Vec<Task>,
    pub edges: Vec<Edge>,
}

/// Effect of a readiness recomputation on one task.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Readiness {
    Unchanged,
    BecameReady,
    BecameBlocked,
}

/// A task that reached `done`, plus the dependents it unblocked.
#[derive(Debug, Clone, PartialEq)]
pub struct Completion {
    pub task: Task,
    pub newly_ready: Vec<TaskId>,
}

/// Result of a human resolution signal.
#[derive(Debug, Clone, PartialEq)]
pub enum ResolveOutcome {
    Resolved(Completion),
    /// The task was already done; nothing changed.
    AlreadyDone,
}

pub struct GraphEngine {
    scope: Scope,
    store: Arc<dyn TaskStore>,
    sink: Arc<dyn NotificationSink>,
    graph: Mutex<TaskGraph>,
}

impl GraphEngine {
    /// Create an engine with an empty graph. Call [`Self::load`] to fill it.
    pub fn new(scope: Scope, store: Arc<dyn TaskStore>, sink: Arc<dyn NotificationSink>) -> Self {
        Self {
            scope,
            store,
            sink,
            graph: Mutex::new(TaskGraph::new()),
        }
    }

    pub fn scope(&self) -> &Scope {
        &self.scope
    }

    pub fn store(&self) -> &Arc<dyn TaskStore> {
        &self.store
    }

    pub fn sink(&self) -> &Arc<dyn NotificationSink> {
        &self.sink
    }

    /// Rebuild the in-memory graph from the store.
    ///
    /// Edges into the scope from another scope's tasks are kept, with
    /// their upstream tasks loaded as external nodes. On a store failure
    /// the previous graph is kept and the error returned.
    pub async fn load(&self) -> Result<GraphSnapshot> {
        let mut graph = self.graph.lock().await;
        let tasks = self.store.list_tasks_by_scope(&self.scope).await?;
        let in_scope: HashSet<TaskId> = tasks.iter().map(|t| t.id).collect();
        let edges: Vec<Edge> = self
            .store
            .list_edges_by_scope(&self.scope)
            .await?
            .into_iter()
            .filter(|e| in_scope.contains(&e.target))
            .collect();

        let upstream: Vec<TaskId> = edges
            .iter()
            .map(|e| e.source)
            .chain(tasks.iter().filter_map(|t| t.depends_on))
            .filter(|id| !in_scope.contains(id))
            .collect();
        let mut seen = HashSet::new();
        let mut external = Vec::new();
        for id in upstream {
            if !seen.insert(id) {
                continue;
            }
            if let Some(task) = self.store.get_task(&id).await? {
                external.push(task);
            }
        }

        let (rebuilt, skipped) = TaskGraph::build(tasks, external, edges);
        for reason in &skipped {
            warn!(scope = %self.scope, "skipping edge on load: {}", reason);
        }
        info!(
            scope = %self.scope,
            tasks = in_scope.len(),
            external = rebuilt.task_count() - in_scope.len(),
            edges = rebuilt.edge_count(),
            "graph loaded"
        );
        *graph = rebuilt;

        Ok(GraphSnapshot {
            nodes: graph.all_tasks().into_iter().cloned().collect(),
            edges: graph.edges(),
        })
    }

    /// Persist a new task and add it to the graph.
    ///
    /// A `depends_on` upstream must be in the graph or, for another scope's
    /// task, in the store. The task is written once, already blocked when
    /// its upstream is not done, and the derived finish-to-start edge is
    /// added. Human-gated tasks raise a `HumanInputRequired` notification
    /// and block their idle agent.
    pub async fn register_task(&self, mut task: Task) -> Result<Task> {
        if !self.scope.contains(&task) {
            return Err(Error::Validation(format!(
                "task {} is outside {}",
                task.id, self.scope
            )));
        }
        task.check_consistency().map_err(Error::Validation)?;

        let mut graph = self.graph.lock().await;
        if graph.contains_task(&task.id) {
            return Err(Error::Structural(format!("task {} already exists", task.id)));
        }
        let mut pulled = None;
        if let Some(upstream) = task.depends_on {
            if self.ensure_upstream_locked(&mut graph, &upstream).await? {
                pulled = Some(upstream);
            } else {
                self.refresh_external_task_locked(&mut graph, &upstream).await?;
            }
        }

        let unmet = task
            .depends_on
            .and_then(|u| graph.task(&u))
            .map_or(0, |u| usize::from(!u.is_done()));
        if !task.is_dependency {
            match task.status {
                TaskStatus::Todo if unmet > 0 => {
                    let reason = TaskGraph::waiting_reason(unmet);
                    task.apply(TaskEvent::PrerequisiteUnmet { reason }, Guard::with_unmet(unmet))?;
                }
                TaskStatus::Blocked if unmet == 0 => {
                    task.apply(TaskEvent::Unblock, Guard::clear())?;
                }
                _ => {}
            }
        }

        if let Err(e) = self.store.create_task(&task).await {
            if let Some(upstream) = pulled {
                let _ = graph.remove_task(&upstream);
            }
            return Err(e);
        }
        let id = task.id;
        graph.add_task(task.clone());
        if let Some(upstream) = task.depends_on {
            graph.add_edge(&upstream, &id, EdgeKind::FinishToStart)?;
        }
        debug!(task = %id.short(), title = %task.title, status = %task.status, "task registered");
        self.notify(NotificationKind::TaskCreated, &task, format!("created '{}'", task.title));

        if task.is_dependency {
            self.notify_human_required(&task);
            self.block_agent_locked(&graph, &task).await;
        } else if task.status == TaskStatus::Blocked {
            let reason = task.blocked_reason.clone().unwrap_or_default();
            self.notify(NotificationKind::TaskBlocked, &task, reason);
        }

        Ok(task)
    }

    /// Check whether `source -> target` may be added. Never mutates.
    pub async fn can_add_edge(&self, source: &TaskId, target: &TaskId) -> EdgeCheck {
        self.graph.lock().await.can_add_edge(source, target)
    }

    /// Validate, persist and add an edge, then recompute the target's readiness.
    ///
    /// The source may be a task of another scope; the target must belong
    /// to this one.
    pub async fn add_edge(
        &self,
        source: &TaskId,
        target: &TaskId,
        kind: EdgeKind,
    ) -> Result<Readiness> {
        let mut graph = self.graph.lock().await;
        if !graph.contains_task(target) {
            return Err(Error::Structural(format!("unknown task {}", target)));
        }
        self.ensure_in_scope(&graph, target)?;
        let pulled = self.ensure_upstream_locked(&mut graph, source).await?;

        let check = graph.can_add_edge(source, target);
        if !check.allowed {
            let reason = check.reason.unwrap_or_else(|| "edge rejected".to_string());
            debug!(source = %source.short(), target = %target.short(), "edge rejected: {}", reason);
            return Err(Error::Structural(reason));
        }

        if let Err(e) = self
            .store
            .create_edge(&Edge::new(*source, *target, kind))
            .await
        {
            if pulled {
                let _ = graph.remove_task(source);
            }
            return Err(e);
        }
        graph.add_edge(source, target, kind)?;
        debug!(source = %source.short(), target = %target.short(), kind = %kind, "edge added");

        self.recompute_locked(&mut graph, target).await
    }

    /// Bring one task's blocked/ready status in line with its blockers.
    ///
    /// Idempotent: when nothing changes, nothing is written or emitted.
    pub async fn recompute_readiness(&self, id: &TaskId) -> Result<Readiness> {
        let mut graph = self.graph.lock().await;
        if !graph.contains_task(id) {
            return Err(Error::TaskNotFound(*id));
        }
        self.recompute_locked(&mut graph, id).await
    }

    /// `todo -> in_progress`.
    pub async fn start_task(&self, id: &TaskId) -> Result<Task> {
        let mut graph = self.graph.lock().await;
        let (task, _) = self
            .transition_locked(&mut graph, id, TaskEvent::Start, |_| {})
            .await?;
        self.notify(NotificationKind::TaskStarted, &task, format!("started '{}'", task.title));
        Ok(task)
    }

    /// Emit a progress event for a task without changing it.
    pub async fn report_progress(&self, id: &TaskId, message: &str) -> Result<()> {
        let task = self.task(id).await.ok_or(Error::TaskNotFound(*id))?;
        self.notify(NotificationKind::TaskProgress, &task, message.to_string());
        Ok(())
    }

    /// `in_progress -> done`, then recompute readiness of every dependent.
    pub async fn complete_task(&self, id: &TaskId, notes: Option<String>) -> Result<Completion> {
        let mut graph = self.graph.lock().await;
        let (task, _) = self
            .transition_locked(&mut graph, id, TaskEvent::Finish { notes }, |_| {})
            .await?;
        self.notify(
            NotificationKind::TaskCompleted,
            &task,
            format!("completed '{}'", task.title),
        );
        let newly_ready = self.unblock_dependents_locked(&mut graph, id).await?;
        Ok(Completion { task, newly_ready })
    }

    /// `in_progress -> todo`.
    ///
    /// With a `failure`, the attempt counter is bumped and a `TaskFailed`
    /// event carries the reason; otherwise a `TaskCancelled` event is sent.
    pub async fn cancel_task(&self, id: &TaskId, failure: Option<String>) -> Result<Task> {
        let mut graph = self.graph.lock().await;
        let failed = failure.is_some();
        let (task, _) = self
            .transition_locked(&mut graph, id, TaskEvent::Cancel, |t| {
                if failed {
                    t.attempts += 1;
                }
            })
            .await?;
        match failure {
            Some(reason) => self.notify_failed(&task, reason),
            None => self.notify(
                NotificationKind::TaskCancelled,
                &task,
                format!("cancelled '{}'", task.title),
            ),
        }
        Ok(task)
    }

    /// Mark a `todo` or `blocked` task as needing a human.
    pub async fn require_human(&self, id: &TaskId, reason: &str) -> Result<Task> {
        let mut graph = self.graph.lock().await;
        let event = TaskEvent::RequireHuman {
            reason: reason.to_string(),
        };
        let (task, _) = self.transition_locked(&mut graph, id, event, |_| {}).await?;
        self.notify_human_required(&task);
        self.block_agent_locked(&graph, &task).await;
        Ok(task)
    }

    /// Human resolution of a gated task: `blocked -> done`.
    ///
    /// Resolving a task that is already done is a no-op.
    pub async fn resolve(&self, id: &TaskId) -> Result<ResolveOutcome> {
        let mut graph = self.graph.lock().await;
        self.ensure_in_scope(&graph, id)?;
        let task = graph.task(id).ok_or(Error::TaskNotFound(*id))?;
        if task.is_done() {
            debug!(task = %id.short(), "resolve on done task ignored");
            return Ok(ResolveOutcome::AlreadyDone);
        }

        let (task, _) = self
            .transition_locked(&mut graph, id, TaskEvent::Resolve, |_| {})
            .await?;
        self.notify(
            NotificationKind::HumanResolved,
            &task,
            format!("'{}' resolved by a human", task.title),
        );
        let newly_ready = self.unblock_dependents_locked(&mut graph, id).await?;
        Ok(ResolveOutcome::Resolved(Completion { task, newly_ready }))
    }

    /// Delete a task that no other task depends on.
    pub async fn delete_task(&self, id: &TaskId) -> Result<Task> {
        let mut graph = self.graph.lock().await;
        if !graph.contains_task(id) {
            return Err(Error::TaskNotFound(*id));
        }
        self.ensure_in_scope(&graph, id)?;
        let dependents = graph.dependents(id);
        if !dependents.is_empty() {
            return Err(Error::Structural(format!(
                "task {} has {} dependent task(s)",
                id,
                dependents.len()
            )));
        }

        self.store.delete_task(id).await?;
        let removed = graph.remove_task(id)?;
        info!(task = %id.short(), "task deleted");
        Ok(removed)
    }

    /// Bring an agent's tasks back in line after an interrupted run.
    ///
    /// Tasks left `in_progress` return to `todo` with one more attempt, and
    /// every other task of the agent is recomputed against its blockers.
    /// Only call this while nothing is executing the agent's tasks.
    /// Returns the released tasks.
    pub async fn recover_agent(&self, agent: &AgentId) -> Result<Vec<TaskId>> {
        let mut graph = self.graph.lock().await;
        let tasks: Vec<(TaskId, TaskStatus)> = graph
            .tasks_for_agent(agent)
            .into_iter()
            .map(|t| (t.id, t.status))
            .collect();

        let mut released = Vec::new();
        for (id, status) in &tasks {
            if *status != TaskStatus::InProgress {
                continue;
            }
            let (task, _) = self
                .transition_locked(&mut graph, id, TaskEvent::Cancel, |t| t.attempts += 1)
                .await?;
            warn!(task = %id.short(), attempts = task.attempts, "released task left in progress");
            self.notify_failed(&task, "interrupted before completion".to_string());
            released.push(*id);
        }
        for (id, _) in &tasks {
            self.recompute_locked(&mut graph, id).await?;
        }
        Ok(released)
    }

    /// Persist an agent status change and announce it. Returns `false`
    /// when the agent already had `status`.
    pub async fn set_agent_status(&self, agent: &mut Agent, status: AgentStatus) -> Result<bool> {
        if agent.status == status {
            return Ok(false);
        }
        let from = agent.status;
        let mut updated = agent.clone();
        updated.set_status(status);
        self.store.update_agent(&updated).await?;
        *agent = updated;

        info!(agent = %agent.id.short(), from = %from, to = %status, "agent status changed");
        self.sink.emit(
            Notification::new(
                NotificationKind::AgentStatusChanged,
                format!("agent is now {}", status),
            )
            .agent(Some(agent.id))
            .metadata(serde_json::json!({ "from": from, "to": status })),
        );
        Ok(true)
    }

    pub async fn critical_path(&self) -> Vec<TaskId> {
        self.graph.lock().await.critical_path()
    }

    pub async fn metrics(&self) -> GraphMetrics {
        self.graph.lock().await.metrics()
    }

    /// A consistent copy of the graph for read-only queries.
    pub async fn snapshot(&self) -> TaskGraph {
        self.graph.lock().await.clone()
    }

    pub async fn task(&self, id: &TaskId) -> Option<Task> {
        self.graph.lock().await.task(id).cloned()
    }

    pub async fn tasks_for_agent(&self, agent: &AgentId) -> Vec<Task> {
        self.graph
            .lock()
            .await
            .tasks_for_agent(agent)
            .into_iter()
            .cloned()
            .collect()
    }

    pub async fn ready_tasks(&self, agent: Option<&AgentId>) -> Vec<Task> {
        self.graph
            .lock()
            .await
            .ready_tasks(agent)
            .into_iter()
            .cloned()
            .collect()
    }

    pub async fn summary_for_agent(&self, agent: &AgentId) -> TaskSummary {
        self.graph.lock().await.summary_for_agent(agent)
    }

    pub async fn topological_order(&self) -> Result<Vec<Task>> {
        Ok(self
            .graph
            .lock()
            .await
            .topological_order()?
            .into_iter()
            .cloned()
            .collect())
    }

    /// Apply a lifecycle event: check the guard, write the store, then
    /// reflect the change in the graph.
    async fn transition_locked(
        &self,
        graph: &mut TaskGraph,
        id: &TaskId,
        event: TaskEvent,
        adjust: impl FnOnce(&mut Task),
    ) -> Result<(Task, Transition)> {
        self.ensure_in_scope(graph, id)?;
        self.refresh_external_locked(graph, id).await?;
        let current = graph.task(id).ok_or(Error::TaskNotFound(*id))?;
        let mut next = current.clone();
        let transition = next.apply(event, graph.guard_for(id))?;
        adjust(&mut next);

        self.store.update_task_status(&next).await?;
        graph.replace_task(next.clone())?;
        debug!(
            task = %id.short(),
            from = %transition.from,
            to = %transition.to,
            "task transition"
        );
        Ok((next, transition))
    }

    async fn recompute_locked(&self, graph: &mut TaskGraph, id: &TaskId) -> Result<Readiness> {
        if graph.is_external(id) {
            return Ok(Readiness::Unchanged);
        }
        self.refresh_external_locked(graph, id).await?;
        let Some(event) = graph.readiness_event(id) else {
            return Ok(Readiness::Unchanged);
        };

        let (task, transition) = self.transition_locked(graph, id, event, |_| {}).await?;
        if transition.to == TaskStatus::Blocked {
            let reason = task.blocked_reason.clone().unwrap_or_default();
            self.notify(NotificationKind::TaskBlocked, &task, reason);
            Ok(Readiness::BecameBlocked)
        } else {
            self.notify(
                NotificationKind::TaskUnblocked,
                &task,
                format!("'{}' is ready", task.title),
            );
            Ok(Readiness::BecameReady)
        }
    }

    async fn unblock_dependents_locked(
        &self,
        graph: &mut TaskGraph,
        id: &TaskId,
    ) -> Result<Vec<TaskId>> {
        let mut newly_ready = Vec::new();
        for dependent in graph.dependents(id) {
            if self.recompute_locked(graph, &dependent).await? == Readiness::BecameReady {
                newly_ready.push(dependent);
            }
        }
        Ok(newly_ready)
    }

    fn ensure_in_scope(&self, graph: &TaskGraph, id: &TaskId) -> Result<()> {
        if graph.is_external(id) {
            return Err(Error::Validation(format!(
                "task {} is outside {}",
                id, self.scope
            )));
        }
        Ok(())
    }

    /// Make sure `id` is in the graph, pulling another scope's task in as
    /// an external node. Returns whether it was pulled in.
    async fn ensure_upstream_locked(&self, graph: &mut TaskGraph, id: &TaskId) -> Result<bool> {
        if graph.contains_task(id) {
            return Ok(false);
        }
        match self.store.get_task(id).await? {
            Some(task) if !self.scope.contains(&task) => {
                debug!(task = %id.short(), scope = %self.scope, "external upstream task added");
                graph.add_external(task);
                Ok(true)
            }
            _ => Err(Error::Structural(format!("unknown task {}", id))),
        }
    }

    /// Re-read the external blockers of `id` from the store.
    async fn refresh_external_locked(&self, graph: &mut TaskGraph, id: &TaskId) -> Result<()> {
        for upstream in graph.external_blockers(id) {
            self.refresh_external_task_locked(graph, &upstream).await?;
        }
        Ok(())
    }

    async fn refresh_external_task_locked(&self, graph: &mut TaskGraph, id: &TaskId) -> Result<()> {
        if !graph.is_external(id) {
            return Ok(());
        }
        if let Some(task) = self.store.get_task(id).await? {
            graph.replace_task(task)?;
        }
        Ok(())
    }

    /// A human-gated task just became blocked: its agent is blocked too,
    /// unless another of its tasks is in progress or the agent is paused.
    /// The agent status is re-derived on every drive, so a failed write
    /// here is only logged.
    async fn block_agent_locked(&self, graph: &TaskGraph, task: &Task) {
        let Some(agent_id) = task.agent_id else {
            return;
        };
        if graph.summary_for_agent(&agent_id).in_progress > 0 {
            return;
        }
        let result = match self.store.get_agent(&agent_id).await {
            Ok(Some(mut agent)) if agent.status != AgentStatus::Paused => self
                .set_agent_status(&mut agent, AgentStatus::Blocked)
                .await
                .map(|_| ()),
            Ok(_) => Ok(()),
            Err(e) => Err(e),
        };
        if let Err(e) = result {
            warn!(agent = %agent_id.short(), error = %e, "could not mark agent blocked");
        }
    }

    fn notification(&self, kind: NotificationKind, task: &Task, message: String) -> Notification {
        Notification::new(kind, message)
            .agent(task.agent_id)
            .task(task.id)
            .metadata(serde_json::json!({
                "status": task.status,
                "workspace": task.workspace,
            }))
    }

    fn notify(&self, kind: NotificationKind, task: &Task, message: String) {
        self.sink.emit(self.notification(kind, task, message));
    }

    fn notify_failed(&self, task: &Task, reason: String) {
        self.sink.emit(
            self.notification(NotificationKind::TaskFailed, task, reason.clone())
                .metadata(serde_json::json!({
                    "attempts": task.attempts,
                    "error": reason,
                })),
        );
    }

    fn notify_human_required(&self, task: &Task) {
        let reason = task.blocked_reason.clone().unwrap_or_default();
        self.sink.emit(
            self.notification(NotificationKind::HumanInputRequired, task, reason.clone())
                .metadata(serde_json::json!({
                    "title": task.title,
                    "reason": reason,
                })),
        );
    }
}

impl std::fmt::Debug for GraphEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GraphEngine")
            .field("scope", &self.scope)
            .finish()
    }
}
