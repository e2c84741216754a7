//! Agent orchestrator.
//!
//! Turns a goal into a task set through a [`DecompositionProvider`], then
//! drives the agent's autonomous tasks through a [`WorkExecutor`] one at a
//! time. Human-gated tasks stay parked until [`Orchestrator::resolve`] is
//! called, after which the agent resumes on its own.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::{DateTime, Utc};
use futures::future::join_all;
use tracing::{debug, info, warn};

use super::decompose::{fallback_plan, validate_plan, CandidateTask, DecompositionProvider};
use super::executor::{WorkExecutor, WorkOutcome};
use crate::core::{Agent, AgentId, AgentStatus, EdgeKind, Priority, Task, TaskId, TaskStatus};
use crate::engine::{GraphEngine, ResolveOutcome};
use crate::error::{Error, Result};
use crate::notify::{Notification, NotificationKind};
use crate::store::Scope;
use crate::util::with_timeout;

/// Default time allowed for goal decomposition.
pub const DEFAULT_DECOMPOSE_TIMEOUT: Duration = Duration::from_secs(30);

/// A task created directly by a human for an existing agent.
#[derive(Debug, Clone, Default)]
pub struct NewTask {
    pub title: String,
    pub description: String,
    /// Set to make the task human-gated.
    pub human_reason: Option<String>,
    pub priority: Priority,
    pub due_at: Option<DateTime<Utc>>,
    pub depends_on: Option<TaskId>,
}

impl NewTask {
    pub fn new(title: &str) -> Self {
        Self {
            title: title.to_string(),
            ..Self::default()
        }
    }
}

/// An agent and the tasks its goal was decomposed into.
#[derive(Debug, Clone)]
pub struct AgentPlan {
    pub agent: Agent,
    pub tasks: Vec<Task>,
    /// The decomposition provider failed and the fixed plan was used.
    pub used_fallback: bool,
}

/// What one pass of the drive loop did.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DriveReport {
    pub completed: Vec<TaskId>,
    /// Tasks the executor handed to a human.
    pub escalated: Vec<TaskId>,
    /// Task whose execution failed; the loop stopped there.
    pub failed: Option<TaskId>,
    pub status: AgentStatus,
}

impl DriveReport {
    fn record(&mut self, id: TaskId, run: TaskRun) {
        match run {
            TaskRun::Completed => self.completed.push(id),
            TaskRun::Escalated => self.escalated.push(id),
            TaskRun::Failed => self.failed = Some(id),
        }
    }

    fn merge(&mut self, other: DriveReport) {
        self.completed.extend(other.completed);
        self.escalated.extend(other.escalated);
        if other.failed.is_some() {
            self.failed = other.failed;
        }
        self.status = other.status;
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum TaskRun {
    Completed,
    Escalated,
    Failed,
}

pub struct Orchestrator {
    engine: Arc<GraphEngine>,
    decomposer: Arc<dyn DecompositionProvider>,
    executor: Arc<dyn WorkExecutor>,
    decompose_timeout: Duration,
    /// One lock per agent; held while that agent's tasks are being run.
    drive_locks: Mutex<HashMap<AgentId, Arc<tokio::sync::Mutex<()>>>>,
}

impl Orchestrator {
    /// Create an orchestrator over a workspace-scoped engine.
    pub fn new(
        engine: Arc<GraphEngine>,
        decomposer: Arc<dyn DecompositionProvider>,
        executor: Arc<dyn WorkExecutor>,
    ) -> Result<Self> {
        if !matches!(engine.scope(), Scope::Workspace(_)) {
            return Err(Error::Validation(format!(
                "orchestrator needs a workspace scope, got {}",
                engine.scope()
            )));
        }
        Ok(Self {
            engine,
            decomposer,
            executor,
            decompose_timeout: DEFAULT_DECOMPOSE_TIMEOUT,
            drive_locks: Mutex::new(HashMap::new()),
        })
    }

    pub fn with_decompose_timeout(mut self, timeout: Duration) -> Self {
        self.decompose_timeout = timeout;
        self
    }

    pub fn engine(&self) -> &Arc<GraphEngine> {
        &self.engine
    }

    fn workspace(&self) -> &str {
        match self.engine.scope() {
            Scope::Workspace(name) => name.as_str(),
            Scope::Agent(_) => "",
        }
    }

    pub async fn agent(&self, id: &AgentId) -> Result<Agent> {
        self.engine
            .store()
            .get_agent(id)
            .await?
            .ok_or(Error::AgentNotFound(*id))
    }

    pub async fn agents(&self) -> Result<Vec<Agent>> {
        self.engine.store().list_agents(Some(self.workspace())).await
    }

    /// Create an agent for `goal` and register its decomposed task set.
    ///
    /// A failing or slow decomposition provider never fails this call:
    /// the fixed fallback plan is used instead.
    pub async fn create_agent(&self, goal: &str) -> Result<AgentPlan> {
        let agent = Agent::new(goal, self.workspace());
        self.engine.store().create_agent(&agent).await?;
        info!(agent = %agent.id.short(), goal = %goal, "agent created");
        self.emit(
            Notification::new(NotificationKind::AgentStarted, format!("agent started: {}", goal))
                .agent(Some(agent.id)),
        );

        let (plan, used_fallback) = match self.decompose(goal).await {
            Ok(plan) => (plan, false),
            Err(e) => {
                warn!(
                    agent = %agent.id.short(),
                    error = %e,
                    "decomposition failed, using fallback plan"
                );
                self.emit(
                    Notification::new(
                        NotificationKind::DecompositionFallback,
                        format!("decomposition failed: {}", e),
                    )
                    .agent(Some(agent.id)),
                );
                (fallback_plan(goal), true)
            }
        };

        let tasks = self.register_plan(&agent, &plan).await?;
        self.refresh_status(&agent.id).await?;
        let agent = self.agent(&agent.id).await?;
        Ok(AgentPlan {
            agent,
            tasks,
            used_fallback,
        })
    }

    /// Create an agent and drive its autonomous tasks as far as they go.
    pub async fn start_agent(&self, goal: &str) -> Result<(AgentPlan, DriveReport)> {
        let plan = self.create_agent(goal).await?;
        let report = self.drive_agent(&plan.agent.id).await?;
        Ok((plan, report))
    }

    async fn decompose(&self, goal: &str) -> Result<Vec<CandidateTask>> {
        let plan = with_timeout(self.decompose_timeout, self.decomposer.decompose(goal))
            .await
            .map_err(|e| match e {
                Error::Decomposition(_) => e,
                other => Error::Decomposition(other.to_string()),
            })?;
        validate_plan(&plan)?;
        Ok(plan)
    }

    async fn register_plan(&self, agent: &Agent, plan: &[CandidateTask]) -> Result<Vec<Task>> {
        let mut ids: Vec<TaskId> = Vec::with_capacity(plan.len());
        let mut tasks = Vec::with_capacity(plan.len());

        for candidate in plan {
            let mut task = match &candidate.blocked_reason {
                Some(reason) if candidate.needs_human => Task::human(&candidate.title, reason),
                _ => Task::new(&candidate.title, ""),
            };
            task.description = candidate.description.clone();
            let mut task = task
                .in_workspace(&agent.workspace)
                .owned_by(agent.id)
                .with_priority(candidate.priority);

            let mut upstream = candidate.depends_on.iter().filter_map(|&i| ids.get(i).copied());
            if let Some(first) = upstream.next() {
                task = task.depending_on(first);
            }
            let extra: Vec<TaskId> = upstream.collect();

            let task = self.engine.register_task(task).await?;
            for source in extra {
                self.engine
                    .add_edge(&source, &task.id, EdgeKind::FinishToStart)
                    .await?;
            }
            ids.push(task.id);
            tasks.push(task);
        }

        debug!(agent = %agent.id.short(), tasks = tasks.len(), "plan registered");
        Ok(tasks)
    }

    /// Run ready autonomous tasks of `agent_id` one by one until none is
    /// left, the agent is paused, or a task fails.
    ///
    /// Tasks an earlier, interrupted drive left `in_progress` are released
    /// back to `todo` first; under the drive lock nothing else can be
    /// running them.
    pub async fn drive_agent(&self, agent_id: &AgentId) -> Result<DriveReport> {
        let lock = self.drive_lock(agent_id);
        let _guard = lock.lock().await;

        let released = self.engine.recover_agent(agent_id).await?;
        if !released.is_empty() {
            info!(
                agent = %agent_id.short(),
                released = released.len(),
                "released interrupted tasks"
            );
        }

        let mut report = DriveReport::default();
        loop {
            let agent = self.agent(agent_id).await?;
            if agent.is_paused() {
                debug!(agent = %agent_id.short(), "agent paused, not advancing");
                break;
            }
            let next = self
                .engine
                .ready_tasks(Some(agent_id))
                .await
                .into_iter()
                .find(|t| !t.is_dependency);
            let Some(task) = next else {
                break;
            };

            let run = self.run_task(&task).await?;
            report.record(task.id, run);
            if run == TaskRun::Failed {
                break;
            }
        }

        report.status = self.refresh_status(agent_id).await?;
        Ok(report)
    }

    /// Drive every agent of the workspace concurrently.
    ///
    /// Each agent still runs one task at a time. Agents whose drive fails
    /// are logged and skipped.
    pub async fn drive_all(&self) -> Result<Vec<(AgentId, DriveReport)>> {
        let agents = self.agents().await?;
        let drives = agents.iter().map(|agent| async move {
            (agent.id, self.drive_agent(&agent.id).await)
        });

        let mut reports = Vec::with_capacity(agents.len());
        for (id, result) in join_all(drives).await {
            match result {
                Ok(report) => reports.push((id, report)),
                Err(e) => warn!(agent = %id.short(), error = %e, "drive failed"),
            }
        }
        Ok(reports)
    }

    /// Run one autonomous task, then keep driving its agent through any
    /// tasks that became ready.
    pub async fn execute_autonomous_task(&self, id: &TaskId) -> Result<DriveReport> {
        let task = self.engine.task(id).await.ok_or(Error::TaskNotFound(*id))?;
        if task.is_dependency {
            return Err(Error::InvalidTransition {
                task: *id,
                from: task.status.to_string(),
                event: "execute".to_string(),
            });
        }
        let agent_id = task
            .agent_id
            .ok_or_else(|| Error::Validation(format!("task {} has no owning agent", id)))?;

        let mut report = DriveReport::default();
        {
            let lock = self.drive_lock(&agent_id);
            let _guard = lock.lock().await;
            let run = self.run_task(&task).await?;
            report.record(task.id, run);
        }

        if report.failed.is_some() {
            report.status = self.refresh_status(&agent_id).await?;
        } else {
            let rest = self.drive_agent(&agent_id).await?;
            report.merge(rest);
        }
        Ok(report)
    }

    /// Start `task` and settle it. If settling fails part way, the task is
    /// put back to `todo` so it is not left `in_progress`.
    async fn run_task(&self, task: &Task) -> Result<TaskRun> {
        let started = self.engine.start_task(&task.id).await?;
        match self.work(&started).await {
            Ok(run) => Ok(run),
            Err(e) => {
                self.release(&started, &e).await;
                Err(e)
            }
        }
    }

    async fn release(&self, task: &Task, cause: &Error) {
        let running = matches!(
            self.engine.task(&task.id).await,
            Some(t) if t.status == TaskStatus::InProgress
        );
        if !running {
            return;
        }
        let reason = format!("interrupted: {}", cause);
        if let Err(e) = self.engine.cancel_task(&task.id, Some(reason)).await {
            warn!(
                task = %task.id.short(),
                error = %e,
                "could not release task, the next drive will"
            );
        }
    }

    async fn work(&self, task: &Task) -> Result<TaskRun> {
        if let Some(agent_id) = task.agent_id {
            self.refresh_status(&agent_id).await?;
        }
        self.engine
            .report_progress(&task.id, &format!("working on '{}'", task.title))
            .await?;

        match self.executor.execute(task).await {
            Ok(WorkOutcome::Completed { notes }) => {
                let completion = self.engine.complete_task(&task.id, notes).await?;
                debug!(
                    task = %task.id.short(),
                    unblocked = completion.newly_ready.len(),
                    "task completed"
                );
                Ok(TaskRun::Completed)
            }
            Ok(WorkOutcome::NeedsHuman { reason }) => {
                info!(task = %task.id.short(), reason = %reason, "task escalated to a human");
                self.engine.cancel_task(&task.id, None).await?;
                self.engine.require_human(&task.id, &reason).await?;
                Ok(TaskRun::Escalated)
            }
            Err(e) => {
                warn!(task = %task.id.short(), error = %e, "task execution failed");
                self.engine.cancel_task(&task.id, Some(e.to_string())).await?;
                Ok(TaskRun::Failed)
            }
        }
    }

    /// Human resolution of a gated task. The owning agent resumes when the
    /// resolution changed something.
    pub async fn resolve(&self, id: &TaskId) -> Result<ResolveOutcome> {
        let outcome = self.engine.resolve(id).await?;
        if let ResolveOutcome::Resolved(completion) = &outcome {
            info!(task = %id.short(), "task resolved by a human");
            if completion.task.agent_id.is_some() {
                self.resume_after_dependency_resolved(id).await?;
            }
        }
        Ok(outcome)
    }

    /// Put a blocked agent back to `active` when nothing else waits on a
    /// human, then continue with any tasks that became ready.
    ///
    /// Returns `None` when the task has no agent or the agent is paused.
    pub async fn resume_after_dependency_resolved(
        &self,
        id: &TaskId,
    ) -> Result<Option<DriveReport>> {
        let task = self.engine.task(id).await.ok_or(Error::TaskNotFound(*id))?;
        let Some(agent_id) = task.agent_id else {
            return Ok(None);
        };
        let mut agent = self.agent(&agent_id).await?;
        if agent.is_paused() {
            return Ok(None);
        }

        let still_waiting = self
            .engine
            .tasks_for_agent(&agent_id)
            .await
            .iter()
            .any(Task::awaiting_human);
        if agent.status == AgentStatus::Blocked && !still_waiting {
            self.set_status(&mut agent, AgentStatus::Active).await?;
        }

        Ok(Some(self.drive_agent(&agent_id).await?))
    }

    /// Stop the agent from starting further tasks. A task already in
    /// progress runs to completion.
    pub async fn pause_agent(&self, id: &AgentId) -> Result<Agent> {
        let mut agent = self.agent(id).await?;
        self.set_status(&mut agent, AgentStatus::Paused).await?;
        Ok(agent)
    }

    /// Leave `paused` and drive the agent again.
    pub async fn resume_agent(&self, id: &AgentId) -> Result<DriveReport> {
        let mut agent = self.agent(id).await?;
        if agent.is_paused() {
            let summary = self.engine.summary_for_agent(id).await;
            let status = AgentStatus::derive(AgentStatus::Active, &summary);
            self.set_status(&mut agent, status).await?;
        }
        self.drive_agent(id).await
    }

    /// Add a task to an existing agent. The task is not run until the
    /// agent is driven.
    pub async fn create_task(&self, agent_id: &AgentId, new: NewTask) -> Result<Task> {
        let agent = self.agent(agent_id).await?;
        let mut task = match &new.human_reason {
            Some(reason) => Task::human(&new.title, reason),
            None => Task::new(&new.title, ""),
        };
        task.description = new.description;
        let mut task = task
            .in_workspace(&agent.workspace)
            .owned_by(agent.id)
            .with_priority(new.priority);
        if let Some(due) = new.due_at {
            task = task.with_due(due);
        }
        if let Some(upstream) = new.depends_on {
            task = task.depending_on(upstream);
        }

        let task = self.engine.register_task(task).await?;
        self.refresh_status(agent_id).await?;
        Ok(task)
    }

    /// Re-derive the agent's status from its tasks and persist any change.
    pub async fn refresh_status(&self, id: &AgentId) -> Result<AgentStatus> {
        let mut agent = self.agent(id).await?;
        let summary = self.engine.summary_for_agent(id).await;
        let status = AgentStatus::derive(agent.status, &summary);
        self.set_status(&mut agent, status).await?;
        Ok(status)
    }

    async fn set_status(&self, agent: &mut Agent, status: AgentStatus) -> Result<()> {
        self.engine.set_agent_status(agent, status).await.map(|_| ())
    }

    fn drive_lock(&self, id: &AgentId) -> Arc<tokio::sync::Mutex<()>> {
        let mut locks = self
            .drive_locks
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        locks.entry(*id).or_default().clone()
    }

    fn emit(&self, notification: Notification) {
        self.engine.sink().emit(notification);
    }
}
