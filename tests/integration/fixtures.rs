//! Test fixtures for integration tests.
//!
//! Provides helpers for:
//! - Building an engine + orchestrator over a `MemoryStore`
//! - Scripted decomposition providers and work executors
//! - Predefined task plans

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;

use taskweave::core::{AgentId, Task};
use taskweave::engine::GraphEngine;
use taskweave::notify::{MemorySink, NotificationKind};
use taskweave::orchestration::{
    CandidateTask, DecompositionProvider, KeywordDecomposer, Orchestrator, SimulatedWork,
    WorkExecutor, WorkOutcome,
};
use taskweave::store::{MemoryStore, Scope};
use taskweave::{Error, Result};

pub const WORKSPACE: &str = "acme";

/// Engine, orchestrator and the in-memory collaborators behind them.
pub struct Harness {
    pub store: Arc<MemoryStore>,
    pub sink: Arc<MemorySink>,
    pub engine: Arc<GraphEngine>,
    pub orchestrator: Orchestrator,
}

impl Harness {
    pub fn new(
        decomposer: Arc<dyn DecompositionProvider>,
        executor: Arc<dyn WorkExecutor>,
    ) -> Self {
        Self::with_store(Arc::new(MemoryStore::new()), decomposer, executor)
    }

    /// Like [`Harness::new`] over a store the caller keeps a handle to.
    pub fn with_store(
        store: Arc<MemoryStore>,
        decomposer: Arc<dyn DecompositionProvider>,
        executor: Arc<dyn WorkExecutor>,
    ) -> Self {
        let sink = Arc::new(MemorySink::new());
        let engine = Arc::new(GraphEngine::new(
            Scope::workspace(WORKSPACE),
            store.clone(),
            sink.clone(),
        ));
        let orchestrator = Orchestrator::new(engine.clone(), decomposer, executor)
            .expect("workspace scope");
        Self {
            store,
            sink,
            engine,
            orchestrator,
        }
    }

    /// Keyword decomposition with instant simulated work.
    pub fn keyword() -> Self {
        Self::new(
            Arc::new(KeywordDecomposer::new().expect("patterns compile")),
            Arc::new(SimulatedWork::new(Duration::ZERO)),
        )
    }

    /// A fixed plan with instant simulated work.
    pub fn scripted(plan: Vec<CandidateTask>) -> Self {
        Self::new(
            Arc::new(ScriptedDecomposer(plan)),
            Arc::new(SimulatedWork::new(Duration::ZERO)),
        )
    }

    pub fn count(&self, kind: NotificationKind) -> usize {
        self.sink.count(kind)
    }

    pub async fn task_by_title(&self, agent: &AgentId, title: &str) -> Task {
        self.engine
            .tasks_for_agent(agent)
            .await
            .into_iter()
            .find(|t| t.title == title)
            .unwrap_or_else(|| panic!("no task titled {}", title))
    }
}

/// The A/B/C plan: `A` autonomous, `B` waits on `A`, `C` human-gated.
pub fn abc_plan() -> Vec<CandidateTask> {
    vec![
        CandidateTask::autonomous("A", "first step"),
        CandidateTask::autonomous("B", "second step").after(0),
        CandidateTask::human("C", "sign-off", "needs approval from the owner"),
    ]
}

/// Always returns the same plan.
pub struct ScriptedDecomposer(pub Vec<CandidateTask>);

#[async_trait]
impl DecompositionProvider for ScriptedDecomposer {
    async fn decompose(&self, _goal: &str) -> Result<Vec<CandidateTask>> {
        Ok(self.0.clone())
    }
}

/// Always fails.
pub struct FailingDecomposer;

#[async_trait]
impl DecompositionProvider for FailingDecomposer {
    async fn decompose(&self, _goal: &str) -> Result<Vec<CandidateTask>> {
        Err(Error::Decomposition("text generation unavailable".to_string()))
    }
}

/// Never answers in time.
pub struct HangingDecomposer;

#[async_trait]
impl DecompositionProvider for HangingDecomposer {
    async fn decompose(&self, goal: &str) -> Result<Vec<CandidateTask>> {
        tokio::time::sleep(Duration::from_secs(3600)).await;
        KeywordDecomposer::new()?.decompose(goal).await
    }
}

/// Fails the first `failures` executions, then completes.
pub struct FlakyWork {
    failures: AtomicUsize,
}

impl FlakyWork {
    pub fn new(failures: usize) -> Self {
        Self {
            failures: AtomicUsize::new(failures),
        }
    }
}

#[async_trait]
impl WorkExecutor for FlakyWork {
    async fn execute(&self, _task: &Task) -> Result<WorkOutcome> {
        let left = self.failures.load(Ordering::SeqCst);
        if left > 0 {
            self.failures.store(left - 1, Ordering::SeqCst);
            return Err(Error::Validation("worker crashed".to_string()));
        }
        Ok(WorkOutcome::Completed { notes: None })
    }
}

/// Takes the store offline while its first task runs, then completes.
pub struct OutageWork {
    store: Arc<MemoryStore>,
    tripped: AtomicBool,
}

impl OutageWork {
    pub fn new(store: Arc<MemoryStore>) -> Self {
        Self {
            store,
            tripped: AtomicBool::new(false),
        }
    }
}

#[async_trait]
impl WorkExecutor for OutageWork {
    async fn execute(&self, _task: &Task) -> Result<WorkOutcome> {
        if !self.tripped.swap(true, Ordering::SeqCst) {
            self.store.set_available(false);
        }
        Ok(WorkOutcome::Completed { notes: None })
    }
}

/// Records how many tasks of each agent run at once.
#[derive(Default)]
pub struct TrackingWork {
    delay: Duration,
    running: Mutex<HashMap<AgentId, usize>>,
    max_per_agent: AtomicUsize,
    max_overall: AtomicUsize,
}

impl TrackingWork {
    pub fn new(delay: Duration) -> Self {
        Self {
            delay,
            ..Self::default()
        }
    }

    pub fn max_per_agent(&self) -> usize {
        self.max_per_agent.load(Ordering::SeqCst)
    }

    pub fn max_overall(&self) -> usize {
        self.max_overall.load(Ordering::SeqCst)
    }

    fn enter(&self, agent: AgentId) {
        let mut running = self.running.lock().unwrap();
        *running.entry(agent).or_default() += 1;
        let per_agent = running[&agent];
        let overall: usize = running.values().sum();
        self.max_per_agent.fetch_max(per_agent, Ordering::SeqCst);
        self.max_overall.fetch_max(overall, Ordering::SeqCst);
    }

    fn leave(&self, agent: AgentId) {
        let mut running = self.running.lock().unwrap();
        if let Some(n) = running.get_mut(&agent) {
            *n -= 1;
        }
    }
}

#[async_trait]
impl WorkExecutor for TrackingWork {
    async fn execute(&self, task: &Task) -> Result<WorkOutcome> {
        let agent = task.agent_id.expect("orchestrated tasks have an agent");
        self.enter(agent);
        tokio::time::sleep(self.delay).await;
        self.leave(agent);
        Ok(WorkOutcome::Completed { notes: None })
    }
}
