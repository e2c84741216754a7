//! Task dependency graph.
//!
//! `TaskGraph` holds the tasks of one scope as nodes and dependency
//! relations as directed edges (`source -> target` means `target` waits on
//! `source`). Edge admission keeps the graph acyclic: an edge is rejected
//! when its source is reachable from its target.
//!
//! A graph may also hold external nodes: upstream tasks owned by another
//! scope. They gate readiness like any blocker but are never listed,
//! counted or transitioned as part of this scope.

use crate::core::agent::{AgentId, TaskSummary};
use crate::core::lifecycle::{Guard, TaskEvent};
use crate::core::task::{Task, TaskId, TaskStatus};
use crate::error::{Error, Result};
use petgraph::algo::{has_path_connecting, toposort};
use petgraph::stable_graph::{NodeIndex, StableDiGraph};
use petgraph::Direction;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};

/// Scheduling relation carried by an edge.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum EdgeKind {
    #[default]
    FinishToStart,
    StartToStart,
    FinishToFinish,
    StartToFinish,
}

impl std::fmt::Display for EdgeKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EdgeKind::FinishToStart => write!(f, "finish_to_start"),
            EdgeKind::StartToStart => write!(f, "start_to_start"),
            EdgeKind::FinishToFinish => write!(f, "finish_to_finish"),
            EdgeKind::StartToFinish => write!(f, "start_to_finish"),
        }
    }
}

impl std::str::FromStr for EdgeKind {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "finish_to_start" | "fs" => Ok(EdgeKind::FinishToStart),
            "start_to_start" | "ss" => Ok(EdgeKind::StartToStart),
            "finish_to_finish" | "ff" => Ok(EdgeKind::FinishToFinish),
            "start_to_finish" | "sf" => Ok(EdgeKind::StartToFinish),
            other => Err(format!("unknown edge kind: {}", other)),
        }
    }
}

/// A dependency record: `target` waits on `source`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Edge {
    pub source: TaskId,
    pub target: TaskId,
    #[serde(default)]
    pub kind: EdgeKind,
}

impl Edge {
    pub fn new(source: TaskId, target: TaskId, kind: EdgeKind) -> Self {
        Self {
            source,
            target,
            kind,
        }
    }
}

/// Outcome of an edge admission check.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EdgeCheck {
    pub allowed: bool,
    pub reason: Option<String>,
}

impl EdgeCheck {
    pub fn allowed() -> Self {
        Self {
            allowed: true,
            reason: None,
        }
    }

    pub fn rejected(reason: impl Into<String>) -> Self {
        Self {
            allowed: false,
            reason: Some(reason.into()),
        }
    }
}

/// Aggregate figures over the current graph.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct GraphMetrics {
    pub total_nodes: usize,
    pub total_edges: usize,
    pub critical_path_length: usize,
    pub blocked_count: usize,
    pub ready_count: usize,
}

/// The task dependency graph for one scope.
///
/// Uses a `StableDiGraph` so node indices survive task deletion, and keeps
/// an insertion sequence so every iteration is deterministic.
#[derive(Clone)]
pub struct TaskGraph {
    graph: StableDiGraph<Task, EdgeKind>,
    task_index: HashMap<TaskId, NodeIndex>,
    seq: HashMap<NodeIndex, u64>,
    next_seq: u64,
    external: HashSet<TaskId>,
}

impl TaskGraph {
    pub fn new() -> Self {
        Self {
            graph: StableDiGraph::new(),
            task_index: HashMap::new(),
            seq: HashMap::new(),
            next_seq: 0,
            external: HashSet::new(),
        }
    }

    /// Build a graph from stored tasks and edge records.
    ///
    /// Edges come from the explicit records plus each task's `depends_on`.
    /// `external` holds upstream tasks of other scopes that some edge waits
    /// on. Edges with an unknown endpoint, duplicates, and edges that would
    /// close a cycle are skipped; the skipped reasons are returned.
    pub fn build(tasks: Vec<Task>, external: Vec<Task>, edges: Vec<Edge>) -> (Self, Vec<String>) {
        let mut graph = Self::new();
        let mut skipped = Vec::new();

        let derived: Vec<Edge> = tasks
            .iter()
            .filter_map(|t| {
                t.depends_on
                    .map(|upstream| Edge::new(upstream, t.id, EdgeKind::FinishToStart))
            })
            .collect();

        for task in tasks {
            graph.add_task(task);
        }
        for task in external {
            graph.add_external(task);
        }

        for edge in edges.into_iter().chain(derived) {
            if graph.has_edge(&edge.source, &edge.target) {
                continue;
            }
            if let Err(e) = graph.add_edge(&edge.source, &edge.target, edge.kind) {
                skipped.push(format!("{} -> {}: {}", edge.source.short(), edge.target.short(), e));
            }
        }

        (graph, skipped)
    }

    /// Add a task node. Adding an id that already exists returns the existing index.
    pub fn add_task(&mut self, task: Task) -> NodeIndex {
        if let Some(&index) = self.task_index.get(&task.id) {
            return index;
        }

        let id = task.id;
        let index = self.graph.add_node(task);
        self.task_index.insert(id, index);
        self.seq.insert(index, self.next_seq);
        self.next_seq += 1;
        index
    }

    /// Add a read-only upstream task owned by another scope.
    pub fn add_external(&mut self, task: Task) -> NodeIndex {
        if let Some(&index) = self.task_index.get(&task.id) {
            return index;
        }
        let id = task.id;
        let index = self.add_task(task);
        self.external.insert(id);
        index
    }

    pub fn is_external(&self, id: &TaskId) -> bool {
        self.external.contains(id)
    }

    /// External tasks with an edge into `id`.
    pub fn external_blockers(&self, id: &TaskId) -> Vec<TaskId> {
        self.blockers(id)
            .into_iter()
            .filter(|t| self.external.contains(&t.id))
            .map(|t| t.id)
            .collect()
    }

    /// Remove a task that nothing depends on.
    pub fn remove_task(&mut self, id: &TaskId) -> Result<Task> {
        let index = self.index_of(id)?;
        if !self.dependents(id).is_empty() {
            return Err(Error::Structural(format!(
                "task {} has dependent tasks",
                id
            )));
        }
        self.task_index.remove(id);
        self.seq.remove(&index);
        self.external.remove(id);
        self.graph
            .remove_node(index)
            .ok_or_else(|| Error::TaskNotFound(*id))
    }

    /// Replace the stored copy of a task with an updated one.
    pub fn replace_task(&mut self, task: Task) -> Result<()> {
        let index = self.index_of(&task.id)?;
        self.graph[index] = task;
        Ok(())
    }

    fn index_of(&self, id: &TaskId) -> Result<NodeIndex> {
        self.task_index
            .get(id)
            .copied()
            .ok_or(Error::TaskNotFound(*id))
    }

    /// Node indices in insertion order.
    fn ordered_nodes(&self) -> Vec<NodeIndex> {
        let mut nodes: Vec<NodeIndex> = self.graph.node_indices().collect();
        nodes.sort_by_key(|n| self.seq.get(n).copied().unwrap_or(u64::MAX));
        nodes
    }

    fn ordered_neighbors(&self, index: NodeIndex, dir: Direction) -> Vec<NodeIndex> {
        let mut nodes: Vec<NodeIndex> = self.graph.neighbors_directed(index, dir).collect();
        nodes.sort_by_key(|n| self.seq.get(n).copied().unwrap_or(u64::MAX));
        nodes.dedup();
        nodes
    }

    pub fn task(&self, id: &TaskId) -> Option<&Task> {
        self.task_index
            .get(id)
            .and_then(|&index| self.graph.node_weight(index))
    }

    pub fn contains_task(&self, id: &TaskId) -> bool {
        self.task_index.contains_key(id)
    }

    pub fn task_count(&self) -> usize {
        self.graph.node_count()
    }

    pub fn edge_count(&self) -> usize {
        self.graph.edge_count()
    }

    pub fn is_empty(&self) -> bool {
        self.graph.node_count() == 0
    }

    /// All tasks of the scope in insertion order. External tasks are left out.
    pub fn all_tasks(&self) -> Vec<&Task> {
        self.ordered_nodes()
            .into_iter()
            .filter_map(|n| self.graph.node_weight(n))
            .filter(|t| !self.external.contains(&t.id))
            .collect()
    }

    /// Tasks owned by `agent`, in insertion order.
    pub fn tasks_for_agent(&self, agent: &AgentId) -> Vec<&Task> {
        self.all_tasks()
            .into_iter()
            .filter(|t| t.agent_id.as_ref() == Some(agent))
            .collect()
    }

    /// All edges, ordered by source then target insertion order.
    pub fn edges(&self) -> Vec<Edge> {
        let mut edges = Vec::with_capacity(self.graph.edge_count());
        for source in self.ordered_nodes() {
            for target in self.ordered_neighbors(source, Direction::Outgoing) {
                if let Some(e) = self.graph.find_edge(source, target) {
                    edges.push(Edge::new(
                        self.graph[source].id,
                        self.graph[target].id,
                        self.graph[e],
                    ));
                }
            }
        }
        edges
    }

    pub fn has_edge(&self, source: &TaskId, target: &TaskId) -> bool {
        match (self.task_index.get(source), self.task_index.get(target)) {
            (Some(&s), Some(&t)) => self.graph.find_edge(s, t).is_some(),
            _ => false,
        }
    }

    pub fn edge_kind(&self, source: &TaskId, target: &TaskId) -> Option<EdgeKind> {
        let s = self.task_index.get(source)?;
        let t = self.task_index.get(target)?;
        let e = self.graph.find_edge(*s, *t)?;
        self.graph.edge_weight(e).copied()
    }

    /// Decide whether `source -> target` may be added.
    ///
    /// Rejects unknown ids, duplicates, and any edge whose source is
    /// reachable from its target (including self-loops).
    pub fn can_add_edge(&self, source: &TaskId, target: &TaskId) -> EdgeCheck {
        let Some(&s) = self.task_index.get(source) else {
            return EdgeCheck::rejected(format!("unknown task {}", source));
        };
        let Some(&t) = self.task_index.get(target) else {
            return EdgeCheck::rejected(format!("unknown task {}", target));
        };
        if s == t {
            return EdgeCheck::rejected(format!(
                "task {} cannot depend on itself: would create a cycle",
                source.short()
            ));
        }
        if self.graph.find_edge(s, t).is_some() {
            return EdgeCheck::rejected(format!(
                "edge {} -> {} already exists",
                source.short(),
                target.short()
            ));
        }
        if has_path_connecting(&self.graph, t, s, None) {
            return EdgeCheck::rejected(format!(
                "edge {} -> {} would create a cycle",
                source.short(),
                target.short()
            ));
        }
        EdgeCheck::allowed()
    }

    /// Add an edge after validating it with [`Self::can_add_edge`].
    pub fn add_edge(&mut self, source: &TaskId, target: &TaskId, kind: EdgeKind) -> Result<()> {
        let check = self.can_add_edge(source, target);
        if !check.allowed {
            return Err(Error::Structural(
                check.reason.unwrap_or_else(|| "edge rejected".to_string()),
            ));
        }
        let s = self.index_of(source)?;
        let t = self.index_of(target)?;
        self.graph.add_edge(s, t, kind);
        Ok(())
    }

    /// Tasks with an edge into `id`, in insertion order.
    pub fn blockers(&self, id: &TaskId) -> Vec<&Task> {
        match self.task_index.get(id) {
            Some(&index) => self
                .ordered_neighbors(index, Direction::Incoming)
                .into_iter()
                .filter_map(|n| self.graph.node_weight(n))
                .collect(),
            None => Vec::new(),
        }
    }

    /// Ids of tasks with an edge from `id`, in insertion order.
    pub fn dependents(&self, id: &TaskId) -> Vec<TaskId> {
        match self.task_index.get(id) {
            Some(&index) => self
                .ordered_neighbors(index, Direction::Outgoing)
                .into_iter()
                .map(|n| self.graph[n].id)
                .collect(),
            None => Vec::new(),
        }
    }

    /// Number of blockers of `id` that are not done.
    pub fn unmet_prerequisites(&self, id: &TaskId) -> usize {
        self.blockers(id).iter().filter(|t| !t.is_done()).count()
    }

    /// Guard facts for a transition of `id`.
    pub fn guard_for(&self, id: &TaskId) -> Guard {
        let agent_busy = match self.task(id).and_then(|t| t.agent_id) {
            Some(agent) => self
                .tasks_for_agent(&agent)
                .iter()
                .any(|t| t.id != *id && t.status == TaskStatus::InProgress),
            None => false,
        };
        Guard {
            unmet_prerequisites: self.unmet_prerequisites(id),
            agent_busy,
        }
    }

    /// A `Todo` task whose blockers are all done.
    pub fn is_ready(&self, id: &TaskId) -> bool {
        self.task(id)
            .map(|t| t.status == TaskStatus::Todo && self.unmet_prerequisites(id) == 0)
            .unwrap_or(false)
    }

    /// The event that would bring `id`'s status in line with its blockers.
    ///
    /// Returns `None` when nothing needs to change, and always for tasks that
    /// are in progress, done, or waiting on a human.
    pub fn readiness_event(&self, id: &TaskId) -> Option<TaskEvent> {
        let task = self.task(id)?;
        if task.is_dependency {
            return None;
        }
        let unmet = self.unmet_prerequisites(id);
        match task.status {
            TaskStatus::Blocked if unmet == 0 => Some(TaskEvent::Unblock),
            TaskStatus::Todo if unmet > 0 => Some(TaskEvent::PrerequisiteUnmet {
                reason: Self::waiting_reason(unmet),
            }),
            _ => None,
        }
    }

    /// Blocked reason for a task waiting on `unmet` prerequisites.
    pub fn waiting_reason(unmet: usize) -> String {
        format!("waiting on {} prerequisite task(s)", unmet)
    }

    /// Ready tasks, optionally limited to one agent, most urgent first.
    ///
    /// Ordered by priority, then due date (undated last), then insertion order.
    pub fn ready_tasks(&self, agent: Option<&AgentId>) -> Vec<&Task> {
        let mut ready: Vec<&Task> = self
            .all_tasks()
            .into_iter()
            .filter(|t| agent.map_or(true, |a| t.agent_id.as_ref() == Some(a)))
            .filter(|t| self.is_ready(&t.id))
            .collect();
        // stable sort keeps insertion order among equals
        ready.sort_by_key(|t| (t.priority, t.due_at.is_none(), t.due_at));
        ready
    }

    /// Task counts for one agent.
    pub fn summary_for_agent(&self, agent: &AgentId) -> TaskSummary {
        let tasks = self.tasks_for_agent(agent);
        TaskSummary {
            total: tasks.len(),
            done: tasks.iter().filter(|t| t.status == TaskStatus::Done).count(),
            in_progress: tasks
                .iter()
                .filter(|t| t.status == TaskStatus::InProgress)
                .count(),
            blocked: tasks
                .iter()
                .filter(|t| t.status == TaskStatus::Blocked)
                .count(),
        }
    }

    /// Longest dependency chain, as task ids from start to end.
    ///
    /// Every node without incoming edges is a start node; from each, a
    /// depth-first walk that never revisits a node on the current path finds
    /// the longest chain. The first start node (insertion order) wins ties.
    pub fn critical_path(&self) -> Vec<TaskId> {
        let mut memo: HashMap<NodeIndex, Vec<NodeIndex>> = HashMap::new();
        let mut best: Vec<NodeIndex> = Vec::new();

        for start in self.ordered_nodes() {
            if self
                .graph
                .neighbors_directed(start, Direction::Incoming)
                .next()
                .is_some()
            {
                continue;
            }
            let mut on_path = HashSet::new();
            let chain = self.longest_chain_from(start, &mut on_path, &mut memo);
            if chain.len() > best.len() {
                best = chain;
            }
        }

        best.into_iter().map(|n| self.graph[n].id).collect()
    }

    fn longest_chain_from(
        &self,
        node: NodeIndex,
        on_path: &mut HashSet<NodeIndex>,
        memo: &mut HashMap<NodeIndex, Vec<NodeIndex>>,
    ) -> Vec<NodeIndex> {
        if let Some(chain) = memo.get(&node) {
            return chain.clone();
        }

        on_path.insert(node);
        let mut longest: Vec<NodeIndex> = Vec::new();
        for child in self.ordered_neighbors(node, Direction::Outgoing) {
            if on_path.contains(&child) {
                continue;
            }
            let chain = self.longest_chain_from(child, on_path, memo);
            if chain.len() > longest.len() {
                longest = chain;
            }
        }
        on_path.remove(&node);

        let mut chain = Vec::with_capacity(longest.len() + 1);
        chain.push(node);
        chain.extend(longest);
        memo.insert(node, chain.clone());
        chain
    }

    pub fn metrics(&self) -> GraphMetrics {
        let tasks = self.all_tasks();
        let mut blocked_count = 0;
        let mut ready_count = 0;
        for task in &tasks {
            match task.status {
                TaskStatus::Blocked => blocked_count += 1,
                TaskStatus::Todo if self.unmet_prerequisites(&task.id) == 0 => ready_count += 1,
                _ => {}
            }
        }

        GraphMetrics {
            total_nodes: tasks.len(),
            total_edges: self.graph.edge_count(),
            critical_path_length: self.critical_path().len(),
            blocked_count,
            ready_count,
        }
    }

    /// Check that the graph has no cycle.
    pub fn is_acyclic(&self) -> bool {
        toposort(&self.graph, None).is_ok()
    }

    /// Tasks ordered so every task comes after all of its blockers.
    pub fn topological_order(&self) -> Result<Vec<&Task>> {
        let sorted = toposort(&self.graph, None).map_err(|cycle| {
            let title = self
                .graph
                .node_weight(cycle.node_id())
                .map(|t| t.title.as_str())
                .unwrap_or("unknown");
            Error::Structural(format!("cycle detected at task: {}", title))
        })?;

        Ok(sorted
            .into_iter()
            .filter_map(|index| self.graph.node_weight(index))
            .filter(|t| !self.external.contains(&t.id))
            .collect())
    }
}

impl Default for TaskGraph {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for TaskGraph {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TaskGraph")
            .field("tasks", &self.task_count())
            .field("edges", &self.edge_count())
            .finish()
    }
}
