//! Core domain models: tasks, agents, the lifecycle state machine and the
//! dependency graph.

pub mod agent;
pub mod dag;
pub mod lifecycle;
pub mod task;

pub use agent::{Agent, AgentId, AgentStatus, TaskSummary};
pub use dag::{Edge, EdgeCheck, EdgeKind, GraphMetrics, TaskGraph};
pub use lifecycle::{Guard, TaskEvent, Transition};
pub use task::{Priority, Task, TaskId, TaskStatus};
