//! Notification/audit sink collaborator.
//!
//! Orchestration events are fire-and-forget: [`NotificationSink::emit`] is
//! synchronous, never fails, and must not block. Emitters call it only
//! after the store write the event describes has succeeded.

use std::sync::{Arc, Mutex};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tracing::{info, warn};

use crate::core::{AgentId, TaskId};

/// What happened.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NotificationKind {
    AgentStarted,
    AgentStatusChanged,
    DecompositionFallback,
    TaskCreated,
    TaskStarted,
    TaskProgress,
    TaskCompleted,
    TaskFailed,
    TaskCancelled,
    TaskBlocked,
    TaskUnblocked,
    HumanInputRequired,
    HumanResolved,
}

impl std::fmt::Display for NotificationKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = serde_json::to_value(self)
            .ok()
            .and_then(|v| v.as_str().map(str::to_string))
            .unwrap_or_default();
        f.write_str(&s)
    }
}

/// One orchestration event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Notification {
    /// Owning agent; `None` for tasks created outside any agent.
    pub agent_id: Option<AgentId>,
    pub task_id: Option<TaskId>,
    pub kind: NotificationKind,
    pub message: String,
    #[serde(default)]
    pub metadata: serde_json::Value,
    pub at: DateTime<Utc>,
}

impl Notification {
    pub fn new(kind: NotificationKind, message: impl Into<String>) -> Self {
        Self {
            agent_id: None,
            task_id: None,
            kind,
            message: message.into(),
            metadata: serde_json::Value::Null,
            at: Utc::now(),
        }
    }

    pub fn agent(mut self, agent_id: Option<AgentId>) -> Self {
        self.agent_id = agent_id;
        self
    }

    pub fn task(mut self, task_id: TaskId) -> Self {
        self.task_id = Some(task_id);
        self
    }

    pub fn metadata(mut self, metadata: serde_json::Value) -> Self {
        self.metadata = metadata;
        self
    }
}

/// Receiver of orchestration events.
pub trait NotificationSink: Send + Sync {
    fn emit(&self, notification: Notification);
}

/// Forwards events into a bounded tokio channel, dropping them when full.
#[derive(Debug, Clone)]
pub struct ChannelSink {
    tx: mpsc::Sender<Notification>,
}

impl ChannelSink {
    pub fn new(capacity: usize) -> (Self, mpsc::Receiver<Notification>) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        (Self { tx }, rx)
    }
}

impl NotificationSink for ChannelSink {
    fn emit(&self, notification: Notification) {
        if let Err(e) = self.tx.try_send(notification) {
            warn!(error = %e, "dropping notification");
        }
    }
}

/// Keeps every event in memory. Useful for audit views and tests.
#[derive(Debug, Default)]
pub struct MemorySink {
    events: Mutex<Vec<Notification>>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<Notification> {
        self.events.lock().map(|e| e.clone()).unwrap_or_default()
    }

    pub fn count(&self, kind: NotificationKind) -> usize {
        self.events().iter().filter(|n| n.kind == kind).count()
    }

    pub fn for_task(&self, task_id: &TaskId) -> Vec<Notification> {
        self.events()
            .into_iter()
            .filter(|n| n.task_id.as_ref() == Some(task_id))
            .collect()
    }

    pub fn clear(&self) {
        if let Ok(mut events) = self.events.lock() {
            events.clear();
        }
    }
}

impl NotificationSink for MemorySink {
    fn emit(&self, notification: Notification) {
        if let Ok(mut events) = self.events.lock() {
            events.push(notification);
        }
    }
}

/// Writes events to the log.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingSink;

impl NotificationSink for TracingSink {
    fn emit(&self, n: Notification) {
        info!(
            kind = %n.kind,
            agent = ?n.agent_id.map(|a| a.short()),
            task = ?n.task_id.map(|t| t.short()),
            "{}",
            n.message
        );
    }
}

/// Sends each event to several sinks.
#[derive(Clone, Default)]
pub struct Fanout {
    sinks: Vec<Arc<dyn NotificationSink>>,
}

impl Fanout {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, sink: Arc<dyn NotificationSink>) -> Self {
        self.sinks.push(sink);
        self
    }
}

impl NotificationSink for Fanout {
    fn emit(&self, notification: Notification) {
        for sink in &self.sinks {
            sink.emit(notification.clone());
        }
    }
}
