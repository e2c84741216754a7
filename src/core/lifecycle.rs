//! Task lifecycle state machine.
//!
//! Every status change goes through [`Task::apply`], which checks the
//! transition table and its guard and keeps `blocked_reason` and the
//! timestamps consistent with the resulting status.
//!
//! | From        | Event              | To          | Guard                              |
//! |-------------|--------------------|-------------|------------------------------------|
//! | todo        | start              | in_progress | no unmet prerequisite, agent idle  |
//! | todo        | prerequisite unmet | blocked     | at least one prerequisite not done |
//! | todo        | require human      | blocked     | non-empty reason                   |
//! | blocked     | unblock            | todo        | all prerequisites done, not gated  |
//! | blocked     | resolve            | done        | human-gated, prerequisites done    |
//! | in_progress | finish             | done        | all prerequisites done             |
//! | in_progress | cancel             | todo        | none                               |

use chrono::Utc;
use serde::{Deserialize, Serialize};

use crate::core::task::{Task, TaskId, TaskStatus};
use crate::error::{Error, Result};

/// An event that may move a task to another status.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "event")]
pub enum TaskEvent {
    Start,
    PrerequisiteUnmet { reason: String },
    RequireHuman { reason: String },
    Unblock,
    Resolve,
    Finish { notes: Option<String> },
    Cancel,
}

impl TaskEvent {
    pub fn name(&self) -> &'static str {
        match self {
            TaskEvent::Start => "start",
            TaskEvent::PrerequisiteUnmet { .. } => "block on prerequisites",
            TaskEvent::RequireHuman { .. } => "require human input",
            TaskEvent::Unblock => "unblock",
            TaskEvent::Resolve => "resolve",
            TaskEvent::Finish { .. } => "finish",
            TaskEvent::Cancel => "cancel",
        }
    }
}

/// Facts about the task's surroundings that guards depend on.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Guard {
    /// Blockers (sources of incoming edges) that are not done.
    pub unmet_prerequisites: usize,
    /// Another task of the same agent is in progress.
    pub agent_busy: bool,
}

impl Guard {
    pub fn clear() -> Self {
        Self::default()
    }

    pub fn with_unmet(unmet_prerequisites: usize) -> Self {
        Self {
            unmet_prerequisites,
            agent_busy: false,
        }
    }
}

/// A status change that was applied.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Transition {
    pub task: TaskId,
    pub from: TaskStatus,
    pub to: TaskStatus,
}

impl Transition {
    pub fn is_change(&self) -> bool {
        self.from != self.to
    }
}

impl Task {
    /// Apply a lifecycle event, or reject it without touching the task.
    pub fn apply(&mut self, event: TaskEvent, guard: Guard) -> Result<Transition> {
        let from = self.status;
        let reject = |task: &Task| Error::InvalidTransition {
            task: task.id,
            from: from.to_string(),
            event: event.name().to_string(),
        };

        match (&event, from) {
            (TaskEvent::Start, TaskStatus::Todo) => {
                if guard.unmet_prerequisites > 0 || guard.agent_busy || self.is_dependency {
                    return Err(reject(self));
                }
                self.status = TaskStatus::InProgress;
                self.started_at = Some(Utc::now());
            }
            (TaskEvent::PrerequisiteUnmet { reason }, TaskStatus::Todo) => {
                if guard.unmet_prerequisites == 0 {
                    return Err(reject(self));
                }
                self.status = TaskStatus::Blocked;
                self.blocked_reason = Some(reason.clone());
            }
            (TaskEvent::RequireHuman { reason }, TaskStatus::Todo | TaskStatus::Blocked) => {
                if reason.trim().is_empty() {
                    return Err(reject(self));
                }
                self.is_dependency = true;
                self.status = TaskStatus::Blocked;
                self.blocked_reason = Some(reason.clone());
            }
            (TaskEvent::Unblock, TaskStatus::Blocked) => {
                if guard.unmet_prerequisites > 0 || self.is_dependency {
                    return Err(reject(self));
                }
                self.status = TaskStatus::Todo;
                self.blocked_reason = None;
            }
            (TaskEvent::Resolve, TaskStatus::Blocked) => {
                if !self.is_dependency || guard.unmet_prerequisites > 0 {
                    return Err(reject(self));
                }
                self.status = TaskStatus::Done;
                self.blocked_reason = None;
                self.completed_at = Some(Utc::now());
            }
            (TaskEvent::Finish { notes }, TaskStatus::InProgress) => {
                if guard.unmet_prerequisites > 0 {
                    return Err(reject(self));
                }
                self.status = TaskStatus::Done;
                self.completed_at = Some(Utc::now());
                if let Some(notes) = notes {
                    self.notes.push(notes.clone());
                }
            }
            (TaskEvent::Cancel, TaskStatus::InProgress) => {
                self.status = TaskStatus::Todo;
                self.started_at = None;
            }
            _ => return Err(reject(self)),
        }

        Ok(Transition {
            task: self.id,
            from,
            to: self.status,
        })
    }

    /// Append a note to a finished task. The only mutation a done task accepts.
    pub fn append_note(&mut self, note: &str) -> Result<()> {
        if !self.is_done() {
            return Err(Error::InvalidTransition {
                task: self.id,
                from: self.status.to_string(),
                event: "append note".to_string(),
            });
        }
        self.notes.push(note.to_string());
        Ok(())
    }
}
