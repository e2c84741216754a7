//! Work execution seam.
//!
//! The orchestrator hands each autonomous task to a [`WorkExecutor`] and
//! awaits the outcome before advancing the task's state.

use std::time::Duration;

use async_trait::async_trait;
use tracing::debug;

use crate::config::Config;
use crate::core::Task;
use crate::error::Result;

/// What a unit of work produced.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WorkOutcome {
    /// Finished; `notes` are appended to the task.
    Completed { notes: Option<String> },
    /// The work turned out to need a human.
    NeedsHuman { reason: String },
}

/// Performs the work of one autonomous task.
///
/// An `Err` counts as a failed attempt: the task goes back to `todo`.
#[async_trait]
pub trait WorkExecutor: Send + Sync {
    async fn execute(&self, task: &Task) -> Result<WorkOutcome>;
}

/// Stand-in executor that sleeps for a fixed delay and then completes.
///
/// Tasks whose title contains one of `escalate_on` (case-insensitive)
/// are escalated to a human instead.
#[derive(Debug, Clone, Default)]
pub struct SimulatedWork {
    delay: Duration,
    escalate_on: Vec<String>,
}

impl SimulatedWork {
    pub fn new(delay: Duration) -> Self {
        Self {
            delay,
            escalate_on: Vec::new(),
        }
    }

    pub fn from_config(config: &Config) -> Self {
        Self::new(Duration::from_millis(config.work_delay_ms))
    }

    pub fn escalate_on(mut self, keyword: &str) -> Self {
        self.escalate_on.push(keyword.to_lowercase());
        self
    }

    fn escalation_for(&self, task: &Task) -> Option<&str> {
        let title = task.title.to_lowercase();
        self.escalate_on
            .iter()
            .find(|k| title.contains(k.as_str()))
            .map(String::as_str)
    }
}

#[async_trait]
impl WorkExecutor for SimulatedWork {
    async fn execute(&self, task: &Task) -> Result<WorkOutcome> {
        debug!(
            task = %task.id.short(),
            delay_ms = self.delay.as_millis() as u64,
            "simulating work"
        );
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }

        if let Some(keyword) = self.escalation_for(task) {
            return Ok(WorkOutcome::NeedsHuman {
                reason: format!("'{}' needs a human decision ({})", task.title, keyword),
            });
        }

        Ok(WorkOutcome::Completed {
            notes: Some(format!("Completed: {}", task.title)),
        })
    }
}
