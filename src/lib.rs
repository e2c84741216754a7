//! taskweave: a task-dependency graph and agent orchestration engine.
//!
//! Agents receive a goal, the [`orchestration::Orchestrator`] decomposes it
//! into tasks, and the [`engine::GraphEngine`] keeps those tasks in an
//! acyclic dependency graph whose readiness drives execution. Tasks only a
//! human can finish stay blocked until they are resolved.

pub mod config;
pub mod core;
pub mod engine;
pub mod error;
pub mod log;
pub mod notify;
pub mod orchestration;
pub mod store;
pub mod util;

pub use error::{Error, Result};
