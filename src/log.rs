//! Logging setup for taskweave.
//!
//! The library logs through `tracing` macros. The binary installs a fmt
//! subscriber that writes to `~/.taskweave/taskweave.log` (truncated on
//! startup).
//!
//! Log levels:
//! - ERROR: failures that stop an operation
//! - WARN: recoverable surprises (decomposition fallback, skipped edges, failed work)
//! - INFO: agent and task lifecycle events
//! - DEBUG: transitions, edge admission, store access
//! - TRACE: everything else
//!
//! Debug mode is enabled with the `--debug` flag or `TASKWEAVE_DEBUG=1`.
//! `RUST_LOG`, when set, overrides the level filter.

use std::fs::File;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, OnceLock};

use tracing_subscriber::EnvFilter;

/// Environment variable that turns on debug logging.
pub const DEBUG_ENV: &str = "TASKWEAVE_DEBUG";

static LOG_PATH: OnceLock<PathBuf> = OnceLock::new();
static DEBUG_ENABLED: AtomicBool = AtomicBool::new(false);

/// Log levels for the default filter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum LogLevel {
    Error,
    Warn,
    Info,
    Debug,
    Trace,
}

impl LogLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            LogLevel::Error => "error",
            LogLevel::Warn => "warn",
            LogLevel::Info => "info",
            LogLevel::Debug => "debug",
            LogLevel::Trace => "trace",
        }
    }

    fn for_debug(debug: bool) -> Self {
        if debug {
            LogLevel::Debug
        } else {
            LogLevel::Info
        }
    }
}

/// Initialize logging to ~/.taskweave/taskweave.log
pub fn init() {
    init_with_debug(false);
}

/// Initialize logging with explicit debug mode setting.
pub fn init_with_debug(debug: bool) {
    let debug_enabled = debug || env_debug();
    DEBUG_ENABLED.store(debug_enabled, Ordering::SeqCst);

    let level = LogLevel::for_debug(debug_enabled);
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("taskweave={}", level.as_str())));

    let file = dirs::home_dir()
        .map(|h| h.join(".taskweave"))
        .and_then(|dir| {
            std::fs::create_dir_all(&dir).ok()?;
            let path = dir.join("taskweave.log");
            let file = File::create(&path).ok()?;
            LOG_PATH.set(path).ok();
            Some(file)
        });

    // A subscriber may already be installed (tests, embedding hosts).
    let _ = match file {
        Some(file) => tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_writer(Mutex::new(file))
            .with_ansi(false)
            .with_target(false)
            .try_init(),
        None => tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_writer(std::io::stderr)
            .try_init(),
    };
}

fn env_debug() -> bool {
    std::env::var(DEBUG_ENV)
        .map(|v| v == "1" || v.eq_ignore_ascii_case("true"))
        .unwrap_or(false)
}

/// Check if debug mode is enabled.
pub fn is_debug() -> bool {
    DEBUG_ENABLED.load(Ordering::Relaxed)
}

/// Path of the log file, once logging is initialized.
pub fn log_path() -> Option<&'static PathBuf> {
    LOG_PATH.get()
}
