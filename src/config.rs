use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use tracing::debug;

use crate::{Error, Result};

fn default_workspace() -> String {
    "default".to_string()
}

fn default_work_delay_ms() -> u64 {
    250
}

fn default_decompose_timeout_secs() -> u64 {
    30
}

fn default_notification_buffer() -> usize {
    256
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Config {
    /// Where the task store lives. Defaults to `~/.taskweave/data`.
    pub data_dir: Option<String>,
    #[serde(default = "default_workspace")]
    pub workspace: String,
    /// Duration of one simulated unit of work.
    #[serde(default = "default_work_delay_ms")]
    pub work_delay_ms: u64,
    #[serde(default = "default_decompose_timeout_secs")]
    pub decompose_timeout_secs: u64,
    #[serde(default = "default_notification_buffer")]
    pub notification_buffer: usize,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            data_dir: None,
            workspace: default_workspace(),
            work_delay_ms: default_work_delay_ms(),
            decompose_timeout_secs: default_decompose_timeout_secs(),
            notification_buffer: default_notification_buffer(),
        }
    }
}

impl Config {
    pub fn base_dir() -> Result<PathBuf> {
        Ok(dirs::home_dir().ok_or(Error::NoHomeDir)?.join(".taskweave"))
    }

    pub fn config_path() -> Result<PathBuf> {
        Ok(Self::base_dir()?.join("taskweave.toml"))
    }

    pub fn data_dir(&self) -> Result<PathBuf> {
        match &self.data_dir {
            Some(dir) => Ok(expand_tilde(dir)),
            None => Ok(Self::base_dir()?.join("data")),
        }
    }

    pub fn decompose_timeout(&self) -> Duration {
        Duration::from_secs(self.decompose_timeout_secs)
    }

    pub fn load() -> Result<Self> {
        Self::load_from(&Self::config_path()?)
    }

    pub fn load_from(path: &Path) -> Result<Self> {
        debug!(path = %path.display(), "loading config");
        if !path.exists() {
            debug!("config file not found, using defaults");
            return Ok(Self::default());
        }
        let config: Self = toml::from_str(&fs::read_to_string(path)?)?;
        debug!(
            workspace = %config.workspace,
            data_dir = ?config.data_dir,
            work_delay_ms = config.work_delay_ms,
            "config loaded"
        );
        Ok(config)
    }

    pub fn save(&self) -> Result<()> {
        let base = Self::base_dir()?;
        if !base.exists() {
            fs::create_dir_all(&base)?;
        }
        self.save_to(&Self::config_path()?)
    }

    pub fn save_to(&self, path: &Path) -> Result<()> {
        fs::write(path, toml::to_string_pretty(self)?)?;
        debug!(path = %path.display(), "config saved");
        Ok(())
    }

    pub fn ensure_dirs(&self) -> Result<()> {
        let base = Self::base_dir()?;
        let data = self.data_dir()?;
        debug!(base = %base.display(), data = %data.display(), "ensuring directories");
        if !base.exists() {
            fs::create_dir_all(&base)?;
        }
        if !data.exists() {
            fs::create_dir_all(&data)?;
        }
        Ok(())
    }
}

fn expand_tilde(path: &str) -> PathBuf {
    if let Some(rest) = path.strip_prefix("~/") {
        if let Some(home) = dirs::home_dir() {
            return home.join(rest);
        }
    }
    PathBuf::from(path)
}
