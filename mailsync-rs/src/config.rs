use crate::error::{Result, SyncError};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Default number of concurrent fetch workers.
pub const DEFAULT_WORKERS: usize = 16;

/// Default retry budget for transient fetch failures.
pub const DEFAULT_MAX_RETRIES: u32 = 3;

/// Default capacity of the identifier queue feeding the worker pool.
pub const DEFAULT_QUEUE_CAPACITY: usize = 256;

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Config {
    #[serde(default = "default_log_level")]
    pub log_level: String,

    #[serde(default, rename = "account")]
    pub accounts: Vec<AccountConfig>,

    #[serde(default)]
    pub sync: SyncSettings,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct AccountConfig {
    pub name: String,
    /// Directory holding this account's SQLite store and token file.
    pub data_dir: PathBuf,
    pub client_id: String,
    pub client_secret: String,
}

/// Engine tuning knobs, passed into the orchestrator explicitly.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct SyncSettings {
    #[serde(default = "default_workers")]
    pub workers: usize,

    #[serde(default = "default_max_retries")]
    pub max_retries: u32,

    #[serde(default = "default_queue_capacity")]
    pub queue_capacity: usize,

    /// Fraction of attempted fetches that may fail before the run is
    /// abandoned without a checkpoint commit.
    #[serde(default = "default_failure_abort_threshold")]
    pub failure_abort_threshold: f64,
}

impl Default for SyncSettings {
    fn default() -> Self {
        SyncSettings {
            workers: DEFAULT_WORKERS,
            max_retries: DEFAULT_MAX_RETRIES,
            queue_capacity: DEFAULT_QUEUE_CAPACITY,
            failure_abort_threshold: 0.5,
        }
    }
}

impl Config {
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(&path).map_err(|e| {
            SyncError::Config(format!(
                "failed to read {}: {}",
                path.as_ref().display(),
                e
            ))
        })?;

        toml::from_str(&content).map_err(|e| SyncError::Config(e.to_string()))
    }

    /// Select an account by name, or the first configured account.
    pub fn account(&self, name: Option<&str>) -> Result<&AccountConfig> {
        if self.accounts.is_empty() {
            return Err(SyncError::Config(
                "no [[account]] entries configured".to_string(),
            ));
        }

        match name {
            None => Ok(&self.accounts[0]),
            Some(wanted) => self
                .accounts
                .iter()
                .find(|a| a.name == wanted)
                .ok_or_else(|| {
                    let available: Vec<&str> =
                        self.accounts.iter().map(|a| a.name.as_str()).collect();
                    SyncError::Config(format!(
                        "account '{}' not found, available: {}",
                        wanted,
                        available.join(", ")
                    ))
                }),
        }
    }

    pub fn account_names(&self) -> Vec<&str> {
        self.accounts.iter().map(|a| a.name.as_str()).collect()
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_workers() -> usize {
    DEFAULT_WORKERS
}

fn default_max_retries() -> u32 {
    DEFAULT_MAX_RETRIES
}

fn default_queue_capacity() -> usize {
    DEFAULT_QUEUE_CAPACITY
}

fn default_failure_abort_threshold() -> f64 {
    0.5
}
