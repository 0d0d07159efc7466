//! Sync options and their YAML form
//!
//! ```yaml
//! process_timeout: 30      # seconds, fractions allowed
//! drain_timeout: 5
//! kill_on_timeout: true
//! pool:
//!   size: 3
//! ```
//!
//! Every field is optional and falls back to [`SyncOptions::default`].

use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

use crate::error::Result;

/// Worker pool settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PoolConfig {
    /// Number of worker threads
    pub size: usize,
    /// Jobs that may wait for a free worker before submissions are rejected
    pub queue_capacity: usize,
    /// Prefix of the worker thread names
    pub thread_name: String,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            size: 3,
            queue_capacity: 3,
            thread_name: "exec-util".to_string(),
        }
    }
}

/// Timeouts and pool settings for syncing on a process
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncOptions {
    /// How long to wait for the process to exit
    #[serde(with = "duration_secs")]
    pub process_timeout: Duration,

    /// How long to wait for each drain task once the process is done
    #[serde(with = "duration_secs")]
    pub drain_timeout: Duration,

    /// How long to wait for an internal pool's threads to exit
    #[serde(with = "duration_secs")]
    pub shutdown_timeout: Duration,

    /// Kill the process if it outlives `process_timeout`
    pub kill_on_timeout: bool,

    /// Settings for pools created by the sync functions
    pub pool: PoolConfig,
}

impl Default for SyncOptions {
    fn default() -> Self {
        Self {
            process_timeout: Duration::from_secs(10 * 60),
            drain_timeout: Duration::from_secs(60),
            shutdown_timeout: Duration::from_secs(60),
            kill_on_timeout: false,
            pool: PoolConfig::default(),
        }
    }
}

impl SyncOptions {
    /// Parse options from a YAML document
    pub fn from_yaml_str(yaml: &str) -> Result<Self> {
        Ok(serde_yaml::from_str(yaml)?)
    }

    /// Load options from a YAML file
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_yaml_str(&content)
    }

    /// Set the process exit timeout
    pub fn with_process_timeout(mut self, timeout: Duration) -> Self {
        self.process_timeout = timeout;
        self
    }

    /// Set the per-task drain timeout
    pub fn with_drain_timeout(mut self, timeout: Duration) -> Self {
        self.drain_timeout = timeout;
        self
    }

    /// Set the pool termination timeout
    pub fn with_shutdown_timeout(mut self, timeout: Duration) -> Self {
        self.shutdown_timeout = timeout;
        self
    }

    /// Kill the process when it times out
    pub fn with_kill_on_timeout(mut self, kill: bool) -> Self {
        self.kill_on_timeout = kill;
        self
    }

    /// Replace the pool settings
    pub fn with_pool(mut self, pool: PoolConfig) -> Self {
        self.pool = pool;
        self
    }
}

mod duration_secs {
    use serde::{Deserialize, Deserializer, Serializer, de};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_f64(value.as_secs_f64())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        let secs = f64::deserialize(deserializer)?;
        Duration::try_from_secs_f64(secs).map_err(de::Error::custom)
    }
}
