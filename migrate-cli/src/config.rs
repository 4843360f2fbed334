//! Tool configuration
//!
//! Lock lease and pacing settings plus history retention, with sane
//! defaults, loaded from an optional TOML file in the platform config
//! directory.

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct MigrationConfig {
    pub lock: LockConfig,
    pub history: HistoryConfig,
}

/// Target lock lease and acquisition pacing.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LockConfig {
    /// Lease duration granted per acquisition. An executor that dies holding
    /// the lock stops blocking the target once this expires.
    pub lease_secs: u64,
    /// Bounded wait for acquiring the lock before the attempt fails.
    pub acquire_timeout_secs: u64,
    /// Base delay between acquisition attempts.
    pub retry_delay_ms: u64,
    /// Add random jitter to the retry delay.
    pub jitter: bool,
}

impl Default for LockConfig {
    fn default() -> Self {
        Self {
            lease_secs: 120,
            acquire_timeout_secs: 30,
            retry_delay_ms: 500,
            jitter: true,
        }
    }
}

impl LockConfig {
    pub fn lease(&self) -> Duration {
        Duration::from_secs(self.lease_secs)
    }

    pub fn acquire_timeout(&self) -> Duration {
        Duration::from_secs(self.acquire_timeout_secs)
    }

    pub fn retry_delay(&self) -> Duration {
        Duration::from_millis(self.retry_delay_ms)
    }
}

/// Migration history listing and storage.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HistoryConfig {
    /// Override for the history file location. Defaults to the platform
    /// data directory.
    pub path: Option<PathBuf>,
    /// How many attempts `history` lists by default.
    pub limit: usize,
}

impl Default for HistoryConfig {
    fn default() -> Self {
        Self {
            path: None,
            limit: 20,
        }
    }
}

impl MigrationConfig {
    /// Load configuration. An explicit path must exist and parse; without
    /// one, the default location is used if present, defaults otherwise.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        match path {
            Some(path) => Self::load_from(path),
            None => match Self::default_path() {
                Some(path) if path.exists() => Self::load_from(&path),
                _ => Ok(Self::default()),
            },
        }
    }

    pub fn load_from(path: &Path) -> Result<Self> {
        let content = fs_read(path)?;
        toml::from_str(&content)
            .with_context(|| format!("invalid configuration: {}", path.display()))
    }

    pub fn default_path() -> Option<PathBuf> {
        dirs::config_dir().map(|dir| dir.join("migrate-cli").join("config.toml"))
    }

    pub fn builder() -> MigrationConfigBuilder {
        MigrationConfigBuilder::default()
    }
}

fn fs_read(path: &Path) -> Result<String> {
    std::fs::read_to_string(path)
        .with_context(|| format!("failed to read configuration: {}", path.display()))
}

/// Builder for [`MigrationConfig`].
#[derive(Debug, Default)]
pub struct MigrationConfigBuilder {
    config: MigrationConfig,
}

impl MigrationConfigBuilder {
    pub fn lease_secs(mut self, secs: u64) -> Self {
        self.config.lock.lease_secs = secs;
        self
    }

    pub fn acquire_timeout_secs(mut self, secs: u64) -> Self {
        self.config.lock.acquire_timeout_secs = secs;
        self
    }

    pub fn retry_delay_ms(mut self, ms: u64) -> Self {
        self.config.lock.retry_delay_ms = ms;
        self
    }

    pub fn jitter(mut self, enabled: bool) -> Self {
        self.config.lock.jitter = enabled;
        self
    }

    pub fn history_path(mut self, path: PathBuf) -> Self {
        self.config.history.path = Some(path);
        self
    }

    pub fn history_limit(mut self, limit: usize) -> Self {
        self.config.history.limit = limit;
        self
    }

    pub fn build(self) -> MigrationConfig {
        self.config
    }
}
