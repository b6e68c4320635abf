//! Configuration management for dbsnap.
//!
//! Loads configuration from a TOML file, then applies environment variable
//! overrides (`MONGODB_URI`, `BACKUP_DIR`, `MAX_BACKUPS`).

use crate::archive::codec::TaggingPolicy;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub database: DatabaseConfig,
    #[serde(default)]
    pub backup: BackupConfig,
    #[serde(default)]
    pub log: LogConfig,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DatabaseConfig {
    /// MongoDB connection string; must name a default database
    #[serde(default)]
    pub uri: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackupConfig {
    /// Directory holding `backup_*.json.gz` archives
    #[serde(default = "default_backup_dir")]
    pub dir: PathBuf,

    /// Number of archives kept by the retention sweep
    #[serde(default = "default_max_backups")]
    pub max_backups: usize,

    /// Which object identifiers get the `$oid` tag on export
    #[serde(default)]
    pub tagging: TaggingPolicy,

    /// Pause before a restore starts deleting, when not prompting
    #[serde(default = "default_restore_delay_secs")]
    pub restore_delay_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogConfig {
    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub level: String,
}

// Default values
fn default_backup_dir() -> PathBuf {
    PathBuf::from("backups")
}

fn default_max_backups() -> usize {
    30
}

fn default_restore_delay_secs() -> u64 {
    5
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for BackupConfig {
    fn default() -> Self {
        Self {
            dir: default_backup_dir(),
            max_backups: default_max_backups(),
            tagging: TaggingPolicy::default(),
            restore_delay_secs: default_restore_delay_secs(),
        }
    }
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

impl BackupConfig {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            ..Self::default()
        }
    }

    pub fn restore_delay(&self) -> Duration {
        Duration::from_secs(self.restore_delay_secs)
    }
}

impl Config {
    /// Load configuration from a TOML file
    pub fn from_file(path: &Path) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Config = toml::from_str(&content)?;
        Ok(config)
    }

    /// Apply environment variable overrides on top of file/default values
    pub fn with_env_overrides(mut self) -> Self {
        if let Ok(uri) = std::env::var("MONGODB_URI") {
            self.database.uri = Some(uri);
        }
        if let Ok(dir) = std::env::var("BACKUP_DIR") {
            self.backup.dir = PathBuf::from(dir);
        }
        if let Some(max) = std::env::var("MAX_BACKUPS")
            .ok()
            .and_then(|v| v.parse().ok())
        {
            self.backup.max_backups = max;
        }
        self
    }
}
