use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use std::time::Duration;

use crate::cluster::PrimarySelection;

/// Top-level configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct RobeConfig {
    pub watcher: WatcherConfig,
    pub logging: LoggingConfig,
}

/// Oplog watcher configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct WatcherConfig {
    /// Only deliver events for this database
    pub database: Option<String>,

    /// Delay before restarting a terminated cursor, in milliseconds
    pub reconnect_delay_ms: u64,

    /// Policy when topology reports several primaries
    pub primary_selection: PrimarySelection,

    /// Tailing cursor options
    pub cursor: CursorConfig,

    /// Buffered lifecycle signals per listener
    pub signal_capacity: usize,
}

/// Tailing cursor options
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CursorConfig {
    pub await_data: bool,
    pub no_cursor_timeout: bool,
    pub oplog_replay: bool,
    /// `None` retries transient read errors forever
    pub max_read_retries: Option<u32>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: String,
    /// `json` or `pretty`
    pub format: String,
}

impl Default for WatcherConfig {
    fn default() -> Self {
        Self {
            database: None,
            reconnect_delay_ms: 1000, // 1 second backoff
            primary_selection: PrimarySelection::Strict,
            cursor: CursorConfig::default(),
            signal_capacity: 64,
        }
    }
}

impl Default for CursorConfig {
    fn default() -> Self {
        Self {
            await_data: true,
            no_cursor_timeout: true,
            oplog_replay: true,
            max_read_retries: None,
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: "json".to_string(),
        }
    }
}

impl WatcherConfig {
    /// Watcher restricted to `database`
    pub fn for_database(database: impl Into<String>) -> Self {
        Self {
            database: Some(database.into()),
            ..Default::default()
        }
    }

    pub fn reconnect_delay(&self) -> Duration {
        Duration::from_millis(self.reconnect_delay_ms)
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<(), String> {
        if self.reconnect_delay_ms == 0 {
            return Err("reconnect_delay_ms must be greater than zero".to_string());
        }

        if self.signal_capacity == 0 {
            return Err("signal_capacity must be greater than zero".to_string());
        }

        if let Some(db) = &self.database {
            if db.is_empty() {
                return Err("database name cannot be empty".to_string());
            }
            if db.contains(['.', '$', '/', ' ']) {
                return Err(format!("invalid database name: {}", db));
            }
        }

        Ok(())
    }
}

impl RobeConfig {
    /// Load configuration from YAML file
    pub fn from_file<P: AsRef<Path>>(path: P) -> anyhow::Result<Self> {
        let content = fs::read_to_string(path)?;
        let config: RobeConfig = serde_yaml::from_str(&content)?;
        config
            .watcher
            .validate()
            .map_err(|e| anyhow::anyhow!("invalid watcher config: {}", e))?;
        Ok(config)
    }
}
