use serde::{Deserialize, Serialize};
use std::fmt;

/// Watcher lifecycle state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WatcherState {
    /// Created, never started (or last start failed)
    #[default]
    Idle,
    /// Resolving primary and resume position, opening the cursor
    Starting,
    /// Tailing and delivering events
    Active,
    /// Tailing, events are dropped before dispatch
    Paused,
    /// Tearing down cursor and connection
    Stopping,
    /// Torn down
    Stopped,
}

impl WatcherState {
    /// Starting, active or paused
    pub fn is_running(&self) -> bool {
        matches!(self, Self::Starting | Self::Active | Self::Paused)
    }

    /// Only a live watcher may restart its cursor
    pub fn allows_reconnect(&self) -> bool {
        matches!(self, Self::Active | Self::Paused)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Starting => "starting",
            Self::Active => "active",
            Self::Paused => "paused",
            Self::Stopping => "stopping",
            Self::Stopped => "stopped",
        }
    }
}

impl fmt::Display for WatcherState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
