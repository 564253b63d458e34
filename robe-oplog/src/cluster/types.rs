use serde::{Deserialize, Serialize};
use std::fmt;

/// Node of a replicated cluster, as reported by topology metadata
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClusterNode {
    pub host: String,
    pub port: u16,
    /// Role and health flags
    pub flags: NodeFlags,
}

/// Node flags
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct NodeFlags {
    pub is_primary: bool,
    pub is_secondary: bool,
    pub is_arbiter: bool,
    pub is_fail: bool,
}

impl ClusterNode {
    pub fn primary(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
            flags: NodeFlags {
                is_primary: true,
                ..Default::default()
            },
        }
    }

    pub fn secondary(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
            flags: NodeFlags {
                is_secondary: true,
                ..Default::default()
            },
        }
    }

    /// Node is flagged writable and not marked failed
    pub fn is_primary(&self) -> bool {
        self.flags.is_primary && !self.flags.is_fail
    }

    /// `host:port`
    pub fn address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

impl fmt::Display for ClusterNode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.host, self.port)
    }
}

/// How to pick the primary when topology reports more than one
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PrimarySelection {
    /// More than one primary candidate is an error
    #[default]
    Strict,
    /// Take the first candidate; for drivers that already guarantee uniqueness
    FirstMatch,
}
