use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Position of an entry in the replication log
///
/// Ordered like an oplog timestamp: seconds first, then the per-second
/// increment. Positions are unique within one log.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ResumePosition {
    pub time: u32,
    pub increment: u32,
}

impl ResumePosition {
    pub const fn new(time: u32, increment: u32) -> Self {
        Self { time, increment }
    }

    /// Position representing the current wall-clock second
    pub fn now() -> Self {
        let secs = Utc::now().timestamp();
        Self {
            time: u32::try_from(secs).unwrap_or(u32::MAX),
            increment: 0,
        }
    }
}

impl fmt::Display for ResumePosition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Timestamp({}, {})", self.time, self.increment)
    }
}

/// Raw entry as stored in the replication log
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawLogEntry {
    /// Log position
    #[serde(rename = "ts")]
    pub position: ResumePosition,
    /// Operation code (`i`, `u`, `d`, `c`, `n`, ...)
    pub op: String,
    /// Namespace in `database.collection` form
    pub ns: String,
    /// Operation document
    #[serde(rename = "o")]
    pub payload: serde_json::Value,
}

impl RawLogEntry {
    pub fn new(
        position: ResumePosition,
        op: impl Into<String>,
        ns: impl Into<String>,
        payload: serde_json::Value,
    ) -> Self {
        Self {
            position,
            op: op.into(),
            ns: ns.into(),
            payload,
        }
    }
}

/// Kind of change carried by a translated event
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OperationKind {
    Insert,
    Update,
    Delete,
}

impl OperationKind {
    pub const ALL: [OperationKind; 3] = [Self::Insert, Self::Update, Self::Delete];

    /// Map a raw oplog operation code, `None` for codes that carry no
    /// document change (commands, no-ops, ...)
    pub fn from_code(code: &str) -> Option<Self> {
        match code {
            "i" => Some(Self::Insert),
            "u" => Some(Self::Update),
            "d" => Some(Self::Delete),
            _ => None,
        }
    }

    /// Raw oplog operation code for this kind
    pub fn code(&self) -> &'static str {
        match self {
            Self::Insert => "i",
            Self::Update => "u",
            Self::Delete => "d",
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Insert => "insert",
            Self::Update => "update",
            Self::Delete => "delete",
        }
    }
}

impl fmt::Display for OperationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for OperationKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "insert" => Ok(Self::Insert),
            "update" => Ok(Self::Update),
            "delete" => Ok(Self::Delete),
            other => Err(format!("unknown operation kind: {}", other)),
        }
    }
}

/// Semantic change derived from a raw log entry
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChangeEvent {
    pub database: String,
    pub collection: String,
    pub kind: OperationKind,
    pub payload: serde_json::Value,
    pub position: ResumePosition,
}

impl ChangeEvent {
    /// Concrete `<collection>:<kind>` topic this event is published on
    pub fn topic(&self) -> String {
        format!("{}:{}", self.collection, self.kind)
    }
}
