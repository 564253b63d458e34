//! Change-feed watcher for replicated document stores.
//!
//! Tails the replication log of a replica set's primary, turns raw entries
//! into insert/update/delete events and delivers them to subscribers keyed by
//! `<collection>:<operation>` topics. Cursors that end or fail are restarted
//! from the last entry read.
pub mod cluster;
pub mod config;
pub mod core;
pub mod logging;
pub mod oplog;
pub mod pool;
pub mod pubsub;
pub mod watcher;

// Re-export commonly used types
pub use cluster::{ClusterNode, NodeFlags, PrimarySelection, resolve_primary};
pub use config::{CursorConfig, LoggingConfig, RobeConfig, WatcherConfig};
pub use core::{ChangeEvent, OperationKind, RawLogEntry, ResumePosition, WatchError, WatchResult};
pub use oplog::{
    MemoryOplog, OplogConnection, OplogSource, ResumePoint, TailCursor, TailHandler, TailOptions,
};
pub use pool::{Collection, ConnectionPool, Database};
pub use pubsub::{Callback, SubscriptionRegistry, TopicPattern, callback};
pub use watcher::{Watcher, WatcherSignal, WatcherState, WatcherStats};
