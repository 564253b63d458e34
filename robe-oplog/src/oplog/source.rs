//! Primitives consumed from the connection layer
//!
//! The watcher never talks to a driver directly. It asks an [`OplogSource`]
//! for the cluster topology and a dedicated connection to the primary, then
//! uses that [`OplogConnection`] for the last-entry point query and for the
//! tailable cursor.

use crate::cluster::ClusterNode;
use crate::config::CursorConfig;
use crate::core::{RawLogEntry, ResumePosition, WatchResult};
use async_trait::async_trait;
use futures::stream::BoxStream;

/// Push-style stream of raw log entries.
///
/// `Some(Ok(_))` is data, `Some(Err(_))` is a cursor error and `None` is the
/// end of the stream.
pub type LogStream = BoxStream<'static, WatchResult<RawLogEntry>>;

/// Cursor filter: entries whose position is `>= from`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TailFilter {
    pub from: ResumePosition,
}

/// Cursor behaviour requested from the driver
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TailOptions {
    /// Keep the cursor open after the current results are exhausted
    pub tailable: bool,
    /// Block for more data instead of returning empty batches
    pub await_data: bool,
    /// Disable the server-side idle timeout
    pub no_cursor_timeout: bool,
    /// Let the server seek directly to the filter's timestamp
    pub oplog_replay: bool,
    /// Transient read retries at the cursor protocol level (`None` = infinite)
    pub max_read_retries: Option<u32>,
}

impl Default for TailOptions {
    fn default() -> Self {
        Self {
            tailable: true,
            await_data: true,
            no_cursor_timeout: true,
            oplog_replay: true,
            max_read_retries: None,
        }
    }
}

impl From<&CursorConfig> for TailOptions {
    fn from(config: &CursorConfig) -> Self {
        Self {
            tailable: true,
            await_data: config.await_data,
            no_cursor_timeout: config.no_cursor_timeout,
            oplog_replay: config.oplog_replay,
            max_read_retries: config.max_read_retries,
        }
    }
}

/// Entry point into a replicated store
#[async_trait]
pub trait OplogSource: Send + Sync + 'static {
    /// Current topology snapshot
    async fn topology(&self) -> WatchResult<Vec<ClusterNode>>;

    /// Open the connection used for tailing `node`'s replication log
    async fn connect(&self, node: &ClusterNode) -> WatchResult<Box<dyn OplogConnection>>;
}

/// Connection to one node's replication log
#[async_trait]
pub trait OplogConnection: Send + Sync {
    /// Most recent log entry (reverse natural order, limit 1)
    async fn last_entry(&self) -> WatchResult<Option<RawLogEntry>>;

    /// Open a tailable cursor over the log
    async fn open_tail(&self, filter: TailFilter, options: TailOptions) -> WatchResult<LogStream>;

    /// Close the connection
    async fn close(&self) -> WatchResult<()>;
}
