use super::source::{LogStream, OplogConnection, OplogSource, TailFilter, TailOptions};
use crate::cluster::ClusterNode;
use crate::core::{RawLogEntry, ResumePosition, WatchError, WatchResult};
use async_trait::async_trait;
use futures::StreamExt;
use parking_lot::{Mutex, RwLock};
use std::collections::VecDeque;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use tokio::sync::mpsc;
use tokio_stream::wrappers::UnboundedReceiverStream;
use tracing::{debug, info};

/// Default number of entries kept in the log
pub const DEFAULT_MAX_ENTRIES: usize = 10_000;

/// In-process replicated log
///
/// Behaves like a capped oplog collection on a replica set:
/// - Fixed-size ring of entries with strictly increasing positions
/// - Configurable topology for primary resolution
/// - Tailable cursors that replay the backlog from a position and then
///   follow live appends with no gap in between
///
/// Cursor streams can be ended or failed on demand, which is how the
/// reconnect path of the watcher is exercised.
#[derive(Clone)]
pub struct MemoryOplog {
    inner: Arc<Inner>,
}

struct Inner {
    state: Mutex<LogState>,
    max_entries: usize,
    topology: RwLock<Vec<ClusterNode>>,
    refuse_connections: AtomicBool,
    next_connection_id: AtomicU64,
    live_connections: AtomicUsize,
    tails_opened: AtomicU64,
    tail_positions: Mutex<Vec<ResumePosition>>,
}

struct LogState {
    entries: VecDeque<RawLogEntry>,
    last_position: Option<ResumePosition>,
    tails: Vec<TailSender>,
}

struct TailSender {
    connection_id: u64,
    tx: mpsc::UnboundedSender<WatchResult<RawLogEntry>>,
}

impl MemoryOplog {
    /// Log with a single primary at `localhost:27017`
    pub fn new() -> Self {
        Self::with_topology(vec![ClusterNode::primary("localhost", 27017)], DEFAULT_MAX_ENTRIES)
    }

    pub fn with_topology(topology: Vec<ClusterNode>, max_entries: usize) -> Self {
        info!(
            "Initializing in-memory oplog ({} nodes, max {} entries)",
            topology.len(),
            max_entries
        );

        Self {
            inner: Arc::new(Inner {
                state: Mutex::new(LogState {
                    entries: VecDeque::with_capacity(max_entries.min(1024)),
                    last_position: None,
                    tails: Vec::new(),
                }),
                max_entries: max_entries.max(1),
                topology: RwLock::new(topology),
                refuse_connections: AtomicBool::new(false),
                next_connection_id: AtomicU64::new(1),
                live_connections: AtomicUsize::new(0),
                tails_opened: AtomicU64::new(0),
                tail_positions: Mutex::new(Vec::new()),
            }),
        }
    }

    /// Append an entry and push it to every open cursor
    pub fn append(&self, op: &str, ns: &str, payload: serde_json::Value) -> ResumePosition {
        let mut state = self.inner.state.lock();

        let now = ResumePosition::now();
        let position = match state.last_position {
            Some(last) if last.time >= now.time => {
                ResumePosition::new(last.time, last.increment + 1)
            }
            _ => ResumePosition::new(now.time, 1),
        };
        state.last_position = Some(position);

        let entry = RawLogEntry::new(position, op, ns, payload);

        if state.entries.len() >= self.inner.max_entries {
            if let Some(removed) = state.entries.pop_front() {
                debug!("Oplog full, removed entry {}", removed.position);
            }
        }
        state.entries.push_back(entry.clone());

        state.tails.retain(|t| t.tx.send(Ok(entry.clone())).is_ok());

        position
    }

    pub fn insert(&self, ns: &str, doc: serde_json::Value) -> ResumePosition {
        self.append("i", ns, doc)
    }

    pub fn update(&self, ns: &str, doc: serde_json::Value) -> ResumePosition {
        self.append("u", ns, doc)
    }

    pub fn remove(&self, ns: &str, doc: serde_json::Value) -> ResumePosition {
        self.append("d", ns, doc)
    }

    /// Database command entry (`c`), never translated into an event
    pub fn command(&self, ns: &str, doc: serde_json::Value) -> ResumePosition {
        self.append("c", ns, doc)
    }

    /// Terminate every open cursor stream
    pub fn end_tails(&self) -> usize {
        let mut state = self.inner.state.lock();
        let count = state.tails.len();
        state.tails.clear();
        info!("Ended {} oplog cursors", count);
        count
    }

    /// Fail every open cursor stream with a connection error
    pub fn fail_tails(&self, reason: &str) -> usize {
        let mut state = self.inner.state.lock();
        let count = state.tails.len();
        for tail in state.tails.drain(..) {
            let _ = tail
                .tx
                .send(Err(WatchError::CursorConnection(reason.to_string())));
        }
        info!("Failed {} oplog cursors: {}", count, reason);
        count
    }

    /// Replace the topology snapshot
    pub fn set_topology(&self, topology: Vec<ClusterNode>) {
        *self.inner.topology.write() = topology;
    }

    /// Refuse (or accept again) new connections
    pub fn refuse_connections(&self, refuse: bool) {
        self.inner.refuse_connections.store(refuse, Ordering::SeqCst);
    }

    /// Number of entries currently held
    pub fn len(&self) -> usize {
        self.inner.state.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Position of the newest entry
    pub fn last_position(&self) -> Option<ResumePosition> {
        self.inner.state.lock().entries.back().map(|e| e.position)
    }

    /// Cursors currently attached to the log
    pub fn open_tails(&self) -> usize {
        let mut state = self.inner.state.lock();
        state.tails.retain(|t| !t.tx.is_closed());
        state.tails.len()
    }

    /// Total cursors opened since creation
    pub fn tails_opened(&self) -> u64 {
        self.inner.tails_opened.load(Ordering::SeqCst)
    }

    /// Filter position of every cursor opened, in order
    pub fn tail_positions(&self) -> Vec<ResumePosition> {
        self.inner.tail_positions.lock().clone()
    }

    /// Connections opened and not yet closed
    pub fn live_connections(&self) -> usize {
        self.inner.live_connections.load(Ordering::SeqCst)
    }
}

impl Default for MemoryOplog {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl OplogSource for MemoryOplog {
    async fn topology(&self) -> WatchResult<Vec<ClusterNode>> {
        Ok(self.inner.topology.read().clone())
    }

    async fn connect(&self, node: &ClusterNode) -> WatchResult<Box<dyn OplogConnection>> {
        if self.inner.refuse_connections.load(Ordering::SeqCst) {
            return Err(WatchError::ConnectionFailed(format!(
                "{} refused connection",
                node
            )));
        }

        let known = self
            .inner
            .topology
            .read()
            .iter()
            .any(|n| n.host == node.host && n.port == node.port);
        if !known {
            return Err(WatchError::ConnectionFailed(format!(
                "{} is not part of the topology",
                node
            )));
        }

        let id = self.inner.next_connection_id.fetch_add(1, Ordering::SeqCst);
        self.inner.live_connections.fetch_add(1, Ordering::SeqCst);
        debug!("Opened oplog connection {} to {}", id, node);

        Ok(Box::new(MemoryConnection {
            id,
            inner: Arc::clone(&self.inner),
            closed: AtomicBool::new(false),
        }))
    }
}

/// Connection handed out by [`MemoryOplog`]
struct MemoryConnection {
    id: u64,
    inner: Arc<Inner>,
    closed: AtomicBool,
}

impl MemoryConnection {
    fn ensure_open(&self) -> WatchResult<()> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(WatchError::ConnectionFailed(format!(
                "connection {} is closed",
                self.id
            )));
        }
        Ok(())
    }
}

#[async_trait]
impl OplogConnection for MemoryConnection {
    async fn last_entry(&self) -> WatchResult<Option<RawLogEntry>> {
        self.ensure_open()?;
        Ok(self.inner.state.lock().entries.back().cloned())
    }

    async fn open_tail(&self, filter: TailFilter, options: TailOptions) -> WatchResult<LogStream> {
        self.ensure_open()?;

        let (tx, rx) = mpsc::unbounded_channel();
        let mut state = self.inner.state.lock();

        let mut replayed = 0;
        for entry in state.entries.iter().filter(|e| e.position >= filter.from) {
            let _ = tx.send(Ok(entry.clone()));
            replayed += 1;
        }

        // Non-tailable cursors end once the backlog is exhausted
        if options.tailable {
            state.tails.push(TailSender {
                connection_id: self.id,
                tx,
            });
        }
        drop(state);

        self.inner.tails_opened.fetch_add(1, Ordering::SeqCst);
        self.inner.tail_positions.lock().push(filter.from);

        debug!(
            "Connection {} opened cursor from {} ({} backlog entries)",
            self.id, filter.from, replayed
        );

        Ok(UnboundedReceiverStream::new(rx).boxed())
    }

    async fn close(&self) -> WatchResult<()> {
        if self.closed.swap(true, Ordering::SeqCst) {
            return Ok(());
        }

        // Closing the connection kills its cursors
        self.inner
            .state
            .lock()
            .tails
            .retain(|t| t.connection_id != self.id);
        self.inner.live_connections.fetch_sub(1, Ordering::SeqCst);
        debug!("Closed oplog connection {}", self.id);

        Ok(())
    }
}
