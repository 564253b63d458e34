//! Watcher lifecycle controller
//!
//! ```text
//! idle --start--> starting --ok--> active <--pause/resume--> paused
//!                    |                 \                      /
//!                    +--err--> idle     +--------stop--------+
//!                                                |
//!                                    stopping --> stopped --start--> starting
//! ```
//!
//! The controller owns the one connection and tailing cursor of a watcher.
//! When the cursor ends or fails while the watcher is active or paused, a
//! restart is scheduled after `reconnect_delay`; it re-resolves the primary
//! and resumes from the last entry read. Restarts never leave `stopping` or
//! `stopped`.

use super::signals::WatcherSignal;
use super::state::WatcherState;
use super::stats::{Counters, WatcherStats};
use crate::cluster::{ClusterNode, resolve_primary};
use crate::config::WatcherConfig;
use crate::core::{RawLogEntry, ResumePosition, WatchError, WatchResult};
use crate::oplog::{
    OplogConnection, OplogSource, ResumePoint, TailCursor, TailHandler, TailOptions, open_tail,
    resolve_resume_position, translate,
};
use crate::pubsub::{Callback, SubscriptionRegistry, TopicPattern};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use tokio::sync::{broadcast, oneshot};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

/// Change feed watcher
///
/// Cheap to clone; clones share the same cursor, registry and state.
#[derive(Clone)]
pub struct Watcher {
    inner: Arc<WatcherInner>,
}

struct WatcherInner {
    id: Uuid,
    config: WatcherConfig,
    source: Arc<dyn OplogSource>,
    registry: SubscriptionRegistry,
    state: Mutex<WatcherState>,
    /// Held for the whole of start, stop and cursor restarts
    session: tokio::sync::Mutex<Option<Session>>,
    /// Where the next cursor resumes
    checkpoint: Mutex<Option<ResumePoint>>,
    last_position: Mutex<Option<ResumePosition>>,
    primary: Mutex<Option<ClusterNode>>,
    /// Bumped for every cursor opened and on stop. Callbacks carrying an
    /// older value come from a cursor that is no longer current.
    generation: AtomicU64,
    /// An auto-start task has been spawned and has not run yet
    auto_start_pending: AtomicBool,
    reconnect_cancel: Mutex<Option<oneshot::Sender<()>>>,
    signals: broadcast::Sender<WatcherSignal>,
    counters: Counters,
}

/// Open connection with its tailing cursor
struct Session {
    node: ClusterNode,
    connection: Option<Box<dyn OplogConnection>>,
    cursor: Option<TailCursor>,
    resume: ResumePoint,
}

impl Session {
    async fn close(mut self) {
        if let Some(cursor) = self.cursor.take() {
            cursor.close().await;
        }
        if let Some(connection) = self.connection.take() {
            close_quietly(connection.as_ref(), &self.node).await;
        }
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        // Watcher dropped without stop(): the cursor closes itself on drop,
        // the connection is closed in the background
        let Some(connection) = self.connection.take() else {
            return;
        };
        let node = self.node.clone();
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                debug!("Closing connection to {} of a dropped watcher", node);
                handle.spawn(async move {
                    close_quietly(connection.as_ref(), &node).await;
                });
            }
            Err(_) => warn!("No runtime to close connection to {}", node),
        }
    }
}

/// Cursor callbacks routed back into the watcher
struct CursorEvents {
    watcher: Weak<WatcherInner>,
    generation: u64,
}

impl TailHandler for CursorEvents {
    fn on_data(&self, entry: RawLogEntry) {
        if let Some(watcher) = self.watcher.upgrade() {
            watcher.handle_entry(self.generation, entry);
        }
    }

    fn on_error(&self, error: WatchError) {
        if let Some(watcher) = self.watcher.upgrade() {
            watcher.handle_cursor_end(self.generation, Some(error));
        }
    }

    fn on_end(&self) {
        if let Some(watcher) = self.watcher.upgrade() {
            watcher.handle_cursor_end(self.generation, None);
        }
    }
}

impl Watcher {
    /// Create an idle watcher over `source`
    pub fn new(source: Arc<dyn OplogSource>, config: WatcherConfig) -> WatchResult<Self> {
        config.validate().map_err(WatchError::Config)?;

        let (signals, _) = broadcast::channel(config.signal_capacity);
        let id = Uuid::new_v4();

        info!(
            "Created oplog watcher {} (database: {})",
            id,
            config.database.as_deref().unwrap_or("*")
        );

        Ok(Self {
            inner: Arc::new(WatcherInner {
                id,
                config,
                source,
                registry: SubscriptionRegistry::new(),
                state: Mutex::new(WatcherState::Idle),
                session: tokio::sync::Mutex::new(None),
                checkpoint: Mutex::new(None),
                last_position: Mutex::new(None),
                primary: Mutex::new(None),
                generation: AtomicU64::new(0),
                auto_start_pending: AtomicBool::new(false),
                reconnect_cancel: Mutex::new(None),
                signals,
                counters: Counters::default(),
            }),
        })
    }

    pub fn id(&self) -> Uuid {
        self.inner.id
    }

    pub fn config(&self) -> &WatcherConfig {
        &self.inner.config
    }

    /// Resolve the primary, find the resume position and open the cursor.
    ///
    /// No-op while starting, active or paused. On failure the watcher goes
    /// back to idle and the error is returned.
    pub async fn start(&self) -> WatchResult<()> {
        self.inner.start(false).await
    }

    /// Close the cursor and connection and drop every subscription.
    ///
    /// No-op when idle or already stopped. Teardown errors are logged, never
    /// returned.
    pub async fn stop(&self) {
        self.inner.stop().await
    }

    /// Stop delivering events. The cursor keeps reading and the resume
    /// position keeps advancing; events read while paused are dropped.
    pub fn pause(&self) {
        let mut state = self.inner.state.lock();
        if *state == WatcherState::Active {
            *state = WatcherState::Paused;
            info!("Oplog watcher {} paused", self.inner.id);
        } else {
            debug!("Ignoring pause, watcher {} is {}", self.inner.id, *state);
        }
    }

    /// Resume delivery after [`pause`](Self::pause)
    pub fn resume(&self) {
        let mut state = self.inner.state.lock();
        if *state == WatcherState::Paused {
            *state = WatcherState::Active;
            info!("Oplog watcher {} resumed", self.inner.id);
        } else {
            debug!("Ignoring resume, watcher {} is {}", self.inner.id, *state);
        }
    }

    /// Subscribe to every operation on `collection`
    pub fn watch(&self, collection: &str, callback: Callback) -> WatchResult<()> {
        let pattern = TopicPattern::collection(collection)?;
        self.inner.subscribe(pattern, callback);
        Ok(())
    }

    /// Remove a subscription added with [`watch`](Self::watch)
    pub fn unwatch(&self, collection: &str, callback: &Callback) -> WatchResult<()> {
        let pattern = TopicPattern::collection(collection)?;
        self.inner.registry.unsubscribe(&pattern, callback);
        Ok(())
    }

    /// Subscribe to a raw `<collection>:<operation>` pattern
    pub fn on(&self, pattern: &str, callback: Callback) -> WatchResult<()> {
        let pattern = TopicPattern::parse(pattern)?;
        self.inner.subscribe(pattern, callback);
        Ok(())
    }

    /// Subscribe to every event (`*:*`)
    pub fn on_any(&self, callback: Callback) {
        self.inner.subscribe(TopicPattern::any(), callback);
    }

    /// Remove a subscription added with [`on`](Self::on)
    pub fn off(&self, pattern: &str, callback: &Callback) -> WatchResult<()> {
        let pattern = TopicPattern::parse(pattern)?;
        self.inner.registry.unsubscribe(&pattern, callback);
        Ok(())
    }

    /// Listen for lifecycle signals emitted from now on
    pub fn signals(&self) -> broadcast::Receiver<WatcherSignal> {
        self.inner.signals.subscribe()
    }

    pub fn state(&self) -> WatcherState {
        self.inner.state()
    }

    pub fn is_paused(&self) -> bool {
        self.state() == WatcherState::Paused
    }

    pub fn subscription_count(&self) -> usize {
        self.inner.registry.len()
    }

    /// Registered patterns, in display form
    pub fn topics(&self) -> Vec<String> {
        self.inner.registry.topics()
    }

    pub fn stats(&self) -> WatcherStats {
        let inner = &self.inner;
        let counters = &inner.counters;

        WatcherStats {
            state: inner.state(),
            primary: inner.primary.lock().as_ref().map(|n| n.address()),
            subscriptions: inner.registry.len(),
            entries_read: Counters::get(&counters.entries_read),
            entries_skipped: Counters::get(&counters.entries_skipped),
            events_dispatched: Counters::get(&counters.events_dispatched),
            events_dropped_paused: Counters::get(&counters.events_dropped_paused),
            callback_failures: Counters::get(&counters.callback_failures),
            cursors_opened: Counters::get(&counters.cursors_opened),
            reconnects: Counters::get(&counters.reconnects),
            last_position: *inner.last_position.lock(),
        }
    }
}

impl WatcherInner {
    fn state(&self) -> WatcherState {
        *self.state.lock()
    }

    fn set_state(&self, state: WatcherState) {
        *self.state.lock() = state;
    }

    fn is_current(&self, generation: u64) -> bool {
        self.generation.load(Ordering::SeqCst) == generation
    }

    fn emit(&self, signal: WatcherSignal) {
        // No listeners is fine
        let _ = self.signals.send(signal);
    }

    /// With `auto_start` the watcher only starts if it is still idle and the
    /// auto-start was not withdrawn by `stop()` once the lifecycle lock is
    /// held.
    async fn start(self: &Arc<Self>, auto_start: bool) -> WatchResult<()> {
        if !auto_start && self.state().is_running() {
            debug!("Oplog watcher {} already running", self.id);
            return Ok(());
        }

        let mut session = self.session.lock().await;

        let previous = {
            let mut state = self.state.lock();
            // stop() withdraws a pending auto-start by clearing the flag
            let pending = self.auto_start_pending.swap(false, Ordering::SeqCst);
            if auto_start && (!pending || *state != WatcherState::Idle) {
                debug!("Auto-start of watcher {} withdrawn", self.id);
                return Ok(());
            }
            if state.is_running() {
                return Ok(());
            }
            std::mem::replace(&mut *state, WatcherState::Starting)
        };

        if previous == WatcherState::Stopped {
            // Restart from the log head, not from where the last run stopped
            *self.checkpoint.lock() = None;
        }

        info!("Starting oplog watcher {}", self.id);

        match self.open_session().await {
            Ok(opened) => {
                info!(
                    "Oplog watcher {} tailing {} from {}",
                    self.id, opened.node, opened.resume.position
                );
                *session = Some(opened);
                self.set_state(WatcherState::Active);
                self.emit(WatcherSignal::Started);
                Ok(())
            }
            Err(e) => {
                self.set_state(WatcherState::Idle);
                error!("Failed to start oplog watcher {}: {}", self.id, e);
                Err(e)
            }
        }
    }

    async fn stop(self: &Arc<Self>) {
        let mut session = self.session.lock().await;

        {
            let mut state = self.state.lock();
            let pending = self.auto_start_pending.swap(false, Ordering::SeqCst);
            match *state {
                WatcherState::Idle if pending => {
                    debug!("Withdrawing pending auto-start of watcher {}", self.id);
                    *state = WatcherState::Stopping;
                }
                WatcherState::Idle | WatcherState::Stopped => {
                    debug!("Oplog watcher {} not running, nothing to stop", self.id);
                    return;
                }
                _ => *state = WatcherState::Stopping,
            }
        }

        info!("Stopping oplog watcher {}", self.id);

        self.generation.fetch_add(1, Ordering::SeqCst);
        self.cancel_reconnect();

        if let Some(current) = session.take() {
            current.close().await;
        }

        *self.primary.lock() = None;
        self.registry.clear();
        self.set_state(WatcherState::Stopped);

        info!("Oplog watcher {} stopped", self.id);
        self.emit(WatcherSignal::Stopped);
    }

    /// Primary -> connection -> resume position -> cursor
    async fn open_session(self: &Arc<Self>) -> WatchResult<Session> {
        let topology = self.source.topology().await?;
        let node = resolve_primary(&topology, self.config.primary_selection)?;
        let connection = self.source.connect(&node).await?;

        let checkpoint = *self.checkpoint.lock();
        let resume = match resolve_resume_position(connection.as_ref(), checkpoint).await {
            Ok(resume) => resume,
            Err(e) => {
                close_quietly(connection.as_ref(), &node).await;
                return Err(e);
            }
        };

        let generation = self.generation.fetch_add(1, Ordering::SeqCst) + 1;
        *self.checkpoint.lock() = Some(resume);

        let handler = CursorEvents {
            watcher: Arc::downgrade(self),
            generation,
        };
        let options = TailOptions::from(&self.config.cursor);

        let cursor = match open_tail(connection.as_ref(), resume, options, handler).await {
            Ok(cursor) => cursor,
            Err(e) => {
                close_quietly(connection.as_ref(), &node).await;
                return Err(e);
            }
        };

        Counters::incr(&self.counters.cursors_opened);
        *self.primary.lock() = Some(node.clone());

        Ok(Session {
            node,
            connection: Some(connection),
            cursor: Some(cursor),
            resume,
        })
    }

    fn subscribe(self: &Arc<Self>, pattern: TopicPattern, callback: Callback) {
        self.registry.subscribe(pattern, callback);

        if self.state() == WatcherState::Idle
            && !self.auto_start_pending.swap(true, Ordering::SeqCst)
        {
            self.spawn_auto_start();
        }
    }

    fn spawn_auto_start(self: &Arc<Self>) {
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                let watcher = Arc::clone(self);
                handle.spawn(async move {
                    if let Err(e) = watcher.start(true).await {
                        watcher.emit(WatcherSignal::error(e));
                    }
                });
            }
            Err(e) => {
                self.auto_start_pending.store(false, Ordering::SeqCst);
                let err = WatchError::Runtime(format!("cannot auto-start watcher: {}", e));
                warn!("Oplog watcher {}: {}", self.id, err);
                self.emit(WatcherSignal::error(err));
            }
        }
    }

    fn handle_entry(&self, generation: u64, entry: RawLogEntry) {
        if !self.is_current(generation) {
            debug!("Dropping entry {} from a stale cursor", entry.position);
            return;
        }

        Counters::incr(&self.counters.entries_read);
        *self.checkpoint.lock() = Some(ResumePoint::after(entry.position));
        *self.last_position.lock() = Some(entry.position);

        let Some(event) = translate(&entry, self.config.database.as_deref()) else {
            Counters::incr(&self.counters.entries_skipped);
            return;
        };

        match self.state() {
            WatcherState::Paused => {
                Counters::incr(&self.counters.events_dropped_paused);
                debug!("Paused, dropping {} at {}", event.topic(), event.position);
                return;
            }
            WatcherState::Stopping | WatcherState::Stopped => return,
            _ => {}
        }

        let outcome = self.registry.dispatch(&event);
        if outcome.matched == 0 {
            return;
        }

        Counters::incr(&self.counters.events_dispatched);
        Counters::add(
            &self.counters.callback_failures,
            outcome.failures.len() as u64,
        );
        for failure in outcome.failures {
            self.emit(WatcherSignal::error(failure));
        }
    }

    fn handle_cursor_end(self: &Arc<Self>, generation: u64, error: Option<WatchError>) {
        if !self.is_current(generation) {
            debug!("Ignoring termination of a stale cursor");
            return;
        }

        match error {
            Some(e) if e.is_stream_error() => {
                warn!("Oplog cursor of watcher {} lost: {}", self.id, e);
                self.emit(WatcherSignal::error(e));
            }
            Some(e) => {
                error!("Oplog cursor of watcher {} failed: {}", self.id, e);
                self.emit(WatcherSignal::error(e));
            }
            None => {
                info!("Oplog cursor of watcher {} ended", self.id);
                self.emit(WatcherSignal::StreamEnded);
            }
        }

        // A restart scheduled while starting waits for start to finish and
        // then runs only if it succeeded
        let state = self.state();
        if !state.is_running() {
            info!("Not reconnecting, watcher {} is {}", self.id, state);
            return;
        }

        self.schedule_reconnect(generation, 1);
    }

    fn schedule_reconnect(self: &Arc<Self>, generation: u64, attempt: u32) {
        let delay = self.config.reconnect_delay();
        let (cancel_tx, cancel_rx) = oneshot::channel::<()>();

        if let Some(previous) = self.reconnect_cancel.lock().replace(cancel_tx) {
            let _ = previous.send(());
        }

        info!(
            "Reconnecting oplog cursor of watcher {} in {:?} (attempt {})",
            self.id, delay, attempt
        );
        self.emit(WatcherSignal::Reconnecting { attempt, delay });

        let watcher = Arc::downgrade(self);
        tokio::spawn(async move {
            tokio::select! {
                _ = tokio::time::sleep(delay) => {}
                _ = cancel_rx => {
                    debug!("Pending reconnect cancelled");
                    return;
                }
            }

            if let Some(watcher) = watcher.upgrade() {
                watcher.restart(generation, attempt).await;
            }
        });
    }

    fn cancel_reconnect(&self) {
        if let Some(cancel) = self.reconnect_cancel.lock().take() {
            let _ = cancel.send(());
        }
    }

    async fn restart(self: &Arc<Self>, generation: u64, attempt: u32) {
        let mut session = self.session.lock().await;

        let state = self.state();
        if !state.allows_reconnect() || !self.is_current(generation) {
            info!("Reconnect declined, watcher {} is {}", self.id, state);
            return;
        }

        if let Some(previous) = session.take() {
            previous.close().await;
        }

        match self.open_session().await {
            Ok(opened) => {
                let from = opened.resume.position;
                info!(
                    "Oplog watcher {} reconnected to {} from {}",
                    self.id, opened.node, from
                );
                *session = Some(opened);
                Counters::incr(&self.counters.reconnects);
                self.emit(WatcherSignal::Reconnected { from });
            }
            Err(e) => {
                error!(
                    "Reconnect attempt {} of watcher {} failed: {}",
                    attempt, self.id, e
                );
                *self.primary.lock() = None;
                self.emit(WatcherSignal::error(e));

                let current = self.generation.load(Ordering::SeqCst);
                self.schedule_reconnect(current, attempt.saturating_add(1));
            }
        }
    }
}

async fn close_quietly(connection: &dyn OplogConnection, node: &ClusterNode) {
    if let Err(e) = connection.close().await {
        warn!("Failed to close connection to {}: {}", node, e);
    }
}
