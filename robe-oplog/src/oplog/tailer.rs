//! Log tailer - owns one long-lived tailing cursor
//!
//! The cursor runs on its own task and reports through a [`TailHandler`]:
//! - `on_data` for every entry past the resume point, in log order
//! - `on_error` when the stream fails, after which the task exits
//! - `on_end` when the stream terminates, after which the task exits
//!
//! Closing the cursor does not fire `on_end`.

use super::resume::ResumePoint;
use super::source::{LogStream, OplogConnection, TailFilter, TailOptions};
use crate::core::{RawLogEntry, WatchError, WatchResult};
use futures::StreamExt;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Counter for cursor ids (log correlation only)
static CURSOR_ID_COUNTER: AtomicU64 = AtomicU64::new(1);

/// Receiver of cursor lifecycle callbacks
pub trait TailHandler: Send + Sync + 'static {
    fn on_data(&self, entry: RawLogEntry);
    fn on_error(&self, error: WatchError);
    fn on_end(&self);
}

/// Handle to a running tailing cursor
pub struct TailCursor {
    id: u64,
    resume: ResumePoint,
    close_tx: Option<oneshot::Sender<()>>,
    task: Option<JoinHandle<()>>,
}

/// Open a tailing cursor on `connection` starting at `resume`
pub async fn open_tail<H: TailHandler>(
    connection: &dyn OplogConnection,
    resume: ResumePoint,
    options: TailOptions,
    handler: H,
) -> WatchResult<TailCursor> {
    let filter = TailFilter {
        from: resume.position,
    };
    let stream = connection.open_tail(filter, options).await?;

    Ok(TailCursor::spawn(stream, resume, handler))
}

impl TailCursor {
    /// Start consuming `stream` on a new task
    pub fn spawn<H: TailHandler>(stream: LogStream, resume: ResumePoint, handler: H) -> Self {
        let id = CURSOR_ID_COUNTER.fetch_add(1, Ordering::Relaxed);
        let (close_tx, close_rx) = oneshot::channel();

        info!("Opening oplog cursor {} from {}", id, resume.position);

        let task = tokio::spawn(run_cursor(id, stream, resume, handler, close_rx));

        Self {
            id,
            resume,
            close_tx: Some(close_tx),
            task: Some(task),
        }
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    /// Resume point the cursor was opened with
    pub fn resume_point(&self) -> ResumePoint {
        self.resume
    }

    /// Whether the cursor task has exited
    pub fn is_finished(&self) -> bool {
        self.task.as_ref().is_none_or(|t| t.is_finished())
    }

    /// Close the cursor and wait for its task to exit
    pub async fn close(mut self) {
        if let Some(tx) = self.close_tx.take() {
            let _ = tx.send(());
        }

        if let Some(task) = self.task.take() {
            if let Err(e) = task.await {
                if e.is_panic() {
                    warn!("Oplog cursor {} task panicked", self.id);
                }
            }
        }

        debug!("Oplog cursor {} closed", self.id);
    }
}

impl Drop for TailCursor {
    fn drop(&mut self) {
        // A dropped handle closes the cursor; send() fails if the task is gone
        if let Some(tx) = self.close_tx.take() {
            let _ = tx.send(());
        }
    }
}

async fn run_cursor<H: TailHandler>(
    id: u64,
    mut stream: LogStream,
    resume: ResumePoint,
    handler: H,
    mut close_rx: oneshot::Receiver<()>,
) {
    loop {
        tokio::select! {
            biased;
            _ = &mut close_rx => {
                debug!("Oplog cursor {} received close", id);
                return;
            }
            item = stream.next() => {
                match item {
                    Some(Ok(entry)) => {
                        if resume.admits(entry.position) {
                            handler.on_data(entry);
                        } else {
                            debug!("Cursor {} skipping boundary entry {}", id, entry.position);
                        }
                    }
                    Some(Err(e)) => {
                        warn!("Oplog cursor {} failed: {}", id, e);
                        handler.on_error(e);
                        return;
                    }
                    None => {
                        info!("Oplog cursor {} reached end of stream", id);
                        handler.on_end();
                        return;
                    }
                }
            }
        }
    }
}
