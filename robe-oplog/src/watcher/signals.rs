use crate::core::{ResumePosition, WatchError};
use std::sync::Arc;
use std::time::Duration;

/// Lifecycle notification broadcast to every listener
#[derive(Debug, Clone)]
pub enum WatcherSignal {
    /// Cursor opened, events are flowing
    Started,
    /// Watcher torn down
    Stopped,
    /// Asynchronous failure (auto-start, cursor, subscriber callback)
    Error(Arc<WatchError>),
    /// Cursor stream terminated
    StreamEnded,
    /// Cursor restart scheduled
    Reconnecting { attempt: u32, delay: Duration },
    /// Cursor restarted from `from`
    Reconnected { from: ResumePosition },
}

impl WatcherSignal {
    pub fn error(err: WatchError) -> Self {
        Self::Error(Arc::new(err))
    }

    pub fn is_error(&self) -> bool {
        matches!(self, Self::Error(_))
    }
}
