//! Resume position tracking
//!
//! Decides where a new tailing cursor starts reading.

use super::source::OplogConnection;
use crate::core::{ResumePosition, WatchResult};
use serde::{Deserialize, Serialize};
use tracing::debug;

/// Starting point for a tailing cursor
///
/// The cursor is always opened with `position >= self.position`. When
/// `exclusive` is set the entry at `position` has already happened (or was
/// already delivered) and the tailer drops it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResumePoint {
    pub position: ResumePosition,
    pub exclusive: bool,
}

impl ResumePoint {
    /// Start after an entry that already exists
    pub fn after(position: ResumePosition) -> Self {
        Self {
            position,
            exclusive: true,
        }
    }

    /// Start at `position`, inclusive
    pub fn at(position: ResumePosition) -> Self {
        Self {
            position,
            exclusive: false,
        }
    }

    /// Whether an entry at `position` lies past this point
    pub fn admits(&self, position: ResumePosition) -> bool {
        if self.exclusive {
            position > self.position
        } else {
            position >= self.position
        }
    }
}

/// Resolve where to resume tailing.
///
/// With a `checkpoint` (the watcher already read part of this log) the
/// checkpoint wins so that entries written while no cursor was open are not
/// skipped. Otherwise tailing starts after the log's newest entry, or at the
/// current wall-clock time when the log is empty. Only connection errors are
/// returned.
pub async fn resolve_resume_position(
    connection: &dyn OplogConnection,
    checkpoint: Option<ResumePoint>,
) -> WatchResult<ResumePoint> {
    let last = connection.last_entry().await?;

    let point = match (checkpoint, last) {
        (Some(checkpoint), _) => checkpoint,
        (None, Some(entry)) => ResumePoint::after(entry.position),
        (None, None) => ResumePoint::at(ResumePosition::now()),
    };

    debug!(
        "Resume position {} ({})",
        point.position,
        if point.exclusive { "exclusive" } else { "inclusive" }
    );

    Ok(point)
}
