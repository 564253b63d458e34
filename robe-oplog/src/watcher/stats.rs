use super::state::WatcherState;
use crate::core::ResumePosition;
use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};

/// Watcher statistics snapshot
#[derive(Debug, Clone, Serialize)]
pub struct WatcherStats {
    pub state: WatcherState,
    /// Address of the primary being tailed
    pub primary: Option<String>,
    pub subscriptions: usize,
    /// Raw entries read from the cursor (paused or not)
    pub entries_read: u64,
    /// Entries the translator ignored
    pub entries_skipped: u64,
    /// Events that matched at least one subscription
    pub events_dispatched: u64,
    /// Events dropped because the watcher was paused
    pub events_dropped_paused: u64,
    pub callback_failures: u64,
    pub cursors_opened: u64,
    pub reconnects: u64,
    /// Position of the last entry read
    pub last_position: Option<ResumePosition>,
}

#[derive(Debug, Default)]
pub(crate) struct Counters {
    pub entries_read: AtomicU64,
    pub entries_skipped: AtomicU64,
    pub events_dispatched: AtomicU64,
    pub events_dropped_paused: AtomicU64,
    pub callback_failures: AtomicU64,
    pub cursors_opened: AtomicU64,
    pub reconnects: AtomicU64,
}

impl Counters {
    pub fn incr(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    pub fn add(counter: &AtomicU64, n: u64) {
        counter.fetch_add(n, Ordering::Relaxed);
    }

    pub fn get(counter: &AtomicU64) -> u64 {
        counter.load(Ordering::Relaxed)
    }
}
