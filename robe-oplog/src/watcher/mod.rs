//! Oplog watcher: lifecycle, reconnects and event delivery
pub mod controller;
pub mod signals;
pub mod state;
pub mod stats;


pub use controller::Watcher;
pub use signals::WatcherSignal;
pub use state::WatcherState;
pub use stats::WatcherStats;
