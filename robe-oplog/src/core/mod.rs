pub mod error;
pub mod types;

pub use error::{WatchError, WatchResult};
pub use types::{ChangeEvent, OperationKind, RawLogEntry, ResumePosition};
