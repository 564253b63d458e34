//! Oplog access: source abstraction, resume tracking, tailing and translation
pub mod memory;
pub mod resume;
pub mod source;
pub mod tailer;
pub mod translate;

pub use memory::MemoryOplog;
pub use resume::{ResumePoint, resolve_resume_position};
pub use source::{LogStream, OplogConnection, OplogSource, TailFilter, TailOptions};
pub use tailer::{TailCursor, TailHandler, open_tail};
pub use translate::{SkipReason, classify, translate};
