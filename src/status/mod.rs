//! The filesystem-backed status channel: the single cross-process source
//! of truth for a task (spec §3, §4.2).

pub mod model;
pub mod store;
pub mod watch;

pub use model::{TaskState, TaskStatus, OUTPUT_TRUNCATE_LIMIT};
pub use store::FsStatusStore;
pub use watch::{best_available, PollingWatcher, StatusWatcher, WatchHandle};
