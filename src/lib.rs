//! `taskdefer`: a filesystem-backed deferred/background task runtime.
//!
//! A task is captured as a [`capture::Capture`] (callable + context),
//! handed to [`facade::Runtime`] to spawn as a detached OS process running
//! the `taskdefer-worker` binary, and observed afterwards purely through
//! its `.status` file — the only channel a spawning process and its
//! worker share (see [`status`]). [`monitor`] and [`join`] build polling
//! and fan-in/fan-out on top of that one primitive; [`defer`] is a
//! separate, in-process callback-stack facility unrelated to spawning.

pub mod capture;
pub mod clock;
pub mod config;
pub mod defer;
pub mod error;
pub mod facade;
pub mod hooks;
pub mod id;
pub mod join;
pub mod lazy;
pub mod log;
pub mod logging;
pub mod monitor;
pub mod registry;
pub mod spawn;
pub mod status;
pub mod worker;

pub use capture::{Capture, CaptureOptions, Context};
pub use config::Config;
pub use error::{Result, TaskdeferError};
pub use facade::Runtime;
pub use id::{AnyTaskRef, LazyTaskId, TaskId};
pub use status::{TaskState, TaskStatus};
