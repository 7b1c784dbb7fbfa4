//! Task identifier formats (spec §6 TaskId format).
//!
//! Three distinct id shapes share a host namespace: parent-assigned real
//! task ids, not-yet-spawned lazy handles, and synthetic pool spawn-failure
//! markers. They are kept as distinct newtypes so a caller can't
//! accidentally hand a `LazyTaskId` to a `StatusStore` read.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

use serde::{Deserialize, Serialize};

use crate::clock::Clock;

/// Opaque, host-unique identifier for a spawned background task.
///
/// Format: `defer_{YYYYMMDD}_{HHMMSS}_{8 hex}`, matching spec §6.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TaskId(String);

impl TaskId {
    /// Mint a new id from the given clock. Not cryptographically unique,
    /// only unique-enough-for-24h as spec §3 requires; the random suffix
    /// is generated from `uuid::Uuid::new_v4`.
    pub fn generate(clock: &dyn Clock) -> Self {
        let now = clock.now_utc();
        let suffix = uuid::Uuid::new_v4().simple().to_string();
        let hex = &suffix[..8];
        Self(format!("defer_{}_{hex}", now.format("%Y%m%d_%H%M%S")))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Parse back from a string without validating the embedded timestamp;
    /// we only check the `defer_` prefix so ids round-trip through the
    /// filesystem (`<id>.status`) unambiguously.
    pub fn parse(s: impl Into<String>) -> Option<Self> {
        let s = s.into();
        if s.starts_with("defer_") {
            Some(Self(s))
        } else {
            None
        }
    }

    /// Build a synthetic id for a pool entry whose spawn failed, per spec
    /// §4.7: `failed_<key>_<unix-seconds>`.
    pub fn synthetic_failure(key: &str, unix_seconds: u64) -> Self {
        Self(format!("failed_{key}_{unix_seconds}"))
    }

    pub fn is_synthetic_failure(&self) -> bool {
        self.0.starts_with("failed_")
    }
}

impl fmt::Display for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<TaskId> for String {
    fn from(id: TaskId) -> Self {
        id.0
    }
}

static LAZY_COUNTER: AtomicU64 = AtomicU64::new(1);

/// Handle for a captured-but-not-yet-spawned task, scoped to this process.
///
/// Format: `lazy_<monotonic-int>`, per spec §6.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct LazyTaskId(String);

impl LazyTaskId {
    pub fn generate() -> Self {
        let n = LAZY_COUNTER.fetch_add(1, Ordering::Relaxed);
        Self(format!("lazy_{n}"))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn is_lazy(s: &str) -> bool {
        s.starts_with("lazy_")
    }
}

impl fmt::Display for LazyTaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Any of the three id shapes a caller might hold, used at the Joiner
/// boundary where inputs can be task ids, lazy handles, or raw callables
/// (the latter represented elsewhere as [`crate::capture::Callable`]).
#[derive(Debug, Clone)]
pub enum AnyTaskRef {
    Real(TaskId),
    Lazy(LazyTaskId),
}

impl fmt::Display for AnyTaskRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Real(id) => write!(f, "{id}"),
            Self::Lazy(id) => write!(f, "{id}"),
        }
    }
}
