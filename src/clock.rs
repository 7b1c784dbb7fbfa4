//! Time abstraction so scheduling and retention logic can be driven by a
//! fake clock in tests instead of real wall-clock sleeps.

use std::time::{Duration, SystemTime, UNIX_EPOCH};

use chrono::{DateTime, Utc};

/// Injected clock. Production code uses [`SystemClock`]; tests can swap in
/// a fake that advances on demand.
pub trait Clock: Send + Sync + std::fmt::Debug {
    fn now(&self) -> SystemTime;

    fn now_utc(&self) -> DateTime<Utc> {
        DateTime::<Utc>::from(self.now())
    }

    fn unix_seconds(&self) -> u64 {
        self.now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_secs()
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> SystemTime {
        SystemTime::now()
    }
}

/// A clock that only advances when told to. Used by tests that exercise
/// retention windows (`cleanup(max_age)`) and timeout math deterministically.
#[derive(Debug)]
pub struct FakeClock {
    inner: std::sync::Mutex<SystemTime>,
}

impl FakeClock {
    pub fn new(start: SystemTime) -> Self {
        Self {
            inner: std::sync::Mutex::new(start),
        }
    }

    pub fn advance(&self, by: Duration) {
        let mut guard = self.inner.lock().expect("fake clock poisoned");
        *guard += by;
    }
}

impl Clock for FakeClock {
    fn now(&self) -> SystemTime {
        *self.inner.lock().expect("fake clock poisoned")
    }
}
