//! External collaborators the runtime consumes but does not re-implement
//! (spec §6 "External hooks consumed from the host", §1 "abstracted as a
//! post-response hook interface"). A host framework provides concrete
//! implementations; this crate only depends on the trait.

/// Registers a function to run after the response has been flushed to the
/// client. The host calls the registered function at most once per
/// request, on its own schedule — this crate never calls it directly.
pub trait PostResponseHook: Send + Sync + std::fmt::Debug {
    fn register(&self, callback: Box<dyn FnOnce() + Send>);
}

/// Read by post-response execution to decide whether `always=false`
/// callbacks fire (spec §4.4).
pub trait HttpStatusGetter: Send + Sync + std::fmt::Debug {
    fn status(&self) -> u16;
}

/// Best-effort registration of the global defer stack against termination
/// signals (spec §4.4, §6). Absence of a registrar just means the global
/// stack only runs at normal process exit.
pub trait SignalHookRegistrar: Send + Sync + std::fmt::Debug {
    fn register(&self, callback: Box<dyn Fn() + Send + Sync>);
}

/// A `HttpStatusGetter` backed by a plain `u16`, for hosts (and tests)
/// that already know the response code at hook-registration time.
#[derive(Debug, Clone, Copy)]
pub struct FixedHttpStatus(pub u16);

impl HttpStatusGetter for FixedHttpStatus {
    fn status(&self) -> u16 {
        self.0
    }
}

/// A `PostResponseHook` that runs its callback immediately — useful for
/// hosts with no distinct post-response phase (e.g. a CLI) and for tests
/// that don't want to simulate request lifecycle timing.
#[derive(Debug, Clone, Copy, Default)]
pub struct ImmediatePostResponseHook;

impl PostResponseHook for ImmediatePostResponseHook {
    fn register(&self, callback: Box<dyn FnOnce() + Send>) {
        callback();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Arc;

    #[test]
    fn immediate_hook_runs_synchronously() {
        let ran = Arc::new(AtomicBool::new(false));
        let hook = ImmediatePostResponseHook;
        let ran2 = ran.clone();
        hook.register(Box::new(move || ran2.store(true, Ordering::SeqCst)));
        assert!(ran.load(Ordering::SeqCst));
    }

    #[test]
    fn fixed_status_reports_configured_code() {
        assert_eq!(FixedHttpStatus(404).status(), 404);
    }
}
