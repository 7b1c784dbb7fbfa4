//! Process-global defer stack (spec §4.4): runs at process exit in
//! reverse-registration order. Bounded deque, max size 100; on overflow
//! the oldest registration is evicted before the new one is pushed.
//!
//! Rust has no implicit "process exit" hook analogous to a scripting
//! runtime's shutdown function list, so a host calls
//! [`GlobalScope::run_all`] itself at the end of `main` (and, per spec
//! §6, may additionally wire it to a [`crate::hooks::SignalHookRegistrar`]
//! for best-effort execution on termination signals).

use std::collections::VecDeque;
use std::sync::Mutex;

pub const MAX_SIZE: usize = 100;

#[derive(Default)]
pub struct GlobalScope {
    callbacks: Mutex<VecDeque<Box<dyn Fn() + Send + Sync>>>,
}

impl std::fmt::Debug for GlobalScope {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let len = self.callbacks.lock().map(|q| q.len()).unwrap_or(0);
        f.debug_struct("GlobalScope").field("pending", &len).finish()
    }
}

impl GlobalScope {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a callback. If the deque is already at [`MAX_SIZE`], the
    /// oldest registration is dropped first (spec §4.4 overflow policy).
    pub fn push(&self, callback: impl Fn() + Send + Sync + 'static) {
        let mut queue = self.callbacks.lock().expect("global defer stack poisoned");
        if queue.len() >= MAX_SIZE {
            queue.pop_front();
        }
        queue.push_back(Box::new(callback));
    }

    pub fn len(&self) -> usize {
        self.callbacks.lock().expect("global defer stack poisoned").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Run every registered callback in reverse-registration order and
    /// clear the stack. A panicking callback is caught so the remaining
    /// callbacks still run (the parent process never aborts because one
    /// defer callback failed — spec §7 policy, extended here beyond the
    /// post-response scope since the global scope has the same
    /// containment expectation).
    pub fn run_all(&self) {
        let callbacks: Vec<_> = {
            let mut queue = self.callbacks.lock().expect("global defer stack poisoned");
            std::mem::take(&mut *queue).into_iter().collect()
        };
        for callback in callbacks.into_iter().rev() {
            if let Err(e) = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| callback())) {
                tracing::error!(?e, "global defer callback panicked");
            }
        }
    }
}
