//! Function-scope defer stack (spec §4.4): explicit acquisition/release,
//! LIFO on scope exit including when the scope exits via an error.
//!
//! The idiomatic Rust shape for "run on scope exit including on error" is
//! a guard whose `Drop` impl runs the stack — this also covers unwinding
//! panics, which the source system's "on error" case doesn't distinguish
//! from a normal early return.

/// A guard that runs its registered callbacks, most-recently-registered
/// first, when dropped. Equivalent to the source's explicit
/// acquire/release function-scope stack: construct one at the top of a
/// function, `defer.push(...)`, let it drop at the end (or on an early
/// `return`/`?`/panic).
#[derive(Default)]
pub struct FunctionScope {
    callbacks: Vec<Box<dyn FnOnce() + Send>>,
}

impl std::fmt::Debug for FunctionScope {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FunctionScope")
            .field("pending", &self.callbacks.len())
            .finish()
    }
}

impl FunctionScope {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, callback: impl FnOnce() + Send + 'static) {
        self.callbacks.push(Box::new(callback));
    }

    pub fn len(&self) -> usize {
        self.callbacks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.callbacks.is_empty()
    }
}

impl Drop for FunctionScope {
    fn drop(&mut self) {
        // LIFO: reverse-registration order, per spec §4.4.
        while let Some(callback) = self.callbacks.pop() {
            callback();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};

    #[test]
    fn runs_in_reverse_registration_order_on_drop() {
        let order = Arc::new(Mutex::new(Vec::new()));
        {
            let mut scope = FunctionScope::new();
            for i in 0..3 {
                let order = order.clone();
                scope.push(move || order.lock().unwrap().push(i));
            }
        }
        assert_eq!(*order.lock().unwrap(), vec![2, 1, 0]);
    }

    #[test]
    fn runs_even_when_scope_exits_via_panic_unwind() {
        let order = Arc::new(Mutex::new(Vec::new()));
        let order2 = order.clone();
        let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
            let mut scope = FunctionScope::new();
            scope.push(move || order2.lock().unwrap().push("ran"));
            panic!("boom");
        }));
        assert!(result.is_err());
        assert_eq!(*order.lock().unwrap(), vec!["ran"]);
    }
}
