//! Tagged-variant `Callable` (design note §9: "Dynamic callables → tagged
//! variants"), each variant owning its own capture/hydration format.
//!
//! The source system's reflective callable-kind sniffing has no
//! counterpart in a statically typed language. The mapping used here:
//!
//! - `Named` / `StaticMethod` resolve through a process-wide string-keyed
//!   registry, exactly mirroring "worker resolves by name".
//! - `Bound` (instance method), `Closure`, and `Invokable` all become a
//!   serializable trait object (`Box<dyn BackgroundJob>`), registered via
//!   `typetag` — the struct *is* the closure's captured environment, and
//!   `typetag`'s tag *is* the name the worker hydrates by. This is the
//!   idiomatic Rust analogue of "serialize the receiver object graph plus
//!   method name".
//! - `Unverified` is the last-resort, reflection-fallback stand-in; Rust
//!   has no runtime reflection, so it can only ever carry a debug
//!   representation and can never be hydrated. It is gated behind
//!   [`CaptureOptions::allow_unverified`].

use std::collections::HashMap;
use std::sync::{Mutex, OnceLock};

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::capture::context::Context;
use crate::error::CaptureError;

/// Implemented by any struct that can serve as a `Bound`/`Closure`/
/// `Invokable` background job. `typetag` makes `Box<dyn BackgroundJob>`
/// itself `Serialize`/`Deserialize`, tagged by the type's registered name.
#[typetag::serde(tag = "job_type")]
pub trait BackgroundJob: Send + Sync + std::fmt::Debug {
    /// Run the job. Mirrors spec §4.2 step 7: if the job wants the
    /// context and it is non-empty, the worker passes it; the trait
    /// signature always offers it, and most implementations ignore it
    /// when unused.
    fn run(&self, ctx: &Context) -> Result<Value, String>;
}

/// A captured unit of work plus its capture strategy, spec §4.1's table.
/// Priority order, highest first: `Named`, `StaticMethod`, `Bound`,
/// `Closure`, `Invokable`, `Unverified`.
#[derive(Debug, Serialize, Deserialize)]
pub enum Callable {
    /// Named global function: worker resolves by name from the process
    /// registry populated via [`register_named`].
    Named { name: String },
    /// Static method `Class::method`: same registry, composite key.
    StaticMethod { class: String, method: String },
    /// Instance method — receiver object graph serialized as a
    /// `BackgroundJob` struct carrying the receiver's fields.
    Bound(Box<dyn BackgroundJob>),
    /// Closure — captured variables serialized as a `BackgroundJob`
    /// struct's fields.
    Closure(Box<dyn BackgroundJob>),
    /// Invokable object — same mechanism as `Closure`; the struct's
    /// `run` method is its invoke operation.
    Invokable(Box<dyn BackgroundJob>),
    /// Reflection-fallback stand-in. Never hydratable; carries only a
    /// debug representation for diagnostics.
    Unverified { type_name: String, debug: String },
}

impl Callable {
    pub fn kind_tag(&self) -> &'static str {
        match self {
            Self::Named { .. } => "named",
            Self::StaticMethod { .. } => "static_method",
            Self::Bound(_) => "bound",
            Self::Closure(_) => "closure",
            Self::Invokable(_) => "invokable",
            Self::Unverified { .. } => "unverified",
        }
    }

    /// Verify the hydrated value is actually callable (spec §4.2 step 5)
    /// without running it yet: a `Named`/`StaticMethod` must resolve in
    /// the worker's registry, and `Unverified` is never callable.
    pub fn verify_callable(&self) -> Result<(), CaptureError> {
        match self {
            Self::Named { name } => {
                if is_named_registered(name) {
                    Ok(())
                } else {
                    Err(CaptureError::UnknownName(name.clone()))
                }
            }
            Self::StaticMethod { class, method } => {
                let key = format!("{class}::{method}");
                if is_named_registered(&key) {
                    Ok(())
                } else {
                    Err(CaptureError::UnknownName(key))
                }
            }
            Self::Bound(_) | Self::Closure(_) | Self::Invokable(_) => Ok(()),
            Self::Unverified { .. } => Err(CaptureError::NoStrategyMatched),
        }
    }

    /// Run the callable (spec §4.2 step 7). Every variant is offered the
    /// context; `Named`/`StaticMethod` functions ignore it if unused, the
    /// same observable behavior as "invoke with zero args" since an
    /// unused parameter has no side effect.
    pub fn invoke(&self, ctx: &Context) -> Result<Value, String> {
        match self {
            Self::Named { name } => resolve_named(name)
                .ok_or_else(|| format!("named callable {name:?} not found in registry"))?(ctx),
            Self::StaticMethod { class, method } => {
                let key = format!("{class}::{method}");
                resolve_named(&key)
                    .ok_or_else(|| format!("static method {key:?} not found in registry"))?(ctx)
            }
            Self::Bound(job) | Self::Closure(job) | Self::Invokable(job) => job.run(ctx),
            Self::Unverified { type_name, .. } => {
                Err(format!("{type_name} was captured by the unverified fallback and cannot be invoked"))
            }
        }
    }
}

type NamedFn = fn(&Context) -> Result<Value, String>;

static NAMED_REGISTRY: OnceLock<Mutex<HashMap<String, NamedFn>>> = OnceLock::new();

fn registry() -> &'static Mutex<HashMap<String, NamedFn>> {
    NAMED_REGISTRY.get_or_init(|| Mutex::new(HashMap::new()))
}

/// Register a free function under `name` so [`Callable::Named`] can
/// resolve it by name in the worker process. Call this during process
/// startup (in both the parent and, via the same binary's `main`, the
/// worker) before any task referencing `name` is spawned.
pub fn register_named(name: impl Into<String>, f: NamedFn) {
    registry()
        .lock()
        .expect("named callable registry poisoned")
        .insert(name.into(), f);
}

/// Register a static-method-shaped function under `Class::method`.
pub fn register_static_method(class: &str, method: &str, f: NamedFn) {
    registry()
        .lock()
        .expect("named callable registry poisoned")
        .insert(format!("{class}::{method}"), f);
}

pub(crate) fn resolve_named(name: &str) -> Option<NamedFn> {
    registry()
        .lock()
        .expect("named callable registry poisoned")
        .get(name)
        .copied()
}

pub(crate) fn is_named_registered(name: &str) -> bool {
    registry()
        .lock()
        .expect("named callable registry poisoned")
        .contains_key(name)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn double(ctx: &Context) -> Result<Value, String> {
        let n = ctx.get("n").and_then(Value::as_i64).unwrap_or(0);
        Ok(Value::from(n * 2))
    }

    #[test]
    fn named_registration_round_trips() {
        register_named("taskdefer_test::double", double);
        assert!(is_named_registered("taskdefer_test::double"));
        let f = resolve_named("taskdefer_test::double").unwrap();
        let mut ctx = Context::new();
        ctx.insert("n".into(), Value::from(21));
        assert_eq!(f(&ctx).unwrap(), Value::from(42));
    }

    #[test]
    fn unregistered_name_is_absent() {
        assert!(!is_named_registered("taskdefer_test::definitely_not_registered"));
    }
}
