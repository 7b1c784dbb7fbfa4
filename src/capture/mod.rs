//! `CallbackCapture` (spec §4.1): turn a user callable + context into a
//! re-hydratable pair, trying capture strategies in priority order.

pub mod callable;
pub mod context;

pub use callable::{register_named, register_static_method, BackgroundJob, Callable};
pub use context::Context;

use crate::error::CaptureError;

/// Options controlling capture behavior. Only one knob today: whether the
/// last-resort reflection-fallback variant may be produced at all (spec
/// §9 design note — it should exist "only as a last resort" and is
/// disabled outside of tests that specifically assert on it).
#[derive(Debug, Clone, Copy, Default)]
pub struct CaptureOptions {
    allow_unverified: bool,
}

impl CaptureOptions {
    pub fn allow_unverified(mut self, allow: bool) -> Self {
        self.allow_unverified = allow;
        self
    }
}

/// A captured callable plus its context, ready to be written into a
/// hydration file and handed to the worker binary (spec §4.1, §4.2).
#[derive(Debug, serde::Serialize, serde::Deserialize)]
pub struct Capture {
    pub callable: Callable,
    pub context: Context,
}

impl Capture {
    /// Capture a named function registered via [`register_named`].
    /// This is the highest-priority strategy in spec §4.1's table: it
    /// never fails as long as the name is registered.
    pub fn named(name: impl Into<String>, context: Context) -> Result<Self, CaptureError> {
        let name = name.into();
        if !callable::is_named_registered(&name) {
            return Err(CaptureError::UnknownName(name));
        }
        context::validate_printable(&context)?;
        Ok(Self {
            callable: Callable::Named { name },
            context,
        })
    }

    pub fn static_method(
        class: impl Into<String>,
        method: impl Into<String>,
        context: Context,
    ) -> Result<Self, CaptureError> {
        let class = class.into();
        let method = method.into();
        let key = format!("{class}::{method}");
        if !callable::is_named_registered(&key) {
            return Err(CaptureError::UnknownName(key));
        }
        context::validate_printable(&context)?;
        Ok(Self {
            callable: Callable::StaticMethod { class, method },
            context,
        })
    }

    /// Capture a `BackgroundJob` trait object as a `Bound` (instance
    /// method receiver) capture. The struct passed in *is* the receiver's
    /// object graph; `typetag` gives it a stable serialization tag.
    pub fn bound(job: Box<dyn BackgroundJob>, context: Context) -> Result<Self, CaptureError> {
        context::validate_printable(&context)?;
        Ok(Self {
            callable: Callable::Bound(job),
            context,
        })
    }

    /// Capture a `BackgroundJob` trait object as a `Closure` — a struct
    /// whose fields are the closure's captured variables (spec §4.1:
    /// "preserves captured variables and bindings").
    pub fn closure(job: Box<dyn BackgroundJob>, context: Context) -> Result<Self, CaptureError> {
        context::validate_printable(&context)?;
        Ok(Self {
            callable: Callable::Closure(job),
            context,
        })
    }

    pub fn invokable(job: Box<dyn BackgroundJob>, context: Context) -> Result<Self, CaptureError> {
        context::validate_printable(&context)?;
        Ok(Self {
            callable: Callable::Invokable(job),
            context,
        })
    }

    /// Last-resort capture, gated behind [`CaptureOptions::allow_unverified`].
    /// Never hydratable: any attempt to spawn it is a `CaptureError`
    /// (the runtime refuses to spawn rather than silently changing
    /// semantics, per spec §4.1's "Errors" paragraph).
    pub fn unverified(
        type_name: impl Into<String>,
        debug: impl Into<String>,
        context: Context,
        options: CaptureOptions,
    ) -> Result<Self, CaptureError> {
        if !options.allow_unverified {
            return Err(CaptureError::UnverifiedDisabled);
        }
        context::validate_printable(&context)?;
        Ok(Self {
            callable: Callable::Unverified {
                type_name: type_name.into(),
                debug: debug.into(),
            },
            context,
        })
    }

    /// Serialize this capture to the bytes written into the hydration
    /// file the worker binary reads (spec §4.2 step 5 "hydrate context,
    /// hydrate callback").
    pub fn to_hydration_bytes(&self) -> Result<Vec<u8>, CaptureError> {
        serde_json::to_vec(self).map_err(CaptureError::ContextSerialization)
    }

    pub fn from_hydration_bytes(bytes: &[u8]) -> Result<Self, CaptureError> {
        serde_json::from_slice(bytes).map_err(CaptureError::ContextSerialization)
    }

    pub fn kind_tag(&self) -> &'static str {
        self.callable.kind_tag()
    }

    pub fn context_size(&self) -> usize {
        context::context_size(&self.context)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn noop(_ctx: &Context) -> Result<serde_json::Value, String> {
        Ok(serde_json::Value::Null)
    }

    #[test]
    fn named_capture_round_trips_through_hydration_bytes() {
        callable::register_named("taskdefer_test::noop", noop);
        let mut ctx = Context::new();
        ctx.insert("x".into(), json!(1));
        let capture = Capture::named("taskdefer_test::noop", ctx).unwrap();
        let bytes = capture.to_hydration_bytes().unwrap();
        let restored = Capture::from_hydration_bytes(&bytes).unwrap();
        assert_eq!(restored.kind_tag(), "named");
    }

    #[test]
    fn unknown_name_is_a_capture_error() {
        let err = Capture::named("taskdefer_test::nonexistent_xyz", Context::new()).unwrap_err();
        assert!(matches!(err, CaptureError::UnknownName(_)));
    }

    #[test]
    fn unverified_requires_explicit_opt_in() {
        let err = Capture::unverified("Foo", "Foo { .. }", Context::new(), CaptureOptions::default())
            .unwrap_err();
        assert!(matches!(err, CaptureError::UnverifiedDisabled));

        let ok = Capture::unverified(
            "Foo",
            "Foo { .. }",
            Context::new(),
            CaptureOptions::default().allow_unverified(true),
        );
        assert!(ok.is_ok());
    }
}
