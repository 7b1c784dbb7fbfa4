//! The context value passed alongside a captured callable (spec §3, §4.1).

use serde_json::{Map, Value};

/// A key→value bag of arbitrary serializable data, handed to the worker
/// alongside the callable. Round-trips through JSON, the default literal
/// re-creatable form spec §4.1 calls for; there is no separate binary
/// fallback encoding in this implementation since `serde_json::Value`
/// already losslessly represents any value that survives the printable
/// byte check below.
pub type Context = Map<String, Value>;

/// Validate that `ctx` contains no raw non-printable bytes that could not
/// survive a round-trip through a text status file (spec §4.1: "neither
/// form may embed non-printable bytes unescaped").
///
/// JSON string encoding already escapes control characters, so this is a
/// defense against `Value::String` containing a literal NUL or similarly
/// hostile byte that some consumers mishandle; it is not required for
/// correctness of the JSON round-trip itself.
pub fn validate_printable(ctx: &Context) -> Result<(), crate::error::CaptureError> {
    fn check_value(v: &Value) -> bool {
        match v {
            Value::String(s) => !s.chars().any(|c| c == '\0'),
            Value::Array(items) => items.iter().all(check_value),
            Value::Object(map) => map.values().all(check_value),
            _ => true,
        }
    }
    if ctx.values().all(check_value) {
        Ok(())
    } else {
        Err(crate::error::CaptureError::UnprintableBytes)
    }
}

pub fn context_size(ctx: &Context) -> usize {
    ctx.len()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn accepts_plain_values() {
        let mut ctx = Context::new();
        ctx.insert("a".to_string(), json!(1));
        ctx.insert("b".to_string(), json!("hello"));
        assert!(validate_printable(&ctx).is_ok());
    }

    #[test]
    fn rejects_embedded_nul_byte() {
        let mut ctx = Context::new();
        ctx.insert("bad".to_string(), json!("hello\0world"));
        assert!(validate_printable(&ctx).is_err());
    }
}
