//! Built-in tools registered by the gateway binary.

use serde_json::{Value, json};

use crate::error::ToolError;
use crate::schema::{FieldSpec, Shape};

use super::{ToolSpec, handler_fn};

/// All built-in tools.
pub fn builtin_tools() -> Vec<ToolSpec> {
    [sum(), echo(), current_time()]
        .into_iter()
        .filter_map(|tool| match tool {
            Ok(tool) => Some(tool),
            Err(e) => {
                tracing::error!(error = %e, "failed to build builtin tool");
                None
            }
        })
        .collect()
}

/// `sum(a: integer, b: integer) -> integer`
fn sum() -> Result<ToolSpec, crate::error::SchemaError> {
    ToolSpec::new(
        "sum",
        "Add two integers and return their sum.",
        Shape::new()
            .field("a", FieldSpec::integer().with_description("First addend"))
            .field("b", FieldSpec::integer().with_description("Second addend")),
        handler_fn(|args| async move {
            let total = integer_arg(&args, "a")? + integer_arg(&args, "b")?;
            if let Ok(total) = i64::try_from(total) {
                Ok(json!(total))
            } else if let Ok(total) = u64::try_from(total) {
                Ok(json!(total))
            } else {
                Err(ToolError::invalid_arguments(format!(
                    "sum {total} is outside the 64-bit integer range"
                )))
            }
        }),
    )
}

/// `echo(text: string) -> string`
fn echo() -> Result<ToolSpec, crate::error::SchemaError> {
    ToolSpec::new(
        "echo",
        "Return the given text unchanged.",
        Shape::new().field("text", FieldSpec::string()),
        handler_fn(|args| async move {
            Ok(args.get("text").cloned().unwrap_or(Value::Null))
        }),
    )
}

/// `current_time() -> string` (RFC 3339, UTC)
fn current_time() -> Result<ToolSpec, crate::error::SchemaError> {
    ToolSpec::new(
        "current_time",
        "Return the current UTC time in RFC 3339 format.",
        Shape::new(),
        handler_fn(|_| async { Ok(json!(chrono::Utc::now().to_rfc3339())) }),
    )
}

/// Largest magnitude accepted from a float-encoded integer (2^64).
const MAX_FLOAT_INTEGER: f64 = 18_446_744_073_709_551_616.0;

/// An integer argument as JSON Schema sees it: `1.0` counts, and so does any
/// value in the `u64` range.
fn integer_arg(args: &serde_json::Map<String, Value>, name: &str) -> Result<i128, ToolError> {
    let value = args.get(name);
    value
        .and_then(Value::as_i64)
        .map(i128::from)
        .or_else(|| value.and_then(Value::as_u64).map(i128::from))
        .or_else(|| {
            value
                .and_then(Value::as_f64)
                .filter(|f| f.fract() == 0.0 && f.abs() < MAX_FLOAT_INTEGER)
                .map(|f| f as i128)
        })
        .ok_or_else(|| ToolError::invalid_arguments(format!("`{name}` must be a 64-bit integer")))
}
