//! `${path.to.value}` reference resolution against the execution context.
//!
//! Step parameters may reference earlier data with dotted paths: the first
//! segment is looked up in `variables`, then `step_outputs`, then
//! `metadata`; remaining segments descend into the found JSON value. A
//! string that is exactly one reference substitutes the referenced value
//! with its type intact; references embedded in a longer string are
//! rendered as text. Unresolved paths substitute JSON null -- never an
//! error.

use std::collections::HashMap;

use serde_json::{Map, Value};

use maestro_types::execution::ExecutionContext;

// ---------------------------------------------------------------------------
// Parameter resolution
// ---------------------------------------------------------------------------

/// Resolve every reference in a step's parameter map, returning the JSON
/// object handed to the adapter.
pub fn resolve_parameters(
    parameters: &HashMap<String, Value>,
    ctx: &ExecutionContext,
) -> Value {
    let mut resolved = Map::with_capacity(parameters.len());
    for (key, value) in parameters {
        resolved.insert(key.clone(), resolve_value(value, ctx));
    }
    Value::Object(resolved)
}

/// Resolve references in a single value, recursing into arrays and objects.
pub fn resolve_value(value: &Value, ctx: &ExecutionContext) -> Value {
    match value {
        Value::String(s) => resolve_string(s, ctx),
        Value::Array(items) => {
            Value::Array(items.iter().map(|v| resolve_value(v, ctx)).collect())
        }
        Value::Object(map) => Value::Object(
            map.iter()
                .map(|(k, v)| (k.clone(), resolve_value(v, ctx)))
                .collect(),
        ),
        other => other.clone(),
    }
}

fn resolve_string(s: &str, ctx: &ExecutionContext) -> Value {
    // A whole-string reference keeps the referenced value's JSON type.
    if let Some(path) = whole_reference(s) {
        return match lookup_path(ctx, path) {
            Some(value) => value,
            None => {
                tracing::warn!(path, "unresolved variable reference, substituting null");
                Value::Null
            }
        };
    }
    if s.contains("${") {
        Value::String(interpolate(s, ctx))
    } else {
        Value::String(s.to_string())
    }
}

/// If `s` is exactly `${path}`, return the path.
fn whole_reference(s: &str) -> Option<&str> {
    let inner = s.strip_prefix("${")?.strip_suffix('}')?;
    if inner.is_empty() || inner.contains("${") || inner.contains('}') {
        None
    } else {
        Some(inner)
    }
}

/// Replace each embedded `${path}` with the referenced value rendered as
/// text ("null" when unresolved).
fn interpolate(s: &str, ctx: &ExecutionContext) -> String {
    let mut out = String::with_capacity(s.len());
    let mut rest = s;
    while let Some(start) = rest.find("${") {
        out.push_str(&rest[..start]);
        match rest[start..].find('}') {
            Some(end) => {
                let path = &rest[start + 2..start + end];
                match lookup_path(ctx, path) {
                    Some(value) => out.push_str(&render(&value)),
                    None => {
                        tracing::warn!(path, "unresolved variable reference, substituting null");
                        out.push_str("null");
                    }
                }
                rest = &rest[start + end + 1..];
            }
            None => {
                // Unterminated reference, keep the text as-is.
                out.push_str(&rest[start..]);
                rest = "";
            }
        }
    }
    out.push_str(rest);
    out
}

// ---------------------------------------------------------------------------
// Path lookup
// ---------------------------------------------------------------------------

/// Dotted-path lookup through `variables`, then `step_outputs`, then
/// `metadata`. Numeric segments index into arrays.
pub fn lookup_path(ctx: &ExecutionContext, path: &str) -> Option<Value> {
    let mut segments = path.split('.');
    let root = segments.next()?;

    let mut current = ctx
        .variables
        .get(root)
        .or_else(|| ctx.step_outputs.get(root))
        .or_else(|| ctx.metadata.get(root))?;

    for segment in segments {
        current = match current {
            Value::Object(map) => map.get(segment)?,
            Value::Array(items) => items.get(segment.parse::<usize>().ok()?)?,
            _ => return None,
        };
    }
    Some(current.clone())
}

/// Render a JSON value for embedding inside a string.
fn render(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Null => "null".to_string(),
        Value::Bool(b) => b.to_string(),
        Value::Number(n) => n.to_string(),
        // Objects/arrays render as compact JSON.
        other => other.to_string(),
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
