//! Serde helpers for tolerant deserialization of server documents.
//!
//! When the `tracing` feature is enabled, unknown fields are logged as warnings and
//! failures are logged with the JSON path at which they occurred, so a drifting
//! configuration endpoint is visible without failing the call.

use serde::de::DeserializeOwned;
use serde_json::Value;

/// Deserialize JSON, warning about fields the target type does not capture.
///
/// Unknown fields never cause a failure; only a shape mismatch for a known field does.
///
/// ```ignore
/// let json = serde_json::json!({ "wsUrl": "ws://localhost:3008", "env": "dev" });
/// let config: ServerConfig = deserialize_with_warnings(json)?;
/// // Logs: WARN unknown field "env" with value "dev" in ServerConfig
/// ```
#[cfg(feature = "tracing")]
pub fn deserialize_with_warnings<T: DeserializeOwned>(value: Value) -> crate::Result<T> {
    use std::any::type_name;

    tracing::trace!(type_name = %type_name::<T>(), json = %value, "deserializing JSON");

    let original = value.clone();
    let mut unknown_paths: Vec<String> = Vec::new();

    let result: T = serde_ignored::deserialize(value, |path| {
        unknown_paths.push(path.to_string());
    })
    .inspect_err(|_| {
        // Re-run with serde_path_to_error to learn where it broke
        let path_result: Result<T, _> = serde_path_to_error::deserialize(original.clone());
        if let Err(path_err) = path_result {
            tracing::error!(
                type_name = %type_name::<T>(),
                path = %path_err.path(),
                error = %path_err.inner(),
                "deserialization failed"
            );
        }
    })?;

    for path in unknown_paths {
        let field_value = lookup_value(&original, &path);
        tracing::warn!(
            type_name = %type_name::<T>(),
            field = %path,
            value = %field_value
                .map_or_else(|| "<unable to retrieve>".to_owned(), serde_json::Value::to_string),
            "unknown field in server document"
        );
    }

    Ok(result)
}

/// Pass-through deserialization when tracing is disabled.
#[cfg(not(feature = "tracing"))]
pub fn deserialize_with_warnings<T: DeserializeOwned>(value: Value) -> crate::Result<T> {
    Ok(serde_json::from_value(value)?)
}

/// Look up a value by a dotted `serde_ignored` path such as `limits.max` or `hosts.0`.
///
/// `?` segments (Option wrappers) are skipped.
#[cfg(feature = "tracing")]
fn lookup_value<'value>(value: &'value Value, path: &str) -> Option<&'value Value> {
    path.split('.')
        .filter(|segment| !segment.is_empty() && *segment != "?")
        .try_fold(value, |current, segment| match current {
            Value::Object(map) => map.get(segment),
            Value::Array(items) => items.get(segment.parse::<usize>().ok()?),
            _ => None,
        })
}
