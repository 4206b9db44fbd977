// src/extract.rs
// Best-effort recovery of JSON from chat-model prose.
// Callers only see a parsed value or a ParseError; no heuristics leak out.

use serde_json::Value;

use crate::error::{DiscoveryError, Result};

/// Parse the outermost `{ ... }` span of `text`.
pub fn extract_object(text: &str) -> Result<Value> {
    let cleaned = strip_fences(text);
    let span = outer_span(&cleaned, '{', '}')
        .ok_or_else(|| DiscoveryError::Parse(format!("no JSON object in: {}", preview(text))))?;
    let value: Value = serde_json::from_str(span).map_err(|e| DiscoveryError::Parse(e.to_string()))?;
    if value.is_object() {
        Ok(value)
    } else {
        Err(DiscoveryError::Parse("expected a JSON object".to_string()))
    }
}

/// Parse a JSON array out of `text`.
///
/// Prefers the outermost `[ ... ]` span. Falls back to the outermost object,
/// which is accepted only if it wraps an `"insights"` array.
pub fn extract_array(text: &str) -> Result<Vec<Value>> {
    let cleaned = strip_fences(text);

    if let Some(span) = outer_span(&cleaned, '[', ']') {
        if let Ok(Value::Array(items)) = serde_json::from_str::<Value>(span) {
            return Ok(items);
        }
    }

    let object = extract_object(&cleaned)?;
    match object {
        Value::Object(mut map) => match map.remove("insights") {
            Some(Value::Array(items)) => Ok(items),
            _ => Err(DiscoveryError::Parse(
                "JSON object does not wrap an insights array".to_string(),
            )),
        },
        _ => Err(DiscoveryError::Parse("expected a JSON array".to_string())),
    }
}

fn strip_fences(text: &str) -> String {
    text.replace("```json", "").replace("```", "")
}

fn outer_span(text: &str, open: char, close: char) -> Option<&str> {
    let start = text.find(open)?;
    let end = text.rfind(close)?;
    (start < end).then(|| &text[start..=end])
}

fn preview(text: &str) -> String {
    text.chars().take(80).collect()
}
