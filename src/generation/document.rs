//! Turning a model reply into a JSON document.

use serde_json::{Map, Value};

/// Sections extracted when the reply is not a JSON object.
const MAX_FALLBACK_SECTIONS: usize = 8;

fn strip_code_fence(text: &str) -> &str {
    let trimmed = text.trim();
    let Some(rest) = trimmed.strip_prefix("```") else {
        return trimmed;
    };
    // Drop the info string (e.g. "json") on the opening fence line.
    let body = rest.split_once('\n').map_or("", |(_, body)| body);
    body.trim_end().strip_suffix("```").unwrap_or(body).trim()
}

/// Structure a reply as a JSON document.
///
/// A JSON object, optionally wrapped in a fenced code block, is returned as-is.
/// Anything else is split into its first eight non-empty lines, keyed
/// `"Section 1"` through `"Section 8"`.
pub fn structure_document(text: &str) -> Value {
    let candidate = strip_code_fence(text);
    if let Ok(value @ Value::Object(_)) = serde_json::from_str::<Value>(candidate) {
        return value;
    }

    let sections: Map<String, Value> = text
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .take(MAX_FALLBACK_SECTIONS)
        .enumerate()
        .map(|(i, line)| (format!("Section {}", i + 1), Value::String(line.to_string())))
        .collect();
    Value::Object(sections)
}
