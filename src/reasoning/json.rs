//! Lenient extraction of JSON from model output.
//!
//! Model responses arrive as raw JSON, fenced JSON, or prose with a JSON
//! object embedded somewhere in the middle. Every site that consumes model
//! output goes through [`extract_json`]: try the raw string, then the
//! fenced block, then the first balanced `{...}` substring, then give up.

use serde_json::Value;

use crate::errors::{AgentError, Result};

/// Extract a JSON value from raw model output.
pub fn extract_json(raw: &str) -> Result<Value> {
    let trimmed = raw.trim();
    if let Ok(value) = serde_json::from_str(trimmed) {
        return Ok(value);
    }

    let unfenced = strip_code_fences(trimmed);
    if let Ok(value) = serde_json::from_str(unfenced.trim()) {
        return Ok(value);
    }

    if let Some(candidate) = first_balanced_object(&unfenced) {
        if let Ok(value) = serde_json::from_str(candidate) {
            return Ok(value);
        }
    }

    Err(AgentError::Unparsable(preview(raw)))
}

/// Like [`extract_json`] but requires the result to be a JSON object.
pub fn extract_json_object(raw: &str) -> Result<serde_json::Map<String, Value>> {
    match extract_json(raw)? {
        Value::Object(map) => Ok(map),
        other => Err(AgentError::Unparsable(format!(
            "expected a JSON object, got {}",
            preview(&other.to_string())
        ))),
    }
}

/// Remove a Markdown code fence around the payload, tolerating a language
/// tag on the opening fence.
fn strip_code_fences(s: &str) -> String {
    let Some(open) = s.find("```") else {
        return s.to_string();
    };
    let after_open = &s[open + 3..];
    // Skip the language tag up to the first newline.
    let body_start = after_open.find('\n').map(|i| i + 1).unwrap_or(0);
    let body = &after_open[body_start..];
    match body.rfind("```") {
        Some(close) => body[..close].to_string(),
        None => body.to_string(),
    }
}

/// Find the first balanced `{...}` substring, respecting string literals
/// and escapes.
fn first_balanced_object(s: &str) -> Option<&str> {
    let start = s.find('{')?;
    let bytes = s.as_bytes();
    let mut depth = 0usize;
    let mut in_string = false;
    let mut escaped = false;

    for (offset, &b) in bytes[start..].iter().enumerate() {
        if escaped {
            escaped = false;
            continue;
        }
        match b {
            b'\\' if in_string => escaped = true,
            b'"' => in_string = !in_string,
            b'{' if !in_string => depth += 1,
            b'}' if !in_string => {
                depth -= 1;
                if depth == 0 {
                    return Some(&s[start..start + offset + 1]);
                }
            }
            _ => {}
        }
    }
    None
}

fn preview(s: &str) -> String {
    const MAX: usize = 120;
    if s.chars().count() <= MAX {
        s.to_string()
    } else {
        let cut: String = s.chars().take(MAX).collect();
        format!("{}...", cut)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
