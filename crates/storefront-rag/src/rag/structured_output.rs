//! JSON extraction from model replies.
//!
//! Models wrap JSON in prose or code fences often enough that a plain
//! `serde_json::from_str` is not sufficient.

use serde_json::{Map, Value};

/// Parse the first JSON object found in `reply`.
pub fn parse_json_object(reply: &str) -> Option<Map<String, Value>> {
    let body = strip_code_fences(reply);
    if let Ok(Value::Object(map)) = serde_json::from_str::<Value>(body) {
        return Some(map);
    }
    let start = body.find('{')?;
    let candidate = extract_json_object(&body[start..])?;
    match serde_json::from_str::<Value>(&candidate) {
        Ok(Value::Object(map)) => Some(map),
        _ => None,
    }
}

/// Inner text of the first fenced block, or the trimmed reply when unfenced.
pub fn strip_code_fences(reply: &str) -> &str {
    let trimmed = reply.trim();
    let Some(open) = trimmed.find("```") else {
        return trimmed;
    };
    let after_open = &trimmed[open + 3..];
    // Skip an info string such as `json`
    let content_start = after_open.find('\n').map(|i| i + 1).unwrap_or(0);
    let content = &after_open[content_start..];
    match content.find("```") {
        Some(close) => content[..close].trim(),
        None => content.trim(),
    }
}

/// Balanced-brace scan from the start of `text`, string-literal aware.
fn extract_json_object(text: &str) -> Option<String> {
    let mut depth = 0;
    let mut in_string = false;
    let mut escape_next = false;
    let mut end_pos = 0;

    for (i, ch) in text.char_indices() {
        if escape_next {
            escape_next = false;
            continue;
        }

        match ch {
            '\\' if in_string => escape_next = true,
            '"' => in_string = !in_string,
            '{' if !in_string => depth += 1,
            '}' if !in_string => {
                depth -= 1;
                if depth == 0 {
                    end_pos = i + 1;
                    break;
                }
            }
            _ => {}
        }
    }

    if end_pos > 0 {
        Some(text[..end_pos].to_string())
    } else {
        None
    }
}

/// Read a field as text. Numbers and booleans are stringified, null and
/// blank strings count as absent.
pub fn string_field(map: &Map<String, Value>, key: &str) -> Option<String> {
    match map.get(key)? {
        Value::String(s) if !s.trim().is_empty() => Some(s.trim().to_string()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}
