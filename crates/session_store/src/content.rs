//! Text extraction and role normalization over raw JSON payloads.
//!
//! Both functions are total: odd payloads degrade to placeholders or `None`
//! so a single strange record never aborts a load.

use serde_json::Value;

use crate::schema::Role;

pub const NON_TEXT_PLACEHOLDER: &str = "[non-text content]";

/// Extracts plain text from a string or a list of content parts.
///
/// Text parts join with `\n`. A typed part without text becomes `[<type>]`
/// (for example `[image]`). Returns `None` only when no content is present.
#[must_use]
pub fn extract_text(value: &Value) -> Option<String> {
    match value {
        Value::Null => None,
        Value::String(text) => Some(text.clone()),
        Value::Array(parts) => Some(
            parts
                .iter()
                .map(extract_part)
                .collect::<Vec<_>>()
                .join("\n"),
        ),
        Value::Object(_) => Some(extract_part(value)),
        Value::Bool(_) | Value::Number(_) => Some(NON_TEXT_PLACEHOLDER.to_string()),
    }
}

fn extract_part(part: &Value) -> String {
    match part {
        Value::String(text) => text.clone(),
        Value::Object(fields) => {
            if let Some(text) = fields.get("text").and_then(Value::as_str) {
                return text.to_string();
            }
            match fields.get("type").and_then(Value::as_str) {
                Some(kind) if !kind.is_empty() => format!("[{kind}]"),
                _ => NON_TEXT_PLACEHOLDER.to_string(),
            }
        }
        _ => NON_TEXT_PLACEHOLDER.to_string(),
    }
}

/// Maps a stored role string to a context role plus the legacy tag it came from.
///
/// Version 3 files carry a known set of synthetic roles from hooks, branch and
/// compaction summaries; they fold into `user` and anything else is rejected.
/// Older files keep every role: tool results become `tool`, other non-plain
/// roles become `user` with the stored role as the tag.
#[must_use]
pub fn normalize_role(raw: &str, version: u32) -> Option<(Role, Option<String>)> {
    match raw {
        "user" => return Some((Role::User, None)),
        "assistant" => return Some((Role::Assistant, None)),
        "tool" => return Some((Role::Tool, None)),
        _ => {}
    }

    if version < 3 {
        let trimmed = raw.trim();
        if trimmed.is_empty() {
            return None;
        }
        let role = if trimmed == "toolResult" {
            Role::Tool
        } else {
            Role::User
        };
        return Some((role, Some(trimmed.to_string())));
    }

    let (role, origin) = match raw {
        "toolResult" => return Some((Role::Tool, None)),
        "hookMessage" | "custom" => (Role::User, "custom"),
        "branchSummary" => (Role::User, "branchSummary"),
        "compactionSummary" => (Role::User, "compactionSummary"),
        "bashExecution" => (Role::User, "bashExecution"),
        _ => return None,
    };
    Some((role, Some(origin.to_string())))
}

/// Rough token count: one token per four characters, rounded up.
#[must_use]
pub fn estimate_tokens(text: &str) -> u64 {
    let chars = text.chars().count() as u64;
    chars.div_ceil(4)
}

/// Single-line preview truncated to `max_chars` characters.
#[must_use]
pub fn preview(text: &str, max_chars: usize) -> String {
    let flattened = text.split_whitespace().collect::<Vec<_>>().join(" ");
    if flattened.chars().count() <= max_chars {
        return flattened;
    }

    let mut truncated = flattened
        .chars()
        .take(max_chars.saturating_sub(3))
        .collect::<String>();
    truncated.push_str("...");
    truncated
}
