//! Parsing delegate replies and merging per-chunk results.

use serde_json::Value;

use crate::error::{HarvestError, Result};

/// Remove a surrounding Markdown code fence (```` ```json ... ``` ````).
pub fn strip_code_fences(raw: &str) -> &str {
    let trimmed = raw.trim();
    let Some(rest) = trimmed.strip_prefix("```") else {
        return trimmed;
    };
    // Drop the info string (`json`, `JSON`, ...) on the opening line.
    let body = match rest.find('\n') {
        Some(newline) => &rest[newline + 1..],
        None => rest.trim_start_matches(|c: char| c.is_ascii_alphanumeric()),
    };
    body.trim_end()
        .strip_suffix("```")
        .unwrap_or(body)
        .trim()
}

/// Records carried by one reply: an array's elements, or a lone object.
pub fn parse_records(raw: &str, chunk: usize) -> Result<Vec<Value>> {
    let text = strip_code_fences(raw);
    let value: Value =
        serde_json::from_str(text).map_err(|e| HarvestError::MalformedExtractionPayload {
            chunk,
            reason: e.to_string(),
        })?;
    match value {
        Value::Array(items) => Ok(items),
        Value::Object(_) => Ok(vec![value]),
        other => Err(HarvestError::MalformedExtractionPayload {
            chunk,
            reason: format!("expected an array or object, got {}", json_kind(&other)),
        }),
    }
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}

/// Concatenated records plus how many chunks were dropped.
#[derive(Debug, Default)]
pub struct MergeOutcome {
    pub records: Vec<Value>,
    pub skipped: usize,
    /// The first delegate failure, kept for when every chunk failed.
    pub first_error: Option<HarvestError>,
}

impl MergeOutcome {
    pub fn to_json(&self) -> String {
        Value::Array(self.records.clone()).to_string()
    }
}

/// Merge replies in chunk order. Bad chunks are skipped and logged.
pub fn merge_replies(replies: Vec<Result<String>>) -> MergeOutcome {
    let mut outcome = MergeOutcome::default();
    for (chunk, reply) in replies.into_iter().enumerate() {
        let parsed = reply.and_then(|raw| parse_records(&raw, chunk));
        match parsed {
            Ok(records) => outcome.records.extend(records),
            Err(e) => {
                tracing::warn!("skipping chunk {chunk}: {e}");
                outcome.skipped += 1;
                if outcome.first_error.is_none() {
                    outcome.first_error = Some(e);
                }
            }
        }
    }
    outcome
}
