//! One-line summaries of request and response bodies.
//!
//! These only understand the shape of a chat-style API body (`model`,
//! `input`, `tools`, `output`). Anything else yields no summary.

use serde_json::Value;

use super::items::response_output;
use crate::correlate::Response;

/// `"o3, 4 input items, 12 tools"` for a JSON request body.
pub fn request_summary(body: &Value) -> Option<String> {
    let mut parts = Vec::new();
    if let Some(model) = body.get("model").and_then(Value::as_str) {
        parts.push(model.to_string());
    }
    if let Some(input) = body.get("input").and_then(Value::as_array) {
        parts.push(plural(input.len(), "input item"));
    }
    if let Some(tools) = body.get("tools").and_then(Value::as_array) {
        parts.push(plural(tools.len(), "tool"));
    }
    (!parts.is_empty()).then(|| parts.join(", "))
}

/// Output item types of the final response object, e.g. `"reasoning, function_call shell"`.
pub fn response_summary(response: &Response) -> Option<String> {
    let output = response_output(response)?;
    let items: Vec<String> = output
        .iter()
        .filter_map(|item| {
            let kind = item.get("type")?.as_str()?;
            Some(match item.get("name").and_then(Value::as_str) {
                Some(name) if kind == "function_call" => format!("{kind} {name}"),
                _ => kind.to_string(),
            })
        })
        .collect();
    (!items.is_empty()).then(|| items.join(", "))
}

pub(super) fn plural(n: usize, noun: &str) -> String {
    if n == 1 {
        format!("1 {noun}")
    } else {
        format!("{n} {noun}s")
    }
}
