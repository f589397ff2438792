//! Indented, syntax-coloured JSON as pre-escaped HTML.

use std::fmt::Write;

use minijinja::HtmlEscape;
use serde_json::Value;

use crate::event::Payload;

/// Pretty-prints `value` with one `<span>` per scalar and key.
///
/// Classes: `k` key, `s` string, `n` number, `b` boolean, `z` null.
pub fn highlight(value: &Value) -> String {
    let mut out = String::new();
    write_value(&mut out, value, 0);
    out
}

/// HTML for a payload: highlighted JSON, or the escaped raw text.
pub fn payload_html(payload: &Payload) -> String {
    match payload {
        Payload::Json(value) => highlight(value),
        Payload::Raw { text, .. } => HtmlEscape(text).to_string(),
    }
}

fn write_value(out: &mut String, value: &Value, depth: usize) {
    match value {
        Value::Null => span(out, "z", "null"),
        Value::Bool(b) => span(out, "b", if *b { "true" } else { "false" }),
        Value::Number(n) => span(out, "n", &n.to_string()),
        // Display of a string value is its quoted JSON form
        Value::String(_) => span(out, "s", &value.to_string()),
        Value::Array(items) if items.is_empty() => out.push_str("[]"),
        Value::Object(map) if map.is_empty() => out.push_str("{}"),
        Value::Array(items) => {
            out.push_str("[\n");
            for (i, item) in items.iter().enumerate() {
                indent(out, depth + 1);
                write_value(out, item, depth + 1);
                separator(out, i + 1 < items.len());
            }
            indent(out, depth);
            out.push(']');
        }
        Value::Object(map) => {
            out.push_str("{\n");
            for (i, (key, item)) in map.iter().enumerate() {
                indent(out, depth + 1);
                span(out, "k", &Value::from(key.as_str()).to_string());
                out.push_str(": ");
                write_value(out, item, depth + 1);
                separator(out, i + 1 < map.len());
            }
            indent(out, depth);
            out.push('}');
        }
    }
}

fn span(out: &mut String, class: &str, text: &str) {
    let _ = write!(out, r#"<span class="{class}">{}</span>"#, HtmlEscape(text));
}

fn indent(out: &mut String, depth: usize) {
    for _ in 0..depth {
        out.push_str("  ");
    }
}

fn separator(out: &mut String, more: bool) {
    if more {
        out.push(',');
    }
    out.push('\n');
}
