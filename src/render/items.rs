//! Readable views of the items in a chat-style request or response.
//!
//! Every recognized item becomes a label, a one-line preview and its full
//! content. Shapes other than the ones the API is known to send are left to
//! the raw JSON views.

use std::fmt::Write;

use minijinja::HtmlEscape;
use serde::Serialize;
use serde_json::{Map, Value};

use super::json::highlight;
use super::summary::plural;
use crate::correlate::{Response, strip_prompt_preamble};

const PREVIEW_WORDS: usize = 15;
const PREVIEW_CHARS: usize = 80;
const COMMAND_CHARS: usize = 50;

#[derive(Debug, Serialize)]
pub struct ItemView {
    pub label: String,
    pub preview: String,
    /// Whether the preview is shown in bold
    pub emphasis: bool,
    /// Pre-escaped HTML
    pub detail: String,
}

/// Items of a request body, or of its delta from the previous request.
///
/// Keys are looked up as-is and in their delta forms (`+key`, `*key`,
/// `key+`), so a delta yields only what changed.
pub fn request_items(body: &Value) -> Vec<ItemView> {
    let mut items = Vec::new();
    if let Some(instructions) = field(body, "instructions").and_then(Value::as_str) {
        items.push(ItemView {
            label: "instructions".to_string(),
            preview: short(instructions),
            emphasis: false,
            detail: HtmlEscape(instructions).to_string(),
        });
    }
    if let Some(tools) = field(body, "tools").and_then(Value::as_array) {
        items.push(tools_item(tools));
    }
    if let Some(input) = field(body, "input").and_then(Value::as_array) {
        for item in input {
            match item_type(item) {
                Some("message") => items.extend(message_items(item, false)),
                Some("function_call") => items.push(function_call_item(item, false)),
                Some("function_call_output") => items.push(call_output_item(item)),
                _ => {}
            }
        }
    }
    items
}

/// Items of the final response object.
pub fn response_items(response: &Response) -> Vec<ItemView> {
    let Some(output) = response_output(response) else {
        return Vec::new();
    };
    let mut items = Vec::new();
    for item in output {
        match item_type(item) {
            Some("reasoning") => items.push(reasoning_item(item)),
            Some("function_call") => items.push(function_call_item(item, true)),
            Some("message") => items.extend(message_items(item, true)),
            _ => {}
        }
    }
    items
}

/// The `output` array of the final response object.
pub(super) fn response_output(response: &Response) -> Option<&[Value]> {
    let payload = response
        .final_payload()
        .or(response.body.as_ref())?
        .as_json()?;
    // Stream events wrap the response object; plain responses are the object
    let object = payload.get("response").unwrap_or(payload);
    object.get("output")?.as_array().map(Vec::as_slice)
}

fn field<'a>(body: &'a Value, key: &str) -> Option<&'a Value> {
    [
        key.to_string(),
        format!("+{key}"),
        format!("*{key}"),
        format!("{key}+"),
    ]
    .iter()
    .find_map(|k| body.get(k))
}

fn item_type(item: &Value) -> Option<&str> {
    item.get("type").and_then(Value::as_str)
}

/// One item per content part. Parts the user typed are emphasized in requests.
fn message_items(item: &Value, emphasis: bool) -> Vec<ItemView> {
    let Some(parts) = item.get("content").and_then(Value::as_array) else {
        return Vec::new();
    };
    parts
        .iter()
        .map(|part| {
            let kind = item_type(part).unwrap_or("text");
            let text = part.get("text").and_then(Value::as_str).unwrap_or_default();
            ItemView {
                label: kind.to_string(),
                preview: short(strip_prompt_preamble(text)),
                emphasis: emphasis || kind == "input_text",
                detail: HtmlEscape(text).to_string(),
            }
        })
        .collect()
}

fn function_call_item(item: &Value, emphasis: bool) -> ItemView {
    let name = item.get("name").and_then(Value::as_str).unwrap_or("?");
    let arguments = embedded_json(item.get("arguments"));
    let args = shell_preview(name, &arguments).unwrap_or_else(|| "...".to_string());
    ItemView {
        label: "function_call".to_string(),
        preview: format!("{name}({args})"),
        emphasis,
        detail: highlight(&arguments),
    }
}

/// The script of a `bash -c`-style shell call, cut to a short single line.
fn shell_preview(name: &str, arguments: &Value) -> Option<String> {
    if name != "shell" {
        return None;
    }
    let command = arguments.get("command")?.as_array()?;
    let [program, flag, script, ..] = command.as_slice() else {
        return None;
    };
    let (program, flag, script) = (program.as_str()?, flag.as_str()?, script.as_str()?);
    if program != "bash" || !flag.starts_with('-') {
        return None;
    }
    let mut preview: String = script
        .chars()
        .take(COMMAND_CHARS)
        .map(|c| if c == '\n' { ' ' } else { c })
        .collect();
    if script.chars().count() > COMMAND_CHARS {
        preview.push_str("...");
    }
    Some(preview)
}

fn call_output_item(item: &Value) -> ItemView {
    let output = embedded_json(item.get("output"));
    let text = output
        .get("output")
        .and_then(Value::as_str)
        .or(output.as_str());
    ItemView {
        label: "function_call_output".to_string(),
        preview: text.map(short).unwrap_or_default(),
        emphasis: true,
        detail: match text {
            Some(text) => HtmlEscape(text).to_string(),
            None => highlight(&output),
        },
    }
}

fn reasoning_item(item: &Value) -> ItemView {
    let summaries: Vec<&str> = item
        .get("summary")
        .and_then(Value::as_array)
        .map(|parts| {
            parts
                .iter()
                .filter_map(|p| p.get("text").and_then(Value::as_str))
                .collect()
        })
        .unwrap_or_default();
    let encrypted = item
        .get("encrypted_content")
        .and_then(Value::as_str)
        .map_or(0, str::len);

    let mut detail = HtmlEscape(&summaries.join("\n\n")).to_string();
    if encrypted > 0 {
        if !detail.is_empty() {
            detail.push_str("\n\n");
        }
        let _ = write!(detail, "[{encrypted} bytes encrypted]");
    }
    ItemView {
        label: "reasoning".to_string(),
        preview: summaries.first().map(|s| short(s)).unwrap_or_default(),
        emphasis: false,
        detail,
    }
}

fn tools_item(tools: &[Value]) -> ItemView {
    let mut detail = Map::new();
    let mut names = Vec::with_capacity(tools.len());
    for tool in tools {
        let name = tool
            .get("name")
            .or_else(|| tool.get("type"))
            .and_then(Value::as_str)
            .unwrap_or("?");
        let mut entry = tool
            .get("parameters")
            .cloned()
            .unwrap_or_else(|| Value::Object(Map::new()));
        if let (Value::Object(map), Some(description)) = (&mut entry, tool.get("description")) {
            map.insert("description".to_string(), description.clone());
        }
        detail.insert(name.to_string(), entry);
        names.push(name);
    }
    ItemView {
        label: "tools".to_string(),
        preview: format!("[{}] {}", plural(tools.len(), "tool"), names.join(", ")),
        emphasis: false,
        detail: highlight(&Value::Object(detail)),
    }
}

/// A field the API sends as a JSON-encoded string, decoded when it parses.
fn embedded_json(value: Option<&Value>) -> Value {
    match value {
        Some(Value::String(text)) => {
            serde_json::from_str(text).unwrap_or_else(|_| Value::String(text.clone()))
        }
        Some(value) => value.clone(),
        None => Value::Null,
    }
}

/// First words of `text` on one line, with a line count when it has several.
fn short(text: &str) -> String {
    let words: Vec<&str> = text.split_whitespace().collect();
    let joined = words[..words.len().min(PREVIEW_WORDS)].join(" ");
    let mut preview: String = joined.chars().take(PREVIEW_CHARS).collect();
    if words.len() > PREVIEW_WORDS || joined.chars().count() > PREVIEW_CHARS {
        preview.push_str("...");
    }
    let lines = text.lines().count();
    if lines > 1 {
        let _ = write!(preview, " [{lines} lines]");
    }
    preview
}
