//! HTML report rendering.
//!
//! [`render`] is a pure function of a frozen [`TraceSession`]. The session is
//! flattened into a serializable view and fed to a minijinja template with
//! HTML auto-escaping forced on, so anything the child logged is escaped.
//! The only values emitted with `|safe` are pre-rendered HTML fragments
//! (highlighted JSON and item details), which escape every string they write.
//!
//! Request bodies are compared with the previous request of the same
//! conversation, so a new conversation starts from a clean baseline.
//!
//! The report is a single file: inline CSS, `<details>` for folding, no
//! scripts and no external references.

mod items;
mod json;
mod summary;

pub use items::{ItemView, request_items, response_items};
pub use json::{highlight, payload_html};
pub use summary::{request_summary, response_summary};

use std::fmt::Write;

use chrono::{DateTime, Local, TimeDelta, Utc};
use minijinja::{AutoEscape, Environment, HtmlEscape, context};
use serde::Serialize;
use serde_json::Value;

use crate::correlate::{
    Conversation, CorrelationAnomaly, DiagnosticLine, Exchange, payload_type,
};
use crate::event::{Headers, Payload};
use crate::json_delta;
use crate::session::{Entry, TraceSession};

const REPORT_TEMPLATE: &str = include_str!("report.html");

#[derive(Serialize)]
struct HeaderView<'a> {
    name: &'a str,
    value: &'a str,
}

#[derive(Serialize)]
struct PayloadView<'a> {
    /// Pre-escaped HTML
    html: String,
    error: Option<&'a str>,
}

#[derive(Serialize)]
struct RequestView<'a> {
    method: &'a str,
    url: &'a str,
    headers: Vec<HeaderView<'a>>,
    body: Option<PayloadView<'a>>,
    /// What this request added to the conversation
    items: Vec<ItemView>,
}

#[derive(Serialize)]
struct ChunkView<'a> {
    time: String,
    kind: Option<&'a str>,
    terminal: bool,
    payload: PayloadView<'a>,
}

#[derive(Serialize)]
struct ResponseView<'a> {
    status: Option<u16>,
    headers: Vec<HeaderView<'a>>,
    body: Option<PayloadView<'a>>,
    streamed: bool,
    reconstructed: Option<String>,
    chunks: Vec<ChunkView<'a>>,
    completed_at: Option<String>,
    items: Vec<ItemView>,
}

#[derive(Serialize)]
struct ExchangeView<'a> {
    index: usize,
    id: &'a str,
    status: &'static str,
    time: String,
    duration: Option<String>,
    summary: Option<String>,
    incomplete: bool,
    anomalies: Vec<String>,
    request: Option<RequestView<'a>>,
    response: Option<ResponseView<'a>>,
    /// Pre-escaped HTML of the change from the previous request body
    delta: Option<String>,
}

#[derive(Serialize)]
struct NoteView<'a> {
    time: String,
    level: Option<&'static str>,
    source: Option<&'a str>,
    text: &'a str,
    incomplete: bool,
}

#[derive(Serialize)]
struct ConversationView<'a> {
    index: usize,
    time: Option<String>,
    title: Option<&'a str>,
}

#[derive(Serialize)]
#[serde(tag = "type", rename_all = "lowercase")]
enum EntryView<'a> {
    Exchange(ExchangeView<'a>),
    Note(NoteView<'a>),
    Conversation(ConversationView<'a>),
}

/// Renders `session` as a self-contained HTML document. Never fails.
pub fn render(session: &TraceSession) -> String {
    let mut env = Environment::new();
    env.set_auto_escape_callback(|_| AutoEscape::Html);
    let rendered = env
        .add_template("report.html", REPORT_TEMPLATE)
        .and_then(|()| env.get_template("report.html"))
        .and_then(|tmpl| {
            let counts = session.counts();
            tmpl.render(context! {
                title => session.title,
                session_id => session.session_id,
                started_at => format_local(&session.started_at),
                ended_at => format_local(&session.ended_at),
                end => session.end.to_string(),
                command => session.command.join(" "),
                grammar_version => session.grammar_version,
                lines => session.lines,
                counts => context! {
                    completed => counts.completed,
                    pending => counts.pending,
                    orphaned => counts.orphaned,
                },
                entries => entry_views(session),
            })
        });
    match rendered {
        Ok(html) => html,
        Err(err) => {
            log::warn!("report template failed, writing plain report: {err:#}");
            plain_report(session, &err.to_string())
        }
    }
}

fn entry_views(session: &TraceSession) -> Vec<EntryView<'_>> {
    let mut previous_body: Option<&Value> = None;
    let mut index = 0;
    // Activity before the first session-start line counts as a conversation
    let mut conversation = session
        .conversations
        .iter()
        .filter(|c| c.started.is_none())
        .count();
    session
        .entries()
        .into_iter()
        .map(|entry| match entry {
            Entry::Exchange(exchange) => {
                index += 1;
                let body = exchange
                    .request
                    .as_ref()
                    .and_then(|r| r.body.as_ref())
                    .and_then(Payload::as_json);
                let (delta, items) = match (previous_body, body) {
                    (Some(prev), Some(body)) => {
                        let delta = json_delta::delta(prev, body);
                        let items = delta.as_ref().map(request_items).unwrap_or_default();
                        (delta.as_ref().map(highlight), items)
                    }
                    (None, Some(body)) => (None, request_items(body)),
                    _ => (None, Vec::new()),
                };
                if body.is_some() {
                    previous_body = body;
                }
                EntryView::Exchange(exchange_view(exchange, index, delta, items))
            }
            Entry::Note(note) => EntryView::Note(note_view(note)),
            Entry::Conversation(started) => {
                previous_body = None;
                conversation += 1;
                EntryView::Conversation(conversation_view(started, conversation))
            }
        })
        .collect()
}

fn conversation_view(conversation: &Conversation, index: usize) -> ConversationView<'_> {
    ConversationView {
        index,
        time: conversation.started.as_ref().map(|key| format_time(&key.at)),
        title: conversation.title.as_deref(),
    }
}

fn exchange_view(
    exchange: &Exchange,
    index: usize,
    delta: Option<String>,
    input_items: Vec<ItemView>,
) -> ExchangeView<'_> {
    let request = exchange.request.as_ref();
    let response = exchange.response.as_ref();
    let summary = [
        request
            .and_then(|r| r.body.as_ref())
            .and_then(Payload::as_json)
            .and_then(request_summary),
        response.and_then(response_summary),
    ]
    .into_iter()
    .flatten()
    .collect::<Vec<_>>();

    ExchangeView {
        index,
        id: &exchange.correlation_id,
        status: exchange.status().into(),
        time: format_time(&exchange.ordering_key.at),
        duration: exchange.duration().map(format_duration),
        summary: (!summary.is_empty()).then(|| summary.join(" \u{2192} ")),
        incomplete: exchange
            .anomalies
            .iter()
            .any(|a| matches!(a, CorrelationAnomaly::Incomplete { .. })),
        anomalies: exchange.anomalies.iter().map(ToString::to_string).collect(),
        request: request.map(|r| RequestView {
            method: &r.method,
            url: &r.url,
            headers: header_views(&r.headers),
            body: r.body.as_ref().map(payload_view),
            items: input_items,
        }),
        response: response.map(|r| ResponseView {
            status: r.status,
            headers: header_views(&r.headers),
            body: r.body.as_ref().map(payload_view),
            streamed: r.is_streamed(),
            reconstructed: r.reconstructed_body(),
            chunks: r
                .chunks
                .iter()
                .map(|c| ChunkView {
                    time: format_time(&c.at),
                    kind: payload_type(&c.payload),
                    terminal: c.terminal,
                    payload: payload_view(&c.payload),
                })
                .collect(),
            completed_at: r.completed_at.as_ref().map(format_time),
            items: response_items(r),
        }),
        delta,
    }
}

fn note_view(note: &DiagnosticLine) -> NoteView<'_> {
    NoteView {
        time: format_time(&note.ordering_key.at),
        level: note.level.map(Into::into),
        source: note.source_tag.as_deref(),
        text: &note.text,
        incomplete: note.incomplete,
    }
}

fn payload_view(payload: &Payload) -> PayloadView<'_> {
    PayloadView {
        html: payload_html(payload),
        error: payload.error(),
    }
}

fn header_views(headers: &Headers) -> Vec<HeaderView<'_>> {
    headers
        .iter()
        .map(|(name, value)| HeaderView { name, value })
        .collect()
}

fn format_local(at: &DateTime<Local>) -> String {
    at.format("%Y-%m-%d %H:%M:%S%.3f").to_string()
}

fn format_time(at: &DateTime<Utc>) -> String {
    at.with_timezone(&Local).format("%H:%M:%S%.3f").to_string()
}

fn format_duration(d: TimeDelta) -> String {
    let ms = d.num_milliseconds();
    if ms < 1000 {
        format!("{ms}ms")
    } else {
        format!("{:.1}s", ms as f64 / 1000.0)
    }
}

/// Escaped text dump used when the template itself fails.
fn plain_report(session: &TraceSession, error: &str) -> String {
    let mut body = format!(
        "codex-trace session {}\nstarted {}, {}\ncommand: {}\n(report template failed: {error})\n\n",
        session.session_id,
        format_local(&session.started_at),
        session.end,
        session.command.join(" "),
    );
    for entry in session.entries() {
        match entry {
            Entry::Exchange(exchange) => {
                let _ = writeln!(
                    body,
                    "[{}] {} {}",
                    exchange.status(),
                    exchange.correlation_id,
                    exchange
                        .request
                        .as_ref()
                        .map(|r| format!("{} {}", r.method, r.url))
                        .unwrap_or_default()
                );
                if let Some(response) = &exchange.response {
                    if let Some(text) = response.reconstructed_body() {
                        body.push_str(&text);
                        body.push('\n');
                    } else if let Some(payload) = &response.body {
                        body.push_str(&payload_text(payload));
                        body.push('\n');
                    }
                }
            }
            Entry::Note(note) => {
                body.push_str(&note.text);
                body.push('\n');
            }
            Entry::Conversation(conversation) => {
                let _ = writeln!(
                    body,
                    "\n== conversation{} ==",
                    conversation
                        .title
                        .as_deref()
                        .map(|t| format!(": {t}"))
                        .unwrap_or_default()
                );
            }
        }
    }
    format!(
        "<!DOCTYPE html>\n<html lang=\"en\">\n<head><meta charset=\"utf-8\"><title>codex-trace</title></head>\n<body><pre>{}</pre></body>\n</html>\n",
        HtmlEscape(&body)
    )
}

fn payload_text(payload: &Payload) -> String {
    match payload {
        Payload::Json(value) => value.to_string(),
        Payload::Raw { text, .. } => text.clone(),
    }
}
