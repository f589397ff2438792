//! Structured events recovered from diagnostic lines.

use chrono::{DateTime, Utc};
use indexmap::IndexMap;
use serde_json::Value;

/// Header names and values in the order they appeared.
pub type Headers = IndexMap<String, String>;

/// Log level from the tracing prefix of a line.
#[derive(Debug, Clone, Copy, PartialEq, Eq, strum::Display, strum::EnumString, strum::IntoStaticStr)]
#[strum(serialize_all = "UPPERCASE", ascii_case_insensitive)]
pub enum Level {
    Trace,
    Debug,
    Info,
    Warn,
    Error,
}

/// A payload embedded in a diagnostic line.
#[derive(Debug, Clone, PartialEq)]
pub enum Payload {
    Json(Value),
    /// Text that could not be parsed as JSON, kept verbatim.
    Raw {
        text: String,
        /// Parser error, when the text looked like JSON but wasn't
        error: Option<String>,
    },
}

impl Payload {
    pub fn raw(text: impl Into<String>) -> Self {
        Payload::Raw {
            text: text.into(),
            error: None,
        }
    }

    pub fn as_json(&self) -> Option<&Value> {
        match self {
            Payload::Json(v) => Some(v),
            Payload::Raw { .. } => None,
        }
    }

    /// The parse error, if this payload failed to parse.
    pub fn error(&self) -> Option<&str> {
        match self {
            Payload::Raw { error, .. } => error.as_deref(),
            Payload::Json(_) => None,
        }
    }
}

/// What a line announced.
#[derive(Debug, Clone, PartialEq)]
pub enum EventKind {
    /// An outbound request
    Request {
        method: String,
        url: String,
        headers: Headers,
        body: Option<Payload>,
    },
    /// A received (non-streamed) response, or the status line of a stream
    Response {
        status: Option<u16>,
        headers: Headers,
        body: Option<Payload>,
    },
    /// One event of a streamed response body
    Chunk {
        /// Text appended to the reconstructed body
        fragment: String,
        payload: Payload,
        /// Whether this chunk ends the stream
        terminal: bool,
    },
    /// A user prompt submitted to the child
    Submission { text: String },
    /// The child started a new conversation
    SessionStart,
    /// A line that matched nothing in the grammar
    Other { text: String },
}

impl EventKind {
    pub fn name(&self) -> &'static str {
        match self {
            EventKind::Request { .. } => "request",
            EventKind::Response { .. } => "response",
            EventKind::Chunk { .. } => "chunk",
            EventKind::Submission { .. } => "submission",
            EventKind::SessionStart => "session-start",
            EventKind::Other { .. } => "other",
        }
    }
}

/// One recognized line (or group of continuation lines).
#[derive(Debug, Clone, PartialEq)]
pub struct LogEvent {
    pub timestamp: DateTime<Utc>,
    pub level: Option<Level>,
    pub source_tag: Option<String>,
    pub kind: EventKind,
    pub correlation_id: Option<String>,
    /// The message text the event was extracted from, without the log prefix
    pub payload_fragment: String,
    /// 1-based number of the line that opened this event
    pub line: u64,
    /// Set when a continuation group never saw its terminating line
    pub incomplete: bool,
}
