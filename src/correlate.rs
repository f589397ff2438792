//! Request/response correlation.
//!
//! Events carrying a correlation id are matched by id. Events without one are
//! matched by position: a request always opens a new exchange, and a response
//! or chunk goes to the most recent exchange that can still take it. A child
//! issuing one request at a time only ever answers its latest request, so an
//! earlier request that never got an answer (a failed attempt before a retry)
//! stays pending.
//!
//! A session-start line begins a new [`Conversation`]; prompts submitted after
//! it give that conversation its title.
//!
//! Nothing is dropped. Data that can't be matched opens a request-less
//! exchange, and data that conflicts with what an exchange already holds is
//! kept as a [`DiagnosticLine`] next to a [`CorrelationAnomaly`].

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde_json::Value;

use crate::event::{EventKind, Headers, Level, LogEvent, Payload};

/// Something the correlator had to work around.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CorrelationAnomaly {
    #[error("response without matched request")]
    ResponseWithoutRequest,
    #[error("second request for this id at line {line}")]
    DuplicateRequest { line: u64 },
    #[error("second response for this id at line {line}")]
    DuplicateResponse { line: u64 },
    #[error("stream data after the stream ended at line {line}")]
    ChunkAfterCompletion { line: u64 },
    #[error("continuation starting at line {line} never terminated")]
    Incomplete { line: u64 },
}

/// Sort key of an exchange or diagnostic line: time first, then first-seen order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct OrderingKey {
    pub at: DateTime<Utc>,
    pub seq: u64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Request {
    pub method: String,
    pub url: String,
    pub headers: Headers,
    pub body: Option<Payload>,
    pub started_at: DateTime<Utc>,
}

/// One event of a streamed response.
#[derive(Debug, Clone, PartialEq)]
pub struct Chunk {
    pub at: DateTime<Utc>,
    pub fragment: String,
    pub payload: Payload,
    pub terminal: bool,
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct Response {
    pub status: Option<u16>,
    pub headers: Headers,
    /// Body of a non-streamed response
    pub body: Option<Payload>,
    /// Stream events in arrival order
    pub chunks: Vec<Chunk>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl Response {
    pub fn is_streamed(&self) -> bool {
        !self.chunks.is_empty()
    }

    /// Whether a terminal chunk has been seen.
    pub fn stream_ended(&self) -> bool {
        self.chunks.iter().any(|c| c.terminal)
    }

    /// Chunk fragments concatenated in arrival order.
    pub fn reconstructed_body(&self) -> Option<String> {
        self.is_streamed()
            .then(|| self.chunks.iter().map(|c| c.fragment.as_str()).collect())
    }

    /// Payload of the terminal chunk, typically the full final response object.
    pub fn final_payload(&self) -> Option<&Payload> {
        self.chunks.iter().rev().find(|c| c.terminal).map(|c| &c.payload)
    }

    fn has_head(&self) -> bool {
        self.status.is_some() || !self.headers.is_empty() || self.body.is_some()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, strum::Display, strum::IntoStaticStr)]
#[strum(serialize_all = "lowercase")]
pub enum ExchangeStatus {
    Completed,
    Pending,
    /// Response data whose request was never seen
    Orphaned,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Exchange {
    pub correlation_id: String,
    /// Whether the id was synthesized rather than read from the log
    pub implicit_id: bool,
    pub request: Option<Request>,
    pub response: Option<Response>,
    pub ordering_key: OrderingKey,
    pub anomalies: Vec<CorrelationAnomaly>,
}

impl Exchange {
    pub fn status(&self) -> ExchangeStatus {
        if self.request.is_none() {
            ExchangeStatus::Orphaned
        } else if self.is_pending() {
            ExchangeStatus::Pending
        } else {
            ExchangeStatus::Completed
        }
    }

    /// No response, or a response still waiting for its completion.
    pub fn is_pending(&self) -> bool {
        self.completed_at().is_none()
    }

    pub fn completed_at(&self) -> Option<DateTime<Utc>> {
        self.response.as_ref().and_then(|r| r.completed_at)
    }

    /// Time from request start to completion.
    pub fn duration(&self) -> Option<chrono::TimeDelta> {
        let started = self.request.as_ref()?.started_at;
        Some(self.completed_at()? - started)
    }

    fn accepts_response(&self) -> bool {
        self.response.as_ref().is_none_or(|r| !r.has_head())
    }

    fn accepts_chunk(&self) -> bool {
        self.response
            .as_ref()
            .is_none_or(|r| r.body.is_none() && !r.stream_ended())
    }
}

/// An unrecognized line, or one the correlator could not place.
#[derive(Debug, Clone, PartialEq)]
pub struct DiagnosticLine {
    pub ordering_key: OrderingKey,
    pub level: Option<Level>,
    pub source_tag: Option<String>,
    pub text: String,
    pub line: u64,
    pub incomplete: bool,
}

/// One conversation of a child that may serve several in a row.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Conversation {
    /// Position of the line that started it; `None` for activity before the first one
    pub started: Option<OrderingKey>,
    /// Prompt texts in submission order
    pub submissions: Vec<String>,
    /// Short title derived from the first submission
    pub title: Option<String>,
}

/// Everything the correlator produced for one session.
#[derive(Debug, Clone, Default)]
pub struct Correlated {
    pub exchanges: Vec<Exchange>,
    pub notes: Vec<DiagnosticLine>,
    pub conversations: Vec<Conversation>,
    /// Title of the first conversation that has one
    pub title: Option<String>,
}

/// Assembles [`LogEvent`]s into [`Exchange`]s for one session.
#[derive(Debug, Default)]
pub struct ExchangeCorrelator {
    exchanges: Vec<Exchange>,
    by_id: HashMap<String, usize>,
    notes: Vec<DiagnosticLine>,
    conversations: Vec<Conversation>,
    keep_unrecognized: bool,
    next_implicit: u64,
    seq: u64,
}

impl ExchangeCorrelator {
    pub fn new(keep_unrecognized: bool) -> Self {
        Self {
            keep_unrecognized,
            ..Default::default()
        }
    }

    pub fn add(&mut self, event: LogEvent) {
        self.seq += 1;
        let key = OrderingKey {
            at: event.timestamp,
            seq: self.seq,
        };

        match event.kind {
            EventKind::Request {
                ref method,
                ref url,
                ref headers,
                ref body,
            } => {
                let request = Request {
                    method: method.clone(),
                    url: url.clone(),
                    headers: headers.clone(),
                    body: body.clone(),
                    started_at: event.timestamp,
                };
                self.add_request(&event, request, key);
            }
            EventKind::Response {
                status,
                ref headers,
                ref body,
            } => {
                let idx = match &event.correlation_id {
                    Some(id) => self.by_id_or_orphan(id, key),
                    None => self.implicit_target(Exchange::accepts_response, key),
                };
                self.note_incomplete(idx, &event);
                let exchange = &mut self.exchanges[idx];
                let response = exchange.response.get_or_insert_with(Response::default);
                if response.has_head() {
                    exchange
                        .anomalies
                        .push(CorrelationAnomaly::DuplicateResponse { line: event.line });
                    self.keep_line(&event, key);
                    return;
                }
                response.status = status;
                response.headers = headers.clone();
                response.body = body.clone();
                if !response.is_streamed() || response.stream_ended() {
                    // A stream that already ended keeps its terminal chunk's time
                    response.completed_at.get_or_insert(event.timestamp);
                }
            }
            EventKind::Chunk {
                ref fragment,
                ref payload,
                terminal,
            } => {
                let idx = match &event.correlation_id {
                    Some(id) => self.by_id_or_orphan(id, key),
                    None => self.implicit_target(Exchange::accepts_chunk, key),
                };
                self.note_incomplete(idx, &event);
                let exchange = &mut self.exchanges[idx];
                if !exchange.accepts_chunk() {
                    exchange
                        .anomalies
                        .push(CorrelationAnomaly::ChunkAfterCompletion { line: event.line });
                    self.keep_line(&event, key);
                    return;
                }
                let response = exchange.response.get_or_insert_with(Response::default);
                response.chunks.push(Chunk {
                    at: event.timestamp,
                    fragment: fragment.clone(),
                    payload: payload.clone(),
                    terminal,
                });
                response.completed_at = terminal.then_some(event.timestamp);
            }
            EventKind::Submission { ref text } => {
                self.current_conversation().submissions.push(text.clone());
                self.keep_line(&event, key);
            }
            EventKind::SessionStart => {
                self.conversations.push(Conversation {
                    started: Some(key),
                    ..Default::default()
                });
            }
            EventKind::Other { .. } => {
                if self.keep_unrecognized || event.incomplete {
                    self.keep_line(&event, key);
                }
            }
        }
    }

    /// Exchanges sorted by ordering key. Pending exchanges are included.
    pub fn finalize(self) -> Correlated {
        let mut exchanges = self.exchanges;
        exchanges.sort_by_key(|e| e.ordering_key);
        let mut notes = self.notes;
        notes.sort_by_key(|n| n.ordering_key);
        let mut conversations = self.conversations;
        for conversation in &mut conversations {
            conversation.title = conversation
                .submissions
                .first()
                .and_then(|text| title_from_prompt(text));
        }
        let title = conversations.iter().find_map(|c| c.title.clone());
        Correlated {
            exchanges,
            notes,
            conversations,
            title,
        }
    }

    fn current_conversation(&mut self) -> &mut Conversation {
        if self.conversations.is_empty() {
            self.conversations.push(Conversation::default());
        }
        let last = self.conversations.len() - 1;
        &mut self.conversations[last]
    }

    fn add_request(&mut self, event: &LogEvent, request: Request, key: OrderingKey) {
        let Some(id) = &event.correlation_id else {
            let idx = self.open(None, key);
            self.exchanges[idx].request = Some(request);
            self.note_incomplete(idx, event);
            return;
        };

        let Some(&idx) = self.by_id.get(id) else {
            let idx = self.open(Some(id.clone()), key);
            self.exchanges[idx].request = Some(request);
            self.note_incomplete(idx, event);
            return;
        };

        self.note_incomplete(idx, event);
        let exchange = &mut self.exchanges[idx];
        match &mut exchange.request {
            None => {
                // Response arrived first; the exchange is no longer orphaned
                exchange.ordering_key = OrderingKey {
                    at: request.started_at,
                    seq: exchange.ordering_key.seq,
                };
                exchange
                    .anomalies
                    .retain(|a| *a != CorrelationAnomaly::ResponseWithoutRequest);
                exchange.request = Some(request);
            }
            Some(existing) if is_compatible(existing, &request) => {
                for (name, value) in request.headers {
                    existing.headers.entry(name).or_insert(value);
                }
                if existing.body.is_none() {
                    existing.body = request.body;
                }
            }
            Some(_) => {
                exchange
                    .anomalies
                    .push(CorrelationAnomaly::DuplicateRequest { line: event.line });
                self.keep_line(event, key);
            }
        }
    }

    fn by_id_or_orphan(&mut self, id: &str, key: OrderingKey) -> usize {
        if let Some(&idx) = self.by_id.get(id) {
            return idx;
        }
        let idx = self.open(Some(id.to_string()), key);
        self.exchanges[idx]
            .anomalies
            .push(CorrelationAnomaly::ResponseWithoutRequest);
        idx
    }

    /// Newest exchange accepting the event, else a new orphan.
    fn implicit_target(&mut self, accepts: fn(&Exchange) -> bool, key: OrderingKey) -> usize {
        if let Some(idx) = self
            .exchanges
            .iter()
            .rposition(|e| e.implicit_id && e.request.is_some() && accepts(e))
        {
            return idx;
        }
        let idx = self.open(None, key);
        self.exchanges[idx]
            .anomalies
            .push(CorrelationAnomaly::ResponseWithoutRequest);
        idx
    }

    fn open(&mut self, id: Option<String>, key: OrderingKey) -> usize {
        let implicit_id = id.is_none();
        let id = id.unwrap_or_else(|| {
            self.next_implicit += 1;
            format!("#{}", self.next_implicit)
        });
        let idx = self.exchanges.len();
        self.by_id.insert(id.clone(), idx);
        self.exchanges.push(Exchange {
            correlation_id: id,
            implicit_id,
            request: None,
            response: None,
            ordering_key: key,
            anomalies: Vec::new(),
        });
        idx
    }

    fn note_incomplete(&mut self, idx: usize, event: &LogEvent) {
        if event.incomplete {
            self.exchanges[idx]
                .anomalies
                .push(CorrelationAnomaly::Incomplete { line: event.line });
        }
    }

    fn keep_line(&mut self, event: &LogEvent, key: OrderingKey) {
        self.notes.push(DiagnosticLine {
            ordering_key: key,
            level: event.level,
            source_tag: event.source_tag.clone(),
            text: event.payload_fragment.clone(),
            line: event.line,
            incomplete: event.incomplete,
        });
    }
}

/// A repeated request line is an update when it doesn't contradict the first.
fn is_compatible(existing: &Request, update: &Request) -> bool {
    let same_target = existing.method == update.method && existing.url == update.url;
    let body_agrees = match (&existing.body, &update.body) {
        (Some(a), Some(b)) => a == b,
        _ => true,
    };
    same_target && body_agrees
}

/// Marker the editor puts before the user's own words in a composed prompt.
const PROMPT_MARKER: &str = "## My request for Codex:";

/// The user's own words of a composed prompt.
pub fn strip_prompt_preamble(text: &str) -> &str {
    text.split_once(PROMPT_MARKER)
        .map_or(text, |(_, request)| request.trim_start())
}

/// First five words of a prompt, at most 20 characters, punctuation stripped.
pub fn title_from_prompt(text: &str) -> Option<String> {
    let text = strip_prompt_preamble(text);
    let cleaned: String = text
        .chars()
        .filter(|c| c.is_alphanumeric() || matches!(c, ' ' | '-' | '_'))
        .collect();
    let words: Vec<&str> = cleaned.split_whitespace().take(5).collect();
    let title: String = words.join(" ").chars().take(20).collect();
    let title = title.trim();
    (!title.is_empty()).then(|| title.to_string())
}

/// Text of the JSON `type` field, for summaries.
pub fn payload_type(payload: &Payload) -> Option<&str> {
    payload.as_json()?.get("type").and_then(Value::as_str)
}
