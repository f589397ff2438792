//! Diagnostic line parsing.
//!
//! [`LineParser`] is a two-state machine. In `Idle`, each line is split into
//! its tracing prefix and message and classified against the grammar. A
//! recognized line ending with the grammar's continuation marker moves the
//! parser to `AwaitingContinuation`, where every following line is kept
//! verbatim until the closing marker line arrives; the group is then
//! classified as one message. A group that never closes is still emitted,
//! flagged `incomplete`, by [`LineParser::finish`] or when it outgrows
//! `max-continuation-lines`.
//!
//! Classification never fails. A payload that doesn't parse as JSON is kept
//! as [`Payload::Raw`] together with the parser error, and a line that matches
//! nothing becomes [`EventKind::Other`].

use std::str::FromStr;
use std::sync::LazyLock;

use chrono::{DateTime, NaiveDateTime, Utc};
use regex::Regex;
use serde_json::Value;

use crate::event::{EventKind, Headers, Level, LogEvent, Payload};
use crate::grammar::CompiledGrammar;

static ANSI_ESCAPE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\x1b\[[0-9;?]*[ -/]*[@-~]").unwrap());

/// Prefix fields of one line.
#[derive(Debug, Clone)]
struct Prefix {
    timestamp: DateTime<Utc>,
    level: Option<Level>,
    source_tag: Option<String>,
}

#[derive(Debug)]
enum State {
    Idle,
    AwaitingContinuation(Continuation),
}

#[derive(Debug)]
struct Continuation {
    prefix: Prefix,
    /// Message of the opening line, marker stripped
    head: String,
    lines: Vec<String>,
    line: u64,
}

/// Turns diagnostic lines into [`LogEvent`]s.
#[derive(Debug)]
pub struct LineParser<'g> {
    grammar: &'g CompiledGrammar,
    state: State,
    line: u64,
}

impl<'g> LineParser<'g> {
    pub fn new(grammar: &'g CompiledGrammar) -> Self {
        Self {
            grammar,
            state: State::Idle,
            line: 0,
        }
    }

    /// Whether a continuation group is open.
    pub fn is_awaiting_continuation(&self) -> bool {
        matches!(self.state, State::AwaitingContinuation(_))
    }

    /// Feed one line. `received_at` timestamps lines without a parseable prefix.
    pub fn feed(&mut self, line: &str, received_at: DateTime<Utc>) -> Option<LogEvent> {
        self.line += 1;
        let line = strip_line(line);

        match std::mem::replace(&mut self.state, State::Idle) {
            State::AwaitingContinuation(mut cont) => {
                if line.trim() == self.grammar.def.continuation_close {
                    return Some(self.close(cont, false));
                }
                cont.lines.push(line);
                if cont.lines.len() >= self.grammar.def.max_continuation_lines {
                    log::debug!(
                        "Continuation opened at line {} exceeded {} lines",
                        cont.line,
                        self.grammar.def.max_continuation_lines
                    );
                    return Some(self.close(cont, true));
                }
                self.state = State::AwaitingContinuation(cont);
                None
            }
            State::Idle => {
                if line.trim().is_empty() {
                    return None;
                }
                let (prefix, msg) = self.split_prefix(&line, received_at);
                let marker = &self.grammar.def.continuation_open;
                if let Some(head) = msg.trim_end().strip_suffix(marker.as_str())
                    && self.is_recognized(head)
                {
                    self.state = State::AwaitingContinuation(Continuation {
                        prefix,
                        head: head.trim_end().to_string(),
                        lines: Vec::new(),
                        line: self.line,
                    });
                    return None;
                }
                Some(self.classify(prefix, msg, self.line, false))
            }
        }
    }

    /// End of stream. Flushes an unterminated continuation group.
    pub fn finish(&mut self) -> Option<LogEvent> {
        match std::mem::replace(&mut self.state, State::Idle) {
            State::AwaitingContinuation(cont) => Some(self.close(cont, true)),
            State::Idle => None,
        }
    }

    fn close(&self, cont: Continuation, incomplete: bool) -> LogEvent {
        let mut msg = cont.head;
        for line in cont.lines {
            msg.push('\n');
            msg.push_str(&line);
        }
        self.classify(cont.prefix, msg, cont.line, incomplete)
    }

    fn split_prefix(&self, line: &str, received_at: DateTime<Utc>) -> (Prefix, String) {
        let Some(caps) = self.grammar.line.captures(line) else {
            return (
                Prefix {
                    timestamp: received_at,
                    level: None,
                    source_tag: None,
                },
                line.to_string(),
            );
        };
        let timestamp = caps
            .name("ts")
            .and_then(|ts| parse_timestamp(ts.as_str()))
            .unwrap_or(received_at);
        let level = caps
            .name("level")
            .and_then(|l| Level::from_str(l.as_str()).ok());
        let source_tag = caps.name("source").map(|s| s.as_str().to_string());
        let msg = caps.name("msg").map_or("", |m| m.as_str()).to_string();
        (
            Prefix {
                timestamp,
                level,
                source_tag,
            },
            msg,
        )
    }

    fn is_recognized(&self, msg: &str) -> bool {
        let g = self.grammar;
        g.request.is_match(msg)
            || g.response.is_match(msg)
            || g.chunk.is_match(msg)
            || g.submission.is_match(msg)
    }

    fn classify(&self, prefix: Prefix, msg: String, line: u64, incomplete: bool) -> LogEvent {
        let kind = self.classify_message(&msg);
        let correlation_id = match kind {
            EventKind::Other { .. } | EventKind::SessionStart => None,
            _ => self.correlation_id(&msg),
        };
        LogEvent {
            timestamp: prefix.timestamp,
            level: prefix.level,
            source_tag: prefix.source_tag,
            kind,
            correlation_id,
            payload_fragment: msg,
            line,
            incomplete,
        }
    }

    fn classify_message(&self, msg: &str) -> EventKind {
        let g = self.grammar;

        if g.session_start.is_match(msg) {
            return EventKind::SessionStart;
        }

        if let Some(caps) = g.request.captures(msg)
            && let (Some(method), Some(url)) = (caps.name("method"), caps.name("url"))
        {
            let rest = &msg[caps.get(0).map_or(0, |m| m.end())..];
            let (headers, rest) = extract_headers(rest, &g.def.headers_marker);
            return EventKind::Request {
                method: method.as_str().to_ascii_uppercase(),
                url: url.as_str().to_string(),
                headers,
                body: extract_json(&rest),
            };
        }

        if let Some(caps) = g.response.captures(msg) {
            let rest = &msg[caps.get(0).map_or(0, |m| m.end())..];
            let (headers, rest) = extract_headers(rest, &g.def.headers_marker);
            return EventKind::Response {
                status: caps.name("status").and_then(|s| s.as_str().parse().ok()),
                headers,
                body: extract_json(&rest),
            };
        }

        if let Some(m) = g.chunk.find(msg) {
            let rest = msg[m.end()..].trim();
            let rest = self.strip_correlation_id(rest);
            return self.chunk(rest.trim());
        }

        if let Some(text) = g
            .submission
            .captures(msg)
            .and_then(|caps| caps.name("text"))
        {
            return EventKind::Submission {
                text: unescape_rust(text.as_str()),
            };
        }

        EventKind::Other {
            text: msg.to_string(),
        }
    }

    fn chunk(&self, text: &str) -> EventKind {
        let def = &self.grammar.def;

        if def.terminal_chunk_markers.iter().any(|m| m == text) {
            return EventKind::Chunk {
                fragment: String::new(),
                payload: Payload::raw(text),
                terminal: true,
            };
        }

        let payload = if text.starts_with(['{', '[', '"']) {
            parse_json(text)
        } else {
            Payload::raw(text)
        };

        let (fragment, terminal) = match &payload {
            Payload::Json(Value::Object(map)) => {
                let fragment = map
                    .get(&def.delta_field)
                    .and_then(Value::as_str)
                    .unwrap_or_default()
                    .to_string();
                let terminal = map
                    .get("type")
                    .and_then(Value::as_str)
                    .is_some_and(|t| def.terminal_chunk_types.iter().any(|x| x == t));
                (fragment, terminal)
            }
            Payload::Json(Value::String(s)) => (s.clone(), false),
            Payload::Json(_) => (String::new(), false),
            Payload::Raw { text, .. } => (text.clone(), false),
        };

        EventKind::Chunk {
            fragment,
            payload,
            terminal,
        }
    }

    /// Correlation id from the text preceding any embedded JSON.
    fn correlation_id(&self, msg: &str) -> Option<String> {
        let head = match msg.find(['{', '[']) {
            Some(idx) => &msg[..idx],
            None => msg,
        };
        self.grammar
            .correlation_id
            .captures(head)
            .and_then(|caps| caps.name("id"))
            .map(|id| id.as_str().to_string())
            .filter(|id| !id.is_empty())
    }

    /// Drop a leading correlation id so it doesn't end up in a raw chunk payload.
    fn strip_correlation_id<'a>(&self, text: &'a str) -> &'a str {
        match self.grammar.correlation_id.find(text) {
            Some(m) if m.start() == 0 => &text[m.end()..],
            _ => text,
        }
    }
}

fn strip_line(line: &str) -> String {
    let line = line.trim_end_matches(['\n', '\r']);
    ANSI_ESCAPE.replace_all(line, "").into_owned()
}

fn parse_timestamp(ts: &str) -> Option<DateTime<Utc>> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(ts) {
        return Some(dt.with_timezone(&Utc));
    }
    // tracing's default timer without an offset
    ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f"]
        .iter()
        .find_map(|fmt| NaiveDateTime::parse_from_str(ts, fmt).ok())
        .map(|naive| naive.and_utc())
}

/// Pull a `marker{...}` JSON object out of `text`.
///
/// Returns the headers and the text with the marker and object removed. A
/// marker followed by something that isn't a JSON object is left in place.
fn extract_headers(text: &str, marker: &str) -> (Headers, String) {
    let mut headers = Headers::new();
    if marker.is_empty() {
        return (headers, text.to_string());
    }
    let Some(idx) = text.find(marker) else {
        return (headers, text.to_string());
    };
    let start = idx + marker.len();
    let mut stream = serde_json::Deserializer::from_str(&text[start..]).into_iter::<Value>();
    match stream.next() {
        Some(Ok(Value::Object(map))) => {
            let end = start + stream.byte_offset();
            for (name, value) in map {
                let value = match value {
                    Value::String(s) => s,
                    other => other.to_string(),
                };
                headers.insert(name, value);
            }
            let mut rest = text[..idx].to_string();
            rest.push_str(&text[end..]);
            (headers, rest)
        }
        _ => {
            log::debug!("Ignoring malformed headers after {marker:?}");
            (headers, text.to_string())
        }
    }
}

/// The JSON value embedded in free text, starting at its first `{` or `[`.
///
/// `None` when there is no JSON-looking text at all.
pub fn extract_json(text: &str) -> Option<Payload> {
    let idx = text.find(['{', '['])?;
    Some(parse_json(text[idx..].trim()))
}

/// Parse a whole payload, tolerating free text after the JSON value.
fn parse_json(text: &str) -> Payload {
    let err = match serde_json::from_str::<Value>(text) {
        Ok(value) => return Payload::Json(value),
        Err(e) => e,
    };
    // `{"a":1} (took 3ms)` - the value parses, the tail doesn't
    let mut stream = serde_json::Deserializer::from_str(text).into_iter::<Value>();
    if let Some(Ok(value)) = stream.next() {
        return Payload::Json(value);
    }
    Payload::Raw {
        text: text.to_string(),
        error: Some(err.to_string()),
    }
}

/// Undo Rust `Debug` string escaping.
pub fn unescape_rust(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    let mut chars = s.chars();
    while let Some(c) = chars.next() {
        if c != '\\' {
            out.push(c);
            continue;
        }
        match chars.next() {
            Some('n') => out.push('\n'),
            Some('r') => out.push('\r'),
            Some('t') => out.push('\t'),
            Some('"') => out.push('"'),
            Some('\'') => out.push('\''),
            Some('\\') => out.push('\\'),
            Some('0') => out.push('\0'),
            Some(other) => {
                out.push('\\');
                out.push(other);
            }
            None => out.push('\\'),
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use rstest::rstest;
    use serde_json::json;

    fn at() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 3, 1, 9, 0, 0).unwrap()
    }

    fn parse_one(line: &str) -> LogEvent {
        let grammar = CompiledGrammar::default();
        let mut parser = LineParser::new(&grammar);
        parser.feed(line, at()).expect("line should produce an event")
    }

    #[test]
    fn test_request_line_with_tracing_prefix() {
        let event = parse_one(
            r#"2026-03-01T09:00:01.250000Z TRACE codex_core::client: POST to https://api.openai.com/v1/responses: {"model":"o3","input":[]}"#,
        );
        assert_eq!(
            event.timestamp,
            Utc.with_ymd_and_hms(2026, 3, 1, 9, 0, 1).unwrap() + chrono::Duration::milliseconds(250)
        );
        assert_eq!(event.level, Some(Level::Trace));
        assert_eq!(event.source_tag.as_deref(), Some("codex_core::client"));
        let EventKind::Request {
            method, url, body, ..
        } = event.kind
        else {
            panic!("expected request, got {:?}", event.kind);
        };
        assert_eq!(method, "POST");
        assert_eq!(url, "https://api.openai.com/v1/responses");
        assert_eq!(body, Some(Payload::Json(json!({"model":"o3","input":[]}))));
    }

    #[test]
    fn test_request_with_headers_and_id() {
        let event = parse_one(
            r#"POST to https://example.test/v1 request_id=abc-1 headers={"content-type":"application/json","retries":2} {"q":1}"#,
        );
        assert_eq!(event.correlation_id.as_deref(), Some("abc-1"));
        let EventKind::Request { headers, body, .. } = event.kind else {
            panic!("expected request");
        };
        assert_eq!(headers["content-type"], "application/json");
        assert_eq!(headers["retries"], "2");
        assert_eq!(body, Some(Payload::Json(json!({"q":1}))));
    }

    #[test]
    fn test_line_without_prefix_uses_received_time() {
        let event = parse_one("GET to https://example.test/health");
        assert_eq!(event.timestamp, at());
        assert_eq!(event.level, None);
        let EventKind::Request { body, .. } = event.kind else {
            panic!("expected request");
        };
        assert_eq!(body, None);
    }

    #[test]
    fn test_response_line() {
        let event = parse_one(
            r#"2026-03-01T09:00:02Z DEBUG codex_core::client: Response status: 200 req_id=r7 {"ok":true}"#,
        );
        assert_eq!(event.correlation_id.as_deref(), Some("r7"));
        assert_eq!(
            event.kind,
            EventKind::Response {
                status: Some(200),
                headers: Headers::new(),
                body: Some(Payload::Json(json!({"ok":true}))),
            }
        );
    }

    #[test]
    fn test_malformed_json_keeps_raw_text() {
        let event = parse_one(r#"POST to https://example.test/v1: {"model": "o3", "input": [}"#);
        let EventKind::Request {
            body: Some(Payload::Raw { text, error }),
            ..
        } = event.kind
        else {
            panic!("expected raw body, got {:?}", event.kind);
        };
        assert_eq!(text, r#"{"model": "o3", "input": [}"#);
        assert!(error.is_some());
    }

    #[test]
    fn test_json_followed_by_free_text() {
        let event = parse_one(r#"Response status: 201 {"id":7} (took 12ms)"#);
        let EventKind::Response { body, .. } = event.kind else {
            panic!("expected response");
        };
        assert_eq!(body, Some(Payload::Json(json!({"id":7}))));
    }

    #[rstest]
    #[case::delta(
        r#"SSE event: {"type":"response.output_text.delta","delta":"foo"}"#,
        "foo",
        false
    )]
    #[case::completed(r#"SSE event: {"type":"response.completed","response":{}}"#, "", true)]
    #[case::done_marker("SSE event: [DONE]", "", true)]
    #[case::raw_text("SSE event: plain words", "plain words", false)]
    #[case::json_string(r#"SSE event: "bar""#, "bar", false)]
    fn test_chunk_lines(#[case] line: &str, #[case] expected: &str, #[case] expected_terminal: bool) {
        let event = parse_one(line);
        let EventKind::Chunk {
            fragment, terminal, ..
        } = event.kind
        else {
            panic!("expected chunk, got {:?}", event.kind);
        };
        assert_eq!(fragment, expected);
        assert_eq!(terminal, expected_terminal);
    }

    #[test]
    fn test_chunk_with_correlation_id() {
        let event = parse_one(r#"SSE event: request_id=C {"type":"x","delta":"bar"}"#);
        assert_eq!(event.correlation_id.as_deref(), Some("C"));
        let EventKind::Chunk { fragment, .. } = event.kind else {
            panic!("expected chunk");
        };
        assert_eq!(fragment, "bar");
    }

    #[test]
    fn test_submission_is_unescaped() {
        let event = parse_one(
            r#"INFO codex_mcp_server: Submission { id: "1", op: UserInput { items: [Text { text: "fix the \"bug\"\nplease" }] } }"#,
        );
        assert_eq!(
            event.kind,
            EventKind::Submission {
                text: "fix the \"bug\"\nplease".into()
            }
        );
    }

    #[test]
    fn test_unrecognized_line_is_other() {
        let event = parse_one("2026-03-01T09:00:00Z INFO codex_core: Loaded 3 tools");
        assert_eq!(
            event.kind,
            EventKind::Other {
                text: "Loaded 3 tools".into()
            }
        );
        assert_eq!(event.correlation_id, None);
    }

    #[test]
    fn test_session_start_line() {
        let event = parse_one("2026-03-01T09:00:00Z INFO codex_core::codex: Configuring session: model=o3");
        assert_eq!(event.kind, EventKind::SessionStart);
        assert_eq!(event.correlation_id, None);
    }

    #[test]
    fn test_optional_groups_that_did_not_match() {
        let grammar = crate::grammar::Grammar {
            request: r"^(?P<method>POST)?\s*to (?P<url>\S+)".to_string(),
            submission: r"^prompt(?: (?P<text>.+))?$".to_string(),
            correlation_id: r"\brid=(?P<id>\w+)?".to_string(),
            ..Default::default()
        }
        .compile()
        .unwrap();
        let mut parser = LineParser::new(&grammar);

        let event = parser.feed("to https://api.test/v1", at()).unwrap();
        assert_eq!(
            event.kind,
            EventKind::Other {
                text: "to https://api.test/v1".into()
            }
        );

        let event = parser.feed("prompt", at()).unwrap();
        assert_eq!(event.kind.name(), "other");

        let event = parser.feed("POST to https://api.test/v1 rid=", at()).unwrap();
        assert_eq!(event.kind.name(), "request");
        assert_eq!(event.correlation_id, None);
    }

    #[test]
    fn test_ansi_escapes_are_stripped() {
        let event = parse_one("\x1b[2m2026-03-01T09:00:00Z\x1b[0m \x1b[35mTRACE\x1b[0m codex_core::client: POST to https://x.test/a");
        assert_eq!(event.level, Some(Level::Trace));
        assert_eq!(event.kind.name(), "request");
    }

    #[test]
    fn test_blank_lines_produce_nothing() {
        let grammar = CompiledGrammar::default();
        let mut parser = LineParser::new(&grammar);
        assert_eq!(parser.feed("   \r\n", at()), None);
        assert_eq!(parser.finish(), None);
    }

    #[test]
    fn test_continuation_reassembles_body() {
        let grammar = CompiledGrammar::default();
        let mut parser = LineParser::new(&grammar);
        assert!(
            parser
                .feed("2026-03-01T09:00:00Z TRACE codex_core::client: POST to https://x.test/a <<EOF", at())
                .is_none()
        );
        assert!(parser.is_awaiting_continuation());
        assert!(parser.feed("{", at()).is_none());
        assert!(parser.feed(r#"  "model": "o3""#, at()).is_none());
        assert!(parser.feed("}", at()).is_none());
        let event = parser.feed("EOF", at()).unwrap();
        assert!(!parser.is_awaiting_continuation());
        assert!(!event.incomplete);
        assert_eq!(event.line, 1);
        let EventKind::Request { body, url, .. } = event.kind else {
            panic!("expected request");
        };
        assert_eq!(url, "https://x.test/a");
        assert_eq!(body, Some(Payload::Json(json!({"model":"o3"}))));
    }

    #[test]
    fn test_unterminated_continuation_is_flushed_incomplete() {
        let grammar = CompiledGrammar::default();
        let mut parser = LineParser::new(&grammar);
        parser.feed("Response status: 500 <<EOF", at());
        parser.feed(r#"{"error": "#, at());
        let event = parser.finish().expect("continuation must not be lost");
        assert!(event.incomplete);
        let EventKind::Response { status, body, .. } = event.kind else {
            panic!("expected response");
        };
        assert_eq!(status, Some(500));
        assert!(matches!(body, Some(Payload::Raw { .. })));
    }

    #[test]
    fn test_continuation_limit_flushes() {
        let grammar = crate::grammar::Grammar {
            max_continuation_lines: 2,
            ..Default::default()
        }
        .compile()
        .unwrap();
        let mut parser = LineParser::new(&grammar);
        parser.feed("SSE event: <<EOF", at());
        assert!(parser.feed("one", at()).is_none());
        let event = parser.feed("two", at()).unwrap();
        assert!(event.incomplete);
        assert_eq!(event.payload_fragment, "SSE event:\none\ntwo");
        // Back to idle: the next line is classified on its own
        assert_eq!(parser.feed("three", at()).unwrap().kind.name(), "other");
    }

    #[test]
    fn test_marker_on_unrecognized_line_is_not_continuation() {
        let grammar = CompiledGrammar::default();
        let mut parser = LineParser::new(&grammar);
        let event = parser.feed("cat <<EOF", at()).unwrap();
        assert_eq!(event.kind.name(), "other");
        assert!(!parser.is_awaiting_continuation());
    }

    #[rstest]
    #[case(r"a\nb", "a\nb")]
    #[case(r#"say \"hi\""#, "say \"hi\"")]
    #[case(r"back\\slash\n", "back\\slash\n")]
    #[case(r"tab\there", "tab\there")]
    #[case(r"odd\q", r"odd\q")]
    fn test_unescape_rust(#[case] input: &str, #[case] expected: &str) {
        assert_eq!(unescape_rust(input), expected);
    }
}
