//! The diagnostic-text grammar.
//!
//! What marks a request line, a response line or a stream chunk is a contract
//! of the child binary, and it changes between releases. Every pattern is
//! therefore data: [`Grammar`] is deserialized from the `[grammar]` table of
//! the config file, with any missing field taken from the built-in `codex-v1`
//! defaults, and compiled once into a [`CompiledGrammar`].
//!
//! Patterns are matched against the *message* part of a line (after the
//! tracing prefix is split off by [`Grammar::line`]). Named groups:
//!
//! | pattern          | groups                      |
//! |------------------|-----------------------------|
//! | `line`           | `ts`, `level`, `source`, `msg` |
//! | `request`        | `method`, `url`             |
//! | `response`       | `status`                    |
//! | `chunk`          | (none; the payload follows the match) |
//! | `submission`     | `text`                      |
//! | `session-start`  | (none)                      |
//! | `correlation-id` | `id`                        |
//!
//! A group that exists but doesn't take part in a match is treated like a
//! failed match: the line falls through to the next pattern.

use regex::Regex;
use serde::{Deserialize, Serialize};

/// Version tag of the built-in grammar.
pub const DEFAULT_VERSION: &str = "codex-v1";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "kebab-case")]
pub struct Grammar {
    /// Free-form version tag, shown in the report
    pub version: String,
    /// Splits a tracing-formatted line into timestamp, level, source and message
    pub line: String,
    pub request: String,
    pub response: String,
    pub chunk: String,
    pub submission: String,
    /// Marks the start of a new conversation in a long-running child
    pub session_start: String,
    pub correlation_id: String,
    /// Literal that introduces an embedded JSON object of headers
    pub headers_marker: String,
    /// JSON `type` values that end a stream
    pub terminal_chunk_types: Vec<String>,
    /// Raw chunk payloads that end a stream
    pub terminal_chunk_markers: Vec<String>,
    /// Field of a JSON chunk holding the text to append to the body
    pub delta_field: String,
    /// Suffix of a recognized line announcing continuation lines
    pub continuation_open: String,
    /// Line that ends a continuation group
    pub continuation_close: String,
    pub max_continuation_lines: usize,
}

impl Default for Grammar {
    fn default() -> Self {
        Self {
            version: DEFAULT_VERSION.to_string(),
            line: r"^(?P<ts>\d{4}-\d{2}-\d{2}[T ]\S+)\s+(?P<level>TRACE|DEBUG|INFO|WARN|ERROR)\s+(?:(?P<source>\S+?):\s)?(?P<msg>.*)$".to_string(),
            request: r"^[^{]*?\b(?P<method>GET|POST|PUT|PATCH|DELETE|HEAD|OPTIONS) to (?P<url>[^\s{]+?):?(?:\s|$)".to_string(),
            response: r"(?i)^[^{]*?\bresponse status[:=]?\s*(?P<status>\d{3})\b".to_string(),
            chunk: r"^[^{]*?\bSSE event:\s*".to_string(),
            submission: r#"^[^{]*?\bSubmission\b.*?Text\s*\{\s*text:\s*"(?P<text>(?:[^"\\]|\\.)*)""#.to_string(),
            session_start: r"^[^{]*\bConfiguring session\b".to_string(),
            correlation_id: r#"\b(?:request_id|req_id|correlation_id)[=:]\s*"?(?P<id>[\w.:-]+)"#.to_string(),
            headers_marker: "headers=".to_string(),
            terminal_chunk_types: vec![
                "response.completed".to_string(),
                "response.failed".to_string(),
                "response.incomplete".to_string(),
            ],
            terminal_chunk_markers: vec!["[DONE]".to_string()],
            delta_field: "delta".to_string(),
            continuation_open: "<<EOF".to_string(),
            continuation_close: "EOF".to_string(),
            max_continuation_lines: 10_000,
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum GrammarError {
    #[error("invalid `{field}` pattern in grammar {version}")]
    Pattern {
        field: &'static str,
        version: String,
        #[source]
        source: Box<regex::Error>,
    },

    #[error("`{field}` pattern in grammar {version} is missing the `{group}` group")]
    MissingGroup {
        field: &'static str,
        group: &'static str,
        version: String,
    },

    #[error("grammar {version} has an empty continuation marker")]
    EmptyMarker { version: String },
}

/// A grammar with its patterns compiled.
#[derive(Debug, Clone)]
pub struct CompiledGrammar {
    pub(crate) def: Grammar,
    pub(crate) line: Regex,
    pub(crate) request: Regex,
    pub(crate) response: Regex,
    pub(crate) chunk: Regex,
    pub(crate) submission: Regex,
    pub(crate) session_start: Regex,
    pub(crate) correlation_id: Regex,
}

impl CompiledGrammar {
    pub fn version(&self) -> &str {
        &self.def.version
    }
}

impl Default for CompiledGrammar {
    fn default() -> Self {
        Grammar::default()
            .compile()
            .expect("built-in grammar patterns are valid")
    }
}

impl Grammar {
    pub fn compile(&self) -> Result<CompiledGrammar, GrammarError> {
        if self.continuation_open.is_empty() || self.continuation_close.is_empty() {
            return Err(GrammarError::EmptyMarker {
                version: self.version.clone(),
            });
        }

        Ok(CompiledGrammar {
            line: self.pattern("line", &self.line, &["msg"])?,
            request: self.pattern("request", &self.request, &["method", "url"])?,
            response: self.pattern("response", &self.response, &[])?,
            chunk: self.pattern("chunk", &self.chunk, &[])?,
            submission: self.pattern("submission", &self.submission, &["text"])?,
            session_start: self.pattern("session-start", &self.session_start, &[])?,
            correlation_id: self.pattern("correlation-id", &self.correlation_id, &["id"])?,
            def: self.clone(),
        })
    }

    fn pattern(
        &self,
        field: &'static str,
        source: &str,
        groups: &[&'static str],
    ) -> Result<Regex, GrammarError> {
        let re = Regex::new(source).map_err(|e| GrammarError::Pattern {
            field,
            version: self.version.clone(),
            source: Box::new(e),
        })?;
        for group in groups {
            if !re.capture_names().flatten().any(|name| name == *group) {
                return Err(GrammarError::MissingGroup {
                    field,
                    group,
                    version: self.version.clone(),
                });
            }
        }
        Ok(re)
    }
}
