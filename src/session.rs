//! One supervisor run.
//!
//! While the child runs, a [`SessionRecorder`] owned by the main loop takes
//! every stderr line. When the run ends it is frozen with
//! [`SessionRecorder::finish`] into a [`TraceSession`], which is rendered and
//! written exactly once.

use std::io::Write;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Local, Utc};

use crate::correlate::{
    Conversation, DiagnosticLine, Exchange, ExchangeCorrelator, ExchangeStatus, OrderingKey,
};
use crate::error::{Direction, TraceError};
use crate::grammar::CompiledGrammar;
use crate::parse::LineParser;

/// How the run ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionEnd {
    /// The child exited on its own with this code
    Exited(i32),
    /// The child was killed by this signal
    Signaled(i32),
    /// The supervisor received this signal and shut the child down
    Interrupted { signal: i32 },
    /// A passthrough pipe failed and the child was shut down
    PassthroughFailed(Direction),
}

impl SessionEnd {
    /// Exit code the supervisor reports for this ending.
    pub fn exit_code(&self) -> i32 {
        match *self {
            SessionEnd::Exited(code) => code,
            SessionEnd::Signaled(signal) | SessionEnd::Interrupted { signal } => 128 + signal,
            SessionEnd::PassthroughFailed(_) => 1,
        }
    }
}

impl std::fmt::Display for SessionEnd {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match *self {
            SessionEnd::Exited(code) => write!(f, "exited with code {code}"),
            SessionEnd::Signaled(signal) => write!(f, "killed by {}", signal_name(signal)),
            SessionEnd::Interrupted { signal } => {
                write!(f, "interrupted by {}", signal_name(signal))
            }
            SessionEnd::PassthroughFailed(direction) => {
                write!(f, "stopped after passthrough {direction} failed")
            }
        }
    }
}

#[cfg(unix)]
fn signal_name(signal: i32) -> String {
    nix::sys::signal::Signal::try_from(signal)
        .map(|s| s.as_str().to_string())
        .unwrap_or_else(|_| format!("signal {signal}"))
}

#[cfg(not(unix))]
fn signal_name(signal: i32) -> String {
    format!("signal {signal}")
}

/// Accumulates one run's diagnostic lines.
pub struct SessionRecorder<'g> {
    parser: LineParser<'g>,
    correlator: ExchangeCorrelator,
    grammar_version: String,
    started_at: DateTime<Local>,
    command: Vec<String>,
    output_dir: PathBuf,
    lines: u64,
}

impl<'g> SessionRecorder<'g> {
    pub fn new(
        grammar: &'g CompiledGrammar,
        command: Vec<String>,
        output_dir: PathBuf,
        keep_unrecognized: bool,
    ) -> Self {
        Self::starting_at(grammar, command, output_dir, keep_unrecognized, Local::now())
    }

    pub fn starting_at(
        grammar: &'g CompiledGrammar,
        command: Vec<String>,
        output_dir: PathBuf,
        keep_unrecognized: bool,
        started_at: DateTime<Local>,
    ) -> Self {
        Self {
            parser: LineParser::new(grammar),
            correlator: ExchangeCorrelator::new(keep_unrecognized),
            grammar_version: grammar.version().to_string(),
            started_at,
            command,
            output_dir,
            lines: 0,
        }
    }

    /// Feeds one stderr line, stamped with the current time.
    pub fn ingest_line(&mut self, line: &str) {
        self.ingest_line_at(line, Utc::now());
    }

    pub fn ingest_line_at(&mut self, line: &str, received_at: DateTime<Utc>) {
        self.lines += 1;
        if let Some(event) = self.parser.feed(line, received_at) {
            log::trace!("line {}: {} event", event.line, event.kind.name());
            self.correlator.add(event);
        }
    }

    pub fn lines_seen(&self) -> u64 {
        self.lines
    }

    /// Freezes the run. An open continuation group is flushed as incomplete.
    pub fn finish(mut self, end: SessionEnd) -> TraceSession {
        if let Some(event) = self.parser.finish() {
            log::debug!("stderr ended inside a continuation opened at line {}", event.line);
            self.correlator.add(event);
        }
        let correlated = self.correlator.finalize();
        let output_path = self.output_dir.join(report_file_name(&self.started_at));
        TraceSession {
            session_id: format!(
                "{}-{}",
                self.started_at.format("%Y%m%dT%H%M%S%.3f"),
                std::process::id()
            ),
            started_at: self.started_at,
            ended_at: Local::now(),
            command: self.command,
            title: correlated.title,
            grammar_version: self.grammar_version,
            exchanges: correlated.exchanges,
            notes: correlated.notes,
            conversations: correlated.conversations,
            lines: self.lines,
            end,
            output_path,
        }
    }
}

/// Report file name for a session started at `started_at`.
pub fn report_file_name(started_at: &DateTime<Local>) -> String {
    format!("{}.html", started_at.format("%Y-%m-%dT%H%M%S%.3f"))
}

/// Counts of exchanges by status.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ExchangeCounts {
    pub completed: usize,
    pub pending: usize,
    pub orphaned: usize,
}

/// An item of the report in session order.
#[derive(Debug, Clone, Copy)]
pub enum Entry<'a> {
    Exchange(&'a Exchange),
    Note(&'a DiagnosticLine),
    /// Start of a new conversation
    Conversation(&'a Conversation),
}

impl Entry<'_> {
    fn ordering_key(&self) -> Option<OrderingKey> {
        match self {
            Entry::Exchange(exchange) => Some(exchange.ordering_key),
            Entry::Note(note) => Some(note.ordering_key),
            Entry::Conversation(conversation) => conversation.started,
        }
    }
}

/// A finished run, ready to render.
#[derive(Debug, Clone)]
pub struct TraceSession {
    pub session_id: String,
    pub started_at: DateTime<Local>,
    pub ended_at: DateTime<Local>,
    /// Child argv, executable first
    pub command: Vec<String>,
    pub title: Option<String>,
    pub grammar_version: String,
    pub exchanges: Vec<Exchange>,
    pub notes: Vec<DiagnosticLine>,
    pub conversations: Vec<Conversation>,
    /// Number of stderr lines read
    pub lines: u64,
    pub end: SessionEnd,
    /// Where the report goes unless a file of that name already exists
    pub output_path: PathBuf,
}

impl TraceSession {
    pub fn counts(&self) -> ExchangeCounts {
        let mut counts = ExchangeCounts::default();
        for exchange in &self.exchanges {
            match exchange.status() {
                ExchangeStatus::Completed => counts.completed += 1,
                ExchangeStatus::Pending => counts.pending += 1,
                ExchangeStatus::Orphaned => counts.orphaned += 1,
            }
        }
        counts
    }

    /// Exchanges, notes and conversation starts merged by ordering key.
    ///
    /// Activity before the first session-start line has no boundary entry.
    pub fn entries(&self) -> Vec<Entry<'_>> {
        let mut entries: Vec<Entry<'_>> = self
            .exchanges
            .iter()
            .map(Entry::Exchange)
            .chain(self.notes.iter().map(Entry::Note))
            .chain(
                self.conversations
                    .iter()
                    .filter(|c| c.started.is_some())
                    .map(Entry::Conversation),
            )
            .collect();
        entries.sort_by_key(|e| e.ordering_key());
        entries
    }

    /// Renders the report and writes it next to `output_path`.
    ///
    /// Returns the path actually written. An existing file is never replaced;
    /// a `-1`, `-2`, ... suffix is added to the file stem instead.
    pub fn persist(&self) -> Result<PathBuf, TraceError> {
        let html = crate::render::render(self);
        write_new_file(&self.output_path, html.as_bytes())
    }
}

fn write_new_file(path: &Path, contents: &[u8]) -> Result<PathBuf, TraceError> {
    let persist_err = |path: &Path, source| TraceError::Persist {
        path: path.to_path_buf(),
        source,
    };
    let dir = match path.parent() {
        Some(dir) if !dir.as_os_str().is_empty() => dir,
        _ => Path::new("."),
    };
    std::fs::create_dir_all(dir).map_err(|e| persist_err(path, e))?;

    let mut file = tempfile::NamedTempFile::new_in(dir).map_err(|e| persist_err(path, e))?;
    file.write_all(contents)
        .and_then(|()| file.as_file().sync_all())
        .map_err(|e| persist_err(path, e))?;

    let mut candidate = path.to_path_buf();
    let mut attempt = 0;
    loop {
        match file.persist_noclobber(&candidate) {
            Ok(_) => return Ok(candidate),
            Err(err) if err.error.kind() == std::io::ErrorKind::AlreadyExists => {
                log::debug!("{} exists, trying another name", candidate.display());
                file = err.file;
                attempt += 1;
                candidate = suffixed(path, attempt);
            }
            Err(err) => return Err(persist_err(&candidate, err.error)),
        }
    }
}

fn suffixed(path: &Path, n: u32) -> PathBuf {
    let stem = path
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default();
    let name = match path.extension() {
        Some(ext) => format!("{stem}-{n}.{}", ext.to_string_lossy()),
        None => format!("{stem}-{n}"),
    };
    path.with_file_name(name)
}
