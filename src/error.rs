//! Error types for the supervisor.
//!
//! Only [`TraceError::Spawn`] and [`TraceError::RecursiveSpawn`] prevent a
//! report from being produced. Everything that can go wrong while a session
//! exists degrades: parse and correlation problems are recorded in the session
//! itself (see [`crate::event::Payload::Raw`] and
//! [`crate::correlate::CorrelationAnomaly`]), and persistence problems are
//! reported without touching the exit code.

use std::path::PathBuf;

/// Which passthrough direction failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, strum::Display)]
pub enum Direction {
    #[strum(to_string = "stdin → child")]
    Inbound,
    #[strum(to_string = "child → stdout")]
    Outbound,
}

#[derive(Debug, thiserror::Error)]
pub enum TraceError {
    /// The child could not be started. Fatal; there is no session to render.
    #[error("failed to spawn {}", program.display())]
    Spawn {
        program: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The resolved executable is this very binary
    #[error("{} resolves to codex-trace itself; set CODEX_TRACE_EXECUTABLE to the real binary", program.display())]
    RecursiveSpawn { program: PathBuf },

    /// The report could not be written
    #[error("failed to write report to {}", path.display())]
    Persist {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// A passthrough pipe errored; ends that path and the session
    #[error("passthrough {direction} failed")]
    Passthrough {
        direction: Direction,
        #[source]
        source: std::io::Error,
    },
}

impl TraceError {
    /// Exit code used when this error ends the supervisor before the child ran.
    ///
    /// Mirrors the shell conventions: 127 for "command not found", 126 for
    /// "found but not executable".
    pub fn exit_code(&self) -> i32 {
        match self {
            TraceError::Spawn { source, .. } if source.kind() == std::io::ErrorKind::NotFound => {
                127
            }
            TraceError::Spawn { .. } | TraceError::RecursiveSpawn { .. } => 126,
            TraceError::Persist { .. } | TraceError::Passthrough { .. } => 1,
        }
    }
}
