//! Operator-facing messages.
//!
//! The supervisor's own stderr is what the editor shows in its output pane,
//! so messages go through `anstream`, which drops colour codes when stderr
//! isn't a terminal or `NO_COLOR` is set. Build messages with `cformat!`:
//!
//! ```rust,ignore
//! use codex_trace::styling::{eprintln, warning_message};
//!
//! eprintln!("{}", warning_message("config ignored"));
//! ```

use std::fmt::Display;

use color_print::cformat;

/// Auto-detecting eprintln that respects NO_COLOR, CLICOLOR_FORCE, and terminal capabilities
pub use anstream::eprintln;

pub const ERROR_EMOJI: &str = "❌";
pub const WARNING_EMOJI: &str = "🟡";
pub const HINT_EMOJI: &str = "💡";

pub fn error_message(msg: impl Display) -> String {
    cformat!("{ERROR_EMOJI} <red>{msg}</>")
}

pub fn warning_message(msg: impl Display) -> String {
    cformat!("{WARNING_EMOJI} <yellow>{msg}</>")
}

pub fn hint_message(msg: impl Display) -> String {
    cformat!("{HINT_EMOJI} <dim>{msg}</>")
}

/// An error and its causes on one line, each source separated by `: `.
pub fn error_chain(err: &(dyn std::error::Error + 'static)) -> String {
    let mut out = err.to_string();
    let mut source = err.source();
    while let Some(cause) = source {
        out.push_str(": ");
        out.push_str(&cause.to_string());
        source = cause.source();
    }
    out
}
