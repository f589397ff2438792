//! Record a child process's request/response trace logs while staying out of
//! its way.
//!
//! The pipeline has four stages:
//!
//! - [`parse`] turns one diagnostic line into at most one [`event::LogEvent`],
//!   driven by a versioned [`grammar::Grammar`].
//! - [`correlate`] pairs requests with their (possibly streamed) responses.
//! - [`session`] owns one run's state and freezes it into a [`session::TraceSession`].
//! - [`render`] turns a frozen session into a self-contained HTML report.
//!
//! [`supervisor`] glues them to a real child process.

pub mod config;
pub mod correlate;
pub mod error;
pub mod event;
pub mod grammar;
pub mod json_delta;
pub mod parse;
pub mod render;
pub mod session;
pub mod styling;
pub mod supervisor;

pub use error::TraceError;
