//! Child process supervision.
//!
//! [`run`] spawns the child with piped stdio and wires up one thread per data
//! path:
//!
//! - `stdin-pump`: our stdin to the child's stdin
//! - `stdout-pump`: the child's stdout to our stdout
//! - `stderr-reader`: the child's stderr, line by line, to the main loop
//! - `child-waiter`: the child's exit status
//! - `signals`: SIGINT/SIGTERM/SIGHUP caught by the supervisor (unix)
//!
//! The main loop owns the [`SessionRecorder`] and `select!`s over all of them.
//! It stops once the child has exited and both output pipes are drained, or
//! when the grace period runs out first. A caught signal or a failed
//! passthrough starts the same shutdown: the child is signalled, given the
//! grace period, then killed.

mod passthrough;
pub mod signals;

pub use passthrough::pump;

use std::ffi::OsString;
use std::io;
use std::path::PathBuf;
use std::process::{Child, Command, ExitStatus, Stdio};
use std::time::{Duration, Instant};

use crossbeam_channel::{Receiver, Sender, at, never, select, unbounded};

use crate::error::{Direction, TraceError};
use crate::grammar::CompiledGrammar;
use crate::session::{SessionEnd, SessionRecorder, TraceSession};

/// What to run and how.
#[derive(Debug, Clone)]
pub struct RunOptions {
    pub program: PathBuf,
    pub args: Vec<OsString>,
    /// Environment variable and value that make the child log its exchanges
    pub verbosity: Option<(String, String)>,
    pub grace_period: Duration,
    pub output_dir: PathBuf,
    pub keep_unrecognized: bool,
}

/// Why the main loop stopped waiting.
#[derive(Debug, Default)]
struct Shutdown {
    signal: Option<i32>,
    failed: Option<Direction>,
    killed: bool,
}

/// What the main loop does to the child after catching a signal.
#[derive(Debug, PartialEq, Eq)]
enum SignalAction {
    Forward,
    Kill,
    Nothing,
}

impl Shutdown {
    fn on_signal(&mut self, signal: i32, child_exited: bool) -> SignalAction {
        if child_exited {
            self.signal.get_or_insert(signal);
            return SignalAction::Nothing;
        }
        if self.signal.is_some() {
            // A second signal means the operator is done waiting
            self.killed = true;
            return SignalAction::Kill;
        }
        self.signal = Some(signal);
        SignalAction::Forward
    }
}

/// Runs the child to completion and returns the frozen session.
///
/// Only a spawn failure is an error; everything after that ends in a session.
pub fn run(opts: &RunOptions, grammar: &CompiledGrammar) -> Result<TraceSession, TraceError> {
    if let Err(e) = std::fs::create_dir_all(&opts.output_dir) {
        log::warn!("Failed to create {}: {e}", opts.output_dir.display());
    }

    // Installed before spawning so an early Ctrl-C still reaches the child
    let signal_rx = signals::listen();

    let mut cmd = Command::new(&opts.program);
    cmd.args(&opts.args)
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped());
    if let Some((key, value)) = &opts.verbosity {
        cmd.env(key, value);
    }
    log::debug!("Spawning {} {:?}", opts.program.display(), opts.args);
    let mut child = cmd.spawn().map_err(|source| TraceError::Spawn {
        program: opts.program.clone(),
        source,
    })?;
    let pid = child.id();

    let command = std::iter::once(opts.program.to_string_lossy().into_owned())
        .chain(opts.args.iter().map(|a| a.to_string_lossy().into_owned()))
        .collect();
    let mut recorder =
        SessionRecorder::new(grammar, command, opts.output_dir.clone(), opts.keep_unrecognized);

    let (failure_tx, failure_rx) = unbounded::<TraceError>();
    let (line_tx, line_rx) = unbounded::<String>();
    let (exit_tx, exit_rx) = unbounded::<io::Result<ExitStatus>>();
    let (stdout_done_tx, stdout_done_rx) = unbounded::<()>();

    let threads = spawn_data_paths(&mut child, &failure_tx, line_tx, stdout_done_tx);
    if let Err(e) = threads {
        // No way to run the data paths; don't leave the child orphaned
        log::warn!("Failed to start passthrough threads: {e}");
        signals::force_kill(pid);
    }

    let waiter = std::thread::Builder::new()
        .name("child-waiter".into())
        .spawn(move || {
            let _ = exit_tx.send(child.wait());
        });
    if let Err(source) = waiter {
        signals::force_kill(pid);
        return Err(TraceError::Spawn {
            program: opts.program.clone(),
            source,
        });
    }

    let (status, shutdown) = main_loop(
        &mut recorder,
        pid,
        opts.grace_period,
        Channels {
            lines: line_rx,
            stdout_done: stdout_done_rx,
            exit: exit_rx,
            caught: signal_rx,
            failures: failure_rx,
        },
    );

    let end = session_end(status.as_ref(), &shutdown);
    log::debug!(
        "Session ended: {end}; {} stderr lines",
        recorder.lines_seen()
    );
    Ok(recorder.finish(end))
}

fn spawn_data_paths(
    child: &mut Child,
    failures: &Sender<TraceError>,
    lines: Sender<String>,
    stdout_done: Sender<()>,
) -> io::Result<()> {
    if let Some(stdin) = child.stdin.take() {
        passthrough::spawn_pump(
            "stdin-pump",
            io::stdin(),
            stdin,
            Direction::Inbound,
            failures.clone(),
        )?;
    }
    if let Some(stdout) = child.stdout.take() {
        let failures = failures.clone();
        std::thread::Builder::new()
            .name("stdout-pump".into())
            .spawn(move || {
                if let Err(e) = pump(stdout, io::stdout(), Direction::Outbound) {
                    let _ = failures.send(e);
                }
                drop(stdout_done);
            })?;
    }
    if let Some(stderr) = child.stderr.take() {
        passthrough::spawn_line_reader(stderr, lines)?;
    }
    Ok(())
}

struct Channels {
    lines: Receiver<String>,
    stdout_done: Receiver<()>,
    exit: Receiver<io::Result<ExitStatus>>,
    caught: Receiver<i32>,
    failures: Receiver<TraceError>,
}

fn main_loop(
    recorder: &mut SessionRecorder<'_>,
    pid: u32,
    grace: Duration,
    channels: Channels,
) -> (Option<ExitStatus>, Shutdown) {
    let Channels {
        mut lines,
        mut stdout_done,
        mut exit,
        mut caught,
        mut failures,
    } = channels;
    let mut status: Option<ExitStatus> = None;
    let mut child_exited = false;
    let mut stderr_open = true;
    let mut stdout_open = true;
    let mut deadline: Option<Instant> = None;
    let mut shutdown = Shutdown::default();

    loop {
        if child_exited && !stderr_open && !stdout_open {
            break;
        }
        let timeout = deadline.map_or_else(never, at);

        select! {
            recv(lines) -> msg => match msg {
                Ok(line) => recorder.ingest_line(&line),
                Err(_) => {
                    stderr_open = false;
                    lines = never();
                }
            },
            recv(stdout_done) -> _ => {
                stdout_open = false;
                stdout_done = never();
            },
            recv(exit) -> msg => {
                match msg {
                    Ok(Ok(s)) => {
                        log::debug!("Child exited: {s}");
                        status = Some(s);
                    }
                    Ok(Err(e)) => log::warn!("Failed to wait for child: {e}"),
                    Err(_) => {}
                }
                child_exited = true;
                exit = never();
                deadline.get_or_insert_with(|| Instant::now() + grace);
            },
            recv(caught) -> msg => {
                let Ok(signal) = msg else {
                    caught = never();
                    continue;
                };
                let first = shutdown.signal.is_none();
                match shutdown.on_signal(signal, child_exited) {
                    SignalAction::Forward => signals::send(pid, signal),
                    SignalAction::Kill => {
                        log::debug!("Second signal {signal}; killing child");
                        signals::force_kill(pid);
                    }
                    SignalAction::Nothing => {}
                }
                if first {
                    deadline = Some(Instant::now() + grace);
                }
            },
            recv(failures) -> msg => {
                let Ok(err) = msg else {
                    failures = never();
                    continue;
                };
                let TraceError::Passthrough { direction, source } = &err else {
                    continue;
                };
                if *direction == Direction::Inbound
                    && source.kind() == io::ErrorKind::BrokenPipe
                {
                    // The child closed its stdin, typically because it is exiting
                    log::debug!("{err}: {source}");
                    continue;
                }
                log::warn!("{err}: {source}");
                if shutdown.failed.is_none() && shutdown.signal.is_none() {
                    shutdown.failed = Some(*direction);
                    if !child_exited {
                        signals::terminate(pid);
                    }
                    deadline = Some(Instant::now() + grace);
                }
            },
            recv(timeout) -> _ => {
                if child_exited {
                    log::debug!("Grace period over; rendering without waiting for pipes to close");
                    break;
                }
                if shutdown.killed {
                    log::warn!("Child {pid} did not exit after SIGKILL");
                    break;
                }
                log::debug!("Child still running after grace period; killing it");
                signals::force_kill(pid);
                shutdown.killed = true;
                deadline = Some(Instant::now() + grace);
            },
        }
    }
    (status, shutdown)
}

fn session_end(status: Option<&ExitStatus>, shutdown: &Shutdown) -> SessionEnd {
    if let Some(signal) = shutdown.signal {
        return SessionEnd::Interrupted { signal };
    }
    if let Some(direction) = shutdown.failed {
        return SessionEnd::PassthroughFailed(direction);
    }
    let Some(status) = status else {
        return SessionEnd::Exited(1);
    };
    if let Some(code) = status.code() {
        return SessionEnd::Exited(code);
    }
    #[cfg(unix)]
    {
        use std::os::unix::process::ExitStatusExt;
        if let Some(signal) = status.signal() {
            return SessionEnd::Signaled(signal);
        }
    }
    SessionEnd::Exited(1)
}
