//! Signal delivery for the supervisor.
//!
//! SIGINT, SIGTERM and SIGHUP sent to the supervisor are caught and passed to
//! the main loop over a channel, which forwards them to the child and starts
//! the shutdown sequence. Once the report is written the supervisor re-raises
//! the signal with its default disposition so the parent sees the usual
//! "killed by signal" status.

use crossbeam_channel::Receiver;

#[cfg(unix)]
mod imp {
    use std::io;

    use crossbeam_channel::{Receiver, unbounded};
    use nix::sys::signal::{Signal, kill};
    use nix::unistd::Pid;
    use signal_hook::consts::{SIGHUP, SIGINT, SIGTERM};
    use signal_hook::iterator::Signals;

    pub const FORWARDED: [i32; 3] = [SIGINT, SIGTERM, SIGHUP];

    pub fn listen() -> io::Result<Receiver<i32>> {
        let mut signals = Signals::new(FORWARDED)?;
        let (tx, rx) = unbounded();
        std::thread::Builder::new()
            .name("signals".into())
            .spawn(move || {
                for signal in signals.forever() {
                    log::debug!("Received signal {signal}");
                    if tx.send(signal).is_err() {
                        break;
                    }
                }
            })?;
        Ok(rx)
    }

    pub fn send(pid: u32, signal: i32) {
        let Ok(sig) = Signal::try_from(signal) else {
            log::debug!("Not forwarding unknown signal {signal}");
            return;
        };
        let Ok(raw) = i32::try_from(pid) else {
            return;
        };
        // ESRCH just means the child is already gone
        if let Err(e) = kill(Pid::from_raw(raw), sig) {
            log::debug!("kill({pid}, {sig}) failed: {e}");
        }
    }

    pub fn terminate(pid: u32) {
        send(pid, SIGTERM);
    }

    pub fn force_kill(pid: u32) {
        send(pid, Signal::SIGKILL as i32);
    }

    pub fn reraise(signal: i32) {
        if let Err(e) = signal_hook::low_level::emulate_default_handler(signal) {
            log::debug!("Failed to re-raise signal {signal}: {e}");
        }
    }
}

#[cfg(not(unix))]
mod imp {
    use std::io;

    use crossbeam_channel::{Receiver, never};

    pub fn listen() -> io::Result<Receiver<i32>> {
        Ok(never())
    }

    pub fn send(_pid: u32, _signal: i32) {}

    pub fn terminate(_pid: u32) {}

    pub fn force_kill(pid: u32) {
        log::debug!("Cannot kill child {pid} on this platform");
    }

    pub fn reraise(_signal: i32) {}
}

pub use imp::{force_kill, reraise, send, terminate};

/// Channel of caught signals. Never yields if handlers can't be installed.
pub fn listen() -> Receiver<i32> {
    imp::listen().unwrap_or_else(|e| {
        log::warn!("Failed to install signal handlers: {e}");
        crossbeam_channel::never()
    })
}
