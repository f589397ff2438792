// Stub children are shell scripts
#[cfg(unix)]
mod end_to_end;
#[cfg(unix)]
mod passthrough;
#[cfg(unix)]
mod signals;
#[cfg(unix)]
mod spawn_failure;
