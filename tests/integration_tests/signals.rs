//! Signals to the supervisor reach the child, and the report still gets written.

use std::os::unix::process::ExitStatusExt;
use std::process::Stdio;

use nix::sys::signal::{Signal, kill};
use nix::unistd::Pid;
use rstest::rstest;

use crate::common::mock_commands::{create_stub_child, shell_quote};
use crate::common::{TestEnv, env, wait_for_file};

const REQUEST: &str = r#"POST to https://api.openai.com/v1/responses {"model":"o3"}"#;

/// Stub that logs a request, marks itself started, then sleeps as the child pid.
fn sleeping_child(env: &TestEnv) -> (std::path::PathBuf, std::path::PathBuf) {
    let marker = env.bin_dir.join("started");
    let child = create_stub_child(
        &env.bin_dir,
        "codex",
        &format!(
            "printf '%s\\n' {} >&2\ntouch {}\nexec sleep 30",
            shell_quote(REQUEST),
            shell_quote(&marker.to_string_lossy())
        ),
    );
    (child, marker)
}

#[rstest]
#[case::sigterm(Signal::SIGTERM)]
#[case::sigint(Signal::SIGINT)]
#[case::sighup(Signal::SIGHUP)]
fn test_signal_forwarded_and_reraised(env: TestEnv, #[case] signal: Signal) {
    let (child, marker) = sleeping_child(&env);
    let mut proc = env
        .command(&child)
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .spawn()
        .unwrap();
    wait_for_file(&marker);

    kill(Pid::from_raw(proc.id() as i32), signal).unwrap();
    let status = proc.wait().unwrap();

    let n = signal as i32;
    assert!(
        status.signal() == Some(n) || status.code() == Some(128 + n),
        "expected death by {signal}, got {status:?}"
    );
    let report = env.single_report();
    assert!(report.contains("1 pending"));
    assert!(report.contains(&format!("interrupted by {}", signal.as_str())));
}

#[rstest]
fn test_child_ignoring_signal_is_killed_after_grace(env: TestEnv) {
    env.write_config("grace-period-ms = 300");
    let marker = env.bin_dir.join("started");
    // The shell ignores TERM and keeps the stderr pipe open
    let child = create_stub_child(
        &env.bin_dir,
        "codex",
        &format!(
            "trap '' TERM\ntouch {}\nwhile :; do sleep 1; done",
            shell_quote(&marker.to_string_lossy())
        ),
    );
    let mut proc = env
        .command(&child)
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .spawn()
        .unwrap();
    wait_for_file(&marker);

    let started = std::time::Instant::now();
    kill(Pid::from_raw(proc.id() as i32), Signal::SIGTERM).unwrap();
    let status = proc.wait().unwrap();

    assert!(status.signal() == Some(15) || status.code() == Some(143));
    assert!(started.elapsed() < std::time::Duration::from_secs(10));
    assert_eq!(env.reports().len(), 1);
}
