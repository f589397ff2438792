//! stdin/stdout are forwarded byte for byte, and argv verbatim.

use std::io::{BufRead, BufReader, Write};
use std::process::Stdio;
use std::time::Duration;

use rstest::rstest;

use crate::common::mock_commands::create_stub_child;
use crate::common::{TestEnv, env};

#[rstest]
fn test_stdin_to_stdout_round_trip(env: TestEnv) {
    let child = create_stub_child(&env.bin_dir, "codex", "exec cat");
    let input: Vec<u8> = (0..=255u8).cycle().take(300_000).collect();

    let mut proc = env
        .command(&child)
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()
        .unwrap();
    let mut stdin = proc.stdin.take().unwrap();
    let writer = {
        let input = input.clone();
        std::thread::spawn(move || {
            stdin.write_all(&input).unwrap();
            // Dropping stdin closes the pipe; the child sees EOF
        })
    };
    let output = proc.wait_with_output().unwrap();
    writer.join().unwrap();

    assert!(output.status.success(), "{output:?}");
    assert_eq!(output.stdout.len(), input.len());
    assert!(output.stdout == input, "stdout differs from stdin");
}

#[rstest]
fn test_arguments_forwarded_verbatim(env: TestEnv) {
    let child = create_stub_child(&env.bin_dir, "codex", r#"printf '[%s]\n' "$@""#);
    let output = env
        .command(&child)
        .args(["mcp", "--", "-h", "--version", "two words", ""])
        .stdin(Stdio::null())
        .output()
        .unwrap();

    assert!(output.status.success(), "{output:?}");
    assert_eq!(
        String::from_utf8_lossy(&output.stdout),
        "[mcp]\n[--]\n[-h]\n[--version]\n[two words]\n[]\n"
    );
}

#[rstest]
fn test_child_stderr_is_not_forwarded(env: TestEnv) {
    let child = create_stub_child(
        &env.bin_dir,
        "codex",
        "echo 'private diagnostics' >&2\necho 'public output'",
    );
    let output = env
        .command(&child)
        .stdin(Stdio::null())
        .output()
        .unwrap();

    assert_eq!(String::from_utf8_lossy(&output.stdout), "public output\n");
    assert!(!String::from_utf8_lossy(&output.stderr).contains("private diagnostics"));
}

#[rstest]
fn test_stdin_eof_reaches_child(env: TestEnv) {
    // `wc -c` only prints once its stdin is closed
    let child = create_stub_child(&env.bin_dir, "codex", "exec wc -c");
    let mut proc = env
        .command(&child)
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .spawn()
        .unwrap();
    proc.stdin.take().unwrap().write_all(b"12345").unwrap();
    let output = proc.wait_with_output().unwrap();
    assert_eq!(String::from_utf8_lossy(&output.stdout).trim(), "5");
}

#[rstest]
fn test_stdout_flows_while_stdin_stays_open(env: TestEnv) {
    let child = create_stub_child(&env.bin_dir, "codex", "exec cat");
    let mut proc = env
        .command(&child)
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::null())
        .spawn()
        .unwrap();
    let mut stdin = proc.stdin.take().unwrap();
    let stdout = proc.stdout.take().unwrap();
    let (tx, rx) = crossbeam_channel::bounded(1);
    let reader = std::thread::spawn(move || {
        let mut line = String::new();
        BufReader::new(stdout).read_line(&mut line).unwrap();
        let _ = tx.send(line);
    });

    // A request/response protocol needs each reply before the next request
    stdin.write_all(b"ping\n").unwrap();
    stdin.flush().unwrap();
    let echoed = rx.recv_timeout(Duration::from_secs(10));

    drop(stdin);
    let status = proc.wait().unwrap();
    reader.join().unwrap();
    assert_eq!(echoed.as_deref(), Ok("ping\n"));
    assert!(status.success());
}
