//! A child that can't be started ends the run without a report.

use std::process::Stdio;

use rstest::rstest;

use crate::common::{TestEnv, env};

#[rstest]
fn test_missing_executable(env: TestEnv) {
    let output = env
        .command(&env.bin_dir.join("codex"))
        .stdin(Stdio::null())
        .output()
        .unwrap();

    assert_eq!(output.status.code(), Some(127));
    assert!(String::from_utf8_lossy(&output.stderr).contains("failed to spawn"));
    assert!(env.reports().is_empty());
}

#[rstest]
fn test_non_executable_file(env: TestEnv) {
    let path = env.bin_dir.join("codex");
    std::fs::write(&path, "not a program").unwrap();
    let output = env
        .command(&path)
        .stdin(Stdio::null())
        .output()
        .unwrap();

    assert_eq!(output.status.code(), Some(126));
    assert!(env.reports().is_empty());
}

#[rstest]
fn test_refuses_to_run_itself(env: TestEnv) {
    let output = env
        .command(std::path::Path::new(env!("CARGO_BIN_EXE_codex-trace")))
        .stdin(Stdio::null())
        .output()
        .unwrap();

    assert_eq!(output.status.code(), Some(126));
    assert!(String::from_utf8_lossy(&output.stderr).contains("resolves to codex-trace itself"));
}

#[rstest]
fn test_last_path_entry_used(env: TestEnv) {
    let first = env.bin_dir.join("first");
    let last = env.bin_dir.join("last");
    std::fs::create_dir_all(&first).unwrap();
    std::fs::create_dir_all(&last).unwrap();
    crate::common::mock_commands::create_stub_child(&first, "codex", "echo first");
    crate::common::mock_commands::create_stub_child(&last, "codex", "echo last");

    let path = std::env::join_paths([&first, &last]).unwrap();
    let output = env
        .command(&last)
        .env_remove("CODEX_TRACE_EXECUTABLE")
        .env("PATH", path)
        .stdin(Stdio::null())
        .output()
        .unwrap();

    assert_eq!(String::from_utf8_lossy(&output.stdout), "last\n");
}
