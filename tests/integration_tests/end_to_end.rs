//! A full run: stub child, stderr capture, report on disk.

use std::process::Stdio;

use rstest::rstest;

use crate::common::mock_commands::{create_stderr_stub, create_stub_child};
use crate::common::{TestEnv, env};

const REQUEST: &str = r#"2026-03-01T09:00:00.100Z TRACE codex_core::client: POST to https://api.openai.com/v1/responses: {"model":"o3","input":[{"type":"message"}]}"#;
const RESPONSE: &str = r#"2026-03-01T09:00:01.500Z TRACE codex_core::client: Response status: 200 {"output":[{"type":"message"}]}"#;

#[rstest]
fn test_one_exchange_one_report(env: TestEnv) {
    let child = create_stderr_stub(&env.bin_dir, "codex", &[REQUEST, RESPONSE], 0);
    let output = env
        .command(&child)
        .stdin(Stdio::null())
        .output()
        .unwrap();

    assert_eq!(output.status.code(), Some(0), "{output:?}");
    let report = env.single_report();
    assert!(report.starts_with("<!DOCTYPE html>"));
    assert!(report.contains("1 completed"));
    assert!(report.contains("0 pending"));
    assert!(report.contains("0 orphaned"));
    assert_eq!(report.matches(r#"<details class="exchange "#).count(), 1);
    // The report escapes `/` like every other markup-significant character
    assert!(report.contains("https:&#x2f;&#x2f;api.openai.com&#x2f;v1&#x2f;responses"));
    assert!(!report.contains("<script"));
}

#[rstest]
fn test_exit_code_propagated(env: TestEnv) {
    let child = create_stderr_stub(&env.bin_dir, "codex", &[REQUEST], 3);
    let status = env
        .command(&child)
        .stdin(Stdio::null())
        .status()
        .unwrap();
    assert_eq!(status.code(), Some(3));

    // The unanswered request is still in the report
    let report = env.single_report();
    assert!(report.contains("1 pending"));
    assert!(report.contains("exited with code 3"));
}

#[rstest]
fn test_child_killed_by_signal(env: TestEnv) {
    let child = create_stub_child(&env.bin_dir, "codex", "kill -KILL $$");
    let status = env
        .command(&child)
        .stdin(Stdio::null())
        .status()
        .unwrap();
    assert_eq!(status.code(), Some(137));
    assert!(env.single_report().contains("killed by SIGKILL"));
}

#[rstest]
fn test_verbosity_injected(env: TestEnv) {
    let child = create_stub_child(&env.bin_dir, "codex", r#"echo "RUST_LOG is $RUST_LOG" >&2"#);
    let status = env
        .command(&child)
        .env("RUST_LOG", "error")
        .stdin(Stdio::null())
        .status()
        .unwrap();
    assert!(status.success());
    assert!(
        env.single_report()
            .contains("RUST_LOG is codex_core=trace,codex_mcp_server=info")
    );
}

#[rstest]
fn test_config_file_applies(env: TestEnv) {
    env.write_config(
        r#"
verbosity-env = "CHILD_VERBOSITY"
verbosity = "loud"
keep-unrecognized = true
"#,
    );
    let child = create_stub_child(&env.bin_dir, "codex", r#"echo "level=$CHILD_VERBOSITY" >&2"#);
    let status = env
        .command(&child)
        .stdin(Stdio::null())
        .status()
        .unwrap();
    assert!(status.success());
    assert!(env.single_report().contains("level=loud"));
}

#[rstest]
fn test_malformed_config_still_runs_child(env: TestEnv) {
    env.write_config("grace-period-ms = [");
    let child = create_stderr_stub(&env.bin_dir, "codex", &[REQUEST, RESPONSE], 0);
    let output = env
        .command(&child)
        .stdin(Stdio::null())
        .output()
        .unwrap();

    assert!(output.status.success());
    assert!(String::from_utf8_lossy(&output.stderr).contains("Ignoring config file"));
    assert!(env.single_report().contains("1 completed"));
}

#[rstest]
fn test_streamed_response(env: TestEnv) {
    let child = create_stderr_stub(
        &env.bin_dir,
        "codex",
        &[
            REQUEST,
            r#"SSE event: {"type":"response.output_text.delta","delta":"foo"}"#,
            r#"SSE event: {"type":"response.output_text.delta","delta":"bar"}"#,
            r#"SSE event: {"type":"response.completed","response":{"output":[]}}"#,
        ],
        0,
    );
    let status = env
        .command(&child)
        .stdin(Stdio::null())
        .status()
        .unwrap();
    assert!(status.success());
    let report = env.single_report();
    assert!(report.contains("<pre>foobar</pre>"));
    assert!(report.contains("1 completed"));
}

#[rstest]
fn test_conversations_titled_separately(env: TestEnv) {
    let child = create_stderr_stub(
        &env.bin_dir,
        "codex",
        &[
            r#"2026-03-01T09:00:00.000Z INFO codex_core::codex: Submission { id: "1", op: UserInput { items: [Text { text: "fix the bug" }] } }"#,
            REQUEST,
            "2026-03-01T09:00:02.000Z TRACE codex_core::codex: Configuring session: model=o3",
            r#"2026-03-01T09:00:02.100Z INFO codex_core::codex: Submission { id: "2", op: UserInput { items: [Text { text: "write the docs" }] } }"#,
            r#"2026-03-01T09:00:02.200Z TRACE codex_core::client: POST to https://api.openai.com/v1/responses: {"model":"o3","input":[{"type":"message"}]}"#,
        ],
        0,
    );
    env.command(&child)
        .stdin(Stdio::null())
        .status()
        .unwrap();
    let report = env.single_report();
    assert!(report.contains("<h1>codex-trace: fix the bug</h1>"));
    assert!(report.contains("Conversation 2: write the docs"));
    assert!(report.contains("2 pending"));
}

#[rstest]
fn test_hostile_payload_escaped(env: TestEnv) {
    let child = create_stderr_stub(
        &env.bin_dir,
        "codex",
        &[
            REQUEST,
            r#"Response status: 200 {"text":"<script>alert(1)</script>"}"#,
        ],
        0,
    );
    env.command(&child)
        .stdin(Stdio::null())
        .status()
        .unwrap();
    let report = env.single_report();
    assert!(!report.contains("<script>"));
    assert!(report.contains("&lt;script&gt;alert(1)&lt;&#x2f;script&gt;"));
}

#[rstest]
fn test_consecutive_runs_write_separate_reports(env: TestEnv) {
    let child = create_stderr_stub(&env.bin_dir, "codex", &[REQUEST], 0);
    for _ in 0..2 {
        env.command(&child)
            .stdin(Stdio::null())
            .status()
            .unwrap();
    }
    assert_eq!(env.reports().len(), 2);
}
