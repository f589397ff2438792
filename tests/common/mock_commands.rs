// Stub child executables.
//
// Each stub is a `#!/bin/sh` script standing in for the real `codex` binary.
// Tests use them to control exactly what the child prints on each stream,
// how long it runs, and how it exits.

use std::fs;
use std::path::{Path, PathBuf};

/// Write an executable `#!/bin/sh` script with `body` and return its path.
#[cfg(unix)]
pub fn create_stub_child(bin_dir: &Path, name: &str, body: &str) -> PathBuf {
    use std::os::unix::fs::PermissionsExt;

    let script_path = bin_dir.join(name);
    fs::write(&script_path, format!("#!/bin/sh\n{body}\n")).unwrap();
    fs::set_permissions(&script_path, fs::Permissions::from_mode(0o755)).unwrap();
    script_path
}

/// A stub that prints `stderr_lines` to stderr and exits with `exit_code`.
#[cfg(unix)]
pub fn create_stderr_stub(
    bin_dir: &Path,
    name: &str,
    stderr_lines: &[&str],
    exit_code: i32,
) -> PathBuf {
    let mut body = String::new();
    for line in stderr_lines {
        body.push_str(&format!("printf '%s\\n' {} >&2\n", shell_quote(line)));
    }
    body.push_str(&format!("exit {exit_code}"));
    create_stub_child(bin_dir, name, &body)
}

/// Single-quote `s` for `/bin/sh`.
pub fn shell_quote(s: &str) -> String {
    // Escape single quotes: it's -> 'it'"'"'s'
    format!("'{}'", s.replace('\'', "'\"'\"'"))
}
