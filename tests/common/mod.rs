//! Shared helpers for the integration tests.
//!
//! Every test runs the built `codex-trace` binary against a stub child in an
//! isolated temp directory. Environment variables point the binary at the
//! stub, the report directory and a config path that doesn't exist, so the
//! user's real config and `~/codex-trace` are never touched.

pub mod mock_commands;

use std::path::{Path, PathBuf};
use std::process::Command;
use std::time::{Duration, Instant};

use rstest::fixture;
use tempfile::TempDir;

pub struct TestEnv {
    _dir: TempDir,
    pub bin_dir: PathBuf,
    pub out_dir: PathBuf,
    pub config_path: PathBuf,
}

impl TestEnv {
    pub fn new() -> Self {
        let dir = tempfile::tempdir().unwrap();
        let bin_dir = dir.path().join("bin");
        std::fs::create_dir_all(&bin_dir).unwrap();
        Self {
            bin_dir,
            out_dir: dir.path().join("reports"),
            config_path: dir.path().join("config.toml"),
            _dir: dir,
        }
    }

    /// `codex-trace` configured to run `child`.
    pub fn command(&self, child: &Path) -> Command {
        let mut cmd = Command::new(env!("CARGO_BIN_EXE_codex-trace"));
        cmd.env("CODEX_TRACE_EXECUTABLE", child)
            .env("CODEX_TRACE_DIR", &self.out_dir)
            .env("CODEX_TRACE_CONFIG_PATH", &self.config_path)
            .env("CODEX_TRACE_LOG", "warn")
            .env("NO_COLOR", "1");
        cmd
    }

    pub fn write_config(&self, contents: &str) {
        std::fs::write(&self.config_path, contents).unwrap();
    }

    /// Report files written so far, sorted by name.
    pub fn reports(&self) -> Vec<PathBuf> {
        let Ok(entries) = std::fs::read_dir(&self.out_dir) else {
            return Vec::new();
        };
        let mut reports: Vec<PathBuf> = entries
            .map(|e| e.unwrap().path())
            .filter(|p| p.extension().is_some_and(|ext| ext == "html"))
            .collect();
        reports.sort();
        reports
    }

    /// Contents of the only report. Panics unless there is exactly one.
    pub fn single_report(&self) -> String {
        let reports = self.reports();
        assert_eq!(reports.len(), 1, "expected one report, found {reports:?}");
        std::fs::read_to_string(&reports[0]).unwrap()
    }
}

#[fixture]
pub fn env() -> TestEnv {
    TestEnv::new()
}

/// Poll until `path` exists.
pub fn wait_for_file(path: &Path) {
    let start = Instant::now();
    while !path.exists() {
        assert!(
            start.elapsed() < Duration::from_secs(10),
            "timed out waiting for {}",
            path.display()
        );
        std::thread::sleep(Duration::from_millis(20));
    }
}
