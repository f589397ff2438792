//! Supervisor configuration.
//!
//! Read once at startup from a TOML file, then overridden by environment
//! variables. Every field has a default, so a missing file or a file that
//! sets only `output-dir` is fine:
//!
//! ```toml
//! output-dir = "~/traces"
//! grace-period-ms = 500
//!
//! [grammar]
//! version = "codex-v2"
//! chunk = '^stream chunk:\s*'
//! ```
//!
//! Config file location, first match wins:
//! 1. `CODEX_TRACE_CONFIG_PATH`
//! 2. `<platform config dir>/codex-trace/config.toml` (`~/.config` on Linux and macOS)

use std::ffi::OsStr;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::Context;
use etcetera::base_strategy::{BaseStrategy, choose_base_strategy};
use serde::{Deserialize, Serialize};

use crate::TraceError;
use crate::grammar::Grammar;

pub const CONFIG_PATH_ENV: &str = "CODEX_TRACE_CONFIG_PATH";
pub const OUTPUT_DIR_ENV: &str = "CODEX_TRACE_DIR";
pub const EXECUTABLE_ENV: &str = "CODEX_TRACE_EXECUTABLE";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "kebab-case", deny_unknown_fields)]
pub struct TraceConfig {
    /// Child binary. When unset, `<last PATH entry>/<executable-name>`.
    pub executable: Option<PathBuf>,
    pub executable_name: String,
    /// Where reports go; `~` is expanded
    pub output_dir: String,
    /// Environment variable that sets the child's log verbosity
    pub verbosity_env: String,
    /// Value for `verbosity-env`
    pub verbosity: String,
    /// How long to keep draining stderr after the child exits or a signal arrives
    pub grace_period_ms: u64,
    /// Keep unrecognized stderr lines in the report
    pub keep_unrecognized: bool,
    pub grammar: Grammar,
}

impl Default for TraceConfig {
    fn default() -> Self {
        Self {
            executable: None,
            executable_name: "codex".to_string(),
            output_dir: "~/codex-trace".to_string(),
            verbosity_env: "RUST_LOG".to_string(),
            verbosity: "codex_core=trace,codex_mcp_server=info".to_string(),
            grace_period_ms: 2000,
            keep_unrecognized: true,
            grammar: Grammar::default(),
        }
    }
}

/// Config file path from `lookup` (the environment) or the platform default.
pub fn config_path(lookup: impl Fn(&str) -> Option<String>) -> Option<PathBuf> {
    if let Some(path) = lookup(CONFIG_PATH_ENV) {
        return Some(PathBuf::from(path));
    }
    let strategy = choose_base_strategy().ok()?;
    Some(strategy.config_dir().join("codex-trace").join("config.toml"))
}

impl TraceConfig {
    /// Loads the config file (if any) and applies environment overrides.
    pub fn load() -> anyhow::Result<Self> {
        let lookup = |key: &str| std::env::var(key).ok();
        let config = match config_path(lookup) {
            Some(path) if path.exists() => Self::from_file(&path)?,
            Some(path) => {
                log::debug!("No config at {}", path.display());
                Self::default()
            }
            None => Self::default(),
        };
        Ok(config.with_env_overrides(lookup))
    }

    pub fn from_file(path: &Path) -> anyhow::Result<Self> {
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read {}", path.display()))?;
        Self::from_toml(&contents).with_context(|| format!("Failed to parse {}", path.display()))
    }

    pub fn from_toml(contents: &str) -> anyhow::Result<Self> {
        Ok(toml::from_str(contents)?)
    }

    pub fn with_env_overrides(mut self, lookup: impl Fn(&str) -> Option<String>) -> Self {
        if let Some(dir) = lookup(OUTPUT_DIR_ENV).filter(|s| !s.is_empty()) {
            self.output_dir = dir;
        }
        if let Some(exe) = lookup(EXECUTABLE_ENV).filter(|s| !s.is_empty()) {
            self.executable = Some(PathBuf::from(exe));
        }
        self
    }

    pub fn output_dir(&self) -> PathBuf {
        PathBuf::from(shellexpand::tilde(&self.output_dir).as_ref())
    }

    pub fn grace_period(&self) -> Duration {
        Duration::from_millis(self.grace_period_ms)
    }

    /// The child binary to spawn.
    ///
    /// Without an explicit `executable`, the binary is looked up in the *last*
    /// `PATH` entry only: the editor extension appends the directory of its
    /// bundled binary there, and a `codex` earlier on `PATH` may be this
    /// wrapper or a different version.
    pub fn resolve_executable(
        &self,
        path_var: Option<&OsStr>,
        current_exe: Option<&Path>,
    ) -> Result<PathBuf, TraceError> {
        let program = match &self.executable {
            Some(exe) => exe.clone(),
            None => path_var
                .and_then(|p| std::env::split_paths(p).filter(|d| !d.as_os_str().is_empty()).last())
                .map(|dir| dir.join(&self.executable_name))
                .unwrap_or_else(|| PathBuf::from(&self.executable_name)),
        };

        if let Some(current) = current_exe
            && is_same_file(&program, current)
        {
            return Err(TraceError::RecursiveSpawn { program });
        }
        Ok(program)
    }
}

fn is_same_file(a: &Path, b: &Path) -> bool {
    match (a.canonicalize(), b.canonicalize()) {
        (Ok(a), Ok(b)) => a == b,
        _ => a == b,
    }
}
