use std::ffi::OsString;
use std::process;

use clap::Parser;
use codex_trace::TraceError;
use codex_trace::config::TraceConfig;
use codex_trace::grammar::CompiledGrammar;
use codex_trace::session::SessionEnd;
use codex_trace::styling::{eprintln, error_chain, error_message, hint_message, warning_message};
use codex_trace::supervisor::{self, RunOptions, signals};

/// Runs the real `codex` with request tracing enabled and writes an HTML
/// report of its API exchanges when it exits.
///
/// Every argument is passed to the child unchanged, so this binary can be put
/// in place of `codex` wherever an editor launches it.
#[derive(Parser, Debug)]
#[command(name = "codex-trace", disable_help_flag = true, disable_version_flag = true)]
struct Cli {
    /// Arguments for the child
    #[arg(trailing_var_arg = true, allow_hyphen_values = true, num_args = 0..)]
    args: Vec<OsString>,
}

impl Cli {
    /// Parses argv without interpreting any of it.
    ///
    /// A leading `--` is inserted so that a `--` in the real arguments is
    /// forwarded rather than consumed.
    fn parse_passthrough() -> Self {
        let mut argv = std::env::args_os();
        let bin = argv.next().unwrap_or_else(|| "codex-trace".into());
        let rest: Vec<OsString> = argv.collect();
        Self::try_parse_from(
            [bin, OsString::from("--")]
                .into_iter()
                .chain(rest.iter().cloned()),
        )
        .unwrap_or(Self { args: rest })
    }
}

fn init_logging() {
    env_logger::Builder::from_env(env_logger::Env::new().filter_or("CODEX_TRACE_LOG", "warn"))
        .format_timestamp_millis()
        .target(env_logger::Target::Stderr)
        .init();
}

fn fail(err: &TraceError) -> ! {
    eprintln!("{}", error_message(error_chain(err)));
    if matches!(err, TraceError::RecursiveSpawn { .. }) {
        eprintln!(
            "{}",
            hint_message("The last PATH entry should hold the editor's bundled codex binary")
        );
    }
    process::exit(err.exit_code());
}

fn main() {
    init_logging();
    let cli = Cli::parse_passthrough();

    let config = TraceConfig::load().unwrap_or_else(|err| {
        eprintln!(
            "{}",
            warning_message(format!("Ignoring config file: {err:#}"))
        );
        TraceConfig::default().with_env_overrides(|key| std::env::var(key).ok())
    });

    let grammar = config.grammar.compile().unwrap_or_else(|err| {
        eprintln!(
            "{}",
            warning_message(format!(
                "{}; using the built-in grammar",
                error_chain(&err)
            ))
        );
        CompiledGrammar::default()
    });

    let current_exe = std::env::current_exe().ok();
    let program = config
        .resolve_executable(
            std::env::var_os("PATH").as_deref(),
            current_exe.as_deref(),
        )
        .unwrap_or_else(|err| fail(&err));

    let opts = RunOptions {
        program,
        args: cli.args,
        verbosity: (!config.verbosity_env.is_empty())
            .then(|| (config.verbosity_env.clone(), config.verbosity.clone())),
        grace_period: config.grace_period(),
        output_dir: config.output_dir(),
        keep_unrecognized: config.keep_unrecognized,
    };

    let session = supervisor::run(&opts, &grammar).unwrap_or_else(|err| fail(&err));

    match session.persist() {
        Ok(path) => log::info!("Report written to {}", path.display()),
        Err(err) => eprintln!("{}", error_message(error_chain(&err))),
    }

    if let SessionEnd::Interrupted { signal } = session.end {
        signals::reraise(signal);
    }
    process::exit(session.end.exit_code());
}
