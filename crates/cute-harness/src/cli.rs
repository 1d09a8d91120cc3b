//! Command-line front end for a test binary.
//!
//! ```text
//! <bin> [run] [--filter S] [--jobs N] [--timeout-ms MS] [--log PATH] [--stop-on-terminated] [--quiet]
//! <bin> list
//! ```
//!
//! `CUTE_JOBS`, `CUTE_TIMEOUT_MS`, `CUTE_FILTER` and `CUTE_LOG` supply
//! defaults; flags override them.

use std::ffi::OsString;
use std::io::{self, Write};
use std::path::PathBuf;
use std::process::ExitCode;
use std::time::Duration;

use clap::{Args, Parser, Subcommand};
use cute_core::{Fanout, RunTree, SuiteTree};
use cute_exec::{ExecError, Scheduler, SchedulerConfig};
use thiserror::Error;

use crate::report::{ConsoleReporter, LogObserver, summary};
use crate::structured_log::{LogEmitter, new_run_id};

pub const ENV_LOG: &str = "CUTE_LOG";

/// Process-isolated unit tests.
#[derive(Debug, Parser)]
#[command(name = "cute")]
#[command(about = "Run process-isolated unit tests")]
struct Cli {
    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Run the tests (the default).
    Run(RunArgs),
    /// Print every test path without running anything.
    List,
}

#[derive(Debug, Clone, Default, Args)]
pub struct RunArgs {
    /// Only run tests whose full path contains this substring.
    #[arg(long)]
    pub filter: Option<String>,
    /// Maximum number of tests running at once.
    #[arg(long)]
    pub jobs: Option<usize>,
    /// Timeout for tests that do not set one (milliseconds).
    #[arg(long)]
    pub timeout_ms: Option<u64>,
    /// Write a JSONL event log to this path.
    #[arg(long)]
    pub log: Option<PathBuf>,
    /// Abandon the run once a test is killed by an external signal.
    #[arg(long)]
    pub stop_on_terminated: bool,
    /// Only report tests that did not pass or skip.
    #[arg(long)]
    pub quiet: bool,
}

#[derive(Debug, Error)]
pub enum HarnessError {
    #[error(transparent)]
    Cli(#[from] clap::Error),
    #[error("cannot open log {path}: {source}")]
    Log {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("writing the run log failed: {0}")]
    LogWrite(#[source] io::Error),
    #[error(transparent)]
    Exec(#[from] ExecError),
}

impl RunArgs {
    /// Scheduler settings: environment first, then these flags.
    #[must_use]
    pub fn config(&self, env: SchedulerConfig) -> SchedulerConfig {
        let mut config = env;
        if let Some(jobs) = self.jobs {
            config.jobs = jobs.max(1);
        }
        if let Some(ms) = self.timeout_ms {
            config.default_timeout = Duration::from_millis(ms);
        }
        if self.filter.is_some() {
            config.filter.clone_from(&self.filter);
        }
        config.stop_on_terminated |= self.stop_on_terminated;
        config
    }

    fn log_path(&self) -> Option<PathBuf> {
        self.log
            .clone()
            .or_else(|| std::env::var_os(ENV_LOG).filter(|p| !p.is_empty()).map(PathBuf::from))
    }
}

/// Entry point for a test binary: parse the process arguments, run `tree`,
/// print a summary, and map the result to the exit code.
#[must_use]
pub fn main(tree: SuiteTree) -> ExitCode {
    match main_with(std::env::args_os(), &tree) {
        Ok(0) => ExitCode::SUCCESS,
        Ok(_) => ExitCode::FAILURE,
        Err(HarnessError::Cli(err)) => {
            let _ = err.print();
            ExitCode::from(u8::try_from(err.exit_code()).unwrap_or(2))
        }
        Err(err) => {
            eprintln!("cute: {err}");
            ExitCode::from(2)
        }
    }
}

/// [`main`] with explicit arguments; returns the process exit code.
pub fn main_with<I, T>(args: I, tree: &SuiteTree) -> Result<i32, HarnessError>
where
    I: IntoIterator<Item = T>,
    T: Into<OsString> + Clone,
{
    let cli = Cli::try_parse_from(args)?;
    match cli.command {
        Some(Command::List) => {
            list(tree, &mut io::stdout().lock()).map_err(HarnessError::LogWrite)?;
            Ok(0)
        }
        Some(Command::Run(args)) => run(tree, &args).map(|runs| runs.exit_code()),
        None => run(tree, &RunArgs::default()).map(|runs| runs.exit_code()),
    }
}

/// One leaf path per line, in traversal order.
pub fn list(tree: &SuiteTree, out: &mut dyn Write) -> io::Result<()> {
    for leaf in tree.leaves() {
        writeln!(out, "{}", tree.node(leaf).path())?;
    }
    Ok(())
}

/// Run `tree` with console reporting and, when configured, the JSONL log.
pub fn run(tree: &SuiteTree, args: &RunArgs) -> Result<RunTree, HarnessError> {
    let config = args.config(SchedulerConfig::from_env());
    let mut console = ConsoleReporter::stderr(args.quiet);
    let mut log = match args.log_path() {
        Some(path) => {
            let emitter = LogEmitter::to_file(&path, &new_run_id())
                .map_err(|source| HarnessError::Log { path, source })?;
            Some(LogObserver::new(emitter))
        }
        None => None,
    };

    let runs = {
        let mut observers = Fanout::new();
        observers.push(&mut console);
        if let Some(log) = log.as_mut() {
            observers.push(log);
        }
        Scheduler::new(tree, config).run(&mut observers)?
    };

    eprintln!("{}", summary(&runs));
    if let Some(log) = log {
        log.finish(&runs).map_err(HarnessError::LogWrite)?;
    }
    Ok(runs)
}
