//! Run observers for the command line: a console reporter and the JSONL
//! structured log, plus the closing summary line.

use std::io::{self, Write};

use cute_core::{ExitCondition, Run, RunObserver, RunTree, Status};
use cute_exec::signal_name;

use crate::structured_log::{LogEmitter, LogEntry, LogLevel};

fn millis(run: &Run) -> u64 {
    u64::try_from(run.duration().as_millis()).unwrap_or(u64::MAX)
}

fn label(status: Status) -> &'static str {
    match status {
        Status::Passed => "PASS",
        Status::Failed => "FAIL",
        Status::Skipped => "SKIP",
        Status::Crashed => "CRASH",
        Status::TimedOut => "TIMEOUT",
        Status::Aborted => "ABORT",
        Status::Terminated => "TERM",
        Status::Pending | Status::Running => "....",
    }
}

/// Human-readable progress, one line per test.
pub struct ConsoleReporter {
    out: Box<dyn Write>,
    quiet: bool,
}

impl ConsoleReporter {
    /// `quiet` hides passing and skipped tests and suite headers.
    #[must_use]
    pub fn new(out: Box<dyn Write>, quiet: bool) -> Self {
        Self { out, quiet }
    }

    #[must_use]
    pub fn stderr(quiet: bool) -> Self {
        Self::new(Box::new(io::stderr()), quiet)
    }

    fn write_run(&mut self, run: &Run) -> io::Result<()> {
        let indent = "  ".repeat(run.depth);
        write!(self.out, "{indent}{:<7} {} ({} ms)", label(run.status), run.path, millis(run))?;
        if let Some(reason) = &run.reason {
            write!(self.out, ": {reason}")?;
        }
        writeln!(self.out)?;
        for failure in &run.failures {
            writeln!(self.out, "{indent}    {failure}")?;
        }
        if !run.status.is_success() && !run.console.is_empty() {
            writeln!(self.out, "{indent}    --- console ---")?;
            for line in run.console.lines() {
                writeln!(self.out, "{indent}    {line}")?;
            }
        }
        Ok(())
    }
}

// Reporting is best effort; a closed stderr must not stop the run.
impl RunObserver for ConsoleReporter {
    fn suite_started(&mut self, run: &Run) {
        if !self.quiet {
            let _ = writeln!(self.out, "{}{}", "  ".repeat(run.depth), run.path);
        }
    }

    fn test_finished(&mut self, run: &Run) {
        if !self.quiet || !run.status.is_success() {
            let _ = self.write_run(run);
        }
    }

    fn suite_finished(&mut self, run: &Run) {
        if !run.status.is_success() && (run.reason.is_some() || !run.failures.is_empty()) {
            let _ = self.write_run(run);
        }
    }
}

/// Emits `suite_start`, `test_end` and `suite_end` events.
pub struct LogObserver {
    emitter: LogEmitter,
    error: Option<io::Error>,
}

impl LogObserver {
    #[must_use]
    pub fn new(emitter: LogEmitter) -> Self {
        Self {
            emitter,
            error: None,
        }
    }

    fn emit(&mut self, entry: LogEntry) {
        if self.error.is_none()
            && let Err(err) = self.emitter.emit_entry(entry)
        {
            self.error = Some(err);
        }
    }

    fn settled(event: &str, run: &Run) -> LogEntry {
        let mut entry = LogEntry::new("", LogLevel::for_status(run.status), event)
            .with_path(&run.path)
            .with_status(run.status)
            .with_phase(run.phase)
            .with_duration_ms(millis(run));
        match run.exit {
            Some(ExitCondition::Signaled(sig)) => entry = entry.with_signal(signal_name(sig)),
            Some(ExitCondition::Exited(code)) => entry = entry.with_exit_code(code),
            None => {}
        }
        if let Some(reason) = &run.reason {
            entry = entry.with_details(serde_json::json!({ "reason": reason }));
        }
        if !run.failures.is_empty() {
            entry = entry.with_failures(run.failures.iter().map(ToString::to_string).collect());
        }
        entry
    }

    /// Log the run end and flush; reports the first write error, if any.
    pub fn finish(mut self, runs: &RunTree) -> io::Result<()> {
        let entry = LogEntry::new("", LogLevel::Info, "run_end")
            .with_status(runs.root().status)
            .with_exit_code(runs.exit_code())
            .with_duration_ms(millis(runs.root()))
            .with_details(serde_json::json!({ "summary": summary(runs) }));
        self.emit(entry);
        if let Some(err) = self.error {
            return Err(err);
        }
        self.emitter.flush()
    }
}

impl RunObserver for LogObserver {
    fn suite_started(&mut self, run: &Run) {
        let entry = LogEntry::new("", LogLevel::Info, "suite_start").with_path(&run.path);
        self.emit(entry);
    }

    fn test_finished(&mut self, run: &Run) {
        self.emit(Self::settled("test_end", run));
    }

    fn suite_finished(&mut self, run: &Run) {
        self.emit(Self::settled("suite_end", run));
    }
}

/// "5 tests: 3 passed, 1 failed, 1 crashed".
#[must_use]
pub fn summary(runs: &RunTree) -> String {
    let total = runs.leaves().count();
    let counts: Vec<String> = runs
        .tally()
        .into_iter()
        .map(|(status, n)| format!("{n} {status}"))
        .collect();
    let noun = if total == 1 { "test" } else { "tests" };
    if counts.is_empty() {
        format!("{total} {noun}")
    } else {
        format!("{total} {noun}: {}", counts.join(", "))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn settled_entry_carries_exit_condition() {
        let tree = cute_core::Registry::new()
            .suite(cute_core::Suite::new("all"))
            .build()
            .unwrap();
        let mut run = RunTree::new(&tree).root().clone();
        run.status = Status::Crashed;
        // Reasons are free text; the signal comes from the exit condition.
        run.reason = Some("protocol violation".into());
        run.exit = Some(ExitCondition::Signaled(11));
        let entry = LogObserver::settled("test_end", &run);
        assert_eq!(entry.signal.as_deref(), Some("SIGSEGV"));
        assert_eq!(entry.exit_code, None);

        run.status = Status::Failed;
        run.exit = Some(ExitCondition::Exited(3));
        let entry = LogObserver::settled("test_end", &run);
        assert_eq!(entry.signal, None);
        assert_eq!(entry.exit_code, Some(3));
    }

    #[test]
    fn labels_are_distinct() {
        let statuses = [
            Status::Passed,
            Status::Failed,
            Status::Skipped,
            Status::Crashed,
            Status::TimedOut,
            Status::Aborted,
            Status::Terminated,
        ];
        let mut seen: Vec<&str> = statuses.iter().map(|&s| label(s)).collect();
        seen.sort_unstable();
        seen.dedup();
        assert_eq!(seen.len(), statuses.len());
    }
}
