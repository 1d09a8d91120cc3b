//! Fault classification: exit condition plus outcome stream to a run status.
//!
//! | exit                         | stream               | status      |
//! |------------------------------|----------------------|-------------|
//! | killed by watchdog           | ignored              | timed_out   |
//! | killed for an interrupt      | ignored              | terminated  |
//! | SIGSEGV/SIGBUS/SIGILL/SIGFPE/SIGSYS | ignored       | crashed     |
//! | SIGABRT                      | ignored              | aborted     |
//! | any other signal             | ignored              | terminated  |
//! | normal exit                  | corrupt / no terminal| crashed     |
//! | normal exit                  | pass                 | passed      |
//! | normal exit                  | skip                 | skipped     |
//! | normal exit                  | fail, or failures    | failed      |

use std::ffi::c_int;
use std::time::Duration;

use cute_core::{ChannelSummary, ExitCondition, Status, Verdict};

/// Exit code of a unit that could not join its process group or redirect its
/// console, before any record was written.
pub const CHILD_SETUP_EXIT: i32 = 102;

/// Decode a raw `waitpid` status.
#[must_use]
pub fn exit_condition(status: c_int) -> ExitCondition {
    if libc::WIFSIGNALED(status) {
        ExitCondition::Signaled(libc::WTERMSIG(status))
    } else {
        ExitCondition::Exited(libc::WEXITSTATUS(status))
    }
}

/// "exited with code 3", "killed by signal 11 (SIGSEGV)".
#[must_use]
pub fn describe_exit(exit: ExitCondition) -> String {
    match exit {
        ExitCondition::Exited(code) => format!("exited with code {code}"),
        ExitCondition::Signaled(sig) => format!("killed by signal {sig} ({})", signal_name(sig)),
    }
}

/// Why the scheduler killed a unit, if it did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KillCause {
    /// The armed timeout expired.
    Watchdog(Duration),
    /// SIGINT/SIGTERM or the cancel token.
    Interrupt,
    /// A sibling was terminated and the run is being abandoned.
    Abandon,
}

#[must_use]
pub fn signal_name(sig: i32) -> &'static str {
    match sig {
        libc::SIGSEGV => "SIGSEGV",
        libc::SIGBUS => "SIGBUS",
        libc::SIGILL => "SIGILL",
        libc::SIGFPE => "SIGFPE",
        libc::SIGSYS => "SIGSYS",
        libc::SIGABRT => "SIGABRT",
        libc::SIGKILL => "SIGKILL",
        libc::SIGTERM => "SIGTERM",
        libc::SIGINT => "SIGINT",
        libc::SIGHUP => "SIGHUP",
        libc::SIGQUIT => "SIGQUIT",
        libc::SIGPIPE => "SIGPIPE",
        libc::SIGALRM => "SIGALRM",
        libc::SIGUSR1 => "SIGUSR1",
        libc::SIGUSR2 => "SIGUSR2",
        libc::SIGTRAP => "SIGTRAP",
        _ => "unknown signal",
    }
}

/// Memory, instruction and arithmetic faults.
#[must_use]
pub const fn is_fault_signal(sig: i32) -> bool {
    matches!(
        sig,
        libc::SIGSEGV | libc::SIGBUS | libc::SIGILL | libc::SIGFPE | libc::SIGSYS
    )
}

/// Classified status and one-line reason.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Classification {
    pub status: Status,
    pub reason: Option<String>,
}

impl Classification {
    fn new(status: Status, reason: impl Into<String>) -> Self {
        Self {
            status,
            reason: Some(reason.into()),
        }
    }
}

/// Classify one finished unit.
///
/// A kill issued by the scheduler is authoritative over whatever the unit did
/// in the same instant.
#[must_use]
pub fn classify(exit: ExitCondition, kill: Option<KillCause>, stream: &ChannelSummary) -> Classification {
    let during = stream
        .phase
        .map_or_else(String::new, |phase| format!(" during {phase}"));

    match kill {
        Some(KillCause::Watchdog(limit)) => {
            return Classification::new(
                Status::TimedOut,
                format!("exceeded timeout of {}ms{during}", limit.as_millis()),
            );
        }
        Some(KillCause::Interrupt) => return Classification::new(Status::Terminated, "run interrupted"),
        Some(KillCause::Abandon) => return Classification::new(Status::Terminated, "run abandoned"),
        None => {}
    }

    let ended = describe_exit(exit);
    match exit {
        ExitCondition::Signaled(sig) if is_fault_signal(sig) => {
            Classification::new(Status::Crashed, format!("{ended}{during}"))
        }
        ExitCondition::Signaled(libc::SIGABRT) => {
            Classification::new(Status::Aborted, format!("{ended}{during}"))
        }
        ExitCondition::Signaled(_) => Classification::new(Status::Terminated, format!("{ended}{during}")),
        ExitCondition::Exited(code) => {
            if let Some(violation) = &stream.violation {
                return Classification::new(Status::Crashed, format!("protocol violation: {violation}"));
            }
            if stream.truncated {
                return Classification::new(
                    Status::Crashed,
                    "protocol violation: outcome channel ended inside a frame",
                );
            }
            match stream.terminal {
                None if code == CHILD_SETUP_EXIT => Classification::new(
                    Status::Crashed,
                    format!("unit process setup failed ({ended})"),
                ),
                None => Classification::new(
                    Status::Crashed,
                    format!("protocol violation: {ended} without a terminal record{during}"),
                ),
                Some(_) if !stream.failures.is_empty() => Classification {
                    status: Status::Failed,
                    reason: None,
                },
                Some(Verdict::Fail) => Classification::new(Status::Failed, "unit reported failure"),
                Some(_) if code != 0 => Classification::new(Status::Failed, ended),
                Some(Verdict::Skip) => Classification {
                    status: Status::Skipped,
                    reason: stream.skip.as_ref().and_then(|s| s.reason.clone()),
                },
                Some(Verdict::Pass) => Classification {
                    status: Status::Passed,
                    reason: None,
                },
            }
        }
    }
}
