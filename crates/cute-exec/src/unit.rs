//! One isolated execution unit: a forked child running a [`UnitPlan`].
//!
//! The child gets two pipes. The outcome channel carries framed records
//! written by the in-unit bridge; the console pipe replaces its stdout and
//! stderr. The parent side, [`UnitHandle`], drains both without blocking and
//! reaps the child once it exits.

use std::fs::File;
use std::io::Write;
use std::os::fd::{AsRawFd, OwnedFd, RawFd};
use std::panic::{self, AssertUnwindSafe};
use std::time::{Duration, Instant, SystemTime};

use cute_core::{ChannelSummary, Completion, ExitCondition, RecordDecoder};
use cute_expect::{UnitPlan, install_panic_hook, run_unit};

use crate::classify::{CHILD_SETUP_EXIT, KillCause, classify, exit_condition};
use crate::error::ExecError;
use crate::sys::{self, Forked, ReadOutcome};

const READ_CHUNK: usize = 16 * 1024;

/// Exit code of a child whose unit runner itself panicked.
const RUNNER_PANIC_EXIT: i32 = 101;

/// Fork a unit running `plan`.
///
/// `timeout` arms the watchdog from the moment of the fork; `None` disables it.
pub fn spawn(plan: UnitPlan, timeout: Option<Duration>, console_limit: usize) -> Result<UnitHandle, ExecError> {
    let (channel_read, channel_write) = sys::pipe()?;
    let (console_read, console_write) = sys::pipe()?;
    // Buffered parent output would otherwise be flushed a second time by the child.
    let _ = std::io::stdout().flush();
    let _ = std::io::stderr().flush();

    match sys::fork()? {
        Forked::Child => {
            drop(channel_read);
            drop(console_read);
            child_main(plan, channel_write, console_write)
        }
        Forked::Parent(pid) => {
            drop(channel_write);
            drop(console_write);
            // The child joins its group itself and exits if that fails; this
            // call only closes the window before it gets there.
            let _ = sys::own_process_group(pid);
            let started = Instant::now();
            let handle = UnitHandle {
                pid,
                channel: Some(channel_read),
                console: Some(console_read),
                decoder: RecordDecoder::new(),
                stream: ChannelSummary::default(),
                console_buf: Vec::new(),
                console_limit,
                console_truncated: false,
                started_at: SystemTime::now(),
                deadline: timeout.map(|t| (started + t, t)),
                exit: None,
                kill: None,
            };
            // A half-configured handle still owns the child; kill it on error.
            if let Err(err) = handle.configure() {
                sys::kill_group(pid);
                let _ = wait_blocking(pid);
                return Err(err);
            }
            Ok(handle)
        }
    }
}

fn child_main(plan: UnitPlan, channel: OwnedFd, console: OwnedFd) -> ! {
    if sys::own_process_group(0).and_then(|()| sys::prepare_child(console)).is_err() {
        sys::exit_child(CHILD_SETUP_EXIT);
    }
    let code = panic::catch_unwind(AssertUnwindSafe(|| {
        install_panic_hook();
        run_unit(plan, Box::new(File::from(channel)));
    }))
    .map_or(RUNNER_PANIC_EXIT, |()| 0);
    let _ = std::io::stdout().flush();
    let _ = std::io::stderr().flush();
    sys::exit_child(code)
}

fn wait_blocking(pid: libc::pid_t) -> Result<ExitCondition, ExecError> {
    loop {
        if let Some(status) = sys::try_wait(pid)? {
            return Ok(exit_condition(status));
        }
        std::thread::sleep(Duration::from_millis(1));
    }
}

/// Scheduler-side view of a running unit.
#[derive(Debug)]
pub struct UnitHandle {
    pid: libc::pid_t,
    channel: Option<OwnedFd>,
    console: Option<OwnedFd>,
    decoder: RecordDecoder,
    stream: ChannelSummary,
    console_buf: Vec<u8>,
    console_limit: usize,
    console_truncated: bool,
    started_at: SystemTime,
    deadline: Option<(Instant, Duration)>,
    exit: Option<ExitCondition>,
    kill: Option<KillCause>,
}

impl UnitHandle {
    fn configure(&self) -> Result<(), ExecError> {
        for fd in self.channel.iter().chain(self.console.iter()) {
            sys::set_nonblocking(fd)?;
        }
        Ok(())
    }

    #[must_use]
    pub const fn pid(&self) -> libc::pid_t {
        self.pid
    }

    /// Descriptors still open for reading.
    #[must_use]
    pub fn fds(&self) -> Vec<RawFd> {
        self.channel
            .iter()
            .chain(self.console.iter())
            .map(AsRawFd::as_raw_fd)
            .collect()
    }

    #[must_use]
    pub const fn deadline(&self) -> Option<Instant> {
        match self.deadline {
            Some((at, _)) => Some(at),
            None => None,
        }
    }

    #[must_use]
    pub const fn has_exited(&self) -> bool {
        self.exit.is_some()
    }

    /// Read whatever both pipes hold right now.
    pub fn pump(&mut self) {
        let mut buf = [0u8; READ_CHUNK];
        while let Some(fd) = &self.channel {
            match sys::read(fd, &mut buf) {
                Ok(ReadOutcome::Data(n)) => {
                    if self.stream.violation.is_none() {
                        match self.decoder.feed(&buf[..n]) {
                            Ok(records) => self.stream.absorb_all(records),
                            Err(err) => self.stream.corrupt(&err),
                        }
                    }
                }
                Ok(ReadOutcome::WouldBlock) => break,
                Ok(ReadOutcome::Eof) | Err(_) => self.channel = None,
            }
        }
        while let Some(fd) = &self.console {
            match sys::read(fd, &mut buf) {
                Ok(ReadOutcome::Data(n)) => {
                    let room = self.console_limit.saturating_sub(self.console_buf.len());
                    self.console_buf.extend_from_slice(&buf[..n.min(room)]);
                    if n > room {
                        self.console_truncated = true;
                    }
                }
                Ok(ReadOutcome::WouldBlock) => break,
                Ok(ReadOutcome::Eof) | Err(_) => self.console = None,
            }
        }
    }

    /// Reap the child if it has exited. Returns whether it has.
    pub fn try_reap(&mut self) -> Result<bool, ExecError> {
        if self.exit.is_none()
            && let Some(status) = sys::try_wait(self.pid)?
        {
            self.exit = Some(exit_condition(status));
            // Whatever the unit wrote before exiting is already in the pipes.
            self.pump();
            // Stray grandchildren share the group and may still hold the pipes.
            sys::kill_group(self.pid);
        }
        Ok(self.exit.is_some())
    }

    /// Kill the watchdog-expired unit. Returns whether it was killed.
    pub fn enforce_deadline(&mut self, now: Instant) -> bool {
        match self.deadline {
            Some((at, limit)) if now >= at && self.exit.is_none() => {
                self.kill(KillCause::Watchdog(limit));
                true
            }
            _ => false,
        }
    }

    /// Forcibly terminate the unit's process group. The first cause sticks.
    pub fn kill(&mut self, cause: KillCause) {
        if self.exit.is_some() || self.kill.is_some() {
            return;
        }
        self.kill = Some(cause);
        sys::kill_group(self.pid);
    }

    /// Classify the unit into its completion. An unreaped unit counts as
    /// killed by the scheduler.
    #[must_use]
    pub fn into_completion(mut self) -> Completion {
        if self.decoder.pending() > 0 {
            self.stream.truncated = true;
        }
        let exit = self.exit.unwrap_or(ExitCondition::Signaled(libc::SIGKILL));
        let verdict = classify(exit, self.kill, &self.stream);
        let reason = verdict.reason.or_else(|| self.stream.violation.clone());
        let mut console = String::from_utf8_lossy(&self.console_buf).into_owned();
        if self.console_truncated {
            console.push_str("\n[console output truncated]\n");
        }
        Completion {
            status: verdict.status,
            reason,
            failures: std::mem::take(&mut self.stream.failures),
            phase: self.stream.phase,
            exit: Some(exit),
            console,
            started_at: self.started_at,
            ended_at: SystemTime::now(),
        }
    }
}

impl Drop for UnitHandle {
    fn drop(&mut self) {
        if self.exit.is_none() {
            sys::kill_group(self.pid);
            let _ = wait_blocking(self.pid);
        }
    }
}
