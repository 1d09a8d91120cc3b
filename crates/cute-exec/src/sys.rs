//! Thin wrappers over the libc process primitives used by the scheduler.

use std::ffi::c_int;
use std::io;
use std::os::fd::{AsRawFd, FromRawFd, OwnedFd, RawFd};
use std::time::Duration;

use crate::error::ExecError;

/// A pipe as `(read, write)`, both close-on-exec.
pub(crate) fn pipe() -> Result<(OwnedFd, OwnedFd), ExecError> {
    let mut fds = [0 as c_int; 2];
    // SAFETY: `fds` has room for the two descriptors pipe(2) writes.
    if unsafe { libc::pipe(fds.as_mut_ptr()) } != 0 {
        return Err(ExecError::last("pipe"));
    }
    // SAFETY: pipe(2) succeeded, so both descriptors are open and owned by us.
    let (read, write) = unsafe { (OwnedFd::from_raw_fd(fds[0]), OwnedFd::from_raw_fd(fds[1])) };
    set_fd_flag(&read, libc::F_GETFD, libc::F_SETFD, libc::FD_CLOEXEC)?;
    set_fd_flag(&write, libc::F_GETFD, libc::F_SETFD, libc::FD_CLOEXEC)?;
    Ok((read, write))
}

pub(crate) fn set_nonblocking(fd: &OwnedFd) -> Result<(), ExecError> {
    set_fd_flag(fd, libc::F_GETFL, libc::F_SETFL, libc::O_NONBLOCK)
}

fn set_fd_flag(fd: &OwnedFd, get: c_int, set: c_int, flag: c_int) -> Result<(), ExecError> {
    let raw = fd.as_raw_fd();
    // SAFETY: fcntl on a descriptor we own; no pointers involved.
    let current = unsafe { libc::fcntl(raw, get) };
    if current < 0 {
        return Err(ExecError::last("fcntl"));
    }
    // SAFETY: as above.
    if unsafe { libc::fcntl(raw, set, current | flag) } < 0 {
        return Err(ExecError::last("fcntl"));
    }
    Ok(())
}

/// Outcome of one nonblocking read.
pub(crate) enum ReadOutcome {
    Data(usize),
    WouldBlock,
    Eof,
}

pub(crate) fn read(fd: &OwnedFd, buf: &mut [u8]) -> io::Result<ReadOutcome> {
    loop {
        // SAFETY: `buf` is valid for `buf.len()` writable bytes.
        let n = unsafe { libc::read(fd.as_raw_fd(), buf.as_mut_ptr().cast(), buf.len()) };
        if n > 0 {
            return Ok(ReadOutcome::Data(n as usize));
        }
        if n == 0 {
            return Ok(ReadOutcome::Eof);
        }
        let err = io::Error::last_os_error();
        match err.kind() {
            io::ErrorKind::Interrupted => {}
            io::ErrorKind::WouldBlock => return Ok(ReadOutcome::WouldBlock),
            _ => return Err(err),
        }
    }
}

/// Wait until a descriptor is readable or `timeout` passes. EINTR returns early.
pub(crate) fn poll_readable(fds: &[RawFd], timeout: Duration) -> Result<(), ExecError> {
    let mut pollfds: Vec<libc::pollfd> = fds
        .iter()
        .map(|&fd| libc::pollfd {
            fd,
            events: libc::POLLIN,
            revents: 0,
        })
        .collect();
    let millis = c_int::try_from(timeout.as_millis()).unwrap_or(c_int::MAX);
    // SAFETY: `pollfds` is a valid array of `pollfds.len()` entries.
    let rc = unsafe { libc::poll(pollfds.as_mut_ptr(), pollfds.len() as libc::nfds_t, millis) };
    if rc < 0 {
        let err = io::Error::last_os_error();
        if err.kind() != io::ErrorKind::Interrupted {
            return Err(ExecError::Sys {
                call: "poll",
                source: err,
            });
        }
    }
    Ok(())
}

pub(crate) enum Forked {
    Child,
    Parent(libc::pid_t),
}

pub(crate) fn fork() -> Result<Forked, ExecError> {
    // SAFETY: the scheduler is single-threaded at this point and the child only
    // runs the unit before `_exit`.
    match unsafe { libc::fork() } {
        -1 => Err(ExecError::last("fork")),
        0 => Ok(Forked::Child),
        pid => Ok(Forked::Parent(pid)),
    }
}

/// Put `pid` in its own process group. Called from both sides of the fork.
pub(crate) fn own_process_group(pid: libc::pid_t) -> Result<(), ExecError> {
    // SAFETY: no memory is passed.
    if unsafe { libc::setpgid(pid, pid) } == -1 {
        return Err(ExecError::last("setpgid"));
    }
    Ok(())
}

/// Nonblocking reap; the raw wait status once the child is gone.
pub(crate) fn try_wait(pid: libc::pid_t) -> Result<Option<c_int>, ExecError> {
    let mut status: c_int = 0;
    // SAFETY: `status` is a valid out-pointer.
    let rc = unsafe { libc::waitpid(pid, &mut status, libc::WNOHANG) };
    match rc {
        0 => Ok(None),
        r if r == pid => Ok(Some(status)),
        _ => Err(ExecError::last("waitpid")),
    }
}

/// SIGKILL the unit's process group, and the unit itself in case it has not
/// reached `setpgid` yet.
pub(crate) fn kill_group(pid: libc::pid_t) {
    // SAFETY: plain signal delivery; ESRCH for an already-dead group is ignored.
    unsafe {
        libc::kill(-pid, libc::SIGKILL);
        libc::kill(pid, libc::SIGKILL);
    }
}

/// Child-side setup: default dispositions for the interrupt signals and
/// `console` as stdout/stderr.
pub(crate) fn prepare_child(console: OwnedFd) -> Result<(), ExecError> {
    for sig in [libc::SIGINT, libc::SIGTERM] {
        // SAFETY: installing the default disposition.
        if unsafe { libc::signal(sig, libc::SIG_DFL) } == libc::SIG_ERR {
            return Err(ExecError::last("signal"));
        }
    }
    for target in [libc::STDOUT_FILENO, libc::STDERR_FILENO] {
        // SAFETY: `console` is an open descriptor we own; `target` is a standard stream.
        if unsafe { libc::dup2(console.as_raw_fd(), target) } == -1 {
            return Err(ExecError::last("dup2"));
        }
    }
    Ok(())
}

/// Leave the child without running atexit handlers or unwinding into the
/// caller's stack.
pub(crate) fn exit_child(code: c_int) -> ! {
    // SAFETY: `_exit` never returns and touches no Rust state.
    unsafe { libc::_exit(code) }
}
