//! External interrupts: SIGINT/SIGTERM handling and a programmatic cancel token.
//!
//! While an [`InterruptGuard`] is alive, both signals only raise a flag that
//! the scheduler's event loop polls; the previous dispositions come back when
//! the guard drops. Units reset both signals to their defaults after fork.

use std::ffi::c_int;
use std::mem::MaybeUninit;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use crate::error::ExecError;

static INTERRUPTED: AtomicBool = AtomicBool::new(false);

const SIGNALS: [c_int; 2] = [libc::SIGINT, libc::SIGTERM];

extern "C" fn on_interrupt(_sig: c_int) {
    INTERRUPTED.store(true, Ordering::SeqCst);
}

/// Whether SIGINT/SIGTERM arrived since the current guard was installed.
#[must_use]
pub fn interrupted() -> bool {
    INTERRUPTED.load(Ordering::SeqCst)
}

/// Installed SIGINT/SIGTERM handlers; restores the previous ones on drop.
pub struct InterruptGuard {
    previous: Vec<(c_int, libc::sigaction)>,
}

impl InterruptGuard {
    pub fn install() -> Result<Self, ExecError> {
        INTERRUPTED.store(false, Ordering::SeqCst);
        let mut guard = Self { previous: Vec::new() };
        for sig in SIGNALS {
            // SAFETY: zeroed sigaction is a valid starting point; the mask is
            // initialised by sigemptyset before use.
            let mut action: libc::sigaction = unsafe { std::mem::zeroed() };
            action.sa_sigaction = on_interrupt as extern "C" fn(c_int) as libc::sighandler_t;
            // No SA_RESTART: poll(2) must return EINTR so the loop notices.
            action.sa_flags = 0;
            let mut old = MaybeUninit::<libc::sigaction>::uninit();
            // SAFETY: both pointers refer to live sigaction values.
            let rc = unsafe {
                libc::sigemptyset(&mut action.sa_mask);
                libc::sigaction(sig, &action, old.as_mut_ptr())
            };
            if rc != 0 {
                // Dropping `guard` restores whatever was already replaced.
                return Err(ExecError::last("sigaction"));
            }
            // SAFETY: sigaction succeeded and filled `old`.
            guard.previous.push((sig, unsafe { old.assume_init() }));
        }
        Ok(guard)
    }
}

impl Drop for InterruptGuard {
    fn drop(&mut self) {
        for (sig, old) in self.previous.drain(..) {
            // SAFETY: restoring a disposition previously returned by sigaction.
            unsafe {
                libc::sigaction(sig, &old, std::ptr::null_mut());
            }
        }
    }
}

/// Cancels a run from another thread or an embedding program.
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn token_is_shared_between_clones() {
        let token = CancelToken::new();
        let other = token.clone();
        assert!(!other.is_cancelled());
        token.cancel();
        assert!(other.is_cancelled());
    }

    #[test]
    fn guard_installs_and_restores() {
        let guard = InterruptGuard::install().unwrap();
        assert_eq!(guard.previous.len(), 2);
        assert!(!interrupted());
        drop(guard);
    }
}
