use std::io;

use thiserror::Error;

/// Failure of a process primitive on the scheduler side.
#[derive(Debug, Error)]
pub enum ExecError {
    #[error("{call} failed: {source}")]
    Sys {
        call: &'static str,
        #[source]
        source: io::Error,
    },
}

impl ExecError {
    /// Wrap `errno` from the call that just failed.
    pub(crate) fn last(call: &'static str) -> Self {
        Self::Sys {
            call,
            source: io::Error::last_os_error(),
        }
    }
}
