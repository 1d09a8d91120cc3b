//! cute test binaries: command line, console reporting and the JSONL run log.
//!
//! A test binary builds its suite tree and hands it to [`main`]:
//!
//! ```no_run
//! use cute_harness::prelude::*;
//!
//! fn adds() {
//!     check_that!(2 + 2, equal(4));
//! }
//!
//! fn main() -> std::process::ExitCode {
//!     let tree = Registry::new()
//!         .suite(Suite::new("all"))
//!         .test(Test::new("adds", adds).within("all"))
//!         .build()
//!         .expect("valid suite tree");
//!     cute_harness::main(tree)
//! }
//! ```

#![forbid(unsafe_code)]

pub mod cli;
pub mod report;
pub mod structured_log;

pub use cli::{HarnessError, RunArgs, list, main, main_with, run};
pub use report::{ConsoleReporter, LogObserver, summary};

/// Everything a test file needs.
pub mod prelude {
    pub use cute_core::{Fixture, Mem, Registry, Suite, SuiteTree, Test, Timeout};
    pub use cute_expect::{
        check, check_that, ensure, ensure_that, expect_call, fail, here, mock, mock_call, mock_parm,
        skip,
    };
}
