//! In-unit side of the cute test harness.
//!
//! Everything here runs inside one isolated unit:
//! - [`bridge`]: the non-fatal `check` family, the fatal `ensure`/`fail`
//!   family, `skip`, and [`run_unit`] which drives setup, body and teardown
//! - [`expect`]: the mock expectation queue and intercepted calls
//! - macros: `check!`, `ensure!`, `check_that!`, `ensure_that!`, `fail!`,
//!   `skip!`, `expect_call!`, `mock_call!`, `mock_parm!`, `mock!`

#![forbid(unsafe_code)]

pub mod bridge;
mod context;
pub mod expect;
mod macros;

pub use bridge::{UnitPlan, install_panic_hook, run_unit};
pub use context::{Location, is_active};
pub use cute_core::{Constraint, FromValue, IntoValue, Mem, Value};
pub use expect::{ExpectQueue, Expectation, MockCall, MockViolation, PendingCall};
