//! Assertion bridge and in-unit phase runner.
//!
//! Two families of entry points, kept distinct:
//! - non-fatal: [`check`], [`check_that`] record a failure and return
//! - fatal: [`ensure`], [`ensure_that`], [`fail`] record a failure and abort
//!   the current phase; [`skip`] aborts it without failing
//!
//! Aborting unwinds with a private payload that [`run_unit`] catches at the
//! phase boundary, so teardown still runs after a fatal failure or skip in
//! the body. Any other panic is recorded as a fatal failure.
//!
//! Outside a unit there is no outcome channel: every failure panics.

use std::any::Any;
use std::cell::RefCell;
use std::io::Write;
use std::panic::{self, PanicHookInfo};

use cute_core::{Constraint, FailureRecord, IntoValue, Phase, Record, SkipNotice, TestFn, Verdict};

use crate::context::{self, Location};
use crate::expect::{self, MockViolation};

/// Unwind payload that ends the current phase.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Interrupt {
    Fail,
    Skip,
}

fn failure(expression: String, message: String, at: Location, fatal: bool) -> FailureRecord {
    FailureRecord {
        expression,
        file: at.file.to_string(),
        line: at.line,
        function: at.function.to_string(),
        message,
        fatal,
    }
}

fn report(record: FailureRecord) {
    if let Err(record) = context::record_failure(record) {
        panic!("{record}");
    }
}

/// Record a fatal failure without unwinding yet.
pub(crate) fn record_fatal(expression: String, message: String, at: Location) {
    report(failure(expression, message, at, true));
}

/// Record a fatal failure and abort the phase.
pub(crate) fn fatal(expression: String, message: String, at: Location) -> ! {
    record_fatal(expression, message, at);
    abort_failed()
}

/// Abort the phase after its failure has been recorded.
pub(crate) fn abort_failed() -> ! {
    panic::resume_unwind(Box::new(Interrupt::Fail))
}

/// Non-fatal boolean check. Returns `cond`.
pub fn check(cond: bool, expr: &str, at: Location) -> bool {
    if !cond {
        report(failure(expr.to_string(), "check failed".to_string(), at, false));
    }
    cond
}

/// Fatal boolean check.
pub fn ensure(cond: bool, expr: &str, at: Location) {
    if !cond {
        fatal(expr.to_string(), "ensure failed".to_string(), at);
    }
}

fn compare<V: IntoValue>(
    actual: V,
    expr: &str,
    constraint: &Constraint,
    at: Location,
    fatal_on_mismatch: bool,
) -> bool {
    let actual = actual.into_value();
    let operand = constraint.operand().to_string();
    let expected = match constraint.expr() {
        Some(src) if src != operand => format!("{src} ({operand})"),
        _ => operand,
    };
    let expression = format!("{expr} {} {expected}", constraint.predicate());
    match constraint.evaluate(&actual) {
        Ok(true) => true,
        Ok(false) => {
            let message = format!(
                "`{expr}` expected {} {expected}, found {actual}",
                constraint.predicate()
            );
            if fatal_on_mismatch {
                fatal(expression, message, at);
            }
            report(failure(expression, message, at, false));
            false
        }
        // An invalid comparison is a usage error and always fatal.
        Err(err) => fatal(expression, format!("invalid comparison: {err}"), at),
    }
}

/// Non-fatal comparison check. Returns whether it held.
pub fn check_that<V: IntoValue>(actual: V, expr: &str, constraint: &Constraint, at: Location) -> bool {
    compare(actual, expr, constraint, at, false)
}

/// Fatal comparison check.
pub fn ensure_that<V: IntoValue>(actual: V, expr: &str, constraint: &Constraint, at: Location) {
    compare(actual, expr, constraint, at, true);
}

/// Explicit failure request.
pub fn fail(reason: Option<String>, at: Location) -> ! {
    let message = match reason {
        Some(reason) => format!("explicit fail requested: {reason}"),
        None => "explicit fail requested".to_string(),
    };
    fatal(String::new(), message, at)
}

/// Explicit skip request.
pub fn skip(reason: Option<String>, at: Location) -> ! {
    let notice = SkipNotice {
        reason,
        file: at.file.to_string(),
        line: at.line,
        function: at.function.to_string(),
    };
    if let Err(notice) = context::record_skip(notice) {
        panic!(
            "skip requested outside of an isolated unit: {}",
            notice.reason.as_deref().unwrap_or("no reason given")
        );
    }
    panic::resume_unwind(Box::new(Interrupt::Skip))
}

// ---------------------------------------------------------------------------
// Panic capture
// ---------------------------------------------------------------------------

struct PanicSite {
    file: String,
    line: u32,
}

thread_local! {
    static LAST_PANIC: RefCell<Option<PanicSite>> = const { RefCell::new(None) };
}

/// Remember where the current panic started; call from a panic hook.
pub fn note_panic(info: &PanicHookInfo<'_>) {
    if let Some(loc) = info.location() {
        let site = PanicSite {
            file: loc.file().to_string(),
            line: loc.line(),
        };
        LAST_PANIC.with(|slot| *slot.borrow_mut() = Some(site));
    }
}

/// Install a hook that records panic sites and then defers to the default hook.
pub fn install_panic_hook() {
    let default = panic::take_hook();
    panic::set_hook(Box::new(move |info| {
        note_panic(info);
        default(info);
    }));
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "non-string panic payload".to_string()
    }
}

// ---------------------------------------------------------------------------
// Phase runner
// ---------------------------------------------------------------------------

/// Functions run by one unit; `None` slots are skipped.
#[derive(Debug, Clone, Copy, Default)]
pub struct UnitPlan {
    pub setup: Option<TestFn>,
    pub body: Option<TestFn>,
    pub teardown: Option<TestFn>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum PhaseOutcome {
    Completed,
    Failed,
    Skipped,
}

fn run_phase(phase: Phase, f: TestFn) -> PhaseOutcome {
    context::with(|ctx| ctx.enter(phase));
    LAST_PANIC.with(|slot| slot.borrow_mut().take());
    let payload = match panic::catch_unwind(f) {
        Ok(()) => return PhaseOutcome::Completed,
        Err(payload) => payload,
    };
    match payload.downcast_ref::<Interrupt>() {
        Some(Interrupt::Fail) => PhaseOutcome::Failed,
        Some(Interrupt::Skip) => PhaseOutcome::Skipped,
        None => {
            let site = LAST_PANIC.with(|slot| slot.borrow_mut().take());
            let (file, line) = site.map_or_else(|| ("<unknown>".to_string(), 0), |s| (s.file, s.line));
            let record = FailureRecord {
                expression: String::new(),
                file,
                line,
                function: String::new(),
                message: format!("panicked during {phase}: {}", panic_message(payload.as_ref())),
                fatal: true,
            };
            context::with(|ctx| ctx.fail(record));
            PhaseOutcome::Failed
        }
    }
}

fn drive(plan: UnitPlan) {
    if let Some(setup) = plan.setup
        && run_phase(Phase::Setup, setup) != PhaseOutcome::Completed
    {
        return;
    }

    if let Some(body) = plan.body
        && run_phase(Phase::Exec, body) == PhaseOutcome::Completed
        && let Some(violation) = expect::end_of_test_check()
    {
        let (file, line) = match &violation {
            MockViolation::NotConsumed(calls) if !calls.is_empty() => {
                (calls[0].file.clone(), calls[0].line)
            }
            _ => (String::new(), 0),
        };
        context::with(|ctx| {
            ctx.fail(FailureRecord {
                expression: "end of test".to_string(),
                file,
                line,
                function: String::new(),
                message: violation.to_string(),
                fatal: true,
            });
        });
    }

    if let Some(teardown) = plan.teardown
        && run_phase(Phase::Teardown, teardown) == PhaseOutcome::Skipped
    {
        context::with(|ctx| {
            ctx.fail(FailureRecord {
                expression: String::new(),
                file: String::new(),
                line: 0,
                function: String::new(),
                message: "skip requested during teardown".to_string(),
                fatal: true,
            });
        });
    }
}

/// Run setup, body and teardown with a fresh context writing to `sink`, then
/// write the terminal record.
///
/// Teardown runs after the body whatever its outcome; it does not run when
/// setup failed or skipped. A skip requested from teardown is a failure.
pub fn run_unit(plan: UnitPlan, sink: Box<dyn Write>) -> Verdict {
    context::install(sink);
    drive(plan);
    let verdict = context::with(|ctx| {
        let verdict = ctx.verdict();
        ctx.emit(&Record::Terminal { verdict });
        verdict
    })
    .unwrap_or(Verdict::Fail);
    context::uninstall();
    verdict
}
