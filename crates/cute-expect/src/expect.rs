//! Mock expectation engine.
//!
//! One FIFO queue per unit, shared by every mocked symbol: a push appends to
//! the tail whatever its symbol, an intercepted call pops the head. This
//! enforces a total order of calls across the whole test.
//!
//! [`ExpectQueue`] and [`Expectation`] hold the rules and are usable on
//! their own. The free functions [`push`] and [`intercept`] bind them to the
//! running unit: every violation is recorded as a fatal failure and aborts
//! the current phase.

use std::collections::VecDeque;
use std::fmt;

use cute_core::{CompareError, Constraint, FromValue, IntoValue, Value};
use thiserror::Error;

use crate::bridge;
use crate::context::{self, Location};

// ---------------------------------------------------------------------------
// Expectations
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
struct ParamExpectation {
    name: String,
    constraint: Constraint,
    consumed: bool,
}

/// One expected call: symbol, parameter constraints and optional return value.
#[derive(Debug, Clone)]
pub struct Expectation {
    symbol: String,
    seq: u64,
    params: Vec<ParamExpectation>,
    retval: Option<Value>,
    pushed_at: Option<Location>,
}

impl Expectation {
    #[must_use]
    pub fn call(symbol: impl Into<String>) -> Self {
        Self {
            symbol: symbol.into(),
            seq: 0,
            params: Vec::new(),
            retval: None,
            pushed_at: None,
        }
    }

    /// Constrain parameter `name`.
    #[must_use]
    pub fn parm(mut self, name: impl Into<String>, constraint: Constraint) -> Self {
        self.params.push(ParamExpectation {
            name: name.into(),
            constraint,
            consumed: false,
        });
        self
    }

    /// Queue the value the intercepted call returns.
    #[must_use]
    pub fn returns(mut self, value: impl IntoValue) -> Self {
        self.retval = Some(value.into_value());
        self
    }

    #[must_use]
    pub fn symbol(&self) -> &str {
        &self.symbol
    }

    /// Position in push order, starting at 1.
    #[must_use]
    pub const fn seq(&self) -> u64 {
        self.seq
    }

    #[must_use]
    pub const fn pushed_at(&self) -> Option<Location> {
        self.pushed_at
    }

    /// Evaluate the constraint registered for `name` against `actual`.
    pub fn check_parameter(&mut self, name: &str, actual: &Value) -> Result<(), MockViolation> {
        let symbol = &self.symbol;
        let Some(param) = self.params.iter_mut().find(|p| p.name == name && !p.consumed) else {
            return Err(if self.params.iter().any(|p| p.name == name) {
                MockViolation::ParameterQueriedTwice {
                    symbol: symbol.clone(),
                    name: name.to_string(),
                }
            } else {
                MockViolation::UnexpectedParameter {
                    symbol: symbol.clone(),
                    name: name.to_string(),
                }
            });
        };
        param.consumed = true;
        match param.constraint.evaluate(actual) {
            Ok(true) => Ok(()),
            Ok(false) => Err(MockViolation::ParameterMismatch {
                symbol: symbol.clone(),
                name: name.to_string(),
                expected: expected_text(&param.constraint),
                actual: actual.to_string(),
            }),
            Err(source) => Err(MockViolation::InvalidComparison {
                symbol: symbol.clone(),
                name: name.to_string(),
                source,
            }),
        }
    }

    /// Take the queued return value.
    pub fn take_retval(&mut self) -> Result<Value, MockViolation> {
        self.retval.take().ok_or_else(|| MockViolation::NoReturnValue {
            symbol: self.symbol.clone(),
        })
    }

    /// Constraints never queried and a return value never taken.
    pub fn leftovers(&self) -> Result<(), MockViolation> {
        let names: Vec<String> = self
            .params
            .iter()
            .filter(|p| !p.consumed)
            .map(|p| p.name.clone())
            .collect();
        if !names.is_empty() {
            return Err(MockViolation::UnconsumedParameters {
                symbol: self.symbol.clone(),
                names,
            });
        }
        if self.retval.is_some() {
            return Err(MockViolation::UnconsumedReturn {
                symbol: self.symbol.clone(),
            });
        }
        Ok(())
    }
}

fn expected_text(constraint: &Constraint) -> String {
    let operand = constraint.operand().to_string();
    match constraint.expr() {
        Some(expr) if expr != operand => {
            format!("{} {expr} ({operand})", constraint.predicate())
        }
        _ => constraint.describe(),
    }
}

// ---------------------------------------------------------------------------
// Queue
// ---------------------------------------------------------------------------

/// Global, symbol-agnostic FIFO of expectations.
#[derive(Debug, Default)]
pub struct ExpectQueue {
    entries: VecDeque<Expectation>,
    pushed: u64,
}

impl ExpectQueue {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Append to the tail. Never fails.
    pub fn push(&mut self, mut expectation: Expectation, at: Location) -> u64 {
        self.pushed += 1;
        expectation.seq = self.pushed;
        expectation.pushed_at = Some(at);
        self.entries.push_back(expectation);
        self.pushed
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Pop the head for a call to `symbol`.
    ///
    /// A symbol mismatch still discards the head, so the queue keeps draining.
    pub fn intercept(&mut self, symbol: &str) -> Result<Expectation, MockViolation> {
        let head = self.entries.pop_front().ok_or_else(|| MockViolation::Missing {
            symbol: symbol.to_string(),
        })?;
        if head.symbol != symbol {
            return Err(MockViolation::WrongCall {
                expected: PendingCall::from(&head),
                found: symbol.to_string(),
            });
        }
        Ok(head)
    }

    /// Empty the queue, failing if anything was left.
    pub fn end_of_test_check(&mut self) -> Result<(), MockViolation> {
        if self.entries.is_empty() {
            return Ok(());
        }
        Err(MockViolation::NotConsumed(
            self.entries.drain(..).map(|e| PendingCall::from(&e)).collect(),
        ))
    }
}

// ---------------------------------------------------------------------------
// Violations
// ---------------------------------------------------------------------------

/// A queued call as shown in messages.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingCall {
    pub symbol: String,
    pub file: String,
    pub line: u32,
}

impl From<&Expectation> for PendingCall {
    fn from(e: &Expectation) -> Self {
        let (file, line) = e.pushed_at.map_or(("<unknown>", 0), |at| (at.file, at.line));
        Self {
            symbol: e.symbol.clone(),
            file: file.to_string(),
            line,
        }
    }
}

impl fmt::Display for PendingCall {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "`{}` (expected at {}:{})", self.symbol, self.file, self.line)
    }
}

fn list(calls: &[PendingCall]) -> String {
    calls
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join(", ")
}

/// A broken mock rule. Every violation fails the test.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum MockViolation {
    #[error("missing expectation: `{symbol}` called with no call expected")]
    Missing { symbol: String },
    #[error("wrong call: `{found}` called while {expected} was expected")]
    WrongCall { expected: PendingCall, found: String },
    #[error("unexpected parameter `{name}` queried for `{symbol}`")]
    UnexpectedParameter { symbol: String, name: String },
    #[error("parameter `{name}` of `{symbol}` queried twice")]
    ParameterQueriedTwice { symbol: String, name: String },
    #[error("parameter `{name}` of `{symbol}`: expected {expected}, found {actual}")]
    ParameterMismatch {
        symbol: String,
        name: String,
        expected: String,
        actual: String,
    },
    #[error("parameter `{name}` of `{symbol}`: {source}")]
    InvalidComparison {
        symbol: String,
        name: String,
        source: CompareError,
    },
    #[error("no return value queued for `{symbol}`")]
    NoReturnValue { symbol: String },
    #[error("return value domain mismatch for `{symbol}`: {source}")]
    ReturnValueDomain { symbol: String, source: CompareError },
    #[error("parameter expectation not consumed for `{symbol}`: {}", .names.join(", "))]
    UnconsumedParameters { symbol: String, names: Vec<String> },
    #[error("return value not consumed for `{symbol}`")]
    UnconsumedReturn { symbol: String },
    #[error("call to `{symbol}` dropped without `finish` or `retval`")]
    Unfinished { symbol: String },
    #[error("expected calls not consumed: {}", list(.0))]
    NotConsumed(Vec<PendingCall>),
}

// ---------------------------------------------------------------------------
// Unit-bound entry points
// ---------------------------------------------------------------------------

const OUTSIDE_UNIT: &str = "mock engine used outside of an isolated unit";

/// Declare an expected call.
pub fn push(expectation: Expectation, at: Location) {
    if context::with(|ctx| ctx.queue.push(expectation, at)).is_none() {
        panic!("{OUTSIDE_UNIT}");
    }
}

/// Intercept a call to `symbol`; aborts the phase on a queue violation.
pub fn intercept(symbol: &str, at: Location) -> MockCall {
    let popped = context::with(|ctx| ctx.queue.intercept(symbol))
        .unwrap_or_else(|| panic!("{OUTSIDE_UNIT}"));
    match popped {
        Ok(entry) => MockCall {
            entry,
            at,
            deferred: false,
            completed: false,
        },
        Err(violation) => bridge::fatal(format!("mock {symbol}"), violation.to_string(), at),
    }
}

/// Drain the unit's queue, returning the violation if anything was left.
pub(crate) fn end_of_test_check() -> Option<MockViolation> {
    context::with(|ctx| ctx.queue.end_of_test_check()).and_then(Result::err)
}

/// An intercepted call in progress.
///
/// Parameter failures are recorded immediately but abort the phase only when
/// the call is completed with [`MockCall::finish`] or [`MockCall::retval`],
/// so every parameter of the call gets checked. A call dropped without
/// either is recorded as a fatal failure at its interception site.
#[derive(Debug)]
#[must_use = "complete the call with `finish` or `retval`"]
pub struct MockCall {
    entry: Expectation,
    at: Location,
    deferred: bool,
    completed: bool,
}

impl MockCall {
    #[must_use]
    pub fn symbol(&self) -> &str {
        &self.entry.symbol
    }

    /// Check `actual` against the constraint registered for `name`.
    pub fn check_parameter<V: IntoValue>(&mut self, name: &str, actual: V, at: Location) -> &mut Self {
        if let Err(violation) = self.entry.check_parameter(name, &actual.into_value()) {
            self.deferred = true;
            bridge::record_fatal(format!("mock {}({name})", self.entry.symbol), violation.to_string(), at);
        }
        self
    }

    /// Complete a call that returns nothing.
    pub fn finish(self, at: Location) {
        self.complete(at);
    }

    /// Complete the call and return the injected value.
    pub fn retval<T: FromValue>(mut self, at: Location) -> T {
        self.completed = true;
        let expression = format!("mock {}", self.entry.symbol);
        if self.deferred {
            bridge::abort_failed();
        }
        let value = match self.entry.take_retval() {
            Ok(value) => value,
            Err(violation) => bridge::fatal(expression, violation.to_string(), at),
        };
        let converted = match T::from_value(value) {
            Ok(v) => v,
            Err(source) => {
                let violation = MockViolation::ReturnValueDomain {
                    symbol: self.entry.symbol.clone(),
                    source,
                };
                bridge::fatal(expression, violation.to_string(), at)
            }
        };
        self.complete(at);
        converted
    }

    fn complete(mut self, at: Location) {
        self.completed = true;
        if self.deferred {
            bridge::abort_failed();
        }
        if let Err(violation) = self.entry.leftovers() {
            bridge::fatal(format!("mock {}", self.entry.symbol), violation.to_string(), at);
        }
    }
}

impl Drop for MockCall {
    fn drop(&mut self) {
        // Unwinding past an open call is an abort already on record.
        if self.completed || self.deferred || std::thread::panicking() {
            return;
        }
        let violation = MockViolation::Unfinished {
            symbol: self.entry.symbol.clone(),
        };
        bridge::record_fatal(format!("mock {}", self.entry.symbol), violation.to_string(), self.at);
    }
}
