//! Per-unit state: the outcome sink, the expectation queue and the
//! failure/skip tallies that decide the terminal verdict.
//!
//! A unit is single-threaded, so the context is a thread-local installed by
//! [`crate::run_unit`] for the duration of the unit and removed afterwards.

use std::cell::RefCell;
use std::io::Write;

use cute_core::{ChannelError, FailureRecord, Phase, Record, SkipNotice, Verdict};

use crate::expect::ExpectQueue;

/// Source location of a check, mock call or expectation push.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Location {
    pub file: &'static str,
    pub line: u32,
    pub function: &'static str,
}

pub(crate) struct UnitContext {
    sink: Box<dyn Write>,
    pub(crate) queue: ExpectQueue,
    failures: usize,
    skipped: bool,
    sink_broken: bool,
}

impl UnitContext {
    fn new(sink: Box<dyn Write>) -> Self {
        Self {
            sink,
            queue: ExpectQueue::new(),
            failures: 0,
            skipped: false,
            sink_broken: false,
        }
    }

    pub(crate) fn emit(&mut self, record: &Record) {
        if self.sink_broken {
            return;
        }
        match record.write_to(&mut *self.sink) {
            Ok(()) => {}
            Err(ChannelError::Oversized(len)) => {
                if let Some(short) = record.shortened(len) {
                    self.write_quietly(&short);
                }
            }
            // A closed channel means the scheduler is gone; keep running quietly.
            Err(ChannelError::Io(_)) => self.sink_broken = true,
            Err(_) => {}
        }
    }

    fn write_quietly(&mut self, record: &Record) {
        if let Err(ChannelError::Io(_)) = record.write_to(&mut *self.sink) {
            self.sink_broken = true;
        }
    }

    pub(crate) fn fail(&mut self, failure: FailureRecord) {
        self.failures += 1;
        self.emit(&Record::Failure(failure));
    }

    pub(crate) fn skip(&mut self, notice: SkipNotice) {
        self.skipped = true;
        self.emit(&Record::Skip(notice));
    }

    pub(crate) fn enter(&mut self, phase: Phase) {
        self.emit(&Record::Phase { phase });
    }

    pub(crate) fn verdict(&self) -> Verdict {
        if self.failures > 0 {
            Verdict::Fail
        } else if self.skipped {
            Verdict::Skip
        } else {
            Verdict::Pass
        }
    }
}

thread_local! {
    static CONTEXT: RefCell<Option<UnitContext>> = const { RefCell::new(None) };
}

pub(crate) fn install(sink: Box<dyn Write>) {
    CONTEXT.with(|cell| *cell.borrow_mut() = Some(UnitContext::new(sink)));
}

pub(crate) fn uninstall() -> Option<UnitContext> {
    CONTEXT.with(|cell| cell.borrow_mut().take())
}

/// Whether the current thread is running inside a unit.
#[must_use]
pub fn is_active() -> bool {
    CONTEXT.with(|cell| cell.borrow().is_some())
}

/// Run `f` against the installed context; `None` outside a unit.
///
/// `f` must not call back into test code.
pub(crate) fn with<R>(f: impl FnOnce(&mut UnitContext) -> R) -> Option<R> {
    CONTEXT.with(|cell| cell.borrow_mut().as_mut().map(f))
}

/// Record a failure, handing it back when no unit is active.
pub(crate) fn record_failure(failure: FailureRecord) -> Result<(), FailureRecord> {
    CONTEXT.with(|cell| match cell.borrow_mut().as_mut() {
        Some(ctx) => {
            ctx.fail(failure);
            Ok(())
        }
        None => Err(failure),
    })
}

pub(crate) fn record_skip(notice: SkipNotice) -> Result<(), SkipNotice> {
    CONTEXT.with(|cell| match cell.borrow_mut().as_mut() {
        Some(ctx) => {
            ctx.skip(notice);
            Ok(())
        }
        None => Err(notice),
    })
}
