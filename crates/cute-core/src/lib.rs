//! Core data model of the cute test harness.
//!
//! This crate is platform independent and contains no unsafe code:
//! - [`compare`]: value domains and the predicates shared by checks and mocks
//! - [`tree`]: suite tree registry with fixture/timeout resolution
//! - [`record`]: outcome records and the framed channel codec
//! - [`run`]: run statuses, failure records and status folding
//! - [`aggregate`]: the single writer of the run tree

#![deny(unsafe_code)]

pub mod aggregate;
pub mod compare;
pub mod record;
pub mod run;
pub mod tree;

pub use aggregate::{Aggregator, Completion, Fanout, NullObserver, RunObserver, Step, plan};
pub use compare::{
    CompareError, Constraint, Domain, FromValue, IntoValue, Mem, Operand, Predicate, Value,
};
pub use record::{ChannelError, ChannelSummary, Phase, Record, RecordDecoder, SkipNotice, Verdict};
pub use run::{ExitCondition, FailureRecord, Run, RunReport, RunTree, Status, fold};
pub use tree::{
    Fixture, Node, NodeId, NodeKind, Registry, RegistryError, Suite, SuiteTree, Test, TestFn,
    Timeout,
};
