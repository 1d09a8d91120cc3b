//! Run statuses, failure records and the run tree.

use std::fmt;
use std::time::{Duration, SystemTime};

use serde::{Deserialize, Serialize};

use crate::record::Phase;
use crate::tree::{NodeId, SuiteTree};

/// Lifecycle and outcome of a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Status {
    Pending,
    Running,
    Passed,
    Failed,
    Skipped,
    Crashed,
    TimedOut,
    Aborted,
    Terminated,
}

impl Status {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Running => "running",
            Self::Passed => "passed",
            Self::Failed => "failed",
            Self::Skipped => "skipped",
            Self::Crashed => "crashed",
            Self::TimedOut => "timed_out",
            Self::Aborted => "aborted",
            Self::Terminated => "terminated",
        }
    }

    #[must_use]
    pub const fn is_terminal(self) -> bool {
        !matches!(self, Self::Pending | Self::Running)
    }

    /// Statuses that keep the process exit code at zero.
    #[must_use]
    pub const fn is_success(self) -> bool {
        matches!(self, Self::Passed | Self::Skipped)
    }

    // crashed > timed_out > aborted > terminated > failed > skipped > passed
    const fn severity(self) -> u8 {
        match self {
            Self::Pending | Self::Running | Self::Passed => 0,
            Self::Skipped => 1,
            Self::Failed => 2,
            Self::Terminated => 3,
            Self::Aborted => 4,
            Self::TimedOut => 5,
            Self::Crashed => 6,
        }
    }

    /// The more severe of two statuses; ties keep `self`.
    #[must_use]
    pub const fn worst(self, other: Self) -> Self {
        if other.severity() > self.severity() {
            other
        } else {
            self
        }
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Worst-status fold over children; an empty set folds to `passed`.
pub fn fold<I: IntoIterator<Item = Status>>(statuses: I) -> Status {
    statuses.into_iter().fold(Status::Passed, Status::worst)
}

/// How a unit's process ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExitCondition {
    Exited(i32),
    Signaled(i32),
}

impl ExitCondition {
    #[must_use]
    pub const fn signal(self) -> Option<i32> {
        match self {
            Self::Signaled(sig) => Some(sig),
            Self::Exited(_) => None,
        }
    }

    #[must_use]
    pub const fn code(self) -> Option<i32> {
        match self {
            Self::Exited(code) => Some(code),
            Self::Signaled(_) => None,
        }
    }
}

/// A failed check, ensure, explicit failure or mock violation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FailureRecord {
    pub expression: String,
    pub file: String,
    pub line: u32,
    pub function: String,
    pub message: String,
    pub fatal: bool,
}

impl fmt::Display for FailureRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}: {}: {}", self.file, self.line, self.function, self.message)?;
        if !self.expression.is_empty() {
            write!(f, " [{}]", self.expression)?;
        }
        Ok(())
    }
}

/// Result of one node in one invocation.
#[derive(Debug, Clone)]
pub struct Run {
    pub node: NodeId,
    pub path: String,
    pub depth: usize,
    pub is_suite: bool,
    pub status: Status,
    pub started_at: Option<SystemTime>,
    pub ended_at: Option<SystemTime>,
    pub failures: Vec<FailureRecord>,
    pub reason: Option<String>,
    /// Last phase the unit reported before it ended.
    pub phase: Option<Phase>,
    /// How the unit's process ended; `None` when nothing was spawned.
    pub exit: Option<ExitCondition>,
    /// Captured stdout and stderr of the unit(s).
    pub console: String,
}

impl Run {
    fn pending(tree: &SuiteTree, node: NodeId) -> Self {
        let n = tree.node(node);
        Self {
            node,
            path: n.path().to_string(),
            depth: n.depth(),
            is_suite: !n.is_test(),
            status: Status::Pending,
            started_at: None,
            ended_at: None,
            failures: Vec::new(),
            reason: None,
            phase: None,
            exit: None,
            console: String::new(),
        }
    }

    #[must_use]
    pub fn duration(&self) -> Duration {
        match (self.started_at, self.ended_at) {
            (Some(start), Some(end)) => end.duration_since(start).unwrap_or_default(),
            _ => Duration::ZERO,
        }
    }
}

/// Per-run view handed to report tooling.
#[derive(Debug, Clone, Copy)]
pub struct RunReport<'a> {
    pub path: &'a str,
    pub status: Status,
    pub failures: &'a [FailureRecord],
    pub duration: Duration,
}

/// Runs shaped like the suite tree, indexed by [`NodeId`].
#[derive(Debug, Clone)]
pub struct RunTree {
    runs: Vec<Run>,
    children: Vec<Vec<NodeId>>,
}

impl RunTree {
    /// Every node pending.
    #[must_use]
    pub fn new(tree: &SuiteTree) -> Self {
        Self {
            runs: tree.preorder().map(|id| Run::pending(tree, id)).collect(),
            children: tree.preorder().map(|id| tree.children(id).to_vec()).collect(),
        }
    }

    #[must_use]
    pub fn get(&self, id: NodeId) -> &Run {
        &self.runs[id.index()]
    }

    pub(crate) fn get_mut(&mut self, id: NodeId) -> &mut Run {
        &mut self.runs[id.index()]
    }

    #[must_use]
    pub fn root(&self) -> &Run {
        &self.runs[0]
    }

    #[must_use]
    pub fn children(&self, id: NodeId) -> &[NodeId] {
        &self.children[id.index()]
    }

    /// Runs in pre-order.
    pub fn iter(&self) -> impl Iterator<Item = &Run> {
        self.runs.iter()
    }

    pub fn leaves(&self) -> impl Iterator<Item = &Run> {
        self.runs.iter().filter(|r| !r.is_suite)
    }

    #[must_use]
    pub fn find(&self, path: &str) -> Option<&Run> {
        self.runs.iter().find(|r| r.path == path)
    }

    /// `(path, status, failures, duration)` for every completed run.
    pub fn reports(&self) -> impl Iterator<Item = RunReport<'_>> {
        self.runs
            .iter()
            .filter(|r| r.status.is_terminal())
            .map(|r| RunReport {
                path: &r.path,
                status: r.status,
                failures: &r.failures,
                duration: r.duration(),
            })
    }

    /// 0 only if every run ended passed or skipped.
    #[must_use]
    pub fn exit_code(&self) -> i32 {
        if self.runs.iter().all(|r| r.status.is_success()) {
            0
        } else {
            1
        }
    }

    /// Leaf count per terminal status.
    #[must_use]
    pub fn tally(&self) -> Vec<(Status, usize)> {
        let order = [
            Status::Passed,
            Status::Failed,
            Status::Skipped,
            Status::Crashed,
            Status::TimedOut,
            Status::Aborted,
            Status::Terminated,
        ];
        order
            .into_iter()
            .map(|status| (status, self.leaves().filter(|r| r.status == status).count()))
            .filter(|(_, n)| *n > 0)
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const TERMINAL: [Status; 7] = [
        Status::Passed,
        Status::Skipped,
        Status::Failed,
        Status::Terminated,
        Status::Aborted,
        Status::TimedOut,
        Status::Crashed,
    ];

    struct XorShift64(u64);

    impl XorShift64 {
        fn next(&mut self) -> u64 {
            let mut x = self.0;
            x ^= x << 13;
            x ^= x >> 7;
            x ^= x << 17;
            self.0 = x;
            x
        }

        fn status(&mut self) -> Status {
            TERMINAL[(self.next() % TERMINAL.len() as u64) as usize]
        }
    }

    #[test]
    fn empty_fold_is_passed() {
        assert_eq!(fold([]), Status::Passed);
    }

    #[test]
    fn precedence_order() {
        for window in TERMINAL.windows(2) {
            assert_eq!(fold([window[0], window[1]]), window[1]);
            assert_eq!(fold([window[1], window[0]]), window[1]);
        }
    }

    #[test]
    fn fold_is_order_independent_and_associative() {
        for seed in [1u64, 0xC0FFEE, 0x1234_5678_9ABC_DEF0, 77] {
            let mut rng = XorShift64(seed);
            for _ in 0..200 {
                let len = (rng.next() % 9) as usize;
                let statuses: Vec<Status> = (0..len).map(|_| rng.status()).collect();
                let forward = fold(statuses.iter().copied());
                let backward = fold(statuses.iter().rev().copied());
                assert_eq!(forward, backward);

                let split = if len == 0 { 0 } else { (rng.next() as usize) % len };
                let left = fold(statuses[..split].iter().copied());
                let right = fold(statuses[split..].iter().copied());
                assert_eq!(fold([left, right]), forward, "seed {seed}");
            }
        }
    }

    #[test]
    fn success_statuses() {
        assert!(Status::Passed.is_success());
        assert!(Status::Skipped.is_success());
        assert!(!Status::Failed.is_success());
        assert!(!Status::Pending.is_success());
        assert!(!Status::Running.is_terminal());
    }

    #[test]
    fn exit_condition_parts() {
        assert_eq!(ExitCondition::Signaled(11).signal(), Some(11));
        assert_eq!(ExitCondition::Signaled(11).code(), None);
        assert_eq!(ExitCondition::Exited(3).code(), Some(3));
        assert_eq!(ExitCondition::Exited(3).signal(), None);
    }

    #[test]
    fn failure_record_display() {
        let record = FailureRecord {
            expression: "a == b".into(),
            file: "src/x.rs".into(),
            line: 4,
            function: "x::t".into(),
            message: "check failed".into(),
            fatal: false,
        };
        assert_eq!(record.to_string(), "src/x.rs:4: x::t: check failed [a == b]");
    }
}
