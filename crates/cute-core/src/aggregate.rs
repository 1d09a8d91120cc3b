//! Result aggregation in traversal order.
//!
//! The scheduler turns the tree into a flat list of [`Step`]s: a suite
//! contributes an `Enter` before its children and an `Exit` after them, a
//! test contributes one `Leaf`. Completions for steps may arrive in any order
//! (parallel mode); the [`Aggregator`] buffers them and applies each one only
//! when every earlier step has been applied. It is the only writer of the
//! [`RunTree`].

use std::collections::BTreeMap;
use std::time::SystemTime;

use crate::record::Phase;
use crate::run::{ExitCondition, FailureRecord, Run, RunTree, Status, fold};
use crate::tree::{NodeId, SuiteTree};

/// One position in the traversal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Step {
    Enter(NodeId),
    Leaf(NodeId),
    Exit(NodeId),
}

impl Step {
    #[must_use]
    pub const fn node(self) -> NodeId {
        match self {
            Self::Enter(id) | Self::Leaf(id) | Self::Exit(id) => id,
        }
    }
}

/// Flatten the tree into pre-order steps.
#[must_use]
pub fn plan(tree: &SuiteTree) -> Vec<Step> {
    let mut steps = Vec::with_capacity(tree.len() * 2);
    push_steps(tree, tree.root(), &mut steps);
    steps
}

fn push_steps(tree: &SuiteTree, id: NodeId, steps: &mut Vec<Step>) {
    if tree.node(id).is_test() {
        steps.push(Step::Leaf(id));
        return;
    }
    steps.push(Step::Enter(id));
    for &child in tree.children(id) {
        push_steps(tree, child, steps);
    }
    steps.push(Step::Exit(id));
}

/// Classified outcome of one unit: a leaf test or a suite fixture.
#[derive(Debug, Clone)]
pub struct Completion {
    pub status: Status,
    pub reason: Option<String>,
    pub failures: Vec<FailureRecord>,
    pub phase: Option<Phase>,
    pub exit: Option<ExitCondition>,
    pub console: String,
    pub started_at: SystemTime,
    pub ended_at: SystemTime,
}

impl Completion {
    /// A completion for a unit that never ran.
    #[must_use]
    pub fn not_run(status: Status, reason: impl Into<String>) -> Self {
        let now = SystemTime::now();
        Self {
            status,
            reason: Some(reason.into()),
            failures: Vec::new(),
            phase: None,
            exit: None,
            console: String::new(),
            started_at: now,
            ended_at: now,
        }
    }
}

/// Notified as runs settle, strictly in traversal order.
pub trait RunObserver {
    fn suite_started(&mut self, _run: &Run) {}
    fn test_finished(&mut self, _run: &Run) {}
    fn suite_finished(&mut self, _run: &Run) {}
}

/// Observer that ignores every event.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullObserver;

impl RunObserver for NullObserver {}

/// Fans events out to several observers.
#[derive(Default)]
pub struct Fanout<'a> {
    observers: Vec<&'a mut dyn RunObserver>,
}

impl<'a> Fanout<'a> {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, observer: &'a mut dyn RunObserver) {
        self.observers.push(observer);
    }
}

impl RunObserver for Fanout<'_> {
    fn suite_started(&mut self, run: &Run) {
        for o in &mut self.observers {
            o.suite_started(run);
        }
    }

    fn test_finished(&mut self, run: &Run) {
        for o in &mut self.observers {
            o.test_finished(run);
        }
    }

    fn suite_finished(&mut self, run: &Run) {
        for o in &mut self.observers {
            o.suite_finished(run);
        }
    }
}

/// Fixture units count as at least `failed` when they do not pass.
fn fixture_contribution(status: Status) -> Status {
    if status.is_success() {
        Status::Passed
    } else {
        status.worst(Status::Failed)
    }
}

/// Single writer of the run tree with an in-order reorder buffer.
pub struct Aggregator<'o> {
    steps: Vec<Step>,
    runs: RunTree,
    fixture_status: Vec<Status>,
    pending: BTreeMap<usize, Option<Completion>>,
    next: usize,
    observer: &'o mut dyn RunObserver,
}

impl<'o> Aggregator<'o> {
    #[must_use]
    pub fn new(tree: &SuiteTree, observer: &'o mut dyn RunObserver) -> Self {
        Self {
            steps: plan(tree),
            runs: RunTree::new(tree),
            fixture_status: vec![Status::Passed; tree.len()],
            pending: BTreeMap::new(),
            next: 0,
            observer,
        }
    }

    #[must_use]
    pub fn steps(&self) -> &[Step] {
        &self.steps
    }

    /// Steps applied so far.
    #[must_use]
    pub const fn applied(&self) -> usize {
        self.next
    }

    #[must_use]
    pub fn is_complete(&self) -> bool {
        self.next == self.steps.len()
    }

    #[must_use]
    pub fn runs(&self) -> &RunTree {
        &self.runs
    }

    /// Deliver the completion of step `seq`.
    ///
    /// `Enter`/`Exit` steps take `None` when the suite has no fixture unit of
    /// its own. Duplicate or out-of-range sequence numbers are ignored.
    pub fn submit(&mut self, seq: usize, completion: Option<Completion>) {
        if seq < self.next || seq >= self.steps.len() {
            return;
        }
        self.pending.entry(seq).or_insert(completion);
        while let Some(completion) = self.pending.remove(&self.next) {
            let step = self.steps[self.next];
            self.apply(step, completion);
            self.next += 1;
        }
    }

    fn apply(&mut self, step: Step, completion: Option<Completion>) {
        match step {
            Step::Enter(id) => {
                let run = self.runs.get_mut(id);
                run.status = Status::Running;
                run.started_at = Some(
                    completion
                        .as_ref()
                        .map_or_else(SystemTime::now, |c| c.started_at),
                );
                if let Some(c) = completion {
                    if !c.status.is_success() {
                        self.fixture_status[id.index()] = fixture_contribution(c.status);
                        run.reason = Some(match &c.reason {
                            Some(reason) => format!("setup {}: {reason}", c.status),
                            None => format!("setup {}", c.status),
                        });
                    } else if c.status == Status::Skipped {
                        run.reason = Some(match &c.reason {
                            Some(reason) => format!("setup skipped: {reason}"),
                            None => "setup skipped".to_string(),
                        });
                    }
                    run.failures.extend(c.failures);
                    run.phase = c.phase;
                    run.exit = c.exit;
                    run.console.push_str(&c.console);
                }
                self.observer.suite_started(self.runs.get(id));
            }
            Step::Leaf(id) => {
                let c = completion.unwrap_or_else(|| {
                    Completion::not_run(Status::Terminated, "no completion delivered")
                });
                let run = self.runs.get_mut(id);
                run.status = c.status;
                run.reason = c.reason;
                run.failures = c.failures;
                run.phase = c.phase;
                run.exit = c.exit;
                run.console = c.console;
                run.started_at = Some(c.started_at);
                run.ended_at = Some(c.ended_at);
                self.observer.test_finished(self.runs.get(id));
            }
            Step::Exit(id) => {
                let children = fold(
                    self.runs
                        .children(id)
                        .iter()
                        .map(|&child| self.runs.get(child).status),
                );
                let mut fixture = self.fixture_status[id.index()];
                let run = self.runs.get_mut(id);
                if let Some(c) = completion {
                    if !c.status.is_success() {
                        fixture = fixture.worst(fixture_contribution(c.status));
                        let note = match &c.reason {
                            Some(reason) => format!("teardown {}: {reason}", c.status),
                            None => format!("teardown {}", c.status),
                        };
                        run.reason = Some(match run.reason.take() {
                            Some(prev) => format!("{prev}; {note}"),
                            None => note,
                        });
                    }
                    run.failures.extend(c.failures);
                    run.phase = c.phase.or(run.phase);
                    run.exit = c.exit.or(run.exit);
                    run.console.push_str(&c.console);
                    run.ended_at = Some(c.ended_at);
                } else {
                    run.ended_at = Some(SystemTime::now());
                }
                run.status = children.worst(fixture);
                if run.reason.is_none() && !children.is_success() {
                    run.reason = Some(format!("descendants {children}"));
                }
                self.observer.suite_finished(self.runs.get(id));
            }
        }
    }

    /// Hand back the run tree. Steps never delivered stay `pending`.
    #[must_use]
    pub fn finish(self) -> RunTree {
        self.runs
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tree::{Registry, Suite, Test};

    fn body() {}

    fn tree() -> SuiteTree {
        Registry::new()
            .suite(Suite::new("all"))
            .suite(Suite::new("s").within("all"))
            .test(Test::new("t1", body).within("s"))
            .test(Test::new("t2", body).within("s"))
            .test(Test::new("t3", body).within("s"))
            .test(Test::new("t4", body).within("s"))
            .test(Test::new("t5", body).within("s"))
            .test(Test::new("u", body).within("all"))
            .build()
            .unwrap()
    }

    fn done(status: Status) -> Completion {
        let now = SystemTime::now();
        Completion {
            status,
            reason: None,
            failures: Vec::new(),
            phase: Some(Phase::Exec),
            exit: Some(ExitCondition::Exited(0)),
            console: String::new(),
            started_at: now,
            ended_at: now,
        }
    }

    #[derive(Default)]
    struct Recorder {
        events: Vec<String>,
    }

    impl RunObserver for Recorder {
        fn suite_started(&mut self, run: &Run) {
            self.events.push(format!("enter {}", run.path));
        }
        fn test_finished(&mut self, run: &Run) {
            self.events.push(format!("test {} {}", run.path, run.status));
        }
        fn suite_finished(&mut self, run: &Run) {
            self.events.push(format!("exit {} {}", run.path, run.status));
        }
    }

    fn completions(tree: &SuiteTree, leaf: impl Fn(&str) -> Status) -> Vec<(usize, Option<Completion>)> {
        plan(tree)
            .into_iter()
            .enumerate()
            .map(|(seq, step)| match step {
                Step::Leaf(id) => (seq, Some(done(leaf(tree.node(id).name())))),
                _ => (seq, None),
            })
            .collect()
    }

    #[test]
    fn plan_brackets_suites() {
        let tree = tree();
        let steps = plan(&tree);
        assert_eq!(steps.len(), 2 + 2 + 6);
        assert_eq!(steps[0], Step::Enter(tree.root()));
        assert_eq!(*steps.last().unwrap(), Step::Exit(tree.root()));
    }

    #[test]
    fn crash_in_one_leaf_leaves_siblings_alone() {
        let tree = tree();
        let mut observer = NullObserver;
        let mut agg = Aggregator::new(&tree, &mut observer);
        for (seq, c) in completions(&tree, |name| {
            if name == "t3" { Status::Crashed } else { Status::Passed }
        }) {
            agg.submit(seq, c);
        }
        assert!(agg.is_complete());
        let runs = agg.finish();
        assert_eq!(runs.find("all::s").unwrap().status, Status::Crashed);
        assert_eq!(runs.root().status, Status::Crashed);
        for name in ["t1", "t2", "t4", "t5"] {
            assert_eq!(runs.find(&format!("all::s::{name}")).unwrap().status, Status::Passed);
        }
        assert_eq!(runs.find("all::u").unwrap().status, Status::Passed);
        assert_eq!(runs.exit_code(), 1);
        assert_eq!(runs.find("all::u").unwrap().exit, Some(ExitCondition::Exited(0)));
        assert_eq!(runs.find("all::s").unwrap().exit, None);
    }

    #[test]
    fn out_of_order_delivery_is_reported_in_traversal_order() {
        let tree = tree();
        let mut baseline = Recorder::default();
        {
            let mut agg = Aggregator::new(&tree, &mut baseline);
            for (seq, c) in completions(&tree, |_| Status::Passed) {
                agg.submit(seq, c);
            }
        }

        for seed in [3u64, 0xABCDEF, 0x5555_AAAA_5555_AAAA] {
            let mut state = seed;
            let mut items = completions(&tree, |_| Status::Passed);
            for i in (1..items.len()).rev() {
                state ^= state << 13;
                state ^= state >> 7;
                state ^= state << 17;
                items.swap(i, (state % (i as u64 + 1)) as usize);
            }
            let mut recorder = Recorder::default();
            let mut agg = Aggregator::new(&tree, &mut recorder);
            for (seq, c) in items {
                agg.submit(seq, c);
            }
            assert!(agg.is_complete());
            assert_eq!(recorder.events, baseline.events, "seed {seed}");
        }
    }

    #[test]
    fn failed_setup_forces_failed_suite() {
        let tree = tree();
        let mut observer = NullObserver;
        let mut agg = Aggregator::new(&tree, &mut observer);
        let s = tree.find("all::s").unwrap();
        for (seq, step) in plan(&tree).into_iter().enumerate() {
            let c = match step {
                Step::Enter(id) if id == s => Some(done(Status::Failed)),
                Step::Leaf(id) if tree.node(id).parent() == Some(s) => {
                    Some(Completion::not_run(Status::Skipped, "ancestor setup failed"))
                }
                Step::Leaf(_) => Some(done(Status::Passed)),
                _ => None,
            };
            agg.submit(seq, c);
        }
        let runs = agg.finish();
        let suite = runs.get(s);
        assert_eq!(suite.status, Status::Failed);
        assert!(suite.reason.as_deref().unwrap().starts_with("setup failed"));
        assert!(runs.leaves().filter(|r| r.path.starts_with("all::s::")).all(|r| r.status == Status::Skipped));
    }

    #[test]
    fn crashed_teardown_dominates_passing_children() {
        let tree = tree();
        let mut observer = NullObserver;
        let mut agg = Aggregator::new(&tree, &mut observer);
        let s = tree.find("all::s").unwrap();
        for (seq, step) in plan(&tree).into_iter().enumerate() {
            let c = match step {
                Step::Exit(id) if id == s => Some(done(Status::Crashed)),
                Step::Leaf(_) => Some(done(Status::Passed)),
                _ => None,
            };
            agg.submit(seq, c);
        }
        let runs = agg.finish();
        assert_eq!(runs.get(s).status, Status::Crashed);
    }

    #[test]
    fn all_skipped_suite_is_skipped_and_exit_code_zero() {
        let tree = tree();
        let mut observer = NullObserver;
        let mut agg = Aggregator::new(&tree, &mut observer);
        for (seq, c) in completions(&tree, |_| Status::Skipped) {
            agg.submit(seq, c);
        }
        let runs = agg.finish();
        assert_eq!(runs.root().status, Status::Skipped);
        assert_eq!(runs.exit_code(), 0);
    }

    #[test]
    fn duplicate_submission_is_ignored() {
        let tree = tree();
        let mut observer = NullObserver;
        let mut agg = Aggregator::new(&tree, &mut observer);
        agg.submit(0, None);
        agg.submit(0, None);
        assert_eq!(agg.applied(), 1);
        agg.submit(99, None);
        assert_eq!(agg.applied(), 1);
    }
}
