//! Execution scheduler: walks the traversal plan, forks one unit per leaf,
//! enforces timeouts and feeds classified completions to the aggregator.
//!
//! A single-threaded `poll(2)` loop drives up to `jobs` units at once. Suite
//! fixtures with an explicit setup or teardown of their own run as barrier
//! units: everything in flight drains first and nothing else is dispatched
//! until the barrier completes. Completions reach the aggregator tagged with
//! their step number, so observers always see traversal order.

use std::time::{Duration, Instant};

use cute_core::{
    Aggregator, Completion, Fixture, NodeId, RunObserver, RunTree, Status, Step, SuiteTree, Timeout,
};
use cute_expect::UnitPlan;

use crate::classify::KillCause;
use crate::config::SchedulerConfig;
use crate::error::ExecError;
use crate::interrupt::{self, CancelToken, InterruptGuard};
use crate::sys;
use crate::unit::{self, UnitHandle};

/// Longest single wait, so cancel tokens and reaping stay responsive.
const TICK: Duration = Duration::from_millis(20);

/// Lifecycle of one step's unit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnitState {
    Idle,
    Spawning,
    AwaitingCompletion,
    Classifying,
    Reported,
}

impl UnitState {
    /// Legal transitions; a step may go straight to `Reported` when it never
    /// needs a unit (filtered, skipped, or a suite without its own fixture).
    #[must_use]
    pub const fn can_advance_to(self, next: Self) -> bool {
        matches!(
            (self, next),
            (Self::Idle, Self::Spawning | Self::Reported)
                | (Self::Spawning, Self::AwaitingCompletion | Self::Classifying)
                | (Self::AwaitingCompletion, Self::Classifying)
                | (Self::Classifying, Self::Reported)
        )
    }
}

/// Why the remaining steps are not being run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Halt {
    Interrupted,
    Abandoned,
}

impl Halt {
    const fn kill_cause(self) -> KillCause {
        match self {
            Self::Interrupted => KillCause::Interrupt,
            Self::Abandoned => KillCause::Abandon,
        }
    }

    const fn reason(self) -> &'static str {
        match self {
            Self::Interrupted => "run interrupted",
            Self::Abandoned => "run abandoned",
        }
    }
}

struct InFlight {
    seq: usize,
    node: NodeId,
    /// Suite setup/teardown unit rather than a leaf.
    barrier: bool,
    handle: UnitHandle,
}

/// Runs a suite tree, one isolated unit per test.
pub struct Scheduler<'t> {
    tree: &'t SuiteTree,
    config: SchedulerConfig,
    cancel: CancelToken,
    handle_signals: bool,
}

impl<'t> Scheduler<'t> {
    #[must_use]
    pub fn new(tree: &'t SuiteTree, config: SchedulerConfig) -> Self {
        Self {
            tree,
            config,
            cancel: CancelToken::new(),
            handle_signals: true,
        }
    }

    /// Use `token` to cancel the run from elsewhere.
    #[must_use]
    pub fn with_cancel(mut self, token: CancelToken) -> Self {
        self.cancel = token;
        self
    }

    /// Leave SIGINT/SIGTERM dispositions alone; only the cancel token interrupts.
    #[must_use]
    pub const fn without_signal_handlers(mut self) -> Self {
        self.handle_signals = false;
        self
    }

    #[must_use]
    pub fn cancel_token(&self) -> CancelToken {
        self.cancel.clone()
    }

    #[must_use]
    pub const fn config(&self) -> &SchedulerConfig {
        &self.config
    }

    /// Run every step and return the settled run tree.
    ///
    /// Unit failures of any kind become run statuses; only failing to set up
    /// signal handling or to wait on the units is an error.
    pub fn run(&self, observer: &mut dyn RunObserver) -> Result<RunTree, ExecError> {
        let _guard = if self.handle_signals {
            Some(InterruptGuard::install()?)
        } else {
            None
        };
        let mut exec = Execution::new(self, observer);
        exec.drive()?;
        Ok(exec.aggregator.finish())
    }
}

/// Run `tree` with `config`, reporting to `observer`.
pub fn run(tree: &SuiteTree, config: SchedulerConfig, observer: &mut dyn RunObserver) -> Result<RunTree, ExecError> {
    Scheduler::new(tree, config).run(observer)
}

struct Execution<'s, 't, 'o> {
    scheduler: &'s Scheduler<'t>,
    aggregator: Aggregator<'o>,
    steps: Vec<Step>,
    states: Vec<UnitState>,
    /// Per node: has a selected leaf at or below it.
    selected: Vec<bool>,
    /// Per suite: reason its descendants are skipped, once its setup did not pass.
    blocked: Vec<Option<String>>,
    in_flight: Vec<InFlight>,
    cursor: usize,
    halt: Option<Halt>,
}

impl<'s, 't, 'o> Execution<'s, 't, 'o> {
    fn new(scheduler: &'s Scheduler<'t>, observer: &'o mut dyn RunObserver) -> Self {
        let tree = scheduler.tree;
        let aggregator = Aggregator::new(tree, observer);
        let steps = aggregator.steps().to_vec();
        Self {
            scheduler,
            states: vec![UnitState::Idle; steps.len()],
            steps,
            aggregator,
            selected: selection(tree, &scheduler.config),
            blocked: vec![None; tree.len()],
            in_flight: Vec::new(),
            cursor: 0,
            halt: None,
        }
    }

    fn tree(&self) -> &'t SuiteTree {
        self.scheduler.tree
    }

    fn advance(&mut self, seq: usize, next: UnitState) {
        debug_assert!(
            self.states[seq].can_advance_to(next),
            "step {seq}: {:?} -> {next:?}",
            self.states[seq]
        );
        self.states[seq] = next;
    }

    fn report(&mut self, seq: usize, completion: Option<Completion>) {
        self.advance(seq, UnitState::Reported);
        self.aggregator.submit(seq, completion);
    }

    fn drive(&mut self) -> Result<(), ExecError> {
        loop {
            self.check_interrupt();
            self.dispatch();
            if self.in_flight.is_empty() {
                if self.cursor >= self.steps.len() {
                    return Ok(());
                }
                continue;
            }
            self.wait()?;
            self.collect()?;
        }
    }

    fn check_interrupt(&mut self) {
        if self.halt.is_none() && (interrupt::interrupted() || self.scheduler.cancel.is_cancelled()) {
            self.halt_run(Halt::Interrupted);
        }
    }

    fn halt_run(&mut self, halt: Halt) {
        self.halt = Some(halt);
        for unit in &mut self.in_flight {
            unit.handle.kill(halt.kill_cause());
        }
    }

    /// Start or settle steps until the in-flight set is full or a barrier blocks.
    fn dispatch(&mut self) {
        let jobs = self.scheduler.config.effective_jobs();
        while self.cursor < self.steps.len() {
            if self.in_flight.iter().any(|u| u.barrier) {
                return;
            }
            let seq = self.cursor;
            let step = self.steps[seq];
            if let Some(halt) = self.halt {
                let completion = match step {
                    Step::Leaf(_) => Some(Completion::not_run(Status::Terminated, halt.reason())),
                    Step::Enter(_) | Step::Exit(_) => None,
                };
                self.report(seq, completion);
                self.cursor += 1;
                continue;
            }
            match step {
                Step::Leaf(id) => {
                    if self.in_flight.len() >= jobs {
                        return;
                    }
                    if let Some(reason) = self.blocked_by(id) {
                        self.report(seq, Some(Completion::not_run(Status::Skipped, reason)));
                    } else if !self.selected[id.index()] {
                        self.report(seq, Some(Completion::not_run(Status::Skipped, "filtered out")));
                    } else {
                        self.start(seq, id, self.leaf_plan(id), false);
                    }
                }
                Step::Enter(id) | Step::Exit(id) => {
                    let fixture = match self.fixture_plan(step) {
                        Some(plan) if self.blocked_by(id).is_none() && self.selected[id.index()] => plan,
                        _ => {
                            self.report(seq, None);
                            self.cursor += 1;
                            continue;
                        }
                    };
                    if !self.in_flight.is_empty() {
                        return;
                    }
                    self.start(seq, id, fixture, true);
                }
            }
            self.cursor += 1;
        }
    }

    /// Reason a node may not run because it or an ancestor failed its setup.
    fn blocked_by(&self, id: NodeId) -> Option<String> {
        self.tree().lineage(id).find_map(|n| self.blocked[n.index()].clone())
    }

    fn leaf_plan(&self, id: NodeId) -> UnitPlan {
        let tree = self.tree();
        let body = match tree.node(id).kind() {
            cute_core::NodeKind::Test(body) => Some(*body),
            cute_core::NodeKind::Suite(_) => None,
        };
        UnitPlan {
            setup: tree.resolve_setup(id),
            body,
            teardown: tree.resolve_teardown(id),
        }
    }

    /// A suite's own explicit fixture for this step, as a barrier unit.
    fn fixture_plan(&self, step: Step) -> Option<UnitPlan> {
        let tree = self.tree();
        match step {
            Step::Enter(id) => match tree.node(id).setup() {
                Fixture::Explicit(f) => Some(UnitPlan {
                    setup: Some(f),
                    ..UnitPlan::default()
                }),
                Fixture::None | Fixture::Inherited => None,
            },
            Step::Exit(id) => match tree.node(id).teardown() {
                Fixture::Explicit(f) => Some(UnitPlan {
                    teardown: Some(f),
                    ..UnitPlan::default()
                }),
                Fixture::None | Fixture::Inherited => None,
            },
            Step::Leaf(_) => None,
        }
    }

    fn watchdog(&self, id: NodeId) -> Option<Duration> {
        match self.tree().resolve_timeout(id) {
            None => Some(self.scheduler.config.default_timeout),
            Some(Timeout::After(limit)) => Some(limit),
            Some(Timeout::None | Timeout::Forever | Timeout::Inherited) => None,
        }
    }

    fn start(&mut self, seq: usize, node: NodeId, plan: UnitPlan, barrier: bool) {
        self.advance(seq, UnitState::Spawning);
        match unit::spawn(plan, self.watchdog(node), self.scheduler.config.console_limit) {
            Ok(handle) => {
                self.advance(seq, UnitState::AwaitingCompletion);
                self.in_flight.push(InFlight {
                    seq,
                    node,
                    barrier,
                    handle,
                });
            }
            Err(err) => {
                self.advance(seq, UnitState::Classifying);
                let completion = Completion::not_run(Status::Crashed, format!("could not start unit: {err}"));
                self.settle(seq, node, barrier, completion);
            }
        }
    }

    /// Block until a unit has output, a deadline passes, or the tick elapses.
    fn wait(&self) -> Result<(), ExecError> {
        let now = Instant::now();
        let timeout = self
            .in_flight
            .iter()
            .filter_map(|u| u.handle.deadline())
            .map(|at| at.saturating_duration_since(now))
            .fold(TICK, Duration::min);
        let fds: Vec<_> = self.in_flight.iter().flat_map(|u| u.handle.fds()).collect();
        sys::poll_readable(&fds, timeout)
    }

    fn collect(&mut self) -> Result<(), ExecError> {
        let now = Instant::now();
        let mut index = 0;
        while index < self.in_flight.len() {
            let unit = &mut self.in_flight[index];
            unit.handle.pump();
            if !unit.handle.try_reap()? {
                unit.handle.enforce_deadline(now);
                index += 1;
                continue;
            }
            let InFlight {
                seq,
                node,
                barrier,
                handle,
            } = self.in_flight.remove(index);
            self.advance(seq, UnitState::Classifying);
            self.settle(seq, node, barrier, handle.into_completion());
        }
        Ok(())
    }

    /// Record a classified unit and apply its consequences to the rest of the run.
    fn settle(&mut self, seq: usize, node: NodeId, barrier: bool, completion: Completion) {
        let status = completion.status;
        if barrier && matches!(self.steps[seq], Step::Enter(_)) && status != Status::Passed {
            self.blocked[node.index()] = Some(if status == Status::Skipped {
                "ancestor setup skipped".to_string()
            } else {
                "ancestor setup failed".to_string()
            });
        }
        self.report(seq, Some(completion));
        if status == Status::Terminated && self.halt.is_none() && self.scheduler.config.stop_on_terminated {
            self.halt_run(Halt::Abandoned);
        }
    }
}

/// Per node: whether any leaf at or below it passes the filter.
fn selection(tree: &SuiteTree, config: &SchedulerConfig) -> Vec<bool> {
    let mut selected = vec![false; tree.len()];
    for leaf in tree.leaves() {
        if config.selects(tree.node(leaf).path()) {
            for id in tree.lineage(leaf) {
                selected[id.index()] = true;
            }
        }
    }
    selected
}
