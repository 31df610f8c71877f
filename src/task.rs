//! Task definition — static, no-alloc task descriptors
//!
//! A task is an endless loop over a short body of steps: wait for a
//! signal, execute work, signal someone else, drive an indicator, or
//! bracket a blocking interaction with elevate/restore. The kernel
//! interprets the body; the task only holds its position and its own
//! release bookkeeping.
//!
//! Author: Moroya Sakamoto

use core::fmt;

use crate::board::{Indicator, Level};
use crate::config::MAX_STEPS;
use crate::error::{ConfigError, Error};
use crate::signal::{Consumed, SignalChannel, Signals};
use crate::timer::Deadline;

/// Task priority (higher variant = more urgent)
///
/// Mirrors the CMSIS-RTOS priority ladder.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[repr(u8)]
pub enum Priority {
    Idle = 0,
    Low = 1,
    BelowNormal = 2,
    Normal = 3,
    AboveNormal = 4,
    High = 5,
    Realtime = 6,
}

impl fmt::Display for Priority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// Handle of a registered task (its slot in the task table)
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct TaskId(pub usize);

impl TaskId {
    #[inline]
    pub const fn index(self) -> usize {
        self.0
    }
}

impl fmt::Display for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "task#{}", self.0)
    }
}

/// Reference to another task from inside a body.
///
/// Names let two tasks refer to each other before either is registered;
/// they are resolved through the kernel's registry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskRef {
    Name(&'static str),
    Id(TaskId),
}

/// Wait bound
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Timeout {
    Forever,
    Ticks(u64),
}

/// One step of a task body
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Step {
    /// Block until any of `bits` is pending on the task's own channel
    Wait { bits: Signals, timeout: Timeout },
    /// Occupy the CPU for this many ticks (preemptible)
    Execute(u64),
    /// Post `bits` to another task's channel
    Signal { to: TaskRef, bits: Signals },
    /// Raise `holder` to `to` for a blocking interaction
    Elevate { holder: TaskRef, to: Priority },
    /// Return `holder` to its pre-elevation priority
    Restore { holder: TaskRef },
    /// Drive a board indicator
    Indicate { indicator: Indicator, level: Level },
}

impl Step {
    pub const fn wait(bits: Signals) -> Self {
        Step::Wait { bits, timeout: Timeout::Forever }
    }

    pub const fn wait_for(bits: Signals, ticks: u64) -> Self {
        Step::Wait { bits, timeout: Timeout::Ticks(ticks) }
    }

    pub const fn execute(ticks: u64) -> Self {
        Step::Execute(ticks)
    }

    pub const fn signal(to: &'static str, bits: Signals) -> Self {
        Step::Signal { to: TaskRef::Name(to), bits }
    }

    pub const fn elevate(holder: &'static str, to: Priority) -> Self {
        Step::Elevate { holder: TaskRef::Name(holder), to }
    }

    pub const fn restore(holder: &'static str) -> Self {
        Step::Restore { holder: TaskRef::Name(holder) }
    }

    pub const fn led(indicator: Indicator, level: Level) -> Self {
        Step::Indicate { indicator, level }
    }

    /// Does this step consume time or suspend the task?
    pub fn makes_progress(&self) -> bool {
        match *self {
            Step::Wait { .. } => true,
            Step::Execute(ticks) => ticks > 0,
            _ => false,
        }
    }

    /// Task references made by this step
    pub fn target(&self) -> Option<TaskRef> {
        match *self {
            Step::Signal { to, .. } => Some(to),
            Step::Elevate { holder, .. } | Step::Restore { holder } => Some(holder),
            _ => None,
        }
    }
}

/// Fixed-capacity task body, looped forever
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Program {
    steps: [Step; MAX_STEPS],
    len: usize,
}

impl Program {
    /// Copy `steps` into a body
    pub fn from_steps(steps: &[Step]) -> Result<Self, ConfigError> {
        if steps.len() > MAX_STEPS {
            return Err(ConfigError::ProgramTooLong {
                len: steps.len(),
                max: MAX_STEPS,
            });
        }
        if !steps.iter().any(Step::makes_progress) {
            return Err(ConfigError::NoTimeProgress);
        }
        let mut body = [Step::Execute(0); MAX_STEPS];
        body[..steps.len()].copy_from_slice(steps);
        Ok(Self { steps: body, len: steps.len() })
    }

    /// Steps of the body
    pub fn steps(&self) -> &[Step] {
        &self.steps[..self.len]
    }

    /// Step at `pc`
    #[inline]
    pub fn step(&self, pc: usize) -> Step {
        self.steps[pc % self.len.max(1)]
    }

    /// Position after `pc`, wrapping to the top of the loop
    #[inline]
    pub fn next(&self, pc: usize) -> usize {
        (pc + 1) % self.len.max(1)
    }
}

/// Task execution state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskState {
    /// Waiting on its signal channel
    Blocked,
    /// Released, waiting for the CPU
    Ready,
    /// Owns the CPU
    Running,
    /// Task slot is empty
    Inactive,
}

/// Registration parameters of a task
#[derive(Debug, Clone, Copy)]
pub struct TaskSpec {
    pub name: &'static str,
    pub priority: Priority,
    pub program: Program,
    /// Lit while a release is being served
    pub indicator: Option<Indicator>,
}

impl TaskSpec {
    pub fn new(name: &'static str, priority: Priority, steps: &[Step]) -> Result<Self, ConfigError> {
        Ok(Self {
            name,
            priority,
            program: Program::from_steps(steps)?,
            indicator: None,
        })
    }

    pub fn with_indicator(mut self, indicator: Indicator) -> Self {
        self.indicator = Some(indicator);
        self
    }
}

/// How a wait ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WaitOutcome {
    /// Bits consumed; `blocked` is false when they were already pending
    Signalled { consumed: Consumed, blocked: bool },
    TimedOut,
}

/// A wait in progress
#[derive(Debug, Clone, Copy)]
pub(crate) struct PendingWait {
    pub bits: Signals,
    pub since: u64,
    pub deadline: Option<Deadline>,
    /// Set when the wait is satisfied or expires
    pub outcome: Option<WaitOutcome>,
    /// Instant the outcome was delivered
    pub woken_at: u64,
}

/// Per-task counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TaskStats {
    /// Signalled wait-returns
    pub releases: u32,
    /// Waits re-entered after a release
    pub completions: u32,
    /// Times the task lost the CPU to a strictly higher priority
    pub preemptions: u32,
    /// Wait-returns that reported a rate violation
    pub rate_violations: u32,
    /// Releases that overlapped a running release, summed
    pub missed_releases: u32,
    /// Bounded waits that expired
    pub timeouts: u32,
    /// Ticks spent executing
    pub executed_ticks: u64,
    /// Instant of the most recent release
    pub last_release: Option<u64>,
    /// Duration of the most recent completed wait
    pub last_wait: u64,
    /// Longest completed wait
    pub longest_wait: u64,
}

/// Task control block
pub struct Task {
    /// Slot index
    pub id: TaskId,
    /// Registry name
    pub name: &'static str,
    /// Fixed (nominal) priority
    pub priority: Priority,
    /// Runtime priority; written only by the elevation manager
    pub(crate) effective: Priority,
    /// Release period when bound to a periodic timer
    pub period: Option<u64>,
    /// Body
    pub program: Program,
    /// Current step
    pub(crate) pc: usize,
    /// Ticks left in the current `Execute` step (0 = not started)
    pub(crate) remaining: u64,
    /// Current state
    pub state: TaskState,
    /// Own signal mailbox
    pub channel: SignalChannel,
    /// Wait in progress
    pub(crate) wait: Option<PendingWait>,
    /// Between a signalled wait-return and the next wait
    pub(crate) released: bool,
    /// Release indicator
    pub indicator: Option<Indicator>,
    /// Counters
    pub stats: TaskStats,
}

impl Task {
    /// Empty task slot
    pub const fn empty() -> Self {
        Self {
            id: TaskId(0),
            name: "",
            priority: Priority::Idle,
            effective: Priority::Idle,
            period: None,
            program: Program {
                steps: [Step::Execute(0); MAX_STEPS],
                len: 0,
            },
            pc: 0,
            remaining: 0,
            state: TaskState::Inactive,
            channel: SignalChannel::new(),
            wait: None,
            released: false,
            indicator: None,
            stats: TaskStats {
                releases: 0,
                completions: 0,
                preemptions: 0,
                rate_violations: 0,
                missed_releases: 0,
                timeouts: 0,
                executed_ticks: 0,
                last_release: None,
                last_wait: 0,
                longest_wait: 0,
            },
        }
    }

    /// Create a task from its registration parameters
    pub fn new(id: TaskId, spec: TaskSpec) -> Self {
        Self {
            id,
            name: spec.name,
            priority: spec.priority,
            effective: spec.priority,
            program: spec.program,
            state: TaskState::Ready,
            indicator: spec.indicator,
            ..Self::empty()
        }
    }

    /// Is this task slot active?
    pub fn is_active(&self) -> bool {
        self.state != TaskState::Inactive
    }

    /// Ready or Running
    pub fn is_ready(&self) -> bool {
        matches!(self.state, TaskState::Ready | TaskState::Running)
    }

    /// Priority the scheduler currently uses
    pub fn effective_priority(&self) -> Priority {
        self.effective
    }

    /// Is the task above its nominal priority?
    pub fn is_elevated(&self) -> bool {
        self.effective != self.priority
    }

    /// Step the task will run next
    pub fn current_step(&self) -> Step {
        self.program.step(self.pc)
    }

    /// Move to the next step
    pub(crate) fn advance(&mut self) {
        self.pc = self.program.next(self.pc);
        self.remaining = 0;
    }

    /// Ticks spent in the wait currently in progress
    pub fn current_wait(&self, now: u64) -> Option<u64> {
        self.wait.map(|w| now - w.since)
    }

    /// CPU utilization for a periodic task given its per-release work
    pub fn utilization(&self) -> f32 {
        match self.period {
            Some(period) if period > 0 => self.work_per_release() as f32 / period as f32,
            _ => 0.0,
        }
    }

    /// Sum of `Execute` ticks in one pass of the body
    pub fn work_per_release(&self) -> u64 {
        self.program
            .steps()
            .iter()
            .map(|s| match s {
                Step::Execute(t) => *t,
                _ => 0,
            })
            .sum()
    }

    /// Enter a wait at `now`
    pub(crate) fn begin_wait(&mut self, bits: Signals, timeout: Timeout, now: u64) {
        if self.released {
            self.released = false;
            self.stats.completions += 1;
        }
        let deadline = match timeout {
            Timeout::Forever => None,
            Timeout::Ticks(t) => Some(Deadline::new(now, t)),
        };
        self.wait = Some(PendingWait {
            bits,
            since: now,
            deadline,
            outcome: None,
            woken_at: now,
        });
    }

    /// Deliver the outcome of the wait in progress; the task becomes Ready
    pub(crate) fn wake(&mut self, outcome: WaitOutcome, now: u64) {
        if let Some(wait) = self.wait.as_mut() {
            wait.outcome = Some(outcome);
            wait.woken_at = now;
            self.state = TaskState::Ready;
        }
    }

    /// Outcome delivered but not yet picked up by the task
    pub(crate) fn wait_outcome(&self) -> Option<WaitOutcome> {
        self.wait.and_then(|w| w.outcome)
    }

    /// Return from the wait at `now` and step past it
    ///
    /// Returns the error the task must report: a rate violation when a
    /// periodic release found the task busy, or a timeout.
    pub(crate) fn finish_wait(&mut self, now: u64) -> Option<Error> {
        let wait = self.wait?;
        let outcome = wait.outcome?;
        self.wait = None;
        let waited = now - wait.since;
        self.stats.last_wait = waited;
        self.stats.longest_wait = self.stats.longest_wait.max(waited);
        self.advance();

        match outcome {
            WaitOutcome::TimedOut => {
                self.stats.timeouts += 1;
                Some(Error::SignalTimeout { task: self.id, bits: wait.bits })
            }
            WaitOutcome::Signalled { consumed, blocked } => {
                self.released = true;
                self.stats.releases += 1;
                self.stats.last_release = Some(wait.woken_at);
                if self.period.is_none() {
                    return None;
                }
                let missed = consumed.coalesced + u32::from(!blocked);
                if missed == 0 {
                    return None;
                }
                self.stats.rate_violations += 1;
                self.stats.missed_releases += missed;
                Some(Error::RateViolation { task: self.id, missed })
            }
        }
    }
}
