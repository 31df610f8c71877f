//! Kernel — top-level RTOS manager
//!
//! Combines scheduler + clock + release timers + elevation manager into a
//! single deterministic kernel. Time advances one tick per `tick()` call.
//! Each tick:
//!
//! 1. settle: run zero-time steps (completions, signals, indicator
//!    writes, elevate/restore) in strict priority order;
//! 2. fire the timers due now, in registration order, and expire bounded
//!    waits;
//! 3. settle again, so a fresh release preempts at once;
//! 4. give one tick of work to the highest-priority ready task.
//!
//! Completions at an instant therefore precede releases at that instant.
//!
//! Author: Moroya Sakamoto

use log::{debug, error, info, trace, warn};

use crate::board::{Board, Level, NullBoard};
use crate::config::{KernelConfig, MAX_INSTANT_STEPS, MAX_TIMERS};
use crate::elevation::ElevationManager;
use crate::error::{ConfigError, ElevationMisuse, Error};
use crate::scheduler::Scheduler;
use crate::signal::Signals;
use crate::task::{Priority, Step, Task, TaskId, TaskRef, TaskSpec, TaskState, Timeout, WaitOutcome};
use crate::timer::{PeriodicTimer, SysClock};
use crate::workload::{ClockAdvance, Workload};

/// ALICE-RTOS kernel
pub struct Kernel<B: Board = NullBoard, W: Workload = ClockAdvance> {
    /// Startup configuration
    pub config: KernelConfig,
    /// Task table and CPU ownership
    pub scheduler: Scheduler,
    /// System clock
    pub clock: SysClock,
    /// Elevated priority records
    pub elevation: ElevationManager,
    /// Release timers, in registration order
    timers: [Option<PeriodicTimer>; MAX_TIMERS],
    timer_count: usize,
    board: B,
    workload: W,
    started: bool,
    /// Ticks with no ready task
    pub idle_ticks: u64,
    /// Errors reported to the board
    pub reported_errors: u32,
}

impl Kernel<NullBoard, ClockAdvance> {
    /// Kernel for testing: reference configuration, nothing attached,
    /// deterministic workload
    pub fn testing() -> Self {
        Self::new(KernelConfig::reference(), NullBoard, ClockAdvance::default())
    }
}

impl<B: Board, W: Workload> Kernel<B, W> {
    /// Create a kernel on the given board and workload executor
    pub fn new(config: KernelConfig, board: B, workload: W) -> Self {
        Self {
            config,
            scheduler: Scheduler::new(),
            clock: SysClock::new(config.tick_period_us),
            elevation: ElevationManager::new(),
            timers: [None; MAX_TIMERS],
            timer_count: 0,
            board,
            workload,
            started: false,
            idle_ticks: 0,
            reported_errors: 0,
        }
    }

    /// Register a task; returns its handle
    pub fn spawn(&mut self, spec: TaskSpec) -> Result<TaskId, Error> {
        if self.started {
            return Err(ConfigError::AlreadyStarted.into());
        }
        let id = self.scheduler.register(spec, self.config.max_tasks)?;
        debug!("spawned {} as {} at {}", spec.name, id, spec.priority);
        Ok(id)
    }

    /// Register and start a release timer firing every `period` ticks
    pub fn add_timer(&mut self, mut timer: PeriodicTimer, period: u64) -> Result<usize, Error> {
        if self.started {
            return Err(ConfigError::AlreadyStarted.into());
        }
        let bound = self.config.max_timers.min(MAX_TIMERS);
        if self.timer_count >= bound {
            return Err(ConfigError::TooManyTimers { max: bound }.into());
        }
        timer.start(period, self.clock.now())?;
        let idx = self.timer_count;
        self.timers[idx] = Some(timer);
        self.timer_count += 1;
        Ok(idx)
    }

    /// Validate the configuration, bind timers and references, and put
    /// every task whose body opens with a wait into `Blocked`.
    pub fn start(&mut self) -> Result<(), Error> {
        if self.started {
            return Err(ConfigError::AlreadyStarted.into());
        }
        self.config.validate()?;
        if self.timer_count > self.config.timer_queue_depth {
            return Err(ConfigError::TimerQueueOverflow {
                max: self.config.timer_queue_depth,
            }
            .into());
        }

        for timer in self.timers.iter_mut().flatten() {
            let id = self.scheduler.resolve(timer.target)?;
            timer.task = Some(id);
            if let Some(task) = self.scheduler.task_mut(id) {
                task.period = Some(timer.period());
            }
        }

        for task in self.scheduler.tasks() {
            for step in task.program.steps() {
                if let Some(target) = step.target() {
                    self.scheduler.resolve(target)?;
                }
            }
        }

        let now = self.clock.now();
        for idx in 0..self.scheduler.task_count() {
            let id = TaskId(idx);
            if let Some(Step::Wait { bits, timeout }) = self.scheduler.get_task(id).map(Task::current_step) {
                self.enter_wait(id, bits, timeout, now);
            }
        }

        if !self.scheduler.is_rate_monotonic() {
            warn!("periodic priorities are not rate-monotonic");
        }
        info!(
            "kernel start: {} tasks, {} timers, tick {} us, utilization {:.3}, inheritance {}",
            self.scheduler.task_count(),
            self.timer_count,
            self.config.tick_period_us,
            self.scheduler.total_utilization(),
            if self.config.priority_inheritance_enabled { "on" } else { "off" },
        );
        self.started = true;
        Ok(())
    }

    /// Post `bits` to a task's channel
    ///
    /// Never blocks; usable from outside any task (interrupt-like source).
    /// A task blocked on a matching bit becomes Ready immediately.
    pub fn signal(&mut self, target: TaskId, bits: Signals) -> Result<(), Error> {
        let now = self.clock.now();
        let task = self
            .scheduler
            .task_mut(target)
            .ok_or(ConfigError::UnknownTaskId(target))?;
        task.channel.signal(bits);
        wake_if_waiting(task, now);
        Ok(())
    }

    /// Run one scheduler tick
    ///
    /// Returns the task that executed work during the tick, if any.
    pub fn tick(&mut self) -> Option<TaskId> {
        if !self.started {
            debug!("tick before start ignored");
            return None;
        }
        let now = self.clock.now();

        self.settle(now);
        self.release_timers(now);
        self.expire_waits(now);
        self.settle(now);

        let next = self.scheduler.pick();
        self.scheduler.switch_to(next);
        match next {
            Some(id) => self.execute_one(id),
            None => {
                self.idle_ticks += 1;
                self.board.on_idle(now);
            }
        }

        self.clock.advance(1);
        next
    }

    /// Run the kernel for `ticks` ticks
    pub fn run_for(&mut self, ticks: u64) -> KernelStats {
        for _ in 0..ticks {
            self.tick();
        }
        self.stats()
    }

    /// Aggregate statistics so far
    pub fn stats(&self) -> KernelStats {
        let tasks = self.scheduler.tasks();
        KernelStats {
            now: self.clock.now(),
            idle_ticks: self.idle_ticks,
            context_switches: self.scheduler.context_switches as u64,
            releases: tasks.iter().map(|t| t.stats.releases as u64).sum(),
            rate_violations: tasks.iter().map(|t| t.stats.rate_violations as u64).sum(),
            utilization: self.scheduler.total_utilization(),
            schedulable: self.scheduler.is_schedulable(),
            rate_monotonic: self.scheduler.is_rate_monotonic(),
        }
    }

    /// Registry lookup
    pub fn lookup(&self, name: &str) -> Option<TaskId> {
        self.scheduler.lookup(name)
    }

    /// Task by handle
    pub fn task(&self, id: TaskId) -> Option<&Task> {
        self.scheduler.get_task(id)
    }

    /// Task by registry name
    pub fn task_named(&self, name: &str) -> Option<&Task> {
        self.lookup(name).and_then(|id| self.task(id))
    }

    /// Timer by registration index
    pub fn timer(&self, idx: usize) -> Option<&PeriodicTimer> {
        self.timers.get(idx).and_then(Option::as_ref)
    }

    /// Task currently in `Running`
    pub fn running(&self) -> Option<TaskId> {
        self.scheduler
            .current()
            .filter(|id| self.task(*id).map_or(false, |t| t.state == TaskState::Running))
    }

    /// Current tick
    pub fn now(&self) -> u64 {
        self.clock.now()
    }

    pub fn is_started(&self) -> bool {
        self.started
    }

    pub fn board(&self) -> &B {
        &self.board
    }

    pub fn board_mut(&mut self) -> &mut B {
        &mut self.board
    }

    pub fn workload(&self) -> &W {
        &self.workload
    }

    /// Run zero-time steps until the highest-priority ready task needs
    /// CPU time (or nothing is ready)
    fn settle(&mut self, now: u64) {
        for _ in 0..MAX_INSTANT_STEPS {
            let Some(id) = self.scheduler.pick() else {
                return;
            };
            self.scheduler.switch_to(Some(id));
            if !self.step_instant(id, now) {
                return;
            }
        }
        error!("zero-time steps did not settle at tick {}", now);
    }

    /// Perform the task's current step if it takes no time.
    ///
    /// Returns false when the step is work that needs the CPU.
    fn step_instant(&mut self, id: TaskId, now: u64) -> bool {
        let Some(task) = self.scheduler.task_mut(id) else {
            return false;
        };
        let step = task.current_step();
        match step {
            Step::Execute(0) => task.advance(),
            Step::Execute(_) => return false,
            Step::Wait { bits, timeout } => {
                if task.wait_outcome().is_some() {
                    let released = matches!(task.wait_outcome(), Some(WaitOutcome::Signalled { .. }));
                    let indicator = task.indicator;
                    let reported = task.finish_wait(now);
                    if released {
                        trace!("{} released at {}", task.name, now);
                        if let Some(led) = indicator {
                            self.board.set(led, Level::On);
                        }
                    }
                    if let Some(err) = reported {
                        self.report(now, err);
                    }
                } else {
                    self.enter_wait(id, bits, timeout, now);
                }
            }
            Step::Signal { to, bits } => {
                task.advance();
                match self.scheduler.resolve(to) {
                    Ok(target) => {
                        if let Some(receiver) = self.scheduler.task_mut(target) {
                            receiver.channel.signal(bits);
                            wake_if_waiting(receiver, now);
                        }
                    }
                    Err(err) => self.report(now, err.into()),
                }
            }
            Step::Elevate { holder, to } => {
                task.advance();
                self.apply_elevate(id, holder, to, now);
            }
            Step::Restore { holder } => {
                task.advance();
                self.apply_restore(holder, now);
            }
            Step::Indicate { indicator, level } => {
                task.advance();
                self.board.set(indicator, level);
            }
        }
        true
    }

    /// Issue a wait on the task's own channel
    fn enter_wait(&mut self, id: TaskId, bits: Signals, timeout: Timeout, now: u64) {
        let Some(task) = self.scheduler.task_mut(id) else {
            return;
        };
        let finished_release = task.released;
        let indicator = task.indicator;
        task.begin_wait(bits, timeout, now);

        if let Some(consumed) = task.channel.consume(bits) {
            // Bits already pending: the wait returns without blocking
            task.wake(WaitOutcome::Signalled { consumed, blocked: false }, now);
        } else if timeout == Timeout::Ticks(0) {
            task.wake(WaitOutcome::TimedOut, now);
        } else {
            task.state = TaskState::Blocked;
        }

        if finished_release {
            if let Some(led) = indicator {
                self.board.set(led, Level::Off);
            }
        }
    }

    /// Fire every timer due at `now`, in registration order
    fn release_timers(&mut self, now: u64) {
        for timer in self.timers[..self.timer_count].iter_mut().flatten() {
            if !timer.is_due(now) {
                continue;
            }
            let Some(task) = timer.task.and_then(|id| self.scheduler.task_mut(id)) else {
                continue;
            };
            if let Some(led) = timer.indicator {
                self.board.set(led, Level::On);
            }
            let previous = timer.fire(&task.channel);
            debug!(
                "timer released {} at {} (pending before: {:?})",
                task.name, now, previous
            );
            wake_if_waiting(task, now);
            if let Some(led) = timer.indicator {
                self.board.set(led, Level::Off);
            }
        }
    }

    /// Time out bounded waits whose deadline has passed
    fn expire_waits(&mut self, now: u64) {
        for idx in 0..self.scheduler.task_count() {
            let Some(task) = self.scheduler.task_mut(TaskId(idx)) else {
                continue;
            };
            let expired = task.state == TaskState::Blocked
                && task
                    .wait
                    .map_or(false, |w| w.outcome.is_none() && w.deadline.map_or(false, |d| d.is_expired(now)));
            if expired {
                task.wake(WaitOutcome::TimedOut, now);
            }
        }
    }

    /// Give one tick of CPU to `id`'s current work step
    fn execute_one(&mut self, id: TaskId) {
        let Some(task) = self.scheduler.task_mut(id) else {
            return;
        };
        let Step::Execute(ticks) = task.current_step() else {
            return;
        };
        if task.remaining == 0 {
            task.remaining = ticks;
        }
        task.remaining -= 1;
        task.stats.executed_ticks += 1;
        if task.remaining == 0 {
            task.advance();
        }
        self.workload.execute(id, 1);
    }

    /// Elevate on behalf of `issuer`; a no-op with inheritance disabled
    fn apply_elevate(&mut self, issuer: TaskId, holder: TaskRef, to: Priority, now: u64) {
        if !self.config.priority_inheritance_enabled {
            trace!("elevation disabled, {:?} keeps its priority", holder);
            return;
        }
        let holder = match self.scheduler.resolve(holder) {
            Ok(id) => id,
            Err(err) => return self.report(now, err.into()),
        };
        // A holder bracketing its own window serves whoever is blocked on
        // a signal it will send; otherwise the issuer is the requester.
        let requester = if holder == issuer {
            self.blocked_requester(holder)
        } else {
            match self.scheduler.get_task(issuer) {
                Some(task) => task.effective_priority(),
                None => return,
            }
        };
        let Some(task) = self.scheduler.task_mut(holder) else {
            return;
        };
        match self.elevation.elevate(task, to, requester, now) {
            Ok(record) => debug!(
                "{} elevated {} -> {} at {}",
                task.name, record.original, record.elevated, now
            ),
            Err(misuse) => self.misuse(now, misuse),
        }
    }

    /// Highest effective priority among tasks blocked on bits that
    /// `holder`'s body signals to them (`Idle` if there are none)
    fn blocked_requester(&self, holder: TaskId) -> Priority {
        let Some(task) = self.scheduler.get_task(holder) else {
            return Priority::Idle;
        };
        task.program
            .steps()
            .iter()
            .filter_map(|step| match *step {
                Step::Signal { to, bits } => Some((to, bits)),
                _ => None,
            })
            .filter_map(|(to, bits)| {
                let waiter = self.scheduler.get_task(self.scheduler.resolve(to).ok()?)?;
                let wait = waiter.wait?;
                let blocked = waiter.state == TaskState::Blocked
                    && wait.outcome.is_none()
                    && wait.bits.intersects(bits);
                blocked.then(|| waiter.effective_priority())
            })
            .max()
            .unwrap_or(Priority::Idle)
    }

    /// Restore; a no-op with inheritance disabled
    fn apply_restore(&mut self, holder: TaskRef, now: u64) {
        if !self.config.priority_inheritance_enabled {
            return;
        }
        let holder = match self.scheduler.resolve(holder) {
            Ok(id) => id,
            Err(err) => return self.report(now, err.into()),
        };
        let Some(task) = self.scheduler.task_mut(holder) else {
            return;
        };
        match self.elevation.restore(task) {
            Ok(record) => debug!(
                "{} restored to {} after {} ticks",
                task.name,
                record.original,
                now - record.since
            ),
            Err(misuse) => self.misuse(now, misuse),
        }
    }

    /// Contract violation: fatal in debug builds, reported otherwise
    fn misuse(&mut self, now: u64, misuse: ElevationMisuse) {
        if cfg!(debug_assertions) {
            panic!("elevation misuse: {}", misuse);
        }
        self.ignore_misuse(now, misuse);
    }

    /// Release-build handling: log, hand to the board, change nothing
    fn ignore_misuse(&mut self, now: u64, misuse: ElevationMisuse) {
        self.report(now, misuse.into());
    }

    /// Log a non-fatal error and hand it to the board's error hook
    fn report(&mut self, now: u64, err: Error) {
        match err {
            Error::RateViolation { .. } | Error::SignalTimeout { .. } => warn!("tick {}: {}", now, err),
            Error::ElevationMisuse(_) | Error::Configuration(_) => error!("tick {}: {}", now, err),
        }
        self.reported_errors += 1;
        self.board.on_error(now, &err);
    }
}

/// Deliver pending bits to a blocked waiter
fn wake_if_waiting(task: &mut Task, now: u64) {
    if task.state != TaskState::Blocked {
        return;
    }
    let Some(wait) = task.wait else {
        return;
    };
    if wait.outcome.is_some() {
        return;
    }
    if let Some(consumed) = task.channel.consume(wait.bits) {
        task.wake(WaitOutcome::Signalled { consumed, blocked: true }, now);
    }
}

/// Kernel execution statistics
#[derive(Debug, Clone)]
pub struct KernelStats {
    /// Current tick
    pub now: u64,
    /// Ticks with no ready task
    pub idle_ticks: u64,
    /// Context switches
    pub context_switches: u64,
    /// Signalled wait-returns over all tasks
    pub releases: u64,
    /// Rate violations over all tasks
    pub rate_violations: u64,
    /// Periodic CPU utilization
    pub utilization: f32,
    /// Liu & Layland schedulable
    pub schedulable: bool,
    /// Shorter period ⇒ higher priority
    pub rate_monotonic: bool,
}

#[cfg(test)]
mod tests {
    extern crate std;

    use super::*;
    use crate::board::Indicator;
    use std::vec::Vec;

    #[derive(Default)]
    struct Recorder {
        leds: Vec<(Indicator, Level)>,
        errors: Vec<Error>,
        idle: u64,
    }

    impl Board for Recorder {
        fn set(&mut self, indicator: Indicator, level: Level) {
            self.leds.push((indicator, level));
        }

        fn on_idle(&mut self, _now: u64) {
            self.idle += 1;
        }

        fn on_error(&mut self, _now: u64, error: &Error) {
            self.errors.push(*error);
        }
    }

    fn recording() -> Kernel<Recorder, ClockAdvance> {
        recording_with(KernelConfig::reference())
    }

    fn recording_with(config: KernelConfig) -> Kernel<Recorder, ClockAdvance> {
        let _ = env_logger::builder().is_test(true).try_init();
        Kernel::new(config, Recorder::default(), ClockAdvance::default())
    }

    /// L raises itself to `to` around a window that ends by signalling
    /// H, which is blocked on that signal from the start.
    fn self_bracket_kernel(to: Priority) -> (Kernel<Recorder, ClockAdvance>, TaskId) {
        let mut kernel = recording_with(KernelConfig::reference().with_priority_inheritance(true));
        let h = [Step::wait(Signals::S1), Step::execute(1)];
        let l = [
            Step::elevate("l", to),
            Step::execute(2),
            Step::signal("h", Signals::S1),
            Step::restore("l"),
        ];
        kernel.spawn(TaskSpec::new("h", Priority::High, &h).unwrap()).unwrap();
        let l = kernel.spawn(TaskSpec::new("l", Priority::BelowNormal, &l).unwrap()).unwrap();
        kernel.start().unwrap();
        (kernel, l)
    }

    fn periodic(name: &'static str, priority: Priority, bits: u32, work: u64) -> TaskSpec {
        TaskSpec::new(name, priority, &[Step::wait(Signals::mask(bits)), Step::execute(work)]).unwrap()
    }

    #[test]
    fn test_kernel_creation() {
        let kernel = Kernel::testing();
        assert_eq!(kernel.scheduler.task_count(), 0);
        assert!(!kernel.is_started());
    }

    #[test]
    fn test_tick_before_start_is_ignored() {
        let mut kernel = Kernel::testing();
        kernel.spawn(periodic("a", Priority::Normal, 1, 1)).unwrap();
        assert_eq!(kernel.tick(), None);
        assert_eq!(kernel.now(), 0);
    }

    #[test]
    fn test_periodic_task_starts_blocked() {
        let mut kernel = Kernel::testing();
        let a = kernel.spawn(periodic("a", Priority::Normal, 1, 3)).unwrap();
        kernel
            .add_timer(PeriodicTimer::new(TaskRef::Name("a"), Signals::S0), 10)
            .unwrap();
        kernel.start().unwrap();
        assert_eq!(kernel.task(a).unwrap().state, TaskState::Blocked);
        assert_eq!(kernel.task(a).unwrap().period, Some(10));
    }

    #[test]
    fn test_release_runs_workload() {
        let mut kernel = Kernel::testing();
        let a = kernel.spawn(periodic("a", Priority::Normal, 1, 3)).unwrap();
        kernel
            .add_timer(PeriodicTimer::new(TaskRef::Id(a), Signals::S0), 10)
            .unwrap();
        kernel.start().unwrap();

        for _ in 0..10 {
            assert_eq!(kernel.tick(), None);
        }
        // Released at 10, three ticks of work
        assert_eq!(kernel.tick(), Some(a));
        assert_eq!(kernel.tick(), Some(a));
        assert_eq!(kernel.tick(), Some(a));
        assert_eq!(kernel.tick(), None);

        let task = kernel.task(a).unwrap();
        assert_eq!(task.stats.releases, 1);
        assert_eq!(task.stats.completions, 1);
        assert_eq!(task.stats.executed_ticks, 3);
        assert_eq!(task.stats.last_release, Some(10));
        assert_eq!(task.state, TaskState::Blocked);
        assert_eq!(kernel.workload().executed, 3);
    }

    #[test]
    fn test_higher_release_preempts_mid_workload() {
        let mut kernel = Kernel::testing();
        let low = kernel.spawn(periodic("low", Priority::BelowNormal, 1, 8)).unwrap();
        let high = kernel.spawn(periodic("high", Priority::AboveNormal, 1, 2)).unwrap();
        kernel.start().unwrap();

        kernel.signal(low, Signals::S0).unwrap();
        assert_eq!(kernel.tick(), Some(low));
        assert_eq!(kernel.tick(), Some(low));

        kernel.signal(high, Signals::S0).unwrap();
        assert_eq!(kernel.tick(), Some(high));
        assert_eq!(kernel.tick(), Some(high));

        // Low resumes where it left off: 6 ticks remain, none lost
        let mut resumed = 0;
        while kernel.tick() == Some(low) {
            resumed += 1;
        }
        assert_eq!(resumed, 6);
        assert_eq!(kernel.task(low).unwrap().stats.executed_ticks, 8);
        assert_eq!(kernel.task(low).unwrap().stats.preemptions, 1);
    }

    #[test]
    fn test_equal_priority_does_not_preempt() {
        let mut kernel = Kernel::testing();
        let x = kernel.spawn(periodic("x", Priority::Normal, 1, 4)).unwrap();
        let y = kernel.spawn(periodic("y", Priority::Normal, 1, 4)).unwrap();
        kernel.start().unwrap();

        kernel.signal(y, Signals::S0).unwrap();
        assert_eq!(kernel.tick(), Some(y));
        kernel.signal(x, Signals::S0).unwrap();
        // x has the lower id but y holds the CPU at the same priority
        for _ in 0..3 {
            assert_eq!(kernel.tick(), Some(y));
        }
        assert_eq!(kernel.tick(), Some(x));
    }

    #[test]
    fn test_simultaneous_equal_priority_release_lowest_id_first() {
        let mut kernel = Kernel::testing();
        let x = kernel.spawn(periodic("x", Priority::Normal, 1, 2)).unwrap();
        let y = kernel.spawn(periodic("y", Priority::Normal, 1, 2)).unwrap();
        kernel.add_timer(PeriodicTimer::new(TaskRef::Id(y), Signals::S0), 5).unwrap();
        kernel.add_timer(PeriodicTimer::new(TaskRef::Id(x), Signals::S0), 5).unwrap();
        kernel.start().unwrap();

        let ran: Vec<_> = (0..9).map(|_| kernel.tick()).collect();
        assert_eq!(&ran[5..], &[Some(x), Some(x), Some(y), Some(y)]);
    }

    #[test]
    fn test_same_tick_timers_fire_in_registration_order() {
        let mut kernel = recording();
        let a = kernel.spawn(periodic("a", Priority::Normal, 1, 1)).unwrap();
        let b = kernel.spawn(periodic("b", Priority::High, 1, 1)).unwrap();
        kernel
            .add_timer(PeriodicTimer::new(TaskRef::Id(b), Signals::S0).with_indicator(6), 4)
            .unwrap();
        kernel
            .add_timer(PeriodicTimer::new(TaskRef::Id(a), Signals::S0).with_indicator(5), 4)
            .unwrap();
        kernel.start().unwrap();
        kernel.run_for(5);

        assert_eq!(
            kernel.board().leds,
            [(6, Level::On), (6, Level::Off), (5, Level::On), (5, Level::Off)]
        );
    }

    #[test]
    fn test_release_indicator_brackets_workload() {
        let mut kernel = recording();
        let spec = periodic("a", Priority::Normal, 1, 2).with_indicator(0);
        let a = kernel.spawn(spec).unwrap();
        kernel.add_timer(PeriodicTimer::new(TaskRef::Id(a), Signals::S0), 10).unwrap();
        kernel.start().unwrap();
        kernel.run_for(13);

        assert_eq!(kernel.board().leds, [(0, Level::On), (0, Level::Off)]);
    }

    #[test]
    fn test_overrun_reports_rate_violation() {
        let mut kernel = recording();
        let a = kernel.spawn(periodic("a", Priority::Normal, 1, 15)).unwrap();
        kernel.add_timer(PeriodicTimer::new(TaskRef::Id(a), Signals::S0), 10).unwrap();
        kernel.start().unwrap();

        // Released at 10, busy until 25; release at 20 found it running
        kernel.run_for(26);
        let task = kernel.task(a).unwrap();
        assert_eq!(task.stats.rate_violations, 1);
        assert_eq!(task.stats.missed_releases, 1);
        assert_eq!(
            kernel.board().errors,
            [Error::RateViolation { task: a, missed: 1 }]
        );
        // The late release still runs right away
        assert_eq!(task.state, TaskState::Running);
        assert_eq!(task.stats.releases, 2);
    }

    #[test]
    fn test_double_overrun_policy() {
        let mut kernel = recording();
        let a = kernel.spawn(periodic("a", Priority::Normal, 1, 25)).unwrap();
        kernel.add_timer(PeriodicTimer::new(TaskRef::Id(a), Signals::S0), 10).unwrap();
        kernel.start().unwrap();

        // Busy 10..35: releases at 20 and 30 coalesce into one execution
        kernel.run_for(36);
        let task = kernel.task(a).unwrap();
        assert_eq!(task.stats.releases, 2);
        assert_eq!(task.stats.rate_violations, 1);
        assert_eq!(task.stats.missed_releases, 2);
        assert_eq!(
            kernel.board().errors,
            [Error::RateViolation { task: a, missed: 2 }]
        );
    }

    #[test]
    fn test_completion_precedes_release_at_same_instant() {
        let mut kernel = recording();
        let a = kernel.spawn(periodic("a", Priority::Normal, 1, 10)).unwrap();
        kernel.add_timer(PeriodicTimer::new(TaskRef::Id(a), Signals::S0), 10).unwrap();
        kernel.start().unwrap();

        // Exactly 100% utilization: finishes at 20 as the next release lands
        kernel.run_for(41);
        let task = kernel.task(a).unwrap();
        assert_eq!(task.stats.rate_violations, 0);
        assert_eq!(task.stats.releases, 4);
        assert_eq!(kernel.idle_ticks, 10);
    }

    #[test]
    fn test_bounded_wait_times_out() {
        let mut kernel = recording();
        let steps = [Step::wait_for(Signals::S1, 5), Step::execute(1)];
        let h = kernel.spawn(TaskSpec::new("h", Priority::High, &steps).unwrap()).unwrap();
        kernel.start().unwrap();

        kernel.run_for(5);
        assert_eq!(kernel.task(h).unwrap().state, TaskState::Blocked);
        // Expires at 5, then the task continues with its next step
        assert_eq!(kernel.tick(), Some(h));
        let task = kernel.task(h).unwrap();
        assert_eq!(task.stats.timeouts, 1);
        assert_eq!(task.stats.releases, 0);
        assert_eq!(
            kernel.board().errors,
            [Error::SignalTimeout { task: h, bits: Signals::S1 }]
        );
    }

    #[test]
    fn test_bounded_wait_signalled_in_time() {
        let mut kernel = Kernel::testing();
        let steps = [Step::wait_for(Signals::S1, 5), Step::execute(1)];
        let h = kernel.spawn(TaskSpec::new("h", Priority::High, &steps).unwrap()).unwrap();
        kernel.start().unwrap();

        kernel.run_for(3);
        kernel.signal(h, Signals::S1).unwrap();
        assert_eq!(kernel.tick(), Some(h));
        let task = kernel.task(h).unwrap();
        assert_eq!(task.stats.timeouts, 0);
        assert_eq!(task.stats.releases, 1);
        assert_eq!(task.stats.last_wait, 3);
    }

    #[test]
    fn test_signal_before_wait_is_not_lost() {
        let mut kernel = Kernel::testing();
        let steps = [Step::execute(3), Step::wait(Signals::S0), Step::execute(2)];
        let t = kernel.spawn(TaskSpec::new("t", Priority::Normal, &steps).unwrap()).unwrap();
        kernel.start().unwrap();

        kernel.signal(t, Signals::S0).unwrap();
        kernel.run_for(5);
        let task = kernel.task(t).unwrap();
        assert_eq!(task.stats.releases, 1);
        assert_eq!(task.stats.executed_ticks, 5);
    }

    #[test]
    fn test_double_signal_single_wakeup() {
        let mut kernel = Kernel::testing();
        let steps = [Step::execute(2), Step::wait(Signals::S0), Step::execute(1)];
        let t = kernel.spawn(TaskSpec::new("t", Priority::Normal, &steps).unwrap()).unwrap();
        kernel.start().unwrap();

        kernel.signal(t, Signals::S0).unwrap();
        kernel.signal(t, Signals::S0).unwrap();
        kernel.run_for(10);
        let task = kernel.task(t).unwrap();
        assert_eq!(task.stats.releases, 1);
        assert_eq!(task.state, TaskState::Blocked);
    }

    #[test]
    fn test_unknown_reference_fails_start() {
        let mut kernel = Kernel::testing();
        let steps = [Step::execute(1), Step::signal("ghost", Signals::S0)];
        kernel.spawn(TaskSpec::new("t", Priority::Normal, &steps).unwrap()).unwrap();
        assert_eq!(
            kernel.start(),
            Err(Error::Configuration(ConfigError::UnknownTask("ghost")))
        );
        assert!(!kernel.is_started());
    }

    #[test]
    fn test_task_bound_enforced() {
        let mut kernel = Kernel::testing();
        for name in ["t0", "t1", "t2", "t3", "t4", "t5"] {
            kernel.spawn(periodic(name, Priority::Normal, 1, 1)).unwrap();
        }
        assert_eq!(
            kernel.spawn(periodic("t6", Priority::Normal, 1, 1)),
            Err(Error::Configuration(ConfigError::TooManyTasks { max: 6 }))
        );
    }

    #[test]
    fn test_timer_bound_enforced() {
        let mut kernel = Kernel::testing();
        kernel.spawn(periodic("t", Priority::Normal, 1, 1)).unwrap();
        for _ in 0..4 {
            kernel.add_timer(PeriodicTimer::new(TaskRef::Name("t"), Signals::S0), 100).unwrap();
        }
        assert_eq!(
            kernel.add_timer(PeriodicTimer::new(TaskRef::Name("t"), Signals::S0), 100),
            Err(Error::Configuration(ConfigError::TooManyTimers { max: 4 }))
        );
    }

    #[test]
    fn test_invalid_config_aborts_start() {
        let mut config = KernelConfig::reference();
        config.round_robin_enabled = true;
        let mut kernel = Kernel::new(config, NullBoard, ClockAdvance::default());
        kernel.spawn(periodic("t", Priority::Normal, 1, 1)).unwrap();
        assert_eq!(
            kernel.start(),
            Err(Error::Configuration(ConfigError::RoundRobinUnsupported))
        );
        assert_eq!(kernel.tick(), None);
    }

    #[test]
    fn test_no_registration_after_start() {
        let mut kernel = Kernel::testing();
        kernel.spawn(periodic("t", Priority::Normal, 1, 1)).unwrap();
        kernel.start().unwrap();
        assert_eq!(
            kernel.spawn(periodic("u", Priority::Normal, 1, 1)),
            Err(Error::Configuration(ConfigError::AlreadyStarted))
        );
        assert_eq!(kernel.start(), Err(Error::Configuration(ConfigError::AlreadyStarted)));
    }

    #[test]
    fn test_idle_hook() {
        let mut kernel = recording();
        kernel.spawn(periodic("t", Priority::Normal, 1, 1)).unwrap();
        kernel.start().unwrap();
        let stats = kernel.run_for(7);
        assert_eq!(kernel.board().idle, 7);
        assert_eq!(stats.idle_ticks, 7);
    }

    #[test]
    fn test_indicate_step() {
        let mut kernel = recording();
        let steps = [Step::led(3, Level::On), Step::execute(2), Step::led(3, Level::Off), Step::wait(Signals::S0)];
        kernel.spawn(TaskSpec::new("t", Priority::Normal, &steps).unwrap()).unwrap();
        kernel.start().unwrap();
        kernel.run_for(4);
        assert_eq!(kernel.board().leds, [(3, Level::On), (3, Level::Off)]);
    }

    #[test]
    fn test_elevation_disabled_is_noop() {
        let mut kernel = Kernel::testing();
        let steps = [Step::elevate("l", Priority::High), Step::execute(1), Step::restore("l")];
        kernel.spawn(TaskSpec::new("h", Priority::High, &steps).unwrap()).unwrap();
        let l = kernel
            .spawn(TaskSpec::new("l", Priority::BelowNormal, &[Step::wait(Signals::S0)]).unwrap())
            .unwrap();
        kernel.start().unwrap();
        kernel.tick();
        assert_eq!(kernel.task(l).unwrap().effective_priority(), Priority::BelowNormal);
        assert_eq!(kernel.elevation.elevations, 0);
    }

    #[test]
    fn test_self_bracketed_elevation() {
        let config = KernelConfig::reference().with_priority_inheritance(true);
        let mut kernel = Kernel::new(config, NullBoard, ClockAdvance::default());
        let steps = [
            Step::wait(Signals::S0),
            Step::elevate("l", Priority::High),
            Step::execute(3),
            Step::restore("l"),
        ];
        let l = kernel.spawn(TaskSpec::new("l", Priority::BelowNormal, &steps).unwrap()).unwrap();
        let body = [Step::wait(Signals::S1), Step::execute(10)];
        let m = kernel.spawn(TaskSpec::new("m", Priority::Normal, &body).unwrap()).unwrap();
        kernel.start().unwrap();

        kernel.signal(l, Signals::S0).unwrap();
        assert_eq!(kernel.tick(), Some(l));
        // M becomes runnable inside L's window and still has to wait
        kernel.signal(m, Signals::S1).unwrap();
        assert_eq!(kernel.tick(), Some(l));
        assert_eq!(kernel.tick(), Some(l));
        assert_eq!(kernel.tick(), Some(m));
        assert_eq!(kernel.task(l).unwrap().effective_priority(), Priority::BelowNormal);
    }

    #[test]
    #[cfg(debug_assertions)]
    #[should_panic(expected = "elevation misuse")]
    fn test_restore_without_elevate_panics_in_debug() {
        let config = KernelConfig::reference().with_priority_inheritance(true);
        let mut kernel = Kernel::new(config, NullBoard, ClockAdvance::default());
        let steps = [Step::restore("l"), Step::execute(1)];
        kernel.spawn(TaskSpec::new("h", Priority::High, &steps).unwrap()).unwrap();
        kernel
            .spawn(TaskSpec::new("l", Priority::BelowNormal, &[Step::wait(Signals::S0)]).unwrap())
            .unwrap();
        kernel.start().unwrap();
        kernel.tick();
    }

    #[test]
    #[cfg(debug_assertions)]
    #[should_panic(expected = "elevation misuse")]
    fn test_elevate_below_requester_panics_in_debug() {
        let config = KernelConfig::reference().with_priority_inheritance(true);
        let mut kernel = Kernel::new(config, NullBoard, ClockAdvance::default());
        let steps = [Step::elevate("l", Priority::Normal), Step::execute(1)];
        kernel.spawn(TaskSpec::new("h", Priority::High, &steps).unwrap()).unwrap();
        kernel
            .spawn(TaskSpec::new("l", Priority::BelowNormal, &[Step::wait(Signals::S0)]).unwrap())
            .unwrap();
        kernel.start().unwrap();
        kernel.tick();
    }

    #[test]
    fn test_self_bracket_raised_to_blocked_waiter() {
        let (mut kernel, l) = self_bracket_kernel(Priority::High);
        // Window 0..2, H served at 2
        kernel.run_for(3);
        assert_eq!(kernel.elevation.elevations, 1);
        assert_eq!(kernel.elevation.restores, 1);
        assert!(kernel.board().errors.is_empty());
        assert_eq!(kernel.task(l).unwrap().effective_priority(), Priority::BelowNormal);
        assert_eq!(kernel.task_named("h").unwrap().stats.releases, 1);
    }

    #[test]
    #[cfg(debug_assertions)]
    #[should_panic(expected = "below requester priority High")]
    fn test_self_bracket_below_blocked_waiter_panics_in_debug() {
        let (mut kernel, _) = self_bracket_kernel(Priority::Normal);
        kernel.tick();
    }

    #[test]
    #[cfg(not(debug_assertions))]
    fn test_self_bracket_below_blocked_waiter_reported_in_release() {
        let (mut kernel, l) = self_bracket_kernel(Priority::Normal);
        kernel.tick();
        assert_eq!(kernel.task(l).unwrap().effective_priority(), Priority::BelowNormal);
        assert!(matches!(
            kernel.board().errors[..],
            [Error::ElevationMisuse(ElevationMisuse::BelowRequester { requester: Priority::High, .. })]
        ));
    }

    #[test]
    #[cfg(not(debug_assertions))]
    fn test_restore_without_elevate_reported_in_release() {
        let mut kernel = recording_with(KernelConfig::reference().with_priority_inheritance(true));
        let steps = [Step::restore("l"), Step::execute(1)];
        kernel.spawn(TaskSpec::new("h", Priority::High, &steps).unwrap()).unwrap();
        let l = kernel
            .spawn(TaskSpec::new("l", Priority::BelowNormal, &[Step::wait(Signals::S0)]).unwrap())
            .unwrap();
        kernel.start().unwrap();
        kernel.run_for(3);
        assert_eq!(
            kernel.board().errors[..1],
            [Error::ElevationMisuse(ElevationMisuse::NotElevated { task: l })]
        );
        assert_eq!(kernel.task(l).unwrap().effective_priority(), Priority::BelowNormal);
    }

    #[test]
    fn test_ignored_misuse_is_reported_and_changes_nothing() {
        let config = KernelConfig::reference().with_priority_inheritance(true);
        let mut kernel = recording_with(config);
        let l = kernel
            .spawn(TaskSpec::new("l", Priority::BelowNormal, &[Step::wait(Signals::S0)]).unwrap())
            .unwrap();
        kernel.start().unwrap();

        kernel.ignore_misuse(3, ElevationMisuse::NotElevated { task: l });
        assert_eq!(
            kernel.board().errors,
            [Error::ElevationMisuse(ElevationMisuse::NotElevated { task: l })]
        );
        assert_eq!(kernel.reported_errors, 1);
        assert_eq!(kernel.elevation.active(), 0);
        assert_eq!(kernel.task(l).unwrap().effective_priority(), Priority::BelowNormal);
        // The kernel keeps scheduling afterwards
        kernel.signal(l, Signals::S0).unwrap();
        kernel.tick();
        assert_eq!(kernel.task(l).unwrap().stats.releases, 1);
    }

    #[test]
    fn test_unrelated_repeats_are_not_violations() {
        let mut kernel = recording();
        let a = kernel.spawn(periodic("a", Priority::Normal, 1, 1)).unwrap();
        kernel.add_timer(PeriodicTimer::new(TaskRef::Id(a), Signals::S0), 10).unwrap();
        kernel.start().unwrap();

        // S1 is posted twice while a idles on S0
        kernel.signal(a, Signals::S1).unwrap();
        kernel.signal(a, Signals::S1).unwrap();
        kernel.run_for(12);

        let task = kernel.task(a).unwrap();
        assert_eq!(task.stats.releases, 1);
        assert_eq!(task.stats.rate_violations, 0);
        assert!(kernel.board().errors.is_empty());
        assert_eq!(task.channel.pending(), Signals::S1);
    }

    #[test]
    fn test_huge_timeout_after_late_wait() {
        let mut kernel = recording();
        let steps = [Step::execute(2), Step::wait_for(Signals::S0, u64::MAX)];
        let t = kernel.spawn(TaskSpec::new("t", Priority::High, &steps).unwrap()).unwrap();
        kernel.start().unwrap();

        kernel.run_for(3);
        let task = kernel.task(t).unwrap();
        assert_eq!(task.state, TaskState::Blocked);
        assert_eq!(task.stats.timeouts, 0);

        kernel.run_for(100);
        assert_eq!(kernel.task(t).unwrap().state, TaskState::Blocked);
        kernel.signal(t, Signals::S0).unwrap();
        assert_eq!(kernel.tick(), Some(t));
        assert_eq!(kernel.task(t).unwrap().stats.releases, 1);
        assert!(kernel.board().errors.is_empty());
    }
}
