//! Workload executor — stand-in for a task's real computation
//!
//! The kernel accounts simulated time itself; the executor is called for
//! every tick a task computes so that host runs can either advance
//! instantly (`ClockAdvance`) or burn real cycles (`BusyWait`).
//!
//! Author: Moroya Sakamoto

use crate::task::TaskId;

/// Occupies the CPU on behalf of a task
pub trait Workload {
    /// Execute `ticks` ticks of `task`'s compute
    fn execute(&mut self, task: TaskId, ticks: u64);
}

/// Deterministic executor: the kernel clock advance *is* the work
#[derive(Debug, Default, Clone, Copy)]
pub struct ClockAdvance {
    /// Ticks of compute executed so far
    pub executed: u64,
}

impl Workload for ClockAdvance {
    #[inline]
    fn execute(&mut self, _task: TaskId, ticks: u64) {
        self.executed += ticks;
    }
}

/// Cyclic counting with no side effect, like the original delay loops
#[derive(Debug, Clone, Copy)]
pub struct BusyWait {
    /// Loop iterations per tick of compute
    pub iterations_per_tick: u32,
}

impl BusyWait {
    pub const fn new(iterations_per_tick: u32) -> Self {
        Self { iterations_per_tick }
    }
}

impl Workload for BusyWait {
    fn execute(&mut self, _task: TaskId, ticks: u64) {
        let mut count: u32 = 0;
        for _ in 0..ticks {
            for _ in 0..self.iterations_per_tick {
                count = core::hint::black_box(count.wrapping_add(1));
            }
        }
        core::hint::black_box(count);
    }
}
