//! Fixed-priority preemptive scheduler
//!
//! Static task table doubling as the name registry, strict-priority
//! selection, and rate-monotonic analysis of the periodic tasks.
//! Guarantees: if total utilization ≤ n(2^(1/n) - 1), all releases
//! complete within their period.
//!
//! Selection rule: the highest effective priority among Ready/Running
//! tasks wins. On a tie the task already holding the CPU keeps it (equal
//! priority never preempts); otherwise the lowest task id wins.
//!
//! Author: Moroya Sakamoto

use log::trace;

use crate::config::MAX_TASKS;
use crate::error::ConfigError;
use crate::task::{Priority, Task, TaskId, TaskRef, TaskSpec, TaskState};

/// Task table and CPU ownership
///
/// Static, no dynamic allocation.
pub struct Scheduler {
    /// Static task table, indexed by `TaskId`
    tasks: [Task; MAX_TASKS],
    /// Number of registered tasks
    task_count: usize,
    /// Task holding the CPU (None = idle)
    current: Option<TaskId>,
    /// Total context switches
    pub context_switches: u32,
}

impl Scheduler {
    /// Create empty scheduler
    pub const fn new() -> Self {
        Self {
            tasks: [const { Task::empty() }; MAX_TASKS],
            task_count: 0,
            current: None,
            context_switches: 0,
        }
    }

    /// Register a task under its name, at most `bound` tasks
    pub fn register(&mut self, spec: TaskSpec, bound: usize) -> Result<TaskId, ConfigError> {
        let bound = bound.min(MAX_TASKS);
        if self.task_count >= bound {
            return Err(ConfigError::TooManyTasks { max: bound });
        }
        if self.lookup(spec.name).is_some() {
            return Err(ConfigError::DuplicateName(spec.name));
        }
        let id = TaskId(self.task_count);
        self.tasks[id.index()] = Task::new(id, spec);
        self.task_count += 1;
        Ok(id)
    }

    /// Registry lookup by name
    pub fn lookup(&self, name: &str) -> Option<TaskId> {
        self.tasks().iter().find(|t| t.name == name).map(|t| t.id)
    }

    /// Resolve a body reference to a registered task
    pub fn resolve(&self, target: TaskRef) -> Result<TaskId, ConfigError> {
        match target {
            TaskRef::Name(name) => self.lookup(name).ok_or(ConfigError::UnknownTask(name)),
            TaskRef::Id(id) if id.index() < self.task_count => Ok(id),
            TaskRef::Id(id) => Err(ConfigError::UnknownTaskId(id)),
        }
    }

    /// Registered tasks, in id order
    pub fn tasks(&self) -> &[Task] {
        &self.tasks[..self.task_count]
    }

    /// Get task by id
    pub fn get_task(&self, id: TaskId) -> Option<&Task> {
        self.tasks().get(id.index())
    }

    pub(crate) fn task_mut(&mut self, id: TaskId) -> Option<&mut Task> {
        self.tasks[..self.task_count].get_mut(id.index())
    }

    /// Number of registered tasks
    pub fn task_count(&self) -> usize {
        self.task_count
    }

    /// Task holding the CPU
    pub fn current(&self) -> Option<TaskId> {
        self.current
    }

    /// Task that must own the CPU now
    pub fn pick(&self) -> Option<TaskId> {
        let mut best: Option<&Task> = None;
        for task in self.tasks().iter().filter(|t| t.is_ready()) {
            // Strict comparison: ties keep the lower id
            if best.map_or(true, |b| task.effective_priority() > b.effective_priority()) {
                best = Some(task);
            }
        }
        let best = best?;

        if let Some(current) = self.current.and_then(|id| self.get_task(id)) {
            if current.is_ready() && current.effective_priority() == best.effective_priority() {
                return Some(current.id);
            }
        }
        Some(best.id)
    }

    /// Give the CPU to `next`
    ///
    /// A still-runnable previous owner goes back to Ready and is counted
    /// as preempted.
    pub(crate) fn switch_to(&mut self, next: Option<TaskId>) {
        if next == self.current {
            if let Some(task) = next.and_then(|id| self.task_mut(id)) {
                task.state = TaskState::Running;
            }
            return;
        }

        self.context_switches += 1;
        if let Some(prev) = self.current.and_then(|id| self.task_mut(id)) {
            if prev.state == TaskState::Running {
                prev.state = TaskState::Ready;
                prev.stats.preemptions += 1;
                trace!("{} ({}) preempted", prev.name, prev.id);
            }
        }
        if let Some(task) = next.and_then(|id| self.task_mut(id)) {
            task.state = TaskState::Running;
            trace!("switch to {} ({}) at {}", task.name, task.id, task.effective_priority());
        }
        self.current = next;
    }

    /// Highest effective priority among Ready/Running tasks
    pub fn highest_ready_priority(&self) -> Option<Priority> {
        self.tasks()
            .iter()
            .filter(|t| t.is_ready())
            .map(Task::effective_priority)
            .max()
    }

    /// RMS schedulability test
    ///
    /// Liu & Layland bound: U ≤ n(2^(1/n) - 1)
    /// For n=3: U ≤ 0.780
    /// For n→∞: U ≤ ln(2) ≈ 0.693
    pub fn is_schedulable(&self) -> bool {
        let n = self.periodic_task_count();
        if n == 0 {
            return true;
        }
        self.total_utilization() <= liu_layland_bound(n)
    }

    /// Total CPU utilization (sum of Ci/Ti over periodic tasks)
    pub fn total_utilization(&self) -> f32 {
        self.tasks().iter().map(Task::utilization).sum()
    }

    /// Shorter period ⇒ strictly higher nominal priority, for every pair
    pub fn is_rate_monotonic(&self) -> bool {
        let periodic = || self.tasks().iter().filter_map(|t| t.period.map(|p| (p, t.priority)));
        periodic().all(|(p_i, prio_i)| {
            periodic().all(|(p_j, prio_j)| p_i >= p_j || prio_i > prio_j)
        })
    }

    /// Number of tasks bound to a periodic timer
    pub fn periodic_task_count(&self) -> usize {
        self.tasks().iter().filter(|t| t.period.is_some()).count()
    }
}

impl Default for Scheduler {
    fn default() -> Self {
        Self::new()
    }
}

/// Liu & Layland bound: n(2^(1/n) - 1)
///
/// Uses precomputed table for small n, ln 2 for large n.
fn liu_layland_bound(n: usize) -> f32 {
    const BOUNDS: [f32; 10] = [
        1.000, // n=0: unused (returns early)
        1.000, // n=1: U ≤ 1.000
        0.828, // n=2: U ≤ 0.828
        0.780, // n=3: U ≤ 0.780
        0.757, // n=4: U ≤ 0.757
        0.743, // n=5: U ≤ 0.743
        0.735, // n=6: U ≤ 0.735
        0.729, // n=7: U ≤ 0.729
        0.724, // n=8: U ≤ 0.724
        0.693, // n≥9: U ≤ ln(2) ≈ 0.693
    ];
    if n == 0 {
        return 1.0;
    }
    BOUNDS[n.min(9)]
}
