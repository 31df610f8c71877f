//! Kernel configuration — fixed at startup, never recomputed
//!
//! The static capacities bound every table in the crate (no heap).
//! `KernelConfig` carries the environment options consumed once by
//! `Kernel::start()`.
//!
//! Author: Moroya Sakamoto

use crate::error::ConfigError;

/// Static capacity of the task table
pub const MAX_TASKS: usize = 16;

/// Static capacity of the periodic timer table
pub const MAX_TIMERS: usize = 8;

/// Maximum steps in one task body
pub const MAX_STEPS: usize = 12;

/// Smallest per-task stack reservation accepted (words)
pub const MIN_STACK_WORDS: u32 = 16;

/// Zero-time steps a single scheduling instant may run before the kernel
/// declares the task set runaway and moves on to the next tick.
pub const MAX_INSTANT_STEPS: usize = 256;

/// Startup configuration of the kernel environment.
///
/// Defaults reproduce the RTX setup the reference programs ran on:
/// 10 ms tick, 50-word stacks, no round-robin, 6 user threads.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct KernelConfig {
    /// Scheduling resolution: one kernel tick in microseconds
    pub tick_period_us: u32,
    /// Per-task stack reservation (words)
    pub stack_size_words: u32,
    /// Stack reservation of the startup context (words)
    pub main_stack_words: u32,
    /// Stack overflow checking
    pub stack_check: bool,
    /// Time-slicing among equal priorities. Must stay `false`.
    pub round_robin_enabled: bool,
    /// Upper bound on registered tasks
    pub max_tasks: usize,
    /// Upper bound on registered periodic timers
    pub max_timers: usize,
    /// Timer callbacks that may be pending in one tick
    pub timer_queue_depth: usize,
    /// Selects between the two inversion modes: `true` honours
    /// elevate/restore steps, `false` exhibits unbounded inversion.
    pub priority_inheritance_enabled: bool,
}

impl KernelConfig {
    /// RTX reference configuration
    pub const fn reference() -> Self {
        Self {
            tick_period_us: 10_000,
            stack_size_words: 50,
            main_stack_words: 50,
            stack_check: true,
            round_robin_enabled: false,
            max_tasks: 6,
            max_timers: 4,
            timer_queue_depth: 4,
            priority_inheritance_enabled: false,
        }
    }

    /// Same configuration with elevation switched on or off
    pub const fn with_priority_inheritance(mut self, enabled: bool) -> Self {
        self.priority_inheritance_enabled = enabled;
        self
    }

    /// Check the configuration against the static capacities
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.tick_period_us == 0 {
            return Err(ConfigError::ZeroTickPeriod);
        }
        if self.stack_size_words < MIN_STACK_WORDS {
            return Err(ConfigError::StackTooSmall {
                words: self.stack_size_words,
                min: MIN_STACK_WORDS,
            });
        }
        if self.main_stack_words < MIN_STACK_WORDS {
            return Err(ConfigError::StackTooSmall {
                words: self.main_stack_words,
                min: MIN_STACK_WORDS,
            });
        }
        if self.round_robin_enabled {
            return Err(ConfigError::RoundRobinUnsupported);
        }
        if self.max_tasks == 0 || self.max_tasks > MAX_TASKS {
            return Err(ConfigError::TaskBound {
                requested: self.max_tasks,
                capacity: MAX_TASKS,
            });
        }
        if self.max_timers > MAX_TIMERS {
            return Err(ConfigError::TimerBound {
                requested: self.max_timers,
                capacity: MAX_TIMERS,
            });
        }
        if self.timer_queue_depth == 0 {
            return Err(ConfigError::ZeroTimerQueue);
        }
        Ok(())
    }
}

impl Default for KernelConfig {
    fn default() -> Self {
        Self::reference()
    }
}
