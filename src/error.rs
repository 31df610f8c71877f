//! Error taxonomy
//!
//! Rate violations and timeouts are reported to the owning task and the
//! board's error hook; elevation misuse is a contract violation; bad
//! configuration aborts startup.
//!
//! Author: Moroya Sakamoto

use thiserror::Error;

use crate::signal::Signals;
use crate::task::{Priority, TaskId};

/// Kernel errors
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum Error {
    /// A periodic release arrived before the previous one finished
    #[error("rate violation on {task}: {missed} release(s) overlapped a running release")]
    RateViolation { task: TaskId, missed: u32 },

    /// A bounded wait expired before any requested bit was pending
    #[error("{task} timed out waiting for signals {bits:?}")]
    SignalTimeout { task: TaskId, bits: Signals },

    /// Elevate/restore bracketing was violated
    #[error(transparent)]
    ElevationMisuse(#[from] ElevationMisuse),

    /// Startup configuration exceeds the static bounds
    #[error(transparent)]
    Configuration(#[from] ConfigError),
}

/// Violations of the elevate/restore contract
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum ElevationMisuse {
    #[error("{task} is already elevated (nested elevation is not supported)")]
    AlreadyElevated { task: TaskId },

    #[error("restore on {task} without a matching elevate")]
    NotElevated { task: TaskId },

    #[error("elevation of {task} to {requested} is below requester priority {requester}")]
    BelowRequester {
        task: TaskId,
        requested: Priority,
        requester: Priority,
    },

    #[error("elevation of {task} to {requested} is below its own priority {original}")]
    BelowOriginal {
        task: TaskId,
        requested: Priority,
        original: Priority,
    },
}

/// Startup configuration failures
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum ConfigError {
    #[error("tick period must be non-zero")]
    ZeroTickPeriod,

    #[error("stack reservation of {words} words is below the minimum of {min}")]
    StackTooSmall { words: u32, min: u32 },

    #[error("round-robin scheduling is not supported")]
    RoundRobinUnsupported,

    #[error("task bound {requested} exceeds static capacity {capacity}")]
    TaskBound { requested: usize, capacity: usize },

    #[error("timer bound {requested} exceeds static capacity {capacity}")]
    TimerBound { requested: usize, capacity: usize },

    #[error("timer callback queue depth must be non-zero")]
    ZeroTimerQueue,

    #[error("task table full ({max} tasks)")]
    TooManyTasks { max: usize },

    #[error("timer table full ({max} timers)")]
    TooManyTimers { max: usize },

    #[error("more than {max} timers due on one tick")]
    TimerQueueOverflow { max: usize },

    #[error("task body of {len} steps exceeds {max}")]
    ProgramTooLong { len: usize, max: usize },

    #[error("task body never waits and never executes work")]
    NoTimeProgress,

    #[error("timer period must be non-zero")]
    ZeroPeriod,

    #[error("timer period is fixed at {period}, cannot restart with {requested}")]
    PeriodFixed { period: u64, requested: u64 },

    #[error("duplicate task name `{0}`")]
    DuplicateName(&'static str),

    #[error("unknown task `{0}`")]
    UnknownTask(&'static str),

    #[error("unknown task id {0}")]
    UnknownTaskId(TaskId),

    #[error("kernel already started")]
    AlreadyStarted,
}
