//! ALICE-RMS — rate-monotonic release on a fixed-priority kernel
//!
//! Periodic tasks released by epoch-anchored timers, signalled through
//! per-task bitmask channels, with bracketed priority elevation to bound
//! priority inversion:
//! - Static task and timer tables (no heap, no allocation)
//! - Strict-priority preemptive scheduling, Liu & Layland analysis
//! - Lock-free signal channels with coalescing and overrun detection
//! - Deterministic tick-driven kernel for host-side verification
//!
//! Author: Moroya Sakamoto

#![cfg_attr(not(any(feature = "std", test)), no_std)]

pub mod board;
pub mod config;
pub mod elevation;
pub mod error;
pub mod kernel;
pub mod scenario;
pub mod scheduler;
pub mod signal;
pub mod task;
pub mod timer;
pub mod workload;

pub use board::{Board, Indicator, Level, NullBoard};
pub use config::KernelConfig;
pub use elevation::{ElevationManager, ElevationRecord};
pub use error::{ConfigError, ElevationMisuse, Error};
pub use kernel::{Kernel, KernelStats};
pub use scheduler::Scheduler;
pub use signal::{Consumed, SignalChannel, Signals};
pub use task::{Priority, Step, Task, TaskId, TaskRef, TaskSpec, TaskState, TaskStats, Timeout, WaitOutcome};
pub use timer::{Deadline, PeriodicTimer, SysClock};
pub use workload::{BusyWait, ClockAdvance, Workload};
