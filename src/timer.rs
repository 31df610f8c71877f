//! Time base and periodic release timers
//!
//! `SysClock` is the kernel's tick counter; on the host it is a software
//! counter advanced by the kernel loop. `PeriodicTimer` releases one task
//! at `epoch + k·period`, so handling jitter never accumulates into drift.
//!
//! Author: Moroya Sakamoto

use crate::board::Indicator;
use crate::error::ConfigError;
use crate::signal::{SignalChannel, Signals};
use crate::task::{TaskId, TaskRef};

/// Kernel epoch: every timer is anchored here
pub const EPOCH: u64 = 0;

/// System clock
///
/// Size: 16 bytes
pub struct SysClock {
    /// Ticks since the epoch
    ticks: u64,
    /// Tick length in microseconds
    tick_period_us: u32,
}

impl SysClock {
    /// Create a clock with the given tick length
    pub const fn new(tick_period_us: u32) -> Self {
        Self {
            ticks: EPOCH,
            tick_period_us,
        }
    }

    /// Software clock for testing (1 µs ticks)
    pub const fn software() -> Self {
        Self::new(1)
    }

    /// Advance by whole ticks
    pub fn advance(&mut self, ticks: u64) {
        self.ticks = self.ticks.wrapping_add(ticks);
    }

    /// Ticks since the epoch
    pub fn now(&self) -> u64 {
        self.ticks
    }

    /// Microseconds since the epoch
    pub fn now_us(&self) -> u64 {
        self.ticks * self.tick_period_us as u64
    }

    /// Tick length in microseconds
    pub fn tick_period_us(&self) -> u32 {
        self.tick_period_us
    }

    /// Elapsed ticks since a reference point
    pub fn elapsed_since(&self, reference: u64) -> u64 {
        self.ticks.wrapping_sub(reference)
    }
}

/// Absolute expiry of a bounded wait
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Deadline {
    /// Wait start
    start: u64,
    /// Expiry (absolute)
    deadline: u64,
}

impl Deadline {
    /// Deadline `ticks` after `start`, clamped to the end of time
    pub fn new(start: u64, ticks: u64) -> Self {
        Self {
            start,
            deadline: start.saturating_add(ticks),
        }
    }

    /// Has the deadline passed at `current`?
    pub fn is_expired(&self, current: u64) -> bool {
        current >= self.deadline
    }

    /// Remaining ticks until expiry (0 if expired)
    pub fn remaining(&self, current: u64) -> u64 {
        self.deadline.saturating_sub(current)
    }

    /// Elapsed since start
    pub fn elapsed(&self, current: u64) -> u64 {
        current.wrapping_sub(self.start)
    }
}

/// Periodic release timer bound to one task
#[derive(Debug, Clone, Copy)]
pub struct PeriodicTimer {
    /// Task released by this timer
    pub target: TaskRef,
    /// Bits posted on every firing
    pub bits: Signals,
    /// Pulsed on every firing
    pub indicator: Option<Indicator>,
    /// Resolved target, set when the kernel starts
    pub(crate) task: Option<TaskId>,
    /// Fixed once started
    period: u64,
    /// Next absolute firing instant
    next_fire: u64,
    /// Firing enabled
    enabled: bool,
    /// Number of firings
    fired: u32,
}

impl PeriodicTimer {
    /// Create a stopped timer releasing `target` with `bits`
    pub const fn new(target: TaskRef, bits: Signals) -> Self {
        Self {
            target,
            bits,
            indicator: None,
            task: None,
            period: 0,
            next_fire: 0,
            enabled: false,
            fired: 0,
        }
    }

    pub const fn with_indicator(mut self, indicator: Indicator) -> Self {
        self.indicator = Some(indicator);
        self
    }

    /// Begin firing every `period` ticks, anchored at the epoch
    ///
    /// The first firing is the first multiple of `period` after `now`.
    /// A timer keeps the period it was first started with.
    pub fn start(&mut self, period: u64, now: u64) -> Result<(), ConfigError> {
        if period == 0 {
            return Err(ConfigError::ZeroPeriod);
        }
        if self.period != 0 && self.period != period {
            return Err(ConfigError::PeriodFixed {
                period: self.period,
                requested: period,
            });
        }
        self.period = period;
        let elapsed = now.saturating_sub(EPOCH);
        self.next_fire = EPOCH + (elapsed / period + 1) * period;
        self.enabled = true;
        Ok(())
    }

    /// Stop firing; the period stays fixed
    pub fn stop(&mut self) {
        self.enabled = false;
    }

    /// Should the timer fire at `now`?
    pub fn is_due(&self, now: u64) -> bool {
        self.enabled && now >= self.next_fire
    }

    /// Post the release bits to the target's channel
    ///
    /// Idempotent on the channel: a still-pending bit stays set and the
    /// channel counts the coalesced post. Returns the bits that were
    /// pending before this firing.
    pub fn fire(&mut self, channel: &SignalChannel) -> Signals {
        let previous = channel.signal(self.bits);
        self.fired += 1;
        self.next_fire += self.period;
        previous
    }

    pub fn period(&self) -> u64 {
        self.period
    }

    pub fn next_fire(&self) -> u64 {
        self.next_fire
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    pub fn fired(&self) -> u32 {
        self.fired
    }
}
