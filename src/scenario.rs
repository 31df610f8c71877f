//! Reference setups — rate-monotonic release and priority inversion
//!
//! `rms` builds three periodic tasks released by their own timers:
//!
//! | Task | Priority    | Period | Work (units) | Bits | LED | Timer LED |
//! |------|-------------|--------|--------------|------|-----|-----------|
//! | a    | BelowNormal | 40000  | 260          | 0x01 | 0   | 5         |
//! | b    | Normal      | 40000  | 130          | 0x02 | 1   | 6         |
//! | c    | AboveNormal | 20000  | 65           | 0x03 | 2   | 7         |
//!
//! `inversion` builds the classic three-task inversion: H needs service
//! from L, M is always runnable in between. Tasks are created L, M, H.
//!
//! Author: Moroya Sakamoto

use crate::board::{Board, Indicator, Level};
use crate::config::KernelConfig;
use crate::error::Error;
use crate::kernel::Kernel;
use crate::signal::Signals;
use crate::task::{Priority, Step, TaskRef, TaskSpec};
use crate::timer::PeriodicTimer;
use crate::workload::Workload;

/// One row of the rate-monotonic reference table
#[derive(Debug, Clone, Copy)]
pub struct RmsRow {
    pub name: &'static str,
    pub priority: Priority,
    pub period: u64,
    /// Work per release, in workload units
    pub units: u64,
    pub bits: u32,
    pub indicator: Indicator,
    pub timer_indicator: Indicator,
}

/// Rate-monotonic reference table, in creation order
pub const RMS_TABLE: [RmsRow; 3] = [
    RmsRow {
        name: "a",
        priority: Priority::BelowNormal,
        period: 40_000,
        units: 260,
        bits: 0x01,
        indicator: 0,
        timer_indicator: 5,
    },
    RmsRow {
        name: "b",
        priority: Priority::Normal,
        period: 40_000,
        units: 130,
        bits: 0x02,
        indicator: 1,
        timer_indicator: 6,
    },
    RmsRow {
        name: "c",
        priority: Priority::AboveNormal,
        period: 20_000,
        units: 65,
        bits: 0x03,
        indicator: 2,
        timer_indicator: 7,
    },
];

/// Ticks per workload unit for the reference run (U = 0.65)
pub const REFERENCE_TICKS_PER_UNIT: u64 = 50;

/// Started kernel running the rate-monotonic reference table.
///
/// `ticks_per_unit` scales every workload and so selects the utilization.
pub fn rms<B: Board, W: Workload>(
    config: KernelConfig,
    board: B,
    workload: W,
    ticks_per_unit: u64,
) -> Result<Kernel<B, W>, Error> {
    let mut kernel = Kernel::new(config, board, workload);
    for row in RMS_TABLE {
        let body = [
            Step::wait(Signals::mask(row.bits)),
            Step::execute(row.units * ticks_per_unit),
        ];
        let spec = TaskSpec::new(row.name, row.priority, &body)?.with_indicator(row.indicator);
        kernel.spawn(spec)?;
    }
    for row in RMS_TABLE {
        let timer = PeriodicTimer::new(TaskRef::Name(row.name), Signals::mask(row.bits))
            .with_indicator(row.timer_indicator);
        kernel.add_timer(timer, row.period)?;
    }
    kernel.start()?;
    Ok(kernel)
}

/// Work split of the inversion setup, in ticks
#[derive(Debug, Clone, Copy)]
pub struct InversionParams {
    /// H's own work before it needs L
    pub h_work: u64,
    /// M's work per loop (M never blocks)
    pub m_chunk: u64,
    /// L's work outside the shared interaction
    pub l_background: u64,
    /// L's work on behalf of H
    pub l_service: u64,
}

impl Default for InversionParams {
    fn default() -> Self {
        Self {
            h_work: 5,
            m_chunk: 7,
            l_background: 4,
            l_service: 3,
        }
    }
}

/// H → L request bit
pub const REQUEST: Signals = Signals::S0;
/// L → H completion bit
pub const DONE: Signals = Signals::S1;

/// Started kernel running the priority-inversion setup.
///
/// H brackets its request to L with elevate/restore; whether the bracket
/// has any effect is `config.priority_inheritance_enabled`.
pub fn inversion<B: Board, W: Workload>(
    config: KernelConfig,
    board: B,
    workload: W,
    params: InversionParams,
) -> Result<Kernel<B, W>, Error> {
    let mut kernel = Kernel::new(config, board, workload);

    let l = [
        Step::execute(params.l_background),
        Step::wait(REQUEST),
        Step::led(0, Level::Off),
        Step::execute(params.l_service),
        Step::signal("h", DONE),
    ];
    let m = [
        Step::led(1, Level::On),
        Step::led(1, Level::Off),
        Step::execute(params.m_chunk),
    ];
    let h = [
        Step::led(0, Level::On),
        Step::execute(params.h_work),
        Step::elevate("l", Priority::High),
        Step::signal("l", REQUEST),
        Step::wait(DONE),
        Step::restore("l"),
        Step::led(6, Level::On),
        Step::led(6, Level::Off),
    ];

    kernel.spawn(TaskSpec::new("l", Priority::BelowNormal, &l)?)?;
    kernel.spawn(TaskSpec::new("m", Priority::Normal, &m)?)?;
    kernel.spawn(TaskSpec::new("h", Priority::High, &h)?)?;
    kernel.start()?;
    Ok(kernel)
}
