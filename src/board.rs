//! Board collaborator — indicator actuation plus idle/error hooks
//!
//! Purely observational: the kernel never reads anything back.
//!
//! Author: Moroya Sakamoto

use crate::error::Error;

/// Indicator (LED) number on the board
pub type Indicator = u8;

/// Indicator level
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Level {
    Off,
    On,
}

/// Environment sink driven by the kernel
pub trait Board {
    /// Drive an indicator. Fire-and-forget.
    fn set(&mut self, indicator: Indicator, level: Level);

    /// Called for every tick on which no task is ready
    fn on_idle(&mut self, _now: u64) {}

    /// Called for every reported (non-fatal) error
    fn on_error(&mut self, _now: u64, _error: &Error) {}
}

/// Board with nothing attached
#[derive(Debug, Default, Clone, Copy)]
pub struct NullBoard;

impl Board for NullBoard {
    #[inline]
    fn set(&mut self, _indicator: Indicator, _level: Level) {}
}
