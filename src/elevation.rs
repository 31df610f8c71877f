//! Priority elevation manager
//!
//! Bounds priority inversion: a low-priority holder serving a blocked
//! high-priority requester is raised for exactly the bracketed window and
//! restored to its recorded priority afterwards. The manager is the only
//! writer of a task's effective priority.
//!
//! Author: Moroya Sakamoto

use crate::config::MAX_TASKS;
use crate::error::ElevationMisuse;
use crate::task::{Priority, Task, TaskId};

/// An active elevation (one per holder, no nesting)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ElevationRecord {
    pub holder: TaskId,
    /// Priority restored at the end of the window
    pub original: Priority,
    pub elevated: Priority,
    /// Instant the window opened
    pub since: u64,
}

/// Elevation bookkeeping for every task slot
pub struct ElevationManager {
    /// Active records, indexed by holder slot
    records: [Option<ElevationRecord>; MAX_TASKS],
    /// Windows opened
    pub elevations: u32,
    /// Windows closed
    pub restores: u32,
}

impl ElevationManager {
    pub const fn new() -> Self {
        Self {
            records: [None; MAX_TASKS],
            elevations: 0,
            restores: 0,
        }
    }

    /// Raise `holder` to `to` on behalf of a requester at `requester`
    ///
    /// `to` must be at least the requester's priority and never below the
    /// holder's own priority.
    pub fn elevate(
        &mut self,
        holder: &mut Task,
        to: Priority,
        requester: Priority,
        now: u64,
    ) -> Result<ElevationRecord, ElevationMisuse> {
        let slot = holder.id.index();
        if self.records[slot].is_some() {
            return Err(ElevationMisuse::AlreadyElevated { task: holder.id });
        }
        if to < holder.priority {
            return Err(ElevationMisuse::BelowOriginal {
                task: holder.id,
                requested: to,
                original: holder.priority,
            });
        }
        if to < requester {
            return Err(ElevationMisuse::BelowRequester {
                task: holder.id,
                requested: to,
                requester,
            });
        }

        let record = ElevationRecord {
            holder: holder.id,
            original: holder.effective,
            elevated: to,
            since: now,
        };
        self.records[slot] = Some(record);
        holder.effective = to;
        self.elevations += 1;
        Ok(record)
    }

    /// Close the window: `holder` returns to its recorded priority
    pub fn restore(&mut self, holder: &mut Task) -> Result<ElevationRecord, ElevationMisuse> {
        let record = self.records[holder.id.index()]
            .take()
            .ok_or(ElevationMisuse::NotElevated { task: holder.id })?;
        holder.effective = record.original;
        self.restores += 1;
        Ok(record)
    }

    /// Active record of `holder`, if any
    pub fn record(&self, holder: TaskId) -> Option<&ElevationRecord> {
        self.records.get(holder.index()).and_then(Option::as_ref)
    }

    /// Number of open windows
    pub fn active(&self) -> usize {
        self.records.iter().filter(|r| r.is_some()).count()
    }
}

impl Default for ElevationManager {
    fn default() -> Self {
        Self::new()
    }
}
