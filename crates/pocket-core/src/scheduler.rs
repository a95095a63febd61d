//! The cycle clock shared by the CPU and its peripherals.
//!
//! Peripherals cooperate through an event-deadline protocol: each exposes a
//! `process_events(cycles, ..) -> i32` method that is handed the number of
//! CPU cycles elapsed since its last service, retires every deadline that
//! came due (possibly several, when the delta was large), and returns the
//! cycles until it next needs service. The dispatcher keeps
//! [`ClockDomain::next_event`] at the minimum of those returns and runs the
//! CPU that long before the next round. [`NO_EVENT`] means "do not call me
//! again until a register write reschedules".
//!
//! All deadline math is signed: a negative residual after a long delta means
//! the deadline was overshot by that many cycles and the peripheral catches
//! up during service.

use thiserror::Error;

/// DMG/CGB CPU frequency in Hz.
pub const CPU_CLOCK_HZ: u32 = 4_194_304;

/// Sentinel deadline for an unscheduled peripheral.
pub const NO_EVENT: i32 = i32::MAX;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ClockDomain {
    /// CPU cycles executed since the last dispatch round.
    pub cycles: i32,
    /// Cycles until the nearest peripheral deadline, measured from the start
    /// of the current round.
    pub next_event: i32,
}

impl ClockDomain {
    pub fn new() -> Self {
        Self {
            cycles: 0,
            next_event: 0,
        }
    }

    /// Lower the pending deadline so a register write takes effect at the
    /// next instruction boundary.
    #[inline]
    pub fn lower_next_event(&mut self, deadline: i32) {
        if deadline < self.next_event {
            self.next_event = deadline;
        }
    }

    /// Force a dispatch round at the next instruction boundary, returning
    /// the deadline a peripheral should adopt for itself.
    #[inline]
    pub fn schedule_now(&mut self) -> i32 {
        self.next_event = self.cycles;
        self.next_event
    }
}

impl Default for ClockDomain {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
/// Fatal core conditions observed by the dispatcher.
pub enum Fault {
    /// A peripheral returned a deadline already in the past without making
    /// progress; the scheduler cannot advance.
    #[error("scheduler stalled: nearest deadline is {0} cycles in the past")]
    StalledScheduler(i32),
}
