//! Non-blocking "run every N milliseconds" primitive.
//!
//! The caller owns one [`ScheduleState`] per periodic task and hands it to
//! [`run_if_elapsed`] on every pass through the control loop. A fresh state
//! holds zero, so a task first fires once the clock reaches its interval.

use crate::clock::Clock;
use serde::{Deserialize, Serialize};

/// "Last fired at" timestamp of a periodic task, in clock milliseconds.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScheduleState {
    last_fired_ms: u32,
}

impl ScheduleState {
    pub const fn new() -> Self {
        Self { last_fired_ms: 0 }
    }

    /// State that counts its interval from `now_ms`.
    pub const fn starting_at(now_ms: u32) -> Self {
        Self { last_fired_ms: now_ms }
    }

    pub fn last_fired_ms(&self) -> u32 {
        self.last_fired_ms
    }

    /// Returns true and records `now_ms` when `interval_ms` has elapsed.
    ///
    /// A clock that reads lower than the stored timestamp has wrapped. The
    /// stored value is reset to zero and the overflow counts as an immediate
    /// elapse, whatever the interval; no wrapped difference is computed.
    pub fn check(&mut self, now_ms: u32, interval_ms: u32) -> bool {
        let wrapped = now_ms < self.last_fired_ms;
        if wrapped {
            self.last_fired_ms = 0;
        }

        if wrapped || now_ms - self.last_fired_ms >= interval_ms {
            self.last_fired_ms = now_ms;
            true
        } else {
            false
        }
    }
}

/// Runs `action` at most once if `interval_ms` has elapsed since the state last fired.
///
/// Returns whether the action ran.
pub fn run_if_elapsed<C, F>(clock: &C, state: &mut ScheduleState, interval_ms: u32, action: F) -> bool
where
    C: Clock + ?Sized,
    F: FnOnce(),
{
    if state.check(clock.millis(), interval_ms) {
        action();
        true
    } else {
        false
    }
}

/// A [`ScheduleState`] bundled with its interval.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Interval {
    state: ScheduleState,
    interval_ms: u32,
}

impl Interval {
    pub const fn new(interval_ms: u32) -> Self {
        Self {
            state: ScheduleState::new(),
            interval_ms,
        }
    }

    pub fn interval_ms(&self) -> u32 {
        self.interval_ms
    }

    pub fn state(&self) -> ScheduleState {
        self.state
    }

    /// Returns true when the interval has elapsed, re-arming it.
    pub fn due<C: Clock + ?Sized>(&mut self, clock: &C) -> bool {
        self.state.check(clock.millis(), self.interval_ms)
    }

    pub fn run<C, F>(&mut self, clock: &C, action: F) -> bool
    where
        C: Clock + ?Sized,
        F: FnOnce(),
    {
        run_if_elapsed(clock, &mut self.state, self.interval_ms, action)
    }
}
