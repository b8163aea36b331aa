//! Countdown state machine.
//!
//! Remaining time is never decremented per tick. While running it is derived
//! from an anchor `(wall-clock time, remaining seconds)` captured at start, so
//! a refresh that arrives late (suspended process, throttled thread) lands on
//! the correct value immediately.
//!
//! ```text
//! Idle/Paused --start--> Running --pause--> Paused
//! Running/Paused --reset--> Idle
//! Running --(remaining hits zero)--> Idle
//! ```

use crate::clock::SharedClock;
use crate::models::{is_valid_duration, RunState, TaskId};
use chrono::{DateTime, Utc};
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum TimerError {
    #[error("Select a task before starting the timer")]
    NoTaskSelected,
    #[error("{0} minutes is not a selectable duration")]
    InvalidDuration(u32),
    #[error("Reset the timer before changing its duration")]
    DurationLocked,
}

/// Wall-clock time and remaining seconds captured at start.
#[derive(Debug, Clone, Copy, PartialEq)]
struct Anchor {
    at: DateTime<Utc>,
    remaining_secs: u32,
}

/// A countdown that reached zero.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Expired {
    /// Configured length of the countdown that just finished.
    pub duration_secs: u32,
    pub at: DateTime<Utc>,
}

pub struct Countdown {
    clock: SharedClock,
    configured_secs: u32,
    remaining_secs: u32,
    run_state: RunState,
    anchor: Option<Anchor>,
}

impl Countdown {
    /// Creates an idle countdown. Invalid durations fall back to the default.
    pub fn new(clock: SharedClock, duration_mins: u32) -> Self {
        let mins = if is_valid_duration(duration_mins) {
            duration_mins
        } else {
            crate::models::DEFAULT_DURATION_MINS
        };
        Self {
            clock,
            configured_secs: mins * 60,
            remaining_secs: mins * 60,
            run_state: RunState::Idle,
            anchor: None,
        }
    }

    pub fn run_state(&self) -> RunState {
        self.run_state
    }

    #[cfg(test)]
    pub fn configured_secs(&self) -> u32 {
        self.configured_secs
    }

    /// Remaining seconds, recomputed from the anchor while running.
    pub fn remaining_secs(&self) -> u32 {
        match self.anchor {
            Some(anchor) if self.run_state.is_running() => self.remaining_at(anchor),
            _ => self.remaining_secs,
        }
    }

    /// Fraction of the configured duration already elapsed (0.0 to 1.0).
    pub fn progress(&self) -> f32 {
        if self.configured_secs == 0 {
            return 1.0;
        }
        1.0 - (self.remaining_secs() as f32 / self.configured_secs as f32)
    }

    fn remaining_at(&self, anchor: Anchor) -> u32 {
        // A clock stepping backwards counts as no time elapsed.
        let elapsed_ms = (self.clock.now() - anchor.at).num_milliseconds().max(0);
        let elapsed_secs = u32::try_from(elapsed_ms / 1000).unwrap_or(u32::MAX);
        anchor.remaining_secs.saturating_sub(elapsed_secs)
    }

    /// Starts or resumes the countdown for the selected task.
    ///
    /// Starting while already running re-anchors from the current remaining
    /// value instead of running a second countdown.
    pub fn start(&mut self, selected: Option<&TaskId>) -> Result<(), TimerError> {
        if selected.is_none() {
            return Err(TimerError::NoTaskSelected);
        }

        let mut remaining = self.remaining_secs();
        if remaining == 0 || remaining > self.configured_secs {
            remaining = self.configured_secs;
        }

        self.remaining_secs = remaining;
        self.anchor = Some(Anchor {
            at: self.clock.now(),
            remaining_secs: remaining,
        });
        self.run_state = RunState::Running;
        Ok(())
    }

    /// Freezes the countdown at its current remaining value.
    pub fn pause(&mut self) {
        if self.run_state.is_running() {
            self.remaining_secs = self.remaining_secs();
            self.anchor = None;
            self.run_state = RunState::Paused;
        }
    }

    /// Stops the countdown and restores the full configured duration.
    pub fn reset(&mut self) {
        self.anchor = None;
        self.run_state = RunState::Idle;
        self.remaining_secs = self.configured_secs;
    }

    /// Changes the configured duration. Only allowed while idle.
    pub fn set_duration_mins(&mut self, mins: u32) -> Result<(), TimerError> {
        if !is_valid_duration(mins) {
            return Err(TimerError::InvalidDuration(mins));
        }
        if !self.run_state.is_idle() {
            return Err(TimerError::DurationLocked);
        }
        self.configured_secs = mins * 60;
        self.remaining_secs = self.configured_secs;
        Ok(())
    }

    /// Recomputes remaining time against the anchor.
    ///
    /// Returns `Some` exactly once per countdown, when the recomputed value
    /// reaches zero; the countdown is then idle with the full duration restored.
    pub fn poll(&mut self) -> Option<Expired> {
        let anchor = self.anchor?;
        if !self.run_state.is_running() {
            return None;
        }

        self.remaining_secs = self.remaining_at(anchor);
        if self.remaining_secs > 0 {
            return None;
        }

        let expired = Expired {
            duration_secs: self.configured_secs,
            at: self.clock.now(),
        };
        self.reset();
        Some(expired)
    }
}
