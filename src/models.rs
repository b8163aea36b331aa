//! Data models for the Pomoledger application.

use chrono::{DateTime, Local, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Selectable work-interval lengths in minutes.
pub const DURATION_CHOICES_MINS: [u32; 12] = [5, 10, 15, 20, 25, 30, 35, 40, 45, 50, 55, 60];

/// Default work-interval length in minutes.
pub const DEFAULT_DURATION_MINS: u32 = 25;

/// Returns true if `mins` is one of the selectable work-interval lengths.
pub fn is_valid_duration(mins: u32) -> bool {
    DURATION_CHOICES_MINS.contains(&mins)
}

/// Identifier of a task.
///
/// New tasks are numbered by creation time in milliseconds. Stored ledgers may
/// also carry string ids; those are kept and written back as strings.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(untagged)]
pub enum TaskId {
    Num(u64),
    Str(String),
}

impl TaskId {
    /// Numeric value of a creation-time id.
    pub fn as_num(&self) -> Option<u64> {
        match self {
            Self::Num(n) => Some(*n),
            Self::Str(_) => None,
        }
    }
}

impl fmt::Display for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Num(n) => write!(f, "{}", n),
            Self::Str(s) => f.write_str(s),
        }
    }
}

/// One completed countdown attributed to a task.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Session {
    pub id: String,
    /// Length of the countdown in seconds.
    pub duration: u32,
    pub completed_at: DateTime<Utc>,
}

impl Session {
    /// Local calendar date of completion, derived for display.
    pub fn local_date(&self) -> NaiveDate {
        self.completed_at.with_timezone(&Local).date_naive()
    }
}

/// A user-defined unit of work tracked for accumulated focused time.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Task {
    pub id: TaskId,
    pub name: String,
    /// Total seconds of all completed sessions.
    pub time_spent: u64,
    pub session_history: Vec<Session>,
}

impl Task {
    pub fn new(id: TaskId, name: impl Into<String>) -> Self {
        Self {
            id,
            name: name.into(),
            time_spent: 0,
            session_history: Vec::new(),
        }
    }

    /// Sum of all recorded session durations.
    pub fn history_total(&self) -> u64 {
        self.session_history
            .iter()
            .map(|s| u64::from(s.duration))
            .sum()
    }

    /// Seconds of focus completed on the given local date.
    pub fn time_on(&self, date: NaiveDate) -> u64 {
        self.session_history
            .iter()
            .filter(|s| s.local_date() == date)
            .map(|s| u64::from(s.duration))
            .sum()
    }
}

/// Run state of the countdown.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RunState {
    /// No countdown active.
    #[default]
    Idle,
    /// Countdown advancing.
    Running,
    /// Countdown frozen, resumable with a fresh start.
    Paused,
}

impl RunState {
    pub fn is_idle(&self) -> bool {
        matches!(self, Self::Idle)
    }

    pub fn is_running(&self) -> bool {
        matches!(self, Self::Running)
    }

    #[cfg(test)]
    pub fn is_paused(&self) -> bool {
        matches!(self, Self::Paused)
    }
}

/// User-configurable settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct Settings {
    /// Length of a work interval in minutes.
    pub duration_mins: u32,
    /// Seconds between periodic autosaves.
    pub autosave_secs: u32,
    /// Whether to show a desktop notification when a session completes.
    pub notifications_enabled: bool,
    /// Whether to ask the network for a public address when no identity is cached.
    pub identity_lookup: bool,
    /// Timeout for the identity lookup in milliseconds.
    pub identity_timeout_ms: u64,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            duration_mins: DEFAULT_DURATION_MINS,
            autosave_secs: 30,
            notifications_enabled: true,
            identity_lookup: true,
            identity_timeout_ms: 3000,
        }
    }
}

impl Settings {
    /// Replaces out-of-range values with defaults.
    /// Returns true if anything was changed.
    pub fn sanitize(&mut self) -> bool {
        let defaults = Self::default();
        let mut changed = false;
        if !is_valid_duration(self.duration_mins) {
            self.duration_mins = defaults.duration_mins;
            changed = true;
        }
        if self.autosave_secs == 0 {
            self.autosave_secs = defaults.autosave_secs;
            changed = true;
        }
        changed
    }
}
