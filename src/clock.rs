//! Wall-clock source and foreground visibility notifications.

use chrono::{DateTime, Utc};
use std::sync::Arc;

/// Source of wall-clock time.
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

/// Clock shared between the countdown, the ledger and the coordinator.
pub type SharedClock = Arc<dyn Clock>;

/// Reads the system clock.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// Manually advanced clock (for testing).
#[cfg(test)]
#[derive(Debug, Clone)]
pub struct ManualClock {
    now: Arc<std::sync::Mutex<DateTime<Utc>>>,
}

#[cfg(test)]
impl ManualClock {
    pub fn new(start: DateTime<Utc>) -> Self {
        Self {
            now: Arc::new(std::sync::Mutex::new(start)),
        }
    }

    /// A clock starting at a fixed, arbitrary instant.
    pub fn fixed() -> Self {
        use chrono::TimeZone;
        Self::new(Utc.with_ymd_and_hms(2024, 1, 15, 9, 0, 0).unwrap())
    }

    pub fn advance_secs(&self, secs: i64) {
        let mut now = self.now.lock().unwrap();
        *now += chrono::Duration::seconds(secs);
    }

    pub fn advance_millis(&self, millis: i64) {
        let mut now = self.now.lock().unwrap();
        *now += chrono::Duration::milliseconds(millis);
    }

    pub fn shared(&self) -> SharedClock {
        Arc::new(self.clone())
    }
}

#[cfg(test)]
impl Clock for ManualClock {
    fn now(&self) -> DateTime<Utc> {
        *self.now.lock().unwrap()
    }
}

type Callback = Box<dyn FnMut() + Send>;

/// Tracks whether the process is in the foreground and notifies on transitions.
///
/// Callbacks fire once per transition: repeated `mark_hidden` or
/// `mark_visible` calls without an intervening opposite call are ignored.
pub struct VisibilityWatch {
    visible: bool,
    on_hidden: Vec<Callback>,
    on_restored: Vec<Callback>,
}

impl Default for VisibilityWatch {
    fn default() -> Self {
        Self::new()
    }
}

impl VisibilityWatch {
    pub fn new() -> Self {
        Self {
            visible: true,
            on_hidden: Vec::new(),
            on_restored: Vec::new(),
        }
    }

    #[cfg(test)]
    pub fn is_visible(&self) -> bool {
        self.visible
    }

    /// Registers a callback invoked when the process loses the foreground.
    pub fn on_hidden<F>(&mut self, callback: F)
    where
        F: FnMut() + Send + 'static,
    {
        self.on_hidden.push(Box::new(callback));
    }

    /// Registers a callback invoked when the process regains the foreground.
    pub fn on_visibility_restored<F>(&mut self, callback: F)
    where
        F: FnMut() + Send + 'static,
    {
        self.on_restored.push(Box::new(callback));
    }

    pub fn mark_hidden(&mut self) {
        if !self.visible {
            return;
        }
        self.visible = false;
        for callback in &mut self.on_hidden {
            callback();
        }
    }

    pub fn mark_visible(&mut self) {
        if self.visible {
            return;
        }
        self.visible = true;
        for callback in &mut self.on_restored {
            callback();
        }
    }
}
