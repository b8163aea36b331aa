//! Main application state and logic.

use crate::clock::SharedClock;
use crate::countdown::{Countdown, Expired, TimerError};
use crate::identity::{cache_identity, resolve_identity, IdentityProvider};
use crate::ledger::{Ledger, LedgerError};
use crate::models::{Settings, TaskId};
use crate::persistence::{Gateway, KeyValueStore, LoadSource, SaveOutcome};
use chrono::{DateTime, Utc};
use std::collections::HashSet;
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum AppError {
    #[error(transparent)]
    Timer(#[from] TimerError),
    #[error(transparent)]
    Ledger(#[from] LedgerError),
}

/// Emitted once when a work interval completes.
#[derive(Debug, Clone, PartialEq)]
pub struct CompletionEvent {
    /// Task the session was recorded against, if it still existed.
    pub task_id: Option<TaskId>,
    pub task_name: Option<String>,
    pub duration_secs: u32,
    pub completed_at: DateTime<Utc>,
}

/// Result of one periodic refresh.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Tick {
    /// Countdown is running and its display needs refreshing.
    pub changed: bool,
    pub completion: Option<CompletionEvent>,
}

/// Timer, ledger and persistence owned together.
pub struct App {
    pub countdown: Countdown,
    pub ledger: Ledger,
    pub settings: Settings,
    pub gateway: Gateway,
    clock: SharedClock,
    last_save: DateTime<Utc>,
}

impl App {
    /// Resolves the identity, loads settings and the ledger, and builds the app.
    ///
    /// Storage problems degrade to defaults and an empty ledger; this never fails.
    pub fn new(
        clock: SharedClock,
        store: Box<dyn KeyValueStore>,
        provider: Option<&dyn IdentityProvider>,
    ) -> Self {
        let identity = resolve_identity(store.as_ref(), provider, clock.now());
        let gateway = Gateway::new(store, identity, SharedClock::clone(&clock));
        let settings = gateway.load_settings();

        let loaded = gateway.load();
        match loaded.source {
            LoadSource::Backup => log::warn!("Ledger recovered from backup"),
            LoadSource::Legacy => log::info!("Ledger imported from legacy storage"),
            LoadSource::Primary | LoadSource::Empty => {}
        }
        if loaded.repaired {
            log::warn!("Repaired malformed tasks in the stored ledger");
        }
        log::info!(
            "Loaded {} tasks for {}",
            loaded.tasks.len(),
            gateway.identity()
        );

        Self {
            countdown: Countdown::new(SharedClock::clone(&clock), settings.duration_mins),
            ledger: Ledger::from_tasks(loaded.tasks),
            settings,
            gateway,
            last_save: clock.now(),
            clock,
        }
    }

    /// Switches to an identity resolved after startup, carrying the ledger
    /// over to its slot and caching it for later runs.
    pub fn adopt_identity(&mut self, identity: String) {
        if identity.trim().is_empty() || identity == self.gateway.identity() {
            return;
        }
        self.last_save = self.clock.now();
        self.gateway.rebind(identity, self.ledger.tasks());
        cache_identity(self.gateway.store(), self.gateway.identity());
    }

    #[cfg(test)]
    pub fn run_state(&self) -> crate::models::RunState {
        self.countdown.run_state()
    }

    /// Starts or resumes the countdown for the selected task.
    pub fn start(&mut self) -> Result<(), AppError> {
        self.countdown.start(self.ledger.selected())?;
        Ok(())
    }

    pub fn pause(&mut self) {
        self.countdown.pause();
    }

    pub fn reset(&mut self) {
        self.countdown.reset();
    }

    /// Changes the work-interval length and saves it as a setting.
    pub fn set_duration(&mut self, mins: u32) -> Result<(), AppError> {
        self.countdown.set_duration_mins(mins)?;
        self.update_setting(|s| s.duration_mins = mins);
        Ok(())
    }

    /// Updates a setting and saves it.
    pub fn update_setting<F>(&mut self, updater: F)
    where
        F: FnOnce(&mut Settings),
    {
        updater(&mut self.settings);
        if let Err(e) = self.gateway.save_settings(&self.settings) {
            log::warn!("Failed to save settings: {}", e);
        }
    }

    pub fn add_task(&mut self, name: &str) -> Result<TaskId, AppError> {
        let id = self.ledger.add_task(name, self.clock.now())?;
        self.persist();
        Ok(id)
    }

    pub fn select_task(&mut self, id: TaskId) {
        self.ledger.select_task(id);
    }

    /// Deletes the given tasks. Returns how many were removed.
    pub fn delete_tasks(&mut self, ids: &HashSet<TaskId>) -> usize {
        if ids.is_empty() {
            return 0;
        }
        let removed = self.ledger.delete_tasks(ids);
        self.persist();
        removed
    }

    /// Recomputes the countdown, completing it if it reached zero, and runs
    /// the periodic autosave when due.
    pub fn tick(&mut self) -> Tick {
        let completion = self.countdown.poll().map(|expired| self.complete(expired));
        let changed = completion.is_some() || self.countdown.run_state().is_running();

        if self.autosave_due() {
            log::debug!("Periodic autosave");
            self.persist();
        }

        Tick {
            changed,
            completion,
        }
    }

    /// Recomputes immediately after a suspension, completing the countdown
    /// if it ran out while the process was not being scheduled.
    pub fn catch_up(&mut self) -> Option<CompletionEvent> {
        self.countdown.poll().map(|expired| self.complete(expired))
    }

    fn complete(&mut self, expired: Expired) -> CompletionEvent {
        let mut event = CompletionEvent {
            task_id: None,
            task_name: None,
            duration_secs: expired.duration_secs,
            completed_at: expired.at,
        };

        match self.ledger.selected().cloned() {
            Some(id) => match self
                .ledger
                .record_completed_session(&id, expired.duration_secs, expired.at)
            {
                Ok(_) => {
                    event.task_name = self.ledger.get(&id).map(|t| t.name.clone());
                    event.task_id = Some(id);
                    self.persist();
                }
                Err(e) => log::warn!("Session not recorded: {}", e),
            },
            None => log::warn!("Session completed with no task selected"),
        }

        event
    }

    fn autosave_due(&self) -> bool {
        if self.ledger.is_empty() {
            return false;
        }
        let elapsed = self.clock.now() - self.last_save;
        elapsed.num_seconds() >= i64::from(self.settings.autosave_secs)
    }

    /// Saves the ledger snapshot.
    pub fn persist(&mut self) -> SaveOutcome {
        self.last_save = self.clock.now();
        self.gateway.save(self.ledger.tasks())
    }

    /// Saves before the process loses the foreground or exits.
    pub fn shutdown(&mut self) {
        if !self.countdown.run_state().is_idle() {
            log::info!("Discarding unfinished countdown");
        }
        self.persist();
    }
}
