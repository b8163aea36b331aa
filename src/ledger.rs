//! Task ledger: tasks, their accumulated time and session history.

use crate::models::{Session, Task, TaskId};
use chrono::{DateTime, NaiveDate, Utc};
use std::collections::HashSet;
use thiserror::Error;
use uuid::Uuid;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum LedgerError {
    #[error("Task name cannot be empty")]
    InvalidName,
    #[error("No task with id {0}")]
    UnknownTask(TaskId),
}

/// Ordered collection of tasks plus the current selection.
#[derive(Debug, Clone, Default)]
pub struct Ledger {
    tasks: Vec<Task>,
    selected: Option<TaskId>,
}

impl Ledger {
    #[cfg(test)]
    pub fn new() -> Self {
        Self::default()
    }

    /// Builds a ledger from already verified tasks.
    pub fn from_tasks(tasks: Vec<Task>) -> Self {
        Self {
            tasks,
            selected: None,
        }
    }

    /// Tasks in insertion order.
    pub fn tasks(&self) -> &[Task] {
        &self.tasks
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }

    pub fn get(&self, id: &TaskId) -> Option<&Task> {
        self.tasks.iter().find(|t| &t.id == id)
    }

    pub fn selected(&self) -> Option<&TaskId> {
        self.selected.as_ref()
    }

    pub fn selected_task(&self) -> Option<&Task> {
        self.selected.as_ref().and_then(|id| self.get(id))
    }

    /// Creates a task with the trimmed name and appends it.
    pub fn add_task(&mut self, name: &str, now: DateTime<Utc>) -> Result<TaskId, LedgerError> {
        let name = name.trim();
        if name.is_empty() {
            return Err(LedgerError::InvalidName);
        }

        let id = self.next_id(now);
        self.tasks.push(Task::new(id.clone(), name));
        log::debug!("Added task {} ({})", id, name);
        Ok(id)
    }

    /// Creation-time id, bumped past the newest numeric id so ids stay unique
    /// and ordered even when two tasks share a millisecond.
    fn next_id(&self, now: DateTime<Utc>) -> TaskId {
        let millis = u64::try_from(now.timestamp_millis()).unwrap_or(0);
        let newest = self.tasks.iter().filter_map(|t| t.id.as_num()).max();
        match newest {
            Some(newest) if newest >= millis => TaskId::Num(newest + 1),
            _ => TaskId::Num(millis),
        }
    }

    /// Selects a task. Unknown ids are ignored.
    pub fn select_task(&mut self, id: TaskId) {
        if self.get(&id).is_some() {
            self.selected = Some(id);
        } else {
            log::debug!("Ignoring selection of unknown task {}", id);
        }
    }

    /// Appends a completed session to a task and accumulates its duration.
    pub fn record_completed_session(
        &mut self,
        id: &TaskId,
        duration_secs: u32,
        now: DateTime<Utc>,
    ) -> Result<Session, LedgerError> {
        let task = self
            .tasks
            .iter_mut()
            .find(|t| &t.id == id)
            .ok_or_else(|| LedgerError::UnknownTask(id.clone()))?;

        let session = Session {
            id: Uuid::new_v4().to_string(),
            duration: duration_secs,
            completed_at: now,
        };
        task.session_history.push(session.clone());
        task.time_spent += u64::from(duration_secs);
        Ok(session)
    }

    /// Removes every listed task, clearing the selection if it was removed.
    /// Returns the number of tasks removed.
    pub fn delete_tasks(&mut self, ids: &HashSet<TaskId>) -> usize {
        if ids.is_empty() {
            return 0;
        }

        let before = self.tasks.len();
        self.tasks.retain(|t| !ids.contains(&t.id));
        if self.selected.as_ref().is_some_and(|id| ids.contains(id)) {
            self.selected = None;
        }
        before - self.tasks.len()
    }

    /// Seconds of focus completed across all tasks on the given local date.
    pub fn total_on(&self, date: NaiveDate) -> u64 {
        self.tasks.iter().map(|t| t.time_on(date)).sum()
    }

    /// Number of sessions completed across all tasks on the given local date.
    pub fn sessions_on(&self, date: NaiveDate) -> usize {
        self.tasks
            .iter()
            .flat_map(|t| t.session_history.iter())
            .filter(|s| s.local_date() == date)
            .count()
    }
}
