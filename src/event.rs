//! User command parsing and handling.

use crate::app::{App, AppError};
use crate::models::TaskId;
use crate::view;
use chrono::Local;
use std::collections::HashSet;

/// A parsed user intent.
#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    Add(String),
    List,
    /// 1-based position in the task list.
    Select(usize),
    /// 1-based positions in the task list.
    Delete(Vec<usize>),
    Confirm,
    Cancel,
    Start,
    Pause,
    Reset,
    Duration(u32),
    Notify(bool),
    Status,
    Help,
    Quit,
}

/// Result of handling a command.
#[derive(Debug, Clone, PartialEq)]
pub enum EventResult {
    /// Nothing to report.
    Continue,
    /// User requested quit.
    Quit,
    /// Informational output for the user.
    Output(String),
    /// A precondition failed; nothing was changed.
    Notice(String),
}

/// Parses one input line. Returns an error message for unrecognized input.
pub fn parse_command(line: &str) -> Result<Option<Command>, String> {
    let line = line.trim();
    if line.is_empty() {
        return Ok(None);
    }

    let (word, rest) = match line.split_once(char::is_whitespace) {
        Some((word, rest)) => (word, rest.trim()),
        None => (line, ""),
    };

    let command = match word.to_ascii_lowercase().as_str() {
        "add" | "a" => Command::Add(rest.to_string()),
        "list" | "ls" | "l" => Command::List,
        "select" | "sel" => Command::Select(parse_position(rest)?),
        "delete" | "del" | "rm" => {
            let positions = rest
                .split_whitespace()
                .map(parse_position)
                .collect::<Result<Vec<_>, _>>()?;
            Command::Delete(positions)
        }
        "yes" | "y" => Command::Confirm,
        "no" | "n" => Command::Cancel,
        "start" | "s" => Command::Start,
        "pause" | "p" => Command::Pause,
        "reset" | "r" => Command::Reset,
        "duration" | "d" => Command::Duration(
            rest.parse()
                .map_err(|_| format!("Expected minutes, one of: {}", view::format_duration_choices()))?,
        ),
        "notify" => match rest {
            "on" => Command::Notify(true),
            "off" => Command::Notify(false),
            _ => return Err("Usage: notify on|off".to_string()),
        },
        "status" | "st" => Command::Status,
        "help" | "h" | "?" => Command::Help,
        "quit" | "q" | "exit" => Command::Quit,
        other => return Err(format!("Unknown command `{}`. Type `help`.", other)),
    };
    Ok(Some(command))
}

fn parse_position(s: &str) -> Result<usize, String> {
    match s.parse::<usize>() {
        Ok(n) if n > 0 => Ok(n),
        _ => Err(format!("`{}` is not a task number", s)),
    }
}

/// Interaction state that outlives a single command.
#[derive(Debug, Default)]
pub struct Console {
    /// Tasks staged for deletion, waiting for confirmation.
    pending_delete: Option<HashSet<TaskId>>,
}

impl Console {
    pub fn new() -> Self {
        Self::default()
    }

    #[cfg(test)]
    pub fn has_pending_delete(&self) -> bool {
        self.pending_delete.is_some()
    }

    /// Handles a command and updates the app state accordingly.
    pub fn handle(&mut self, app: &mut App, command: Command) -> EventResult {
        // Any command other than a confirmation abandons a staged deletion
        let pending = self.pending_delete.take();

        match command {
            Command::Add(name) => match app.add_task(&name) {
                Ok(_) => EventResult::Output(view::format_task_list(&app.ledger)),
                Err(e) => notice(e),
            },
            Command::List => EventResult::Output(view::format_task_list(&app.ledger)),
            Command::Select(position) => match task_at(app, position) {
                Some(id) => {
                    app.select_task(id);
                    EventResult::Output(view::format_task_list(&app.ledger))
                }
                None => EventResult::Notice(format!("There is no task {}", position)),
            },
            Command::Delete(positions) => self.stage_delete(app, &positions),
            Command::Confirm => match pending {
                Some(ids) => {
                    let removed = app.delete_tasks(&ids);
                    EventResult::Output(format!(
                        "Deleted {} task(s).\n{}",
                        removed,
                        view::format_task_list(&app.ledger)
                    ))
                }
                None => EventResult::Notice("Nothing to confirm".to_string()),
            },
            Command::Cancel => match pending {
                Some(_) => EventResult::Output("Deletion cancelled".to_string()),
                None => EventResult::Continue,
            },
            Command::Start => match app.start() {
                Ok(()) => EventResult::Output(view::format_status(&app.countdown, &app.ledger)),
                Err(e) => notice(e),
            },
            Command::Pause => {
                app.pause();
                EventResult::Output(view::format_status(&app.countdown, &app.ledger))
            }
            Command::Reset => {
                app.reset();
                EventResult::Output(view::format_status(&app.countdown, &app.ledger))
            }
            Command::Duration(mins) => match app.set_duration(mins) {
                Ok(()) => EventResult::Output(view::format_status(&app.countdown, &app.ledger)),
                Err(e) => notice(e),
            },
            Command::Notify(enabled) => {
                app.update_setting(|s| s.notifications_enabled = enabled);
                EventResult::Output(format!(
                    "Notifications {}",
                    if enabled { "on" } else { "off" }
                ))
            }
            Command::Status => EventResult::Output(format!(
                "{}\n{}\n{}",
                view::format_status(&app.countdown, &app.ledger),
                view::format_progress(&app.countdown),
                view::format_today(&app.ledger, Local::now().date_naive())
            )),
            Command::Help => EventResult::Output(view::HELP.to_string()),
            Command::Quit => EventResult::Quit,
        }
    }

    fn stage_delete(&mut self, app: &App, positions: &[usize]) -> EventResult {
        if positions.is_empty() {
            return EventResult::Notice("Select at least one task to delete".to_string());
        }

        let mut ids = HashSet::new();
        for &position in positions {
            match task_at(app, position) {
                Some(id) => {
                    ids.insert(id);
                }
                None => return EventResult::Notice(format!("There is no task {}", position)),
            }
        }

        let count = ids.len();
        self.pending_delete = Some(ids);
        EventResult::Output(format!("Delete {} task(s)? [yes/no]", count))
    }
}

fn task_at(app: &App, position: usize) -> Option<TaskId> {
    position
        .checked_sub(1)
        .and_then(|index| app.ledger.tasks().get(index))
        .map(|t| t.id.clone())
}

fn notice(error: AppError) -> EventResult {
    EventResult::Notice(error.to_string())
}
