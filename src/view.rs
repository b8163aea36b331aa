//! Text rendering of the countdown and the task ledger.

use crate::countdown::Countdown;
use crate::ledger::Ledger;
use crate::models::{RunState, DURATION_CHOICES_MINS};
use crate::timer::{format_duration, format_time};
use chrono::NaiveDate;

const PROGRESS_WIDTH: usize = 20;

pub const HELP: &str = "\
Commands:
  add <name>          add a task
  list                show tasks
  select <n>          select task n for the next countdown
  delete <n> [n...]   delete tasks (asks for confirmation)
  start | pause | reset
  duration <minutes>  set the work interval (5 to 60, steps of 5)
  notify on|off       toggle desktop notifications
  status              show the countdown
  help                show this help
  quit                save and exit";

/// Formats the status line for the countdown.
pub fn format_status(countdown: &Countdown, ledger: &Ledger) -> String {
    let task = ledger
        .selected_task()
        .map(|t| t.name.as_str())
        .unwrap_or("no task selected");
    let remaining = format_time(countdown.remaining_secs());
    match countdown.run_state() {
        RunState::Idle => format!("Ready: {} ({})", remaining, task),
        RunState::Running => format!("⏱  {} remaining ({})", remaining, task),
        RunState::Paused => format!("⏸  {} paused ({})", remaining, task),
    }
}

/// Formats the progress bar for the countdown.
pub fn format_progress(countdown: &Countdown) -> String {
    let pct = countdown.progress().clamp(0.0, 1.0);
    let filled = (pct * PROGRESS_WIDTH as f32).round() as usize;
    let empty = PROGRESS_WIDTH - filled;
    format!(
        "{}{}  {}%",
        "█".repeat(filled),
        "░".repeat(empty),
        (pct * 100.0).round() as u32
    )
}

/// Formats the numbered task list with accumulated time.
pub fn format_task_list(ledger: &Ledger) -> String {
    if ledger.is_empty() {
        return "No tasks yet. Add one with `add <name>`.".to_string();
    }

    ledger
        .tasks()
        .iter()
        .enumerate()
        .map(|(index, task)| {
            let marker = if ledger.selected() == Some(&task.id) {
                '>'
            } else {
                ' '
            };
            let sessions = task.session_history.len();
            format!(
                "{} {:>2}. {}  {} ({} session{})",
                marker,
                index + 1,
                task.name,
                format_duration(task.time_spent),
                sessions,
                if sessions == 1 { "" } else { "s" }
            )
        })
        .collect::<Vec<_>>()
        .join("\n")
}

/// Formats the focus summary for a day.
pub fn format_today(ledger: &Ledger, today: NaiveDate) -> String {
    let sessions = ledger.sessions_on(today);
    if sessions == 0 {
        return "Today: —  0 (0 min)".to_string();
    }
    let tomatoes = "🍅".repeat(sessions.min(10));
    let extra = if sessions > 10 {
        format!("+{}", sessions - 10)
    } else {
        String::new()
    };
    format!(
        "Today: {}{}  {} ({} min)",
        tomatoes,
        extra,
        sessions,
        ledger.total_on(today) / 60
    )
}

/// Lists the selectable durations.
pub fn format_duration_choices() -> String {
    DURATION_CHOICES_MINS
        .iter()
        .map(|m| m.to_string())
        .collect::<Vec<_>>()
        .join(", ")
}
