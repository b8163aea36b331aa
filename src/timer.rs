//! Timer tick loop for refreshing the countdown.

use crate::app::{App, CompletionEvent};
use crate::clock::{SharedClock, VisibilityWatch};
use crate::countdown::Countdown;
use crate::models::RunState;
use chrono::{DateTime, Utc};
use std::sync::mpsc::Sender;
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

const TICK_INTERVAL: Duration = Duration::from_secs(1);

/// Gap between ticks, in seconds, taken to mean the process was suspended.
const SUSPEND_GAP_SECS: i64 = 5;

/// Message sent from the timer thread to the main thread.
#[derive(Debug, Clone)]
pub enum TimerMessage {
    /// Countdown display needs an update.
    StateChanged { title: String },
    /// A work interval completed.
    Completed(CompletionEvent),
}

/// Runs the timer loop, refreshing every second.
///
/// Wall-clock gaps much longer than the tick interval mean the thread was not
/// scheduled (system sleep, stopped process). Those are reported to `watch` as
/// a lost and regained foreground so its callbacks can save and catch up.
/// Returns when the receiving side of `tx` is gone.
pub fn run_timer_loop(
    app: Arc<Mutex<App>>,
    clock: SharedClock,
    mut watch: VisibilityWatch,
    tx: Sender<TimerMessage>,
) {
    let mut last = clock.now();
    loop {
        thread::sleep(TICK_INTERVAL);

        let now = clock.now();
        if was_suspended(last, now) {
            log::info!("Resumed after {}s without ticks", (now - last).num_seconds());
            watch.mark_hidden();
            watch.mark_visible();
        }
        last = now;

        let messages = {
            let Ok(mut app) = app.lock() else {
                log::error!("App state poisoned; stopping timer loop");
                return;
            };

            let tick = app.tick();
            let mut messages = Vec::new();
            if let Some(event) = tick.completion {
                messages.push(TimerMessage::Completed(event));
            }
            if tick.changed {
                let title = format_title(&app.countdown);
                messages.push(TimerMessage::StateChanged { title });
            }
            messages
        };

        for msg in messages {
            if tx.send(msg).is_err() {
                return;
            }
        }
    }
}

/// Returns true if the wall-clock gap between two ticks indicates suspension.
pub fn was_suspended(last: DateTime<Utc>, now: DateTime<Utc>) -> bool {
    (now - last).num_seconds() >= SUSPEND_GAP_SECS
}

/// Formats the window title based on the countdown state.
pub fn format_title(countdown: &Countdown) -> String {
    let remaining = countdown.remaining_secs();
    match countdown.run_state() {
        RunState::Idle => "🍅".to_string(),
        RunState::Running => format!("🍅 {}", format_time(remaining)),
        RunState::Paused => format!("⏸ {}", format_time(remaining)),
    }
}

/// Formats time in MM:SS format.
pub fn format_time(secs: u32) -> String {
    format!("{:02}:{:02}", secs / 60, secs % 60)
}

/// Formats an accumulated duration as HH:MM:SS, or MM:SS below one hour.
pub fn format_duration(secs: u64) -> String {
    let hours = secs / 3600;
    let mins = (secs % 3600) / 60;
    let rest = secs % 60;
    if hours > 0 {
        format!("{}:{:02}:{:02}", hours, mins, rest)
    } else {
        format!("{:02}:{:02}", mins, rest)
    }
}
