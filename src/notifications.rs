//! Desktop notification for completed work intervals.

use crate::app::CompletionEvent;
use notify_rust::Notification;
use std::thread;

/// Builds the notification body for a completed session.
pub fn completion_body(event: &CompletionEvent) -> String {
    let mins = event.duration_secs / 60;
    match &event.task_name {
        Some(name) => format!(
            "{} min logged on \"{}\".\nTime for a break.",
            mins, name
        ),
        None => format!("{} min session finished.\nTime for a break.", mins),
    }
}

/// Shows a notification when a session is completed.
/// Runs in a background thread to avoid blocking.
pub fn notify_session_complete(event: &CompletionEvent) {
    let body = completion_body(event);
    thread::spawn(move || {
        if let Err(e) = Notification::new()
            .summary("Pomodoro Complete! 🍅")
            .body(&body)
            .sound_name("default")
            .show()
        {
            log::warn!("Failed to show notification: {}", e);
        }
    });
}
