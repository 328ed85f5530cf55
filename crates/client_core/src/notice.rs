use std::time::{Duration, Instant};

use crate::error::ClientError;

pub const DEFAULT_DISPLAY_WINDOW: Duration = Duration::from_secs(2);
/// Longest window a notice may stay up; longer requests are clamped.
pub const MAX_DISPLAY_WINDOW: Duration = Duration::from_secs(60 * 60);

#[derive(Debug, Clone)]
struct ShownError {
    message: String,
    expires_at: Instant,
}

/// One user-facing error that clears itself after a fixed display window.
/// Showing a new error replaces the old one and restarts the window.
#[derive(Debug, Clone)]
pub struct TransientError {
    window: Duration,
    shown: Option<ShownError>,
}

impl Default for TransientError {
    fn default() -> Self {
        Self::new(DEFAULT_DISPLAY_WINDOW)
    }
}

impl TransientError {
    pub fn new(window: Duration) -> Self {
        Self {
            window: window.min(MAX_DISPLAY_WINDOW),
            shown: None,
        }
    }

    pub fn show(&mut self, err: &ClientError) {
        self.show_message_at(err.user_message(), Instant::now());
    }

    pub fn show_message_at(&mut self, message: impl Into<String>, now: Instant) {
        self.shown = Some(ShownError {
            message: message.into(),
            expires_at: now.checked_add(self.window).unwrap_or(now),
        });
    }

    pub fn current(&self) -> Option<&str> {
        self.current_at(Instant::now())
    }

    pub fn current_at(&self, now: Instant) -> Option<&str> {
        self.shown
            .as_ref()
            .filter(|shown| shown.expires_at > now)
            .map(|shown| shown.message.as_str())
    }

    pub fn clear(&mut self) {
        self.shown = None;
    }
}
