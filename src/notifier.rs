//! Desktop notifications via notify-rust (D-Bus).
//!
//! Best-effort backup channel for alarms: failures are logged and dropped so
//! they can never interfere with in-app alarm delivery.

use notify_rust::{Notification, Timeout, Urgency};
use tracing::{debug, warn};

pub struct Notifier {
    enabled: bool,
}

impl Notifier {
    pub fn new(enabled: bool) -> Self {
        Self { enabled }
    }

    /// Show a persistent, critical-urgency alarm notification.
    pub fn notify(&self, summary: &str, body: &str) {
        if !self.enabled {
            debug!("Notifications disabled, skipping: {summary}");
            return;
        }

        debug!("Notification: {summary}");

        if let Err(e) = Notification::new()
            .summary(summary)
            .body(body)
            .icon("appointment-soon")
            .urgency(Urgency::Critical)
            .timeout(Timeout::Never)
            .show()
        {
            warn!("Failed to show notification: {e}");
        }
    }
}
