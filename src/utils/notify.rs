//! Notification sink for human-readable status and error messages.

use tracing::{error, info, warn};

pub trait Notifier: Send + Sync {
    fn show_error(&self, text: &str);
    fn show_warning(&self, text: &str);
    fn show_info(&self, text: &str);
}

/// Routes notifications to the tracing subscriber.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingNotifier;

impl Notifier for TracingNotifier {
    fn show_error(&self, text: &str) {
        error!(target: "notification", "{}", text);
    }

    fn show_warning(&self, text: &str) {
        warn!(target: "notification", "{}", text);
    }

    fn show_info(&self, text: &str) {
        info!(target: "notification", "{}", text);
    }
}
