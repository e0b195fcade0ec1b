//! User-facing notifications.

/// Sink for human-readable task notifications.
///
/// The controller reports every user-visible outcome through this port.
pub trait Notifier: Send + Sync {
    fn notify_success(&self, message: &str);
    fn notify_error(&self, message: &str);
    fn notify_info(&self, message: &str);

    /// Defaults to [`notify_info`](Self::notify_info).
    fn notify_warning(&self, message: &str) {
        self.notify_info(message);
    }
}

/// Renders notifications as tracing events under the `batchgen::notify`
/// target.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingNotifier;

impl Notifier for TracingNotifier {
    fn notify_success(&self, message: &str) {
        tracing::info!(target: "batchgen::notify", kind = "success", "{message}");
    }

    fn notify_error(&self, message: &str) {
        tracing::error!(target: "batchgen::notify", kind = "error", "{message}");
    }

    fn notify_info(&self, message: &str) {
        tracing::info!(target: "batchgen::notify", kind = "info", "{message}");
    }

    fn notify_warning(&self, message: &str) {
        tracing::warn!(target: "batchgen::notify", kind = "warning", "{message}");
    }
}
