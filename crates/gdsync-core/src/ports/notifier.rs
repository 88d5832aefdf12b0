//! Status notifier port (driven/secondary port)
//!
//! Human-readable status strings emitted by the engine during bootstrap
//! and steady-state sync. Implementations may log, print, or forward to a
//! UI; delivery is fire-and-forget and failures must never stall the
//! engine.

/// Port trait for engine status reporting
#[async_trait::async_trait]
pub trait IStatusNotifier: Send + Sync {
    /// Delivers one status message to the user.
    async fn notify(&self, message: &str);
}

/// Notifier that forwards every message to the tracing log.
#[derive(Debug, Clone, Default)]
pub struct LogNotifier;

#[async_trait::async_trait]
impl IStatusNotifier for LogNotifier {
    async fn notify(&self, message: &str) {
        tracing::info!(status = %message, "sync status");
    }
}
