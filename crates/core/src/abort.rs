//! Abort coordination: one cooperative cancellation token per run.
//!
//! The signal is created once per run and cloned (shared ownership) into
//! every model invocation and every tool executor. Signaling is one-shot:
//! the first reason wins and later calls are no-ops. Nothing is ever
//! force-killed; each participant observes the signal and winds itself down.

use std::sync::{Arc, OnceLock};
use std::time::Duration;

use tokio_util::sync::{CancellationToken, WaitForCancellationFuture};
use tracing::debug;

#[derive(Debug, Clone, Default)]
pub struct AbortSignal {
    token: CancellationToken,
    reason: Arc<OnceLock<String>>,
}

impl AbortSignal {
    pub fn new() -> Self {
        Self::default()
    }

    /// Signal every holder of this run's token. Idempotent.
    pub fn abort(&self, reason: impl Into<String>) {
        if self.reason.set(reason.into()).is_ok() {
            debug!(reason = self.reason().unwrap_or_default(), "Abort signaled");
        }
        self.token.cancel();
    }

    pub fn is_aborted(&self) -> bool {
        self.token.is_cancelled()
    }

    /// The reason given by the first `abort` call, if any.
    pub fn reason(&self) -> Option<&str> {
        self.reason.get().map(String::as_str)
    }

    /// Resolves once the signal fires; resolves immediately if it already has.
    pub fn aborted(&self) -> WaitForCancellationFuture<'_> {
        self.token.cancelled()
    }

    /// Arm an external timeout that signals this token after `after`.
    ///
    /// Must be called from within a tokio runtime. The timer holds only a
    /// clone of the signal; dropping the returned handle does not disarm it,
    /// aborting the handle does.
    pub fn abort_after(&self, after: Duration) -> tokio::task::JoinHandle<()> {
        let signal = self.clone();
        tokio::spawn(async move {
            tokio::select! {
                _ = tokio::time::sleep(after) => {
                    signal.abort(format!("timed out after {}ms", after.as_millis()));
                }
                _ = signal.token.cancelled() => {}
            }
        })
    }
}
