//! Building blocks shared by the endpoint and the controller lifecycles.

use tokio::sync::{Mutex, MutexGuard};
use tokio_util::sync::CancellationToken;

use crate::error::{ProbeError, ProbeResult};

/// A single-assignment signal that resolves when a background loop has exited.
///
/// Resolving is idempotent and checking is non-blocking, so both the normal
/// exit path and the error path can resolve it without coordination.
#[derive(Debug, Clone, Default)]
pub struct Completion {
    token: CancellationToken,
}

impl Completion {
    /// Create an unresolved signal
    pub fn new() -> Self {
        Self {
            token: CancellationToken::new(),
        }
    }

    /// Create a signal that is already resolved
    pub fn completed() -> Self {
        let completion = Self::new();
        completion.complete();
        completion
    }

    /// Resolve the signal. Later calls are no-ops.
    pub fn complete(&self) {
        self.token.cancel();
    }

    /// Check whether the signal has resolved
    pub fn is_completed(&self) -> bool {
        self.token.is_cancelled()
    }

    /// Wait until the signal resolves
    pub async fn wait(&self) {
        self.token.cancelled().await;
    }
}

/// Resolves a completion when dropped, covering early returns and unwinding.
#[derive(Debug)]
pub(crate) struct CompleteOnDrop(pub(crate) Completion);

impl Drop for CompleteOnDrop {
    fn drop(&mut self) {
        self.0.complete();
    }
}

/// Acquire a lifecycle lock, giving up if `cancel` fires first.
///
/// Cancellation only governs the wait; once the guard is returned the caller
/// runs its transition to the end.
pub(crate) async fn acquire<'a, T>(
    lock: &'a Mutex<T>,
    cancel: &CancellationToken,
) -> ProbeResult<MutexGuard<'a, T>> {
    if cancel.is_cancelled() {
        return Err(ProbeError::Cancelled);
    }

    tokio::select! {
        biased;
        _ = cancel.cancelled() => Err(ProbeError::Cancelled),
        guard = lock.lock() => Ok(guard),
    }
}
