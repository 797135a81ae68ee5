use nix::sys::signal::{self as nix_signal, SaFlags, SigAction, SigHandler, SigSet, Signal};
use nix::unistd;
use std::future::Future;
use std::sync::atomic::{AtomicI32, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use tokio::signal::unix::{SignalKind, signal};
use tokio_util::sync::CancellationToken;
use tracing::info;

/// Lifecycle of a containerized application.
///
/// `end()` (or SIGINT/SIGTERM once `install_signals()` ran) asks every component
/// holding the cancellation token to wind down. Once cleanup is finished the
/// application calls `complete()`, which releases `wait_for_completion()`.
pub struct ContainerLifecycle {
    token: CancellationToken,
    completed: CancellationToken,
    last_signal: AtomicI32,
    /// Hook called before force-exiting on a repeated signal
    pre_exit_hook: Mutex<Option<Box<dyn Fn() + Send + Sync>>>,
}

impl std::fmt::Debug for ContainerLifecycle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ContainerLifecycle")
            .field("ending", &self.is_ending())
            .field("completed", &self.is_completed())
            .field("last_signal", &self.last_signal())
            .finish()
    }
}

impl ContainerLifecycle {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            token: CancellationToken::new(),
            completed: CancellationToken::new(),
            last_signal: AtomicI32::new(0),
            pre_exit_hook: Mutex::new(None),
        })
    }

    /// Set a hook to run before the process force-exits on a second signal.
    pub fn set_pre_exit_hook<F: Fn() + Send + Sync + 'static>(&self, hook: F) {
        *self
            .pre_exit_hook
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = Some(Box::new(hook));
    }

    /// Request the end of the application. Idempotent.
    pub fn end(&self) {
        self.token.cancel();
    }

    /// Mark cleanup as finished. Idempotent.
    pub fn complete(&self) {
        self.completed.cancel();
    }

    pub fn is_ending(&self) -> bool {
        self.token.is_cancelled()
    }

    pub fn is_completed(&self) -> bool {
        self.completed.is_cancelled()
    }

    /// Token cancelled when the application is asked to end.
    /// Clones can be handed to any component that must stop with it.
    pub fn cancellation_token(&self) -> CancellationToken {
        self.token.clone()
    }

    pub async fn wait_for_end(&self) {
        self.token.cancelled().await;
    }

    pub async fn wait_for_completion(&self) {
        self.completed.cancelled().await;
    }

    /// Run `fut` in the background and end the lifecycle when it finishes.
    ///
    /// Resolves to `None` if the lifecycle ended first and the future was
    /// abandoned.
    pub fn run_until_end<Fut, T>(self: &Arc<Self>, fut: Fut) -> tokio::task::JoinHandle<Option<T>>
    where
        Fut: Future<Output = T> + Send + 'static,
        T: Send + 'static,
    {
        let lifecycle = Arc::clone(self);

        tokio::spawn(async move {
            if lifecycle.is_ending() {
                return None;
            }

            tokio::pin!(fut);
            let result = tokio::select! {
                res = &mut fut => Some(res),
                _ = lifecycle.token.cancelled() => None,
            };

            if result.is_some() {
                lifecycle.end();
            }

            result
        })
    }

    /// Translate SIGINT, SIGTERM and SIGHUP into `end()`.
    ///
    /// A second signal while already ending force-exits the process.
    pub fn install_signals(self: &Arc<Self>) -> std::io::Result<()> {
        let mut sigint = signal(SignalKind::interrupt())?;
        let mut sigterm = signal(SignalKind::terminate())?;
        let mut sighup = signal(SignalKind::hangup())?;
        let lifecycle = Arc::clone(self);

        tokio::spawn(async move {
            loop {
                let received = tokio::select! {
                    _ = sigint.recv() => Signal::SIGINT,
                    _ = sigterm.recv() => Signal::SIGTERM,
                    _ = sighup.recv() => Signal::SIGHUP,
                };

                if lifecycle.last_signal().is_some() {
                    info!("Received second signal, forcing exit...");
                    lifecycle.exit_process();
                }

                info!("Received {:?}, ending container lifecycle...", received);
                lifecycle.set_last_signal(received);
                lifecycle.end();
            }
        });

        Ok(())
    }

    pub fn last_signal(&self) -> Option<Signal> {
        match self.last_signal.load(Ordering::Relaxed) {
            0 => None,
            i => Signal::try_from(i).ok(),
        }
    }

    /// Record a signal received through another channel (e.g. a keypress)
    pub fn set_last_signal(&self, signal: Signal) {
        self.last_signal.store(signal as i32, Ordering::Relaxed);
    }

    /// Re-raise the last received signal with its default disposition so the
    /// process exits with the matching status.
    pub fn exit_process(&self) -> ! {
        if let Some(hook) = self
            .pre_exit_hook
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .as_ref()
        {
            hook();
        }

        let signal = self.last_signal().unwrap_or(Signal::SIGTERM);
        let action = SigAction::new(SigHandler::SigDfl, SaFlags::empty(), SigSet::empty());
        // SAFETY: restoring the default disposition installs no Rust handler
        let restored = unsafe { nix_signal::sigaction(signal, &action) };
        if restored.is_ok() {
            let _ = nix_signal::kill(unistd::getpid(), signal);
        }

        std::process::exit(128 + signal as i32);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicBool;
    use std::time::Duration;

    #[tokio::test]
    async fn test_end_is_idempotent() {
        let lifecycle = ContainerLifecycle::new();
        assert!(!lifecycle.is_ending());

        lifecycle.end();
        lifecycle.end();

        assert!(lifecycle.is_ending());
        assert!(!lifecycle.is_completed());
    }

    #[tokio::test]
    async fn test_cancellation_token_sharing() {
        let lifecycle = ContainerLifecycle::new();
        let token1 = lifecycle.cancellation_token();
        let token2 = lifecycle.cancellation_token();

        lifecycle.end();

        assert!(token1.is_cancelled());
        assert!(token2.is_cancelled());
    }

    #[tokio::test]
    async fn test_wait_for_end_notified() {
        let lifecycle = ContainerLifecycle::new();

        let waiter = {
            let lifecycle = Arc::clone(&lifecycle);
            tokio::spawn(async move {
                lifecycle.wait_for_end().await;
                true
            })
        };

        tokio::spawn({
            let lifecycle = Arc::clone(&lifecycle);
            async move {
                tokio::time::sleep(Duration::from_millis(20)).await;
                lifecycle.end();
            }
        });

        let result = tokio::time::timeout(Duration::from_millis(500), waiter).await;
        assert!(result.unwrap().unwrap());
    }

    #[tokio::test]
    async fn test_wait_for_completion() {
        let lifecycle = ContainerLifecycle::new();

        // Cleanup task completes the lifecycle after it sees the end
        tokio::spawn({
            let lifecycle = Arc::clone(&lifecycle);
            async move {
                lifecycle.wait_for_end().await;
                tokio::time::sleep(Duration::from_millis(20)).await;
                lifecycle.complete();
            }
        });

        lifecycle.end();
        lifecycle.wait_for_completion().await;
        assert!(lifecycle.is_completed());
    }

    #[tokio::test]
    async fn test_run_until_end_finishes() {
        let lifecycle = ContainerLifecycle::new();

        let handle = lifecycle.run_until_end(async {
            tokio::time::sleep(Duration::from_millis(20)).await;
            "done"
        });

        assert_eq!(handle.await.unwrap(), Some("done"));
        // Finishing the work ends the lifecycle
        assert!(lifecycle.is_ending());
    }

    #[tokio::test(start_paused = true)]
    async fn test_run_until_end_abandoned() {
        let lifecycle = ContainerLifecycle::new();

        let handle = lifecycle.run_until_end(async {
            tokio::time::sleep(Duration::from_secs(60)).await;
            "never"
        });

        tokio::spawn({
            let lifecycle = Arc::clone(&lifecycle);
            async move {
                tokio::time::sleep(Duration::from_millis(10)).await;
                lifecycle.end();
            }
        });

        assert_eq!(handle.await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_run_until_end_after_end() {
        let lifecycle = ContainerLifecycle::new();
        lifecycle.end();

        let ran = Arc::new(AtomicBool::new(false));
        let handle = lifecycle.run_until_end({
            let ran = Arc::clone(&ran);
            async move {
                ran.store(true, Ordering::SeqCst);
            }
        });

        assert_eq!(handle.await.unwrap(), None);
        assert!(!ran.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn test_last_signal_round_trip() {
        let lifecycle = ContainerLifecycle::new();
        assert_eq!(lifecycle.last_signal(), None);

        lifecycle.set_last_signal(Signal::SIGTERM);
        assert_eq!(lifecycle.last_signal(), Some(Signal::SIGTERM));
    }

    #[tokio::test]
    async fn test_install_signals_ends_on_sighup() {
        let lifecycle = ContainerLifecycle::new();
        lifecycle.install_signals().unwrap();

        nix_signal::kill(unistd::getpid(), Signal::SIGHUP).unwrap();

        tokio::time::timeout(Duration::from_secs(2), lifecycle.wait_for_end())
            .await
            .expect("SIGHUP should end the lifecycle");
        assert_eq!(lifecycle.last_signal(), Some(Signal::SIGHUP));
    }
}
