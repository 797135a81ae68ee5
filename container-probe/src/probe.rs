//! The probe controller: keeps a [`TcpProbeEndpoint`] up while a predicate
//! holds and down while it does not.

use std::net::IpAddr;
use std::panic::AssertUnwindSafe;
use std::sync::{Arc, Mutex as StdMutex, PoisonError};
use std::time::Duration;

use futures::FutureExt;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::ProbeConfig;
use crate::endpoint::TcpProbeEndpoint;
use crate::error::{ProbeError, ProbeResult};
use crate::lifecycle::{CompleteOnDrop, Completion, acquire};
use crate::observer::{FaultPhase, NoopObserver, ProbeFault, ProbeObserver};
use crate::predicate::{
    AvailabilityCheck, AvailabilityPredicate, HealthCheck, HealthPredicate, Predicate,
};
use crate::reconcile::{Action, Reconciler};

/// Shortest polling interval a probe accepts
pub const MIN_POLLING_INTERVAL: Duration = Duration::from_millis(1);

struct ReconcileLoop {
    stop: CancellationToken,
    task: JoinHandle<()>,
}

/// Everything a start/stop transition touches
#[derive(Default)]
struct ProbeState {
    endpoint: Option<Arc<TcpProbeEndpoint>>,
    reconcile: Option<ReconcileLoop>,
}

impl ProbeState {
    fn is_empty(&self) -> bool {
        self.endpoint.is_none() && self.reconcile.is_none()
    }

    /// Stop the loop first, then the endpoint it was driving. Failures on the
    /// way down are logged and dropped.
    async fn teardown(&mut self) {
        if let Some(reconcile) = self.reconcile.take() {
            reconcile.stop.cancel();
            if let Err(e) = reconcile.task.await
                && e.is_panic()
            {
                warn!("Probe reconciliation loop panicked: {}", e);
            }
        }

        if let Some(endpoint) = self.endpoint.take()
            && let Err(e) = endpoint.stop(&CancellationToken::new()).await
        {
            debug!("Ignoring error while stopping probe endpoint: {}", e);
        }
    }
}

/// A probe endpoint whose listening state follows a periodically evaluated
/// predicate.
///
/// `start()` spawns the reconciliation loop, `stop()` tears the loop and the
/// endpoint down. Both are idempotent and return `Ok(false)` when the probe is
/// already in the requested state. `completion()` resolves once the loop has
/// fully exited, whether through `stop()` or a fatal fault.
pub struct ContainerProbe {
    address: IpAddr,
    port: u16,
    polling_interval: Duration,
    predicate: Arc<dyn Predicate>,
    observer: Arc<dyn ProbeObserver>,
    control: Mutex<ProbeState>,
    completion: StdMutex<Completion>,
}

impl std::fmt::Debug for ContainerProbe {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ContainerProbe")
            .field("address", &self.address)
            .field("port", &self.port)
            .field("polling_interval", &self.polling_interval)
            .field("running", &self.is_running())
            .finish()
    }
}

impl ContainerProbe {
    /// Create a stopped probe.
    ///
    /// Fails fast on a port below 1 or a polling interval below 1ms.
    pub fn new(
        address: IpAddr,
        port: u16,
        polling_interval: Duration,
        predicate: Arc<dyn Predicate>,
    ) -> ProbeResult<Self> {
        if port < 1 {
            return Err(ProbeError::InvalidPort(port));
        }
        if polling_interval < MIN_POLLING_INTERVAL {
            return Err(ProbeError::InvalidPollingInterval(polling_interval));
        }

        Ok(Self {
            address,
            port,
            polling_interval,
            predicate,
            observer: Arc::new(NoopObserver),
            control: Mutex::new(ProbeState::default()),
            completion: StdMutex::new(Completion::completed()),
        })
    }

    /// A liveness probe: accepts connections while `check` reports healthy
    pub fn health(
        address: IpAddr,
        port: u16,
        polling_interval: Duration,
        check: Arc<dyn HealthCheck>,
    ) -> ProbeResult<Self> {
        Self::new(
            address,
            port,
            polling_interval,
            Arc::new(HealthPredicate::new(check)),
        )
    }

    /// A readiness probe: accepts connections while `check` reports available
    pub fn availability(
        address: IpAddr,
        port: u16,
        polling_interval: Duration,
        check: Arc<dyn AvailabilityCheck>,
    ) -> ProbeResult<Self> {
        Self::new(
            address,
            port,
            polling_interval,
            Arc::new(AvailabilityPredicate::new(check)),
        )
    }

    pub fn from_config(config: &ProbeConfig, predicate: Arc<dyn Predicate>) -> ProbeResult<Self> {
        config.validate()?;
        Self::new(
            config.address,
            config.port,
            config.polling_interval,
            predicate,
        )
    }

    /// Route connection and fault notifications to `observer`
    pub fn with_observer(mut self, observer: Arc<dyn ProbeObserver>) -> Self {
        self.observer = observer;
        self
    }

    pub fn address(&self) -> IpAddr {
        self.address
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    pub fn polling_interval(&self) -> Duration {
        self.polling_interval
    }

    /// Signal for the current reconciliation loop. Already resolved when stopped.
    pub fn completion(&self) -> Completion {
        self.completion
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn is_running(&self) -> bool {
        !self.completion().is_completed()
    }

    fn set_completion(&self, completion: Completion) {
        *self
            .completion
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = completion;
    }

    /// Spawn the reconciliation loop with a fresh endpoint.
    ///
    /// `cancel` only bounds the wait for the lifecycle lock; it fails with
    /// [`ProbeError::Cancelled`] if it fires first.
    pub async fn start(&self, cancel: &CancellationToken) -> ProbeResult<bool> {
        if self.is_running() {
            return Ok(false);
        }

        let mut control = acquire(&self.control, cancel).await?;

        if self.is_running() {
            return Ok(false);
        }

        // Leftovers from a loop that exited on a fatal fault
        control.teardown().await;

        let endpoint = Arc::new(
            TcpProbeEndpoint::new(self.address, self.port)?
                .with_observer(Arc::clone(&self.observer)),
        );
        let completion = Completion::new();
        let stop = CancellationToken::new();
        self.set_completion(completion.clone());

        let worker = ReconcileWorker {
            predicate: Arc::clone(&self.predicate),
            observer: Arc::clone(&self.observer),
            endpoint: Arc::clone(&endpoint),
            polling_interval: self.polling_interval,
            stop: stop.clone(),
        };
        let task = tokio::spawn(worker.run(CompleteOnDrop(completion)));

        control.endpoint = Some(endpoint);
        control.reconcile = Some(ReconcileLoop { stop, task });

        info!(
            "Probe on {}:{} started, polling every {:?}",
            self.address, self.port, self.polling_interval
        );
        Ok(true)
    }

    /// Stop the reconciliation loop, then the endpoint.
    ///
    /// Once the lock is held the teardown runs to the end; errors while closing
    /// the endpoint are swallowed.
    pub async fn stop(&self, cancel: &CancellationToken) -> ProbeResult<bool> {
        if !self.is_running()
            && let Ok(control) = self.control.try_lock()
            && control.is_empty()
        {
            return Ok(false);
        }

        let mut control = acquire(&self.control, cancel).await?;

        if !self.is_running() {
            // A loop that died on its own may have left its endpoint listening
            if !control.is_empty() {
                control.teardown().await;
            }
            return Ok(false);
        }

        control.teardown().await;
        self.completion().complete();

        info!("Probe on {}:{} stopped", self.address, self.port);
        Ok(true)
    }
}

impl Drop for ContainerProbe {
    fn drop(&mut self) {
        if let Some(reconcile) = &self.control.get_mut().reconcile {
            reconcile.stop.cancel();
        }
    }
}

/// State moved into the reconciliation task
struct ReconcileWorker {
    predicate: Arc<dyn Predicate>,
    observer: Arc<dyn ProbeObserver>,
    endpoint: Arc<TcpProbeEndpoint>,
    polling_interval: Duration,
    stop: CancellationToken,
}

impl ReconcileWorker {
    async fn run(self, _done: CompleteOnDrop) {
        let mut reconciler = Reconciler::new();

        while !self.stop.is_cancelled() {
            let tick_start = Instant::now();

            let tick = tokio::select! {
                biased;
                _ = self.stop.cancelled() => break,
                tick = AssertUnwindSafe(self.tick(&mut reconciler)).catch_unwind() => tick,
            };

            if let Err(payload) = tick {
                // Close the port before anything else can fail
                if let Err(e) = self.endpoint.stop(&CancellationToken::new()).await {
                    debug!("Ignoring error while stopping probe endpoint: {}", e);
                }

                let fault = ProbeFault::new(FaultPhase::Terminating, ProbeError::from_panic(payload));
                warn!("Probe on {} failed: {}", self.endpoint.addr(), fault);
                if std::panic::catch_unwind(AssertUnwindSafe(|| self.report(&fault))).is_err() {
                    warn!("Probe observer panicked while reporting a terminating fault");
                }
                break;
            }

            tokio::select! {
                biased;
                _ = self.stop.cancelled() => break,
                _ = tokio::time::sleep_until(tick_start + self.polling_interval) => {}
            }
        }

        debug!("Probe reconciliation loop on {} exited", self.endpoint.addr());
    }

    /// One reconciliation step. Faults here are reported and retried next tick.
    async fn tick(&self, reconciler: &mut Reconciler) {
        if reconciler.observe_acceptor(self.endpoint.is_running()) {
            warn!(
                "Probe endpoint on {} stopped accepting on its own",
                self.endpoint.addr()
            );
        }

        let desired = match self.predicate.evaluate().await {
            Ok(desired) => desired,
            Err(e) => {
                self.fault(FaultPhase::Evaluating, e);
                return;
            }
        };

        let never = CancellationToken::new();
        match reconciler.on_tick(desired) {
            Action::StartAcceptor => match self.endpoint.start(&never).await {
                Ok(_) => reconciler.on_started(),
                Err(e) => self.fault(FaultPhase::Starting, e),
            },
            Action::StopAcceptor => match self.endpoint.stop(&never).await {
                Ok(_) => reconciler.on_stopped(),
                Err(e) => self.fault(FaultPhase::Stopping, e),
            },
            Action::Hold => {}
        }
    }

    fn fault(&self, phase: FaultPhase, error: ProbeError) {
        let fault = ProbeFault::new(phase, error);
        debug!("Probe on {}: {}", self.endpoint.addr(), fault);
        self.report(&fault);
    }

    fn report(&self, fault: &ProbeFault) {
        self.observer.processing_error(fault);
    }
}
