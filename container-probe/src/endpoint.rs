//! The TCP endpoint an orchestrator probes.
//!
//! While started, the endpoint accepts every inbound connection and closes it
//! immediately. A successful connect is the whole protocol; no bytes are read or
//! written.

use std::net::{IpAddr, SocketAddr};
use std::sync::{Arc, Mutex as StdMutex, PoisonError};

use socket2::{Domain, Protocol, Socket, Type};
use tokio::net::TcpListener;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn};

use crate::error::{ProbeError, ProbeResult};
use crate::lifecycle::{CompleteOnDrop, Completion, acquire};
use crate::observer::{NoopObserver, ProbeObserver};

/// Pending connections the kernel queues before the accept loop picks them up
pub const LISTEN_BACKLOG: i32 = 100;

/// A running accept loop and the token that asks it to exit
struct AcceptLoop {
    stop: CancellationToken,
    task: JoinHandle<()>,
}

impl AcceptLoop {
    /// Ask the loop to exit and wait for it. The listener is closed when the
    /// task drops it, so there is nothing left to fail here.
    async fn shutdown(self) {
        self.stop.cancel();
        if let Err(e) = self.task.await
            && e.is_panic()
        {
            warn!("Probe accept loop panicked: {}", e);
        }
    }
}

/// A TCP listener with idempotent start/stop and a background accept loop
pub struct TcpProbeEndpoint {
    addr: SocketAddr,
    observer: Arc<dyn ProbeObserver>,
    /// Serializes start/stop transitions
    control: Mutex<Option<AcceptLoop>>,
    /// Resolved whenever no accept loop is running
    completion: StdMutex<Completion>,
}

impl std::fmt::Debug for TcpProbeEndpoint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TcpProbeEndpoint")
            .field("addr", &self.addr)
            .field("running", &self.is_running())
            .finish()
    }
}

impl TcpProbeEndpoint {
    /// Create a stopped endpoint for `address:port`. Port 0 is rejected.
    pub fn new(address: IpAddr, port: u16) -> ProbeResult<Self> {
        if port < 1 {
            return Err(ProbeError::InvalidPort(port));
        }

        Ok(Self {
            addr: SocketAddr::new(address, port),
            observer: Arc::new(NoopObserver),
            control: Mutex::new(None),
            completion: StdMutex::new(Completion::completed()),
        })
    }

    /// Route connection notifications to `observer`
    pub fn with_observer(mut self, observer: Arc<dyn ProbeObserver>) -> Self {
        self.observer = observer;
        self
    }

    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    /// Signal for the current accept loop. Already resolved when stopped.
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

    /// Bind the listener and spawn the accept loop.
    ///
    /// Returns `Ok(false)` without side effects if the endpoint is already
    /// running. `cancel` only bounds the wait for the lifecycle lock.
    pub async fn start(&self, cancel: &CancellationToken) -> ProbeResult<bool> {
        if self.is_running() {
            return Ok(false);
        }

        let mut control = acquire(&self.control, cancel).await?;

        if self.is_running() {
            return Ok(false);
        }

        // A loop that died on its own leaves its handle behind
        if let Some(stale) = control.take() {
            debug!("Draining stale accept loop on {}", self.addr);
            stale.shutdown().await;
        }

        let listener = bind(self.addr)?;
        let completion = Completion::new();
        let stop = CancellationToken::new();
        self.set_completion(completion.clone());

        let task = tokio::spawn(accept_loop(
            listener,
            stop.clone(),
            Arc::clone(&self.observer),
            CompleteOnDrop(completion),
        ));
        *control = Some(AcceptLoop { stop, task });

        info!("Probe endpoint listening on {}", self.addr);
        Ok(true)
    }

    /// Stop the accept loop and close the listener.
    ///
    /// Returns `Ok(false)` if the endpoint is already stopped.
    pub async fn stop(&self, cancel: &CancellationToken) -> ProbeResult<bool> {
        if !self.is_running() {
            return Ok(false);
        }

        let mut control = acquire(&self.control, cancel).await?;

        if !self.is_running() {
            return Ok(false);
        }

        if let Some(running) = control.take() {
            running.shutdown().await;
        }
        // The guard inside the task has resolved it by now; make sure anyway
        self.completion().complete();

        info!("Probe endpoint on {} stopped", self.addr);
        Ok(true)
    }
}

impl Drop for TcpProbeEndpoint {
    fn drop(&mut self) {
        if let Some(running) = self.control.get_mut() {
            running.stop.cancel();
        }
    }
}

fn bind(addr: SocketAddr) -> ProbeResult<TcpListener> {
    let bind_err = |source: std::io::Error| ProbeError::Bind { addr, source };

    let sock = Socket::new(Domain::for_address(addr), Type::STREAM, Some(Protocol::TCP))
        .map_err(bind_err)?;
    sock.set_reuse_address(true).map_err(bind_err)?;
    sock.bind(&addr.into()).map_err(bind_err)?;
    sock.listen(LISTEN_BACKLOG).map_err(bind_err)?;
    sock.set_nonblocking(true).map_err(bind_err)?;

    TcpListener::from_std(sock.into()).map_err(bind_err)
}

/// Errors that concern a single connection rather than the listener
fn is_transient(e: &std::io::Error) -> bool {
    matches!(
        e.kind(),
        std::io::ErrorKind::ConnectionAborted
            | std::io::ErrorKind::ConnectionReset
            | std::io::ErrorKind::Interrupted
    )
}

async fn accept_loop(
    listener: TcpListener,
    stop: CancellationToken,
    observer: Arc<dyn ProbeObserver>,
    _done: CompleteOnDrop,
) {
    loop {
        let accepted = tokio::select! {
            biased;
            _ = stop.cancelled() => break,
            accepted = listener.accept() => accepted,
        };

        match accepted {
            Ok((stream, peer)) => {
                observer.connection_observed();
                trace!("Probe connection from {}", peer);
                drop(stream);
                observer.connection_handled();
            }
            Err(e) if is_transient(&e) => {
                debug!("Dropped probe connection before accept: {}", e);
            }
            Err(e) => {
                warn!("Probe accept loop exiting: {}", ProbeError::Accept(e));
                break;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::Ipv4Addr;

    #[test]
    fn test_port_zero_rejected() {
        let result = TcpProbeEndpoint::new(IpAddr::V4(Ipv4Addr::LOCALHOST), 0);
        assert!(matches!(result, Err(ProbeError::InvalidPort(0))));
    }

    #[test]
    fn test_new_endpoint_is_stopped() {
        let endpoint = TcpProbeEndpoint::new(IpAddr::V4(Ipv4Addr::LOCALHOST), 10050).unwrap();
        assert!(!endpoint.is_running());
        assert!(endpoint.completion().is_completed());
    }

    #[test]
    fn test_transient_errors() {
        use std::io::{Error, ErrorKind};
        assert!(is_transient(&Error::from(ErrorKind::ConnectionAborted)));
        assert!(is_transient(&Error::from(ErrorKind::ConnectionReset)));
        assert!(!is_transient(&Error::from(ErrorKind::PermissionDenied)));
    }

    #[tokio::test]
    async fn test_bind_conflict_is_reported() {
        let blocker = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = blocker.local_addr().unwrap();

        let endpoint = TcpProbeEndpoint::new(addr.ip(), addr.port()).unwrap();
        let result = endpoint.start(&CancellationToken::new()).await;

        assert!(matches!(result, Err(ProbeError::Bind { .. })));
        assert!(!endpoint.is_running());
    }
}
