//! Shared test utilities for container-probe integration tests.

// Each test file compiles separately, so not all helpers are used in each binary
#![allow(dead_code)]

use container_probe::{FaultPhase, ProbeFault, ProbeObserver};
use std::future::Future;
use std::net::{Ipv4Addr, SocketAddr};
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use tokio::net::TcpStream;

pub const TEST_TIMEOUT: Duration = Duration::from_secs(60);
pub const CONNECT_TIMEOUT: Duration = Duration::from_millis(500);

/// Ask the OS for a port that is free right now
pub fn free_port() -> u16 {
    let listener =
        std::net::TcpListener::bind((Ipv4Addr::LOCALHOST, 0)).expect("Failed to bind port 0");
    listener
        .local_addr()
        .expect("Failed to read local address")
        .port()
}

pub fn loopback(port: u16) -> SocketAddr {
    SocketAddr::from((Ipv4Addr::LOCALHOST, port))
}

/// Attempt one TCP connect to localhost:`port`
pub async fn can_connect(port: u16) -> bool {
    matches!(
        tokio::time::timeout(CONNECT_TIMEOUT, TcpStream::connect(loopback(port))).await,
        Ok(Ok(_))
    )
}

/// Poll `condition` every 10ms until it holds or `timeout` passes
pub async fn wait_until<F, Fut>(timeout: Duration, mut condition: F) -> bool
where
    F: FnMut() -> Fut,
    Fut: Future<Output = bool>,
{
    let deadline = tokio::time::Instant::now() + timeout;
    while tokio::time::Instant::now() < deadline {
        if condition().await {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    false
}

/// Connect `count` times with `spacing` between attempts, returning how many succeeded
pub async fn connect_many(port: u16, count: usize, spacing: Duration) -> usize {
    let mut succeeded = 0;
    for _ in 0..count {
        if can_connect(port).await {
            succeeded += 1;
        }
        if !spacing.is_zero() {
            tokio::time::sleep(spacing).await;
        }
    }
    succeeded
}

/// Observer that counts every notification it receives
#[derive(Default)]
pub struct CountingObserver {
    pub observed: AtomicUsize,
    pub handled: AtomicUsize,
    pub faults: Mutex<Vec<(FaultPhase, String)>>,
}

impl CountingObserver {
    pub fn observed(&self) -> usize {
        self.observed.load(Ordering::SeqCst)
    }

    pub fn handled(&self) -> usize {
        self.handled.load(Ordering::SeqCst)
    }

    pub fn faults(&self) -> Vec<(FaultPhase, String)> {
        self.faults.lock().unwrap().clone()
    }

    pub fn fault_count(&self, phase: FaultPhase) -> usize {
        self.faults().iter().filter(|(p, _)| *p == phase).count()
    }
}

impl ProbeObserver for CountingObserver {
    fn connection_observed(&self) {
        self.observed.fetch_add(1, Ordering::SeqCst);
    }

    fn connection_handled(&self) {
        self.handled.fetch_add(1, Ordering::SeqCst);
    }

    fn processing_error(&self, fault: &ProbeFault) {
        self.faults
            .lock()
            .unwrap()
            .push((fault.phase, fault.error.to_string()));
    }
}
