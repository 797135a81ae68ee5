//! The predicate a probe reconciles against, and the adapters for the two
//! kinds of application checks.

use async_trait::async_trait;
use std::future::Future;
use std::sync::Arc;

use crate::error::ProbeResult;

/// A check evaluated once per polling tick.
///
/// `Ok(true)` means the endpoint should accept connections, `Ok(false)` means it
/// should not, and an error is reported through the observer and retried on the
/// next tick.
#[async_trait]
pub trait Predicate: Send + Sync {
    async fn evaluate(&self) -> ProbeResult<bool>;
}

/// Reports whether the application is healthy (liveness)
#[async_trait]
pub trait HealthCheck: Send + Sync {
    async fn is_healthy(&self) -> ProbeResult<bool>;
}

/// Reports whether the application is available to take work (readiness)
#[async_trait]
pub trait AvailabilityCheck: Send + Sync {
    async fn is_available(&self) -> ProbeResult<bool>;
}

/// Drives a probe from a [`HealthCheck`]
pub struct HealthPredicate {
    check: Arc<dyn HealthCheck>,
}

impl HealthPredicate {
    pub fn new(check: Arc<dyn HealthCheck>) -> Self {
        Self { check }
    }
}

#[async_trait]
impl Predicate for HealthPredicate {
    async fn evaluate(&self) -> ProbeResult<bool> {
        self.check.is_healthy().await
    }
}

/// Drives a probe from an [`AvailabilityCheck`]
pub struct AvailabilityPredicate {
    check: Arc<dyn AvailabilityCheck>,
}

impl AvailabilityPredicate {
    pub fn new(check: Arc<dyn AvailabilityCheck>) -> Self {
        Self { check }
    }
}

#[async_trait]
impl Predicate for AvailabilityPredicate {
    async fn evaluate(&self) -> ProbeResult<bool> {
        self.check.is_available().await
    }
}

/// A predicate backed by a closure, see [`predicate_fn`]
pub struct FnPredicate<F> {
    f: F,
}

#[async_trait]
impl<F, Fut> Predicate for FnPredicate<F>
where
    F: Fn() -> Fut + Send + Sync,
    Fut: Future<Output = ProbeResult<bool>> + Send + 'static,
{
    async fn evaluate(&self) -> ProbeResult<bool> {
        (self.f)().await
    }
}

/// Wrap a closure returning a future as a [`Predicate`].
///
/// ```
/// use container_probe::predicate_fn;
///
/// let always_up = predicate_fn(|| async { Ok(true) });
/// ```
pub fn predicate_fn<F, Fut>(f: F) -> FnPredicate<F>
where
    F: Fn() -> Fut + Send + Sync,
    Fut: Future<Output = ProbeResult<bool>> + Send + 'static,
{
    FnPredicate { f }
}
