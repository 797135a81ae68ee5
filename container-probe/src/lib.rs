//! TCP probe endpoints for container orchestrators.
//!
//! A [`ContainerProbe`] owns a [`TcpProbeEndpoint`] and re-evaluates a
//! [`Predicate`] on a fixed polling interval. While the predicate holds the
//! endpoint accepts (and immediately closes) connections, otherwise the port
//! refuses them. A plain TCP connect check from the orchestrator is all the
//! protocol there is.

pub mod config;
pub mod endpoint;
pub mod error;
pub mod lifecycle;
pub mod observer;
pub mod predicate;
pub mod probe;
pub mod reconcile;

pub use config::{DEFAULT_POLLING_INTERVAL, ProbeConfig, ProbeKind};
pub use endpoint::{LISTEN_BACKLOG, TcpProbeEndpoint};
pub use error::{ProbeError, ProbeResult};
pub use lifecycle::Completion;
pub use observer::{FaultPhase, NoopObserver, ProbeFault, ProbeObserver};
pub use predicate::{
    AvailabilityCheck, AvailabilityPredicate, FnPredicate, HealthCheck, HealthPredicate,
    Predicate, predicate_fn,
};
pub use probe::{ContainerProbe, MIN_POLLING_INTERVAL};
pub use reconcile::{AcceptorState, Action, Reconciler};
