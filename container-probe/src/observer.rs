//! Notification hooks exposed to metrics and logging collaborators.

use crate::error::ProbeError;

/// Where in the reconciliation loop a fault happened
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FaultPhase {
    /// Predicate evaluation failed; the loop retries next tick
    Evaluating,
    /// Bringing the endpoint up failed; the loop retries next tick
    Starting,
    /// Taking the endpoint down failed; the loop retries next tick
    Stopping,
    /// The loop itself failed and is exiting
    Terminating,
}

/// A failure reported by a running probe
#[derive(Debug)]
pub struct ProbeFault {
    pub phase: FaultPhase,
    pub error: ProbeError,
}

impl ProbeFault {
    pub fn new(phase: FaultPhase, error: ProbeError) -> Self {
        Self { phase, error }
    }

    /// True if the loop stops after this fault
    pub fn is_terminating(&self) -> bool {
        self.phase == FaultPhase::Terminating
    }

    /// True if the fault happened while bringing the endpoint up
    pub fn during_start(&self) -> bool {
        self.phase == FaultPhase::Starting
    }
}

impl std::fmt::Display for ProbeFault {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let phase = match self.phase {
            FaultPhase::Evaluating => "evaluating predicate",
            FaultPhase::Starting => "starting endpoint",
            FaultPhase::Stopping => "stopping endpoint",
            FaultPhase::Terminating => "terminating",
        };
        write!(f, "{}: {}", phase, self.error)
    }
}

/// Receives probe notifications. Every method defaults to a no-op.
///
/// Hooks are called from the probe's background tasks and must not block.
pub trait ProbeObserver: Send + Sync {
    /// A client connection was dequeued from the listener
    fn connection_observed(&self) {}

    /// A client connection was closed after being accepted
    fn connection_handled(&self) {}

    /// The reconciliation loop hit a fault
    fn processing_error(&self, _fault: &ProbeFault) {}
}

/// Observer that ignores every notification
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopObserver;

impl ProbeObserver for NoopObserver {}
