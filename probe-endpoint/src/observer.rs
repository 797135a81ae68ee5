use container_probe::{FaultPhase, ProbeFault, ProbeKind, ProbeObserver};
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::{error, trace, warn};

/// Logs probe notifications through `tracing`
pub struct TracingObserver {
    kind: ProbeKind,
    handled: AtomicU64,
}

impl TracingObserver {
    pub fn new(kind: ProbeKind) -> Self {
        Self {
            kind,
            handled: AtomicU64::new(0),
        }
    }

    pub fn handled(&self) -> u64 {
        self.handled.load(Ordering::Relaxed)
    }
}

impl ProbeObserver for TracingObserver {
    fn connection_observed(&self) {
        trace!(kind = %self.kind, "Probe connection observed");
    }

    fn connection_handled(&self) {
        let total = self.handled.fetch_add(1, Ordering::Relaxed) + 1;
        trace!(kind = %self.kind, total, "Probe connection handled");
    }

    fn processing_error(&self, fault: &ProbeFault) {
        match fault.phase {
            FaultPhase::Terminating => {
                error!(kind = %self.kind, "Probe loop terminated: {}", fault.error)
            }
            _ => warn!(kind = %self.kind, "Probe fault while {}", fault),
        }
    }
}
