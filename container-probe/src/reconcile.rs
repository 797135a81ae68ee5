/// Whether the probe endpoint is accepting connections
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum AcceptorState {
    #[default]
    Down,
    Up,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    StartAcceptor,
    StopAcceptor,
    /// Actual state already matches the predicate
    Hold,
}

/// Pure state machine for the reconciliation loop.
///
/// No I/O, no handles. The loop evaluates the predicate, feeds the result to
/// `on_tick()` and performs the returned `Action`, then reports the outcome
/// with `on_started()` / `on_stopped()`. A failed transition is simply not
/// reported, so the same `Action` comes back on the next tick.
#[derive(Debug, Default)]
pub struct Reconciler {
    state: AcceptorState,
}

impl Reconciler {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn state(&self) -> AcceptorState {
        self.state
    }

    pub fn on_tick(&self, desired: bool) -> Action {
        match (self.state, desired) {
            (AcceptorState::Down, true) => Action::StartAcceptor,
            (AcceptorState::Up, false) => Action::StopAcceptor,
            _ => Action::Hold,
        }
    }

    pub fn on_started(&mut self) {
        self.state = AcceptorState::Up;
    }

    pub fn on_stopped(&mut self) {
        self.state = AcceptorState::Down;
    }

    /// Resync with the endpoint's actual liveness.
    ///
    /// Returns true if the tracked state was stale, i.e. the accept loop died
    /// on its own while we believed it was up.
    pub fn observe_acceptor(&mut self, running: bool) -> bool {
        if self.state == AcceptorState::Up && !running {
            self.state = AcceptorState::Down;
            return true;
        }
        false
    }
}
