//! Engine lifecycle state.

/// Engine operational state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EngineState {
    /// Created but not started.
    Starting,
    /// Accepting settlements, withdrawals and webhooks.
    Running,
    /// Draining in-flight payout submissions; new requests are refused.
    ShuttingDown,
    /// Stopped.
    Stopped,
}

impl EngineState {
    /// Check if the engine is accepting new requests.
    pub fn accepts_requests(&self) -> bool {
        matches!(self, EngineState::Running)
    }

    /// Check if the engine is in a terminal state.
    pub fn is_terminal(&self) -> bool {
        matches!(self, EngineState::Stopped)
    }
}
