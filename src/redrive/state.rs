//! Redrive FSM State Definitions

use std::fmt;

/// Redrive run states
///
/// ```text
/// Idle ──▶ Receiving ──▶ Redriving ──▶ Receiving ...
///              │              │
///              └──▶ Reporting ◀┘ ──▶ Idle
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum RedriveState {
    #[default]
    Idle,
    /// Pulling a batch of at most 10 from the DLQ
    Receiving,
    /// Resending the batch to the main queue
    Redriving,
    /// Budget reached or DLQ observed empty
    Reporting,
}

impl RedriveState {
    /// Whether `self → next` is a legal step
    pub fn can_transition_to(&self, next: RedriveState) -> bool {
        use RedriveState::*;
        matches!(
            (self, next),
            (Idle, Receiving)
                | (Receiving, Redriving)
                | (Receiving, Reporting)
                | (Redriving, Receiving)
                | (Redriving, Reporting)
                | (Reporting, Idle)
        )
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            RedriveState::Idle => "IDLE",
            RedriveState::Receiving => "RECEIVING",
            RedriveState::Redriving => "REDRIVING",
            RedriveState::Reporting => "REPORTING",
        }
    }
}

impl fmt::Display for RedriveState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}
