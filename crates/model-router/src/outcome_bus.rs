//! OutcomeBus: a single in-process broadcast channel fanning a completed
//! `Outcome` out to every interested subscriber.
//!
//! Grounded on `router_common::circuit_breaker`'s use of `tokio::sync`
//! primitives for shared mutable state, generalized from a single shared lock
//! to a broadcast/subscribe shape because the subscribers here (rotator,
//! circuit breaker, quota manager, scorer, learning engine) are independent
//! and must each see every outcome exactly once, in the order it was
//! published.

use router_common::Outcome;
use tokio::sync::broadcast;

/// The only event the bus carries today. Kept as an enum (rather than bare
/// `Outcome`) so a future event kind doesn't require changing every
/// subscriber's channel type.
#[derive(Debug, Clone)]
pub enum OutcomeEvent {
    Recorded(Outcome),
}

/// Default channel depth. A slow subscriber that falls more than this many
/// outcomes behind loses the oldest ones (`broadcast::error::RecvError::Lagged`),
/// per `tokio::sync::broadcast`'s normal behaviour.
pub const DEFAULT_CAPACITY: usize = 1024;

/// Thin wrapper around `broadcast::Sender<OutcomeEvent>` so callers publish
/// through a named type instead of holding the channel primitive directly.
pub struct OutcomeBus {
    sender: broadcast::Sender<OutcomeEvent>,
}

impl OutcomeBus {
    pub fn new(capacity: usize) -> Self {
        let (sender, _receiver) = broadcast::channel(capacity);
        Self { sender }
    }

    /// A fresh receiver, independent of any other subscriber's read position.
    pub fn subscribe(&self) -> broadcast::Receiver<OutcomeEvent> {
        self.sender.subscribe()
    }

    /// Publish an outcome. A bus with no subscribers silently drops it —
    /// nothing downstream depends on this particular `record_result` call
    /// having a listener yet.
    pub fn publish(&self, outcome: Outcome) {
        let _ = self.sender.send(OutcomeEvent::Recorded(outcome));
    }
}

impl Default for OutcomeBus {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}
