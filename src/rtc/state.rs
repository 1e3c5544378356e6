//! Per-peer negotiation state
//!
//! ```text
//!   Idle | Stable ──remote offer applied──► RemoteOfferReceived ──answer sent──► Stable
//!   Idle | Stable ──local offer created──► LocalOfferSent ──offer sent──► AwaitingAnswer
//!                                                       AwaitingAnswer ──answer applied──► Stable
//!   any ──close──► Closed
//! ```

use std::collections::VecDeque;

use crate::protocol::IceCandidate;

/// Offer/answer progress of one peer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NegotiationState {
    /// Created, nothing exchanged yet
    Idle,
    /// Local offer created, not yet sent
    LocalOfferSent,
    /// Remote offer applied, answer pending
    RemoteOfferReceived,
    /// Local offer sent, waiting for the browser's answer
    AwaitingAnswer,
    /// Last exchange complete
    Stable,
    /// Peer torn down
    Closed,
}

impl NegotiationState {
    /// Whether a new exchange may start from this state
    pub fn can_start_exchange(&self) -> bool {
        matches!(self, NegotiationState::Idle | NegotiationState::Stable)
    }

    pub fn is_closed(&self) -> bool {
        *self == NegotiationState::Closed
    }
}

/// Remote candidates received before the remote description was applied
///
/// Drained once, in arrival order.
#[derive(Debug, Default)]
pub struct IceBuffer {
    candidates: VecDeque<IceCandidate>,
}

impl IceBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, candidate: IceCandidate) {
        self.candidates.push_back(candidate);
    }

    /// Take every buffered candidate, oldest first
    pub fn drain(&mut self) -> Vec<IceCandidate> {
        self.candidates.drain(..).collect()
    }

    pub fn len(&self) -> usize {
        self.candidates.len()
    }

    pub fn is_empty(&self) -> bool {
        self.candidates.is_empty()
    }

    pub fn clear(&mut self) {
        self.candidates.clear();
    }
}
