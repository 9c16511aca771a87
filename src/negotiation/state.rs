// Per-call negotiation state and user-facing call status

use std::collections::VecDeque;

use super::role::Role;
use crate::protocol::{IceCandidateInit, SessionDescription};

/// Transport state as reported by the peer connection
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PeerConnectionState {
    New,
    Connecting,
    Connected,
    Disconnected,
    Failed,
    Closed,
}

/// What the user sees about the media call
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CallStatus {
    Idle,
    AcquiringMedia,
    Negotiating,
    Connected,
    /// SDP/ICE failed; chat keeps working
    Degraded(String),
    /// No local capture; chat only
    MediaUnavailable(String),
}

/// Everything known about one call with one partner
#[derive(Debug, Clone)]
pub struct NegotiationState {
    pub role: Role,
    pub local_id: String,
    pub partner_id: String,
    pub local_description: Option<SessionDescription>,
    pub remote_description: Option<SessionDescription>,
    /// Found before the local description was set
    pub pending_local_candidates: Vec<IceCandidateInit>,
    /// Received before the remote description was set, in receipt order
    pub pending_remote_candidates: VecDeque<IceCandidateInit>,
    pub connection_state: PeerConnectionState,
}

impl NegotiationState {
    pub fn new(role: Role, local_id: String, partner_id: String) -> Self {
        Self {
            role,
            local_id,
            partner_id,
            local_description: None,
            remote_description: None,
            pending_local_candidates: Vec::new(),
            pending_remote_candidates: VecDeque::new(),
            connection_state: PeerConnectionState::New,
        }
    }

    pub fn has_remote_description(&self) -> bool {
        self.remote_description.is_some()
    }

    pub fn has_local_description(&self) -> bool {
        self.local_description.is_some()
    }
}
