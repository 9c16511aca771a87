// Peer connection seam
// The engine drives any implementation through these calls; `Str0mPeer` is the real one

use std::time::Instant;

use super::state::PeerConnectionState;
use crate::config::IceConfig;
use crate::error::NegotiationError;
use crate::media::LocalMedia;
use crate::protocol::{IceCandidateInit, SessionDescription};

pub trait PeerConnection {
    /// Attach local tracks, create an offer and set it as the local description
    fn create_offer(&mut self, media: &LocalMedia) -> Result<SessionDescription, NegotiationError>;

    /// Set `offer` as the remote description, then create and set the answer
    fn create_answer(
        &mut self,
        offer: &SessionDescription,
        media: &LocalMedia,
    ) -> Result<SessionDescription, NegotiationError>;

    /// Complete our own offer with the partner's answer
    fn set_remote_answer(&mut self, answer: &SessionDescription) -> Result<(), NegotiationError>;

    fn add_remote_candidate(&mut self, candidate: &IceCandidateInit) -> Result<(), NegotiationError>;

    /// Next locally gathered candidate, if any
    fn poll_local_candidate(&mut self) -> Option<IceCandidateInit>;

    /// Move packets and timers forward
    fn drive(&mut self, now: Instant) -> Result<(), NegotiationError>;

    fn state(&self) -> PeerConnectionState;

    fn close(&mut self);
}

/// Builds one peer connection per call
pub trait PeerFactory {
    type Peer: PeerConnection;

    /// ICE servers are handed over as-is
    fn create(&self, ice: &IceConfig) -> Result<Self::Peer, NegotiationError>;
}
