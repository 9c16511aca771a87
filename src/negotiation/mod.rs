// Negotiation: peer media connection setup for the video variant
//
// Role selection, per-call state, the peer connection seam and the
// engine that runs offer/answer and trickle ICE over the signaling channel.

pub mod discovery;
pub mod engine;
pub mod peer;
pub mod role;
pub mod state;
pub mod str0m_peer;

pub use engine::{CallOutput, NegotiationEngine};
pub use peer::{PeerConnection, PeerFactory};
pub use role::{select_role, Role};
pub use state::{CallStatus, NegotiationState, PeerConnectionState};
pub use str0m_peer::{Str0mPeer, Str0mPeerFactory};
