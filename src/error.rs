// Error taxonomy for the session engine
// Each kind has its own propagation rule, see the engine module

use thiserror::Error;

/// Transport-level failures of the signaling connection
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConnectionError {
    #[error("connection refused: {0}")]
    Refused(String),

    #[error("connection dropped: {0}")]
    Dropped(String),

    #[error("signaling channel is not open")]
    NotOpen,

    #[error("invalid server endpoint: {0}")]
    InvalidEndpoint(String),
}

/// Malformed or unparseable envelopes
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ProtocolError {
    #[error("malformed payload: {0}")]
    Malformed(String),

    #[error("payload is not a JSON object")]
    NotAnObject,

    #[error("payload has no type discriminator")]
    MissingType,

    #[error("invalid `{kind}` envelope: {reason}")]
    InvalidFields { kind: String, reason: String },

    #[error("failed to encode envelope: {0}")]
    Encode(String),
}

/// Local capture device failures
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum MediaError {
    #[error("media access denied")]
    Denied,

    #[error("media unavailable: {0}")]
    Unavailable(String),
}

/// SDP / ICE failures while setting up the peer media connection
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum NegotiationError {
    #[error("no peer connection for this call")]
    NoPeer,

    #[error("sdp error: {0}")]
    Sdp(String),

    #[error("ice error: {0}")]
    Ice(String),

    #[error("transport error: {0}")]
    Transport(String),
}

#[derive(Debug, Error)]
pub enum SessionError {
    #[error(transparent)]
    Connection(#[from] ConnectionError),

    #[error(transparent)]
    Protocol(#[from] ProtocolError),

    #[error(transparent)]
    Media(#[from] MediaError),

    #[error(transparent)]
    Negotiation(#[from] NegotiationError),
}
