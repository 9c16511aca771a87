// Wire protocol between the client and the pairing server
// Envelope vocabulary plus the JSON codec

pub mod codec;
pub mod envelope;

pub use codec::{decode, decode_frame, encode};
pub use envelope::{Envelope, IceCandidateInit, SdpKind, SessionDescription, NO_PARTNER};
