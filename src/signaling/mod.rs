// Signaling: pairing server endpoint and the WebSocket channel to it

pub mod channel;
pub mod endpoint;

pub use channel::{ChannelEvent, ChannelEventReceiver, ChannelEventSender, SignalingChannel};
pub use endpoint::Endpoint;
