// pairchat: client engine for anonymous one-to-one text and video chat
// A pairing server matches strangers; this crate runs the pairing session,
// the chat protocol and the peer media negotiation around it.

pub mod config;
pub mod engine;
pub mod error;
pub mod logging;
pub mod media;
pub mod negotiation;
pub mod protocol;
pub mod runtime;
pub mod session;
pub mod signaling;

pub use engine::{Effect, Input, SessionEngine, SessionView};
pub use runtime::{start_session, SessionClient, SessionEvent};
