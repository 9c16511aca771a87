// Pairing session: stage machine, conversation and the pairing lifecycle

pub mod conversation;
pub mod machine;
pub mod stage;

pub use conversation::{ChatMessage, Conversation};
pub use machine::{CallSignal, Command, Output, PairingSession, Prompt, SessionProfile};
pub use stage::Stage;
