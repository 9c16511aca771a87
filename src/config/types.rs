// pairchat configuration types
// All settings with sensible defaults so a partial file still loads

use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::signaling::Endpoint;

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct Config {
    #[serde(default)]
    pub signaling: SignalingConfig,
    #[serde(default)]
    pub identity: IdentityConfig,
    #[serde(default)]
    pub ice: IceConfig,
    #[serde(default)]
    pub chat: ChatConfig,
    #[serde(default)]
    pub media: MediaConfig,
}

/// Deployment profile selecting which pairing server to reach
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Profile {
    Development,
    Production,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct SignalingConfig {
    pub profile: Profile,
    pub development: Endpoint,
    pub production: Endpoint,
}

impl SignalingConfig {
    /// Endpoint of the active profile
    pub fn endpoint(&self) -> &Endpoint {
        match self.profile {
            Profile::Development => &self.development,
            Profile::Production => &self.production,
        }
    }
}

impl Default for SignalingConfig {
    fn default() -> Self {
        Self {
            profile: Profile::Production,
            development: Endpoint::new("ws", "localhost:8080"),
            production: Endpoint::new("wss", "banterblend.koyeb.app"),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct IdentityConfig {
    // Name shown to the partner
    pub display_name: String,

    // Interests the server uses for matching (empty = random pairing)
    pub interests: Vec<String>,
}

impl Default for IdentityConfig {
    fn default() -> Self {
        Self {
            display_name: "Stranger".to_string(),
            interests: Vec::new(),
        }
    }
}

/// One STUN/TURN entry, passed through to the peer connection untouched
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct IceServer {
    pub urls: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub credential: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(default)]
pub struct IceConfig {
    pub servers: Vec<IceServer>,
}

impl Default for IceConfig {
    fn default() -> Self {
        Self {
            servers: vec![IceServer {
                urls: vec!["stun:stun.cloudflare.com:3478".to_string()],
                username: None,
                credential: None,
            }],
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ChatConfig {
    // Quiet period after the last keystroke before `notTyping` is sent
    pub typing_quiescence_ms: u64,

    // Run the audio/video variant (negotiates a peer media connection)
    pub video: bool,
}

impl ChatConfig {
    pub fn typing_quiescence(&self) -> Duration {
        Duration::from_millis(self.typing_quiescence_ms)
    }
}

impl Default for ChatConfig {
    fn default() -> Self {
        Self {
            typing_quiescence_ms: 2000,
            video: false,
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct MediaConfig {
    // Offer a local audio track
    pub audio: bool,

    // Offer a local video track
    pub video: bool,
}

impl Default for MediaConfig {
    fn default() -> Self {
        Self {
            audio: true,
            video: true,
        }
    }
}
