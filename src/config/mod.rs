// Configuration module for pairchat
// Handles loading deployment profiles, identity and call settings from a TOML file

pub mod loader;
pub mod types;

pub use loader::{create_default_config, get_config_path, load_config, load_config_from};
pub use types::{
    ChatConfig, Config, IceConfig, IceServer, IdentityConfig, MediaConfig, Profile, SignalingConfig,
};
