use std::{fs, path::Path};

use serde::{de::DeserializeOwned, Deserialize};

use crate::client::media::Constraints;

pub const DEFAULT_STUN: &str = "stun:stun.l.google.com:19302";

/// Signaling relay server settings.
#[derive(Deserialize, Debug)]
pub struct Config {
    pub port: u16,
    pub bind: Option<String>,
    pub max_connection_limit: Option<usize>,
    /// Capacity of each room's broadcast channel.
    pub room_buffer: Option<usize>,
}

impl Config {
    pub fn addr(&self) -> String {
        format!("{}:{}", self.bind.as_deref().unwrap_or("127.0.0.1"), self.port)
    }
}

/// Participant settings.
#[derive(Deserialize, Debug)]
pub struct ClientConfig {
    /// Base of the relay, e.g. `ws://127.0.0.1:8000`.
    pub signaling_url: String,
    pub room: String,
    pub identity: String,
    #[serde(default = "default_ice_servers")]
    pub ice_servers: Vec<String>,
    #[serde(default)]
    pub media: MediaConfig,
    pub api: Option<ApiConfig>,
}

#[derive(Deserialize, Debug, Clone, Copy)]
pub struct MediaConfig {
    #[serde(default = "enabled")]
    pub audio: bool,
    #[serde(default = "enabled")]
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

impl From<MediaConfig> for Constraints {
    fn from(media: MediaConfig) -> Self {
        Constraints {
            audio: media.audio,
            video: media.video,
        }
    }
}

/// Backend holding recordings and attendance.
#[derive(Deserialize, Debug, Clone)]
pub struct ApiConfig {
    pub base_url: String,
    pub token: Option<String>,
    #[serde(default)]
    pub host: bool,
    #[serde(default = "default_timeout")]
    pub timeout_secs: u64,
}

fn default_ice_servers() -> Vec<String> {
    vec![DEFAULT_STUN.to_owned()]
}

fn enabled() -> bool {
    true
}

fn default_timeout() -> u64 {
    30
}

/// Read and parse a toml file.
pub fn load<T: DeserializeOwned>(path: impl AsRef<Path>) -> crate::Result<T> {
    let toml_string = fs::read_to_string(path)?;
    Ok(toml::from_str(&toml_string)?)
}
