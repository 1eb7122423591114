//! Engine configuration
//!
//! Loaded from a TOML file; every section falls back to defaults so a
//! missing or partial file still yields a working engine.

use serde::Deserialize;
use std::path::Path;
use tracing::info;

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct Config {
    pub ice: IceConfig,
    pub media: MediaConfig,
    pub room: RoomConfig,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct IceConfig {
    pub servers: Vec<IceServerConfig>,
    pub candidate_pool_size: u8,
}

impl Default for IceConfig {
    fn default() -> Self {
        Self {
            servers: vec![IceServerConfig {
                urls: vec![
                    "stun:stun1.l.google.com:19302".to_string(),
                    "stun:stun2.l.google.com:19302".to_string(),
                ],
                username: None,
                credential: None,
            }],
            candidate_pool_size: 10,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct IceServerConfig {
    pub urls: Vec<String>,
    pub username: Option<String>,
    pub credential: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct MediaConfig {
    pub video: bool,
    pub audio: bool,
}

impl Default for MediaConfig {
    fn default() -> Self {
        Self {
            video: true,
            audio: true,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RoomConfig {
    pub token_length: usize,
}

impl Default for RoomConfig {
    fn default() -> Self {
        Self { token_length: 7 }
    }
}

impl Config {
    pub fn from_path(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path)?;
        let config: Config = toml::from_str(&raw)?;
        info!(path = %path.display(), "loaded configuration");
        Ok(config)
    }
}
