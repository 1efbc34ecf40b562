//! Server configuration.
//!
//! Supports loading from YAML files with environment variable overrides.

use std::collections::HashMap;
use std::net::Ipv4Addr;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use menagerie_core::{Config, Creature, PlaylistId, UniverseId};
use serde::Deserialize;

/// Server configuration loaded from YAML with environment overrides.
#[derive(Debug, Deserialize, Default)]
#[serde(default)]
pub struct ServerConfig {
    /// Playback core settings (tick period, CID, audio, scheduler).
    #[serde(flatten)]
    pub core: Config,

    /// Creatures this deployment knows about. Stands in for the
    /// document store's creature collection.
    pub creatures: Vec<Creature>,

    /// Directory of stored animations and playlists
    /// (`animations/*.json`, `playlists/*.json`).
    /// Override: `MENAGERIE_LIBRARY`
    pub library: Option<PathBuf>,

    /// Playlists to start automatically at boot, per universe.
    pub startup_playlists: HashMap<UniverseId, PlaylistId>,
}

impl ServerConfig {
    /// Loads configuration from a YAML file, then applies environment
    /// overrides.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut config = if let Some(path) = path {
            let content = std::fs::read_to_string(path)
                .with_context(|| format!("Failed to read config file: {}", path.display()))?;
            serde_yaml::from_str(&content)
                .with_context(|| format!("Failed to parse config file: {}", path.display()))?
        } else {
            Self::default()
        };

        config.apply_env_overrides();
        Ok(config)
    }

    /// Applies environment variable overrides to the configuration.
    fn apply_env_overrides(&mut self) {
        if let Ok(val) = std::env::var("MENAGERIE_TICK_PERIOD_MS") {
            if let Ok(ms) = val.parse() {
                self.core.tick_period_ms = ms;
            }
        }

        if let Ok(val) = std::env::var("MENAGERIE_NETWORK_INTERFACE") {
            if let Ok(ip) = val.parse::<Ipv4Addr>() {
                self.core.network_interface = Some(ip);
            }
        }

        if let Ok(val) = std::env::var("MENAGERIE_SOUND_DIR") {
            self.core.audio.sound_directory = PathBuf::from(val);
        }

        if let Ok(val) = std::env::var("MENAGERIE_LIBRARY") {
            self.library = Some(PathBuf::from(val));
        }

        // Note: MENAGERIE_LOG_LEVEL is handled by clap via #[arg(env = ...)] in main.rs
    }
}
