//! Core configuration types.
//!
//! The server binary builds a [`Config`] from its YAML file and CLI
//! flags; everything here is validated before bootstrap so the event
//! loop never has to second-guess its own settings.

use std::collections::HashMap;
use std::net::{Ipv4Addr, SocketAddr};
use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::model::UniverseId;
use crate::protocol_constants::{DEFAULT_TICK_MS, E131_MAX_UNIVERSE, OPUS_SAMPLE_RATE};

/// How encoded audio leaves the server.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AudioMode {
    /// One UDP socket per creature endpoint.
    #[default]
    RtpUnicast,
    /// Everything on the shared multicast group.
    RtpMulticast,
    /// Audio disabled; DMX only.
    None,
}

/// Configuration for audio encoding and RTP emission.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AudioConfig {
    /// Transport selection.
    #[serde(default)]
    pub mode: AudioMode,

    /// Split oversized Opus payloads into multiple datagrams instead of
    /// relying on IP-layer fragmentation.
    #[serde(default)]
    pub fragment_packets: bool,

    /// Directory holding animation sound files. The Opus cache lives in
    /// a dot-directory underneath it.
    pub sound_directory: PathBuf,

    /// Sample rate for RTP audio. Always 48000; kept in the config so
    /// deployments can see it, validated rather than trusted.
    pub sample_rate: u32,

    /// Multicast group carrying the channel-0 downmix.
    pub multicast_group: SocketAddr,
}

impl Default for AudioConfig {
    fn default() -> Self {
        Self {
            mode: AudioMode::default(),
            fragment_packets: false,
            sound_directory: PathBuf::from("sounds"),
            sample_rate: OPUS_SAMPLE_RATE,
            multicast_group: "239.19.63.17:5004".parse().expect("static multicast addr"),
        }
    }
}

/// Configuration for the cooperative scheduler.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SchedulerConfig {
    /// Milliseconds added to the default start frame of newly scheduled
    /// animations, absorbing client clock skew.
    pub animation_delay_ms: u64,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            animation_delay_ms: 0,
        }
    }
}

/// Configuration for the Menagerie playback core.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Event loop tick period in milliseconds.
    pub tick_period_ms: u64,

    /// IPv4 address of the network interface used for multicast
    /// emission. `None` lets the OS pick.
    #[serde(default)]
    pub network_interface: Option<Ipv4Addr>,

    /// Explicit E1.31 CID. A random one is generated at startup when
    /// absent.
    #[serde(default)]
    pub cid: Option<Uuid>,

    /// Human-readable source name placed in every E1.31 packet.
    pub source_name: String,

    /// Universes delivered by unicast to a fixed host instead of their
    /// derived multicast group.
    #[serde(default)]
    pub unicast_bindings: HashMap<UniverseId, std::net::IpAddr>,

    /// Audio configuration.
    #[serde(default)]
    pub audio: AudioConfig,

    /// Scheduler configuration.
    #[serde(default)]
    pub scheduler: SchedulerConfig,

    /// Capacity of the event broadcast channel.
    pub event_channel_capacity: usize,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            tick_period_ms: DEFAULT_TICK_MS,
            network_interface: None,
            cid: None,
            source_name: "Menagerie creature server".to_string(),
            unicast_bindings: HashMap::new(),
            audio: AudioConfig::default(),
            scheduler: SchedulerConfig::default(),
            event_channel_capacity: crate::protocol_constants::EVENT_CHANNEL_CAPACITY,
        }
    }
}

impl Config {
    /// Validates the configuration values.
    pub fn validate(&self) -> Result<(), String> {
        if self.tick_period_ms == 0 {
            return Err("tick_period_ms must be >= 1".to_string());
        }
        if self.audio.sample_rate != OPUS_SAMPLE_RATE {
            return Err(format!(
                "audio.sample_rate must be {} for RTP/Opus",
                OPUS_SAMPLE_RATE
            ));
        }
        if !matches!(self.audio.multicast_group.ip(), std::net::IpAddr::V4(ip) if ip.is_multicast())
        {
            return Err("audio.multicast_group must be an IPv4 multicast address".to_string());
        }
        if self.source_name.is_empty() || self.source_name.len() > 63 {
            return Err("source_name must be 1..=63 bytes (NUL-padded to 64 on the wire)".into());
        }
        for universe in self.unicast_bindings.keys() {
            if *universe == 0 || *universe > E131_MAX_UNIVERSE {
                return Err(format!("unicast binding for invalid universe {}", universe));
            }
        }
        if self.event_channel_capacity == 0 {
            return Err("event_channel_capacity must be >= 1".to_string());
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_is_valid() {
        assert!(Config::default().validate().is_ok());
    }

    #[test]
    fn zero_tick_period_rejected() {
        let config = Config {
            tick_period_ms: 0,
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn wrong_sample_rate_rejected() {
        let mut config = Config::default();
        config.audio.sample_rate = 44_100;
        assert!(config.validate().is_err());
    }

    #[test]
    fn non_multicast_audio_group_rejected() {
        let mut config = Config::default();
        config.audio.multicast_group = "192.168.1.10:5004".parse().unwrap();
        assert!(config.validate().is_err());
    }

    #[test]
    fn oversized_source_name_rejected() {
        let config = Config {
            source_name: "x".repeat(64),
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn out_of_range_unicast_binding_rejected() {
        let mut config = Config::default();
        config
            .unicast_bindings
            .insert(64_000, "10.3.2.1".parse().unwrap());
        assert!(config.validate().is_err());
    }

    #[test]
    fn audio_mode_serializes_snake_case() {
        assert_eq!(
            serde_json::to_string(&AudioMode::RtpMulticast).unwrap(),
            "\"rtp_multicast\""
        );
    }
}
