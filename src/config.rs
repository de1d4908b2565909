//! Receiver configuration
//!
//! Loaded from a TOML file; every field has a default so a partial or
//! missing file is fine.
//!
//! ```toml
//! [network]
//! multicast_group = "239.255.77.77"
//! port = 4010
//! interface = "eth0"
//!
//! [playback]
//! buffer_ms = 500
//! initial_volume = 100
//! ```

use serde::{Deserialize, Serialize};
use std::net::Ipv4Addr;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::constants::*;
use crate::error::{Error, Result};

/// Complete receiver configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReceiverConfig {
    pub network: NetworkConfig,
    pub playback: PlaybackConfig,
}

/// Socket and multicast settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct NetworkConfig {
    /// Group the stream is sent to
    pub multicast_group: Ipv4Addr,
    pub port: u16,
    /// Local interface used for the group join, as an IPv4 address or an
    /// interface name; `0.0.0.0` lets the OS pick
    pub interface: String,
    /// OS receive buffer size in bytes, left at the OS default when unset
    pub recv_buffer_size: Option<usize>,
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            multicast_group: DEFAULT_MULTICAST_GROUP,
            port: DEFAULT_PORT,
            interface: Ipv4Addr::UNSPECIFIED.to_string(),
            recv_buffer_size: None,
        }
    }
}

/// Output settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PlaybackConfig {
    /// Jitter buffer window in milliseconds
    pub buffer_ms: u32,
    /// Output device name; the default device when unset
    pub device: Option<String>,
    /// Volume before anyone sets one, `0..=100`
    pub initial_volume: u8,
}

impl PlaybackConfig {
    pub fn buffer_window(&self) -> Duration {
        Duration::from_millis(u64::from(self.buffer_ms))
    }
}

impl Default for PlaybackConfig {
    fn default() -> Self {
        Self {
            buffer_ms: DEFAULT_JITTER_BUFFER_MS,
            device: None,
            initial_volume: DEFAULT_VOLUME,
        }
    }
}

impl ReceiverConfig {
    /// Default config file location for this user
    pub fn default_path() -> Option<PathBuf> {
        directories::ProjectDirs::from("", "", "lan-audio-receiver")
            .map(|dirs| dirs.config_dir().join("receiver.toml"))
    }

    /// Parse and validate a config file
    pub fn load(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)?;
        let config: ReceiverConfig = toml::from_str(&text)
            .map_err(|e| Error::Config(format!("{}: {}", path.display(), e)))?;
        config.validate()?;
        Ok(config)
    }

    /// Like [`load`](Self::load), but a missing file yields the defaults
    pub fn load_or_default(path: &Path) -> Result<Self> {
        if path.exists() {
            Self::load(path)
        } else {
            tracing::debug!("No config at {}, using defaults", path.display());
            Ok(Self::default())
        }
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        let text = toml::to_string_pretty(self).map_err(|e| Error::Config(e.to_string()))?;
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, text)?;
        Ok(())
    }

    pub fn validate(&self) -> Result<()> {
        if !self.network.multicast_group.is_multicast() {
            return Err(Error::Config(format!(
                "{} is not a multicast address",
                self.network.multicast_group
            )));
        }

        if self.network.interface.trim().is_empty() {
            return Err(Error::Config("interface must not be empty".to_string()));
        }

        let buffer_ms = self.playback.buffer_ms;
        if !(MIN_JITTER_BUFFER_MS..=MAX_JITTER_BUFFER_MS).contains(&buffer_ms) {
            return Err(Error::Config(format!(
                "buffer_ms {} outside {}..={}",
                buffer_ms, MIN_JITTER_BUFFER_MS, MAX_JITTER_BUFFER_MS
            )));
        }

        if self.playback.initial_volume > 100 {
            return Err(Error::Config(format!(
                "initial_volume {} above 100",
                self.playback.initial_volume
            )));
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_match_stream_source() {
        let config = ReceiverConfig::default();
        assert_eq!(config.network.multicast_group, Ipv4Addr::new(239, 255, 77, 77));
        assert_eq!(config.network.port, 4010);
        assert_eq!(config.playback.buffer_window(), Duration::from_millis(500));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_partial_toml_fills_defaults() {
        let config: ReceiverConfig = toml::from_str(
            r#"
            [network]
            port = 5010
            interface = "eth0"

            [playback]
            buffer_ms = 150
            "#,
        )
        .unwrap();

        assert_eq!(config.network.port, 5010);
        assert_eq!(config.network.interface, "eth0");
        assert_eq!(config.network.multicast_group, DEFAULT_MULTICAST_GROUP);
        assert_eq!(config.playback.buffer_ms, 150);
        assert_eq!(config.playback.initial_volume, 100);
    }

    #[test]
    fn test_validation_rejects_bad_values() {
        let mut config = ReceiverConfig::default();
        config.network.multicast_group = Ipv4Addr::new(192, 168, 1, 10);
        assert!(matches!(config.validate(), Err(Error::Config(_))));

        let mut config = ReceiverConfig::default();
        config.network.interface = String::new();
        assert!(config.validate().is_err());

        let mut config = ReceiverConfig::default();
        config.playback.buffer_ms = 5;
        assert!(config.validate().is_err());

        let mut config = ReceiverConfig::default();
        config.playback.initial_volume = 101;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_save_and_load() {
        let dir = std::env::temp_dir().join(format!("lan-audio-receiver-{}", uuid::Uuid::new_v4()));
        let path = dir.join("receiver.toml");

        let mut config = ReceiverConfig::default();
        config.playback.device = Some("Speakers".to_string());
        config.network.recv_buffer_size = Some(1 << 20);
        config.save(&path).unwrap();

        let loaded = ReceiverConfig::load(&path).unwrap();
        assert_eq!(loaded, config);

        std::fs::remove_dir_all(&dir).unwrap();
    }

    #[test]
    fn test_missing_file_yields_defaults() {
        let path = std::env::temp_dir().join("lan-audio-receiver-does-not-exist.toml");
        assert_eq!(
            ReceiverConfig::load_or_default(&path).unwrap(),
            ReceiverConfig::default()
        );
    }
}
