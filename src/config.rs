//! Relay configuration loaded from TOML
//!
//! Every field has a default so a missing or partial file still produces a
//! usable configuration. The default location is
//! `<config dir>/streamrelay/config.toml`.

use serde::{Deserialize, Serialize};
use std::net::IpAddr;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

use crate::vban::protocol::SampleEncoding;

const CONFIG_DIR: &str = "streamrelay";
const CONFIG_FILE: &str = "config.toml";

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Failed to write config file {path}: {source}")]
    Write {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Failed to serialize config: {0}")]
    Serialize(#[from] toml::ser::Error),

    #[error("No config directory available on this platform")]
    NoConfigDir,
}

/// Top-level configuration for both relays
#[derive(Deserialize, Serialize, Clone, Debug, Default, PartialEq)]
#[serde(default)]
pub struct RelayConfig {
    pub dsu: DsuConfig,
    pub vban: VbanConfig,
}

/// Settings for the DSU motion server
#[derive(Deserialize, Serialize, Clone, Debug, PartialEq)]
#[serde(default)]
pub struct DsuConfig {
    pub enabled: bool,
    pub bind_address: IpAddr,
    pub port: u16,
    /// How often the client registry is scanned for silent clients
    pub check_interval_ms: u64,
    /// A client that has not re-requested data for longer than this is dropped
    pub client_timeout_ms: u64,
    /// Capacity of the motion event queue between producers and the server task
    pub event_queue_capacity: usize,
}

impl Default for DsuConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            bind_address: IpAddr::from([127, 0, 0, 1]),
            port: crate::dsu::DEFAULT_PORT,
            check_interval_ms: 1000,
            client_timeout_ms: 5000,
            event_queue_capacity: 1000,
        }
    }
}

/// Settings for the VBAN audio emitter
#[derive(Deserialize, Serialize, Clone, Debug, PartialEq)]
#[serde(default)]
pub struct VbanConfig {
    pub enabled: bool,
    /// Receiver address; the emitter drops audio while this is unset
    pub destination: Option<IpAddr>,
    pub port: u16,
    pub stream_name: String,
    /// Capacity of the buffer queue between the capture thread and the emitter task
    pub queue_capacity: usize,
    pub capture: CaptureConfig,
}

impl Default for VbanConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            destination: None,
            port: crate::vban::DEFAULT_PORT,
            stream_name: crate::vban::DEFAULT_STREAM_NAME.to_string(),
            queue_capacity: 64,
            capture: CaptureConfig::default(),
        }
    }
}

/// Format of the raw PCM stream fed to the binary's capture source
#[derive(Deserialize, Serialize, Clone, Debug, PartialEq)]
#[serde(default)]
pub struct CaptureConfig {
    pub sample_rate: u32,
    pub encoding: SampleEncoding,
    pub channels: u8,
    /// Sample frames per delivered buffer
    pub buffer_samples: u32,
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            sample_rate: 48000,
            encoding: SampleEncoding::S16,
            channels: 2,
            buffer_samples: 1024,
        }
    }
}

impl RelayConfig {
    pub fn from_toml(content: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(content)?)
    }

    pub fn to_toml(&self) -> Result<String, ConfigError> {
        Ok(toml::to_string_pretty(self)?)
    }

    /// Loads the config at `path`, falling back to defaults if the file does not exist
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        match std::fs::read_to_string(path) {
            Ok(content) => {
                debug!("Loaded config from {}", path.display());
                Self::from_toml(&content)
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                warn!("Config file {} not found, using defaults", path.display());
                Ok(Self::default())
            }
            Err(source) => Err(ConfigError::Read {
                path: path.to_path_buf(),
                source,
            }),
        }
    }

    pub fn save(&self, path: &Path) -> Result<(), ConfigError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|source| ConfigError::Write {
                path: parent.to_path_buf(),
                source,
            })?;
        }
        std::fs::write(path, self.to_toml()?).map_err(|source| ConfigError::Write {
            path: path.to_path_buf(),
            source,
        })
    }
}

pub fn default_config_path() -> Result<PathBuf, ConfigError> {
    let mut path = dirs::config_dir().ok_or(ConfigError::NoConfigDir)?;
    path.push(CONFIG_DIR);
    path.push(CONFIG_FILE);
    Ok(path)
}

/// Writes a default config to `path` unless a file is already there
pub fn ensure_default_config(path: &Path) -> Result<(), ConfigError> {
    if path.exists() {
        debug!("Config already present at {}", path.display());
        return Ok(());
    }
    info!("Writing default config to {}", path.display());
    RelayConfig::default().save(path)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn partial_file_keeps_defaults() {
        let config = RelayConfig::from_toml(
            r#"
            [dsu]
            port = 26761

            [vban]
            enabled = true
            destination = "192.168.1.20"
            "#,
        )
        .unwrap();

        assert_eq!(config.dsu.port, 26761);
        assert_eq!(config.dsu.client_timeout_ms, 5000);
        assert!(config.vban.enabled);
        assert_eq!(
            config.vban.destination,
            Some(IpAddr::from([192, 168, 1, 20]))
        );
        assert_eq!(config.vban.port, 6980);
        assert_eq!(config.vban.capture.encoding, SampleEncoding::S16);
    }

    #[test]
    fn encoding_is_read_by_name() {
        let config = RelayConfig::from_toml(
            r#"
            [vban.capture]
            encoding = "f32"
            channels = 1
            "#,
        )
        .unwrap();
        assert_eq!(config.vban.capture.encoding, SampleEncoding::F32);
        assert_eq!(config.vban.capture.channels, 1);
    }

    #[test]
    fn save_then_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join(CONFIG_FILE);

        let mut config = RelayConfig::default();
        config.dsu.client_timeout_ms = 2500;
        config.vban.stream_name = "Desk".to_string();
        config.save(&path).unwrap();

        assert_eq!(RelayConfig::load(&path).unwrap(), config);
    }

    #[test]
    fn missing_file_gives_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let config = RelayConfig::load(&dir.path().join("absent.toml")).unwrap();
        assert_eq!(config, RelayConfig::default());
    }

    #[test]
    fn ensure_default_does_not_overwrite() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(CONFIG_FILE);
        std::fs::write(&path, "[dsu]\nport = 1\n").unwrap();

        ensure_default_config(&path).unwrap();
        assert_eq!(RelayConfig::load(&path).unwrap().dsu.port, 1);
    }

    #[test]
    fn malformed_file_is_an_error() {
        assert!(matches!(
            RelayConfig::from_toml("[dsu]\nport = \"nope\""),
            Err(ConfigError::Parse(_))
        ));
    }
}
