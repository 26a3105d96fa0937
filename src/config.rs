//! Startup configuration
//!
//! All settings are fixed at startup and loaded from a TOML file; only the
//! output volume is runtime-mutable (through the audio engine).

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::error::{Error, Result};

/// Top-level gateway configuration
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct GatewayConfig {
    pub broker: BrokerConfig,
    pub topics: TopicConfig,
    pub audio: AudioConfig,
    pub stream: StreamConfig,
    pub upload: UploadConfig,
    pub sensor: SensorConfig,
}

/// MQTT broker connection settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BrokerConfig {
    pub host: String,
    pub port: u16,
    pub client_id: String,
    /// Retained `online` marker is published here on every connect
    pub status_topic: String,
    pub keep_alive_secs: u64,
    pub reconnect_secs: u64,
}

impl Default for BrokerConfig {
    fn default() -> Self {
        Self {
            host: "broker.hivemq.com".to_string(),
            port: 1883,
            client_id: "SmartAlarmClock".to_string(),
            status_topic: "smartalarm/gateway/status".to_string(),
            keep_alive_secs: 30,
            reconnect_secs: crate::constants::RECONNECT_INTERVAL_SECS,
        }
    }
}

/// Bus topic layout
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TopicConfig {
    /// Inbound: payload is a file name to play
    pub play_audio: String,
    /// Inbound: system command verbs
    pub commands: String,
    /// Outbound: command replies
    pub status: String,
    /// Outbound: playback status (`playing` | `finished` | `error`)
    pub audio_status: String,
    /// Outbound: comma-joined audio file list
    pub files: String,
    /// Inbound: `REQUEST_FREE_SPACE`
    pub upload_request: String,
    /// Inbound: `START:` / `CHUNK:` / `END`
    pub upload_chunk: String,
    /// Outbound: `FREE:<free>:<current>`
    pub upload_response: String,
    /// Outbound: `ACK:<index>`
    pub upload_ack: String,
    /// Outbound: `UPLOAD_COMPLETE` or failure string
    pub upload_status: String,
    /// Prefix for forwarded relay readings, e.g. `smartalarm/sensor`
    pub sensor_prefix: String,
}

impl Default for TopicConfig {
    fn default() -> Self {
        Self {
            play_audio: "smartalarm/play_audio".to_string(),
            commands: "smartalarm/commands".to_string(),
            status: "smartalarm/status".to_string(),
            audio_status: "smartalarm/audio/status".to_string(),
            files: "smartalarm/files".to_string(),
            upload_request: "esp32/audio_request".to_string(),
            upload_chunk: "esp32/audio_chunk".to_string(),
            upload_response: "esp32/audio_response".to_string(),
            upload_ack: "esp32/audio_ack".to_string(),
            upload_status: "esp32/audio_status".to_string(),
            sensor_prefix: "smartalarm/sensor".to_string(),
        }
    }
}

/// Audio output settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AudioConfig {
    /// Startup volume, clamped to [0.0, 1.0]
    pub volume: f32,
    /// Output device name; `None` picks the system default
    pub output_device: Option<String>,
}

impl Default for AudioConfig {
    fn default() -> Self {
        Self {
            volume: 0.5,
            output_device: None,
        }
    }
}

/// Live stream ingress settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StreamConfig {
    pub bind_address: String,
    pub port: u16,
    pub buffer_capacity: usize,
    pub preroll_percent: usize,
    pub max_packet_size: usize,
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            bind_address: "0.0.0.0".to_string(),
            port: 8081,
            buffer_capacity: crate::constants::JITTER_CAPACITY,
            preroll_percent: crate::constants::PREROLL_PERCENT,
            max_packet_size: crate::constants::MAX_PACKET_SIZE,
        }
    }
}

/// Chunked upload / storage settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct UploadConfig {
    /// Directory backing the audio store
    pub dir: PathBuf,
    /// Byte quota for the store (the flash-partition analog)
    pub quota_bytes: u64,
    pub flush_interval_bytes: usize,
    pub timeout_secs: u64,
}

impl Default for UploadConfig {
    fn default() -> Self {
        Self {
            dir: PathBuf::from("audio"),
            quota_bytes: 4 * 1024 * 1024,
            flush_interval_bytes: crate::constants::FLUSH_INTERVAL_BYTES,
            timeout_secs: crate::constants::UPLOAD_TIMEOUT_SECS,
        }
    }
}

/// Sensor relay ingress settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SensorConfig {
    pub bind_address: String,
    pub port: u16,
}

impl Default for SensorConfig {
    fn default() -> Self {
        Self {
            bind_address: "0.0.0.0".to_string(),
            port: 8200,
        }
    }
}

impl GatewayConfig {
    /// Load configuration from the given path, or from the platform config
    /// directory when no path is given. A missing file yields defaults.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let path = match path {
            Some(p) => p.to_path_buf(),
            None => match Self::default_path() {
                Some(p) => p,
                None => return Ok(Self::default()),
            },
        };

        if !path.exists() {
            tracing::info!("No config file at {}, using defaults", path.display());
            return Ok(Self::default());
        }

        let raw = std::fs::read_to_string(&path)?;
        let config: Self = toml::from_str(&raw)
            .map_err(|e| Error::Config(format!("{}: {}", path.display(), e)))?;

        tracing::info!("Loaded configuration from {}", path.display());
        Ok(config)
    }

    /// Platform config location (`<config dir>/gateway.toml`)
    pub fn default_path() -> Option<PathBuf> {
        directories::ProjectDirs::from("", "", "smartalarm-gateway")
            .map(|dirs| dirs.config_dir().join("gateway.toml"))
    }

    /// Pre-roll trigger threshold in bytes
    pub fn preroll_bytes(&self) -> usize {
        self.stream.buffer_capacity * self.stream.preroll_percent / 100
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = GatewayConfig::default();
        assert_eq!(config.broker.port, 1883);
        assert_eq!(config.broker.client_id, "SmartAlarmClock");
        assert_eq!(config.stream.buffer_capacity, 8192);
        assert_eq!(config.preroll_bytes(), 4096);
        assert_eq!(config.topics.upload_ack, "esp32/audio_ack");
    }

    #[test]
    fn test_partial_toml_fills_defaults() {
        let parsed: GatewayConfig = toml::from_str(
            r#"
            [broker]
            host = "10.0.0.2"
            client_id = "bench-gateway"

            [stream]
            preroll_percent = 25
            "#,
        )
        .unwrap();

        assert_eq!(parsed.broker.host, "10.0.0.2");
        assert_eq!(parsed.broker.port, 1883);
        assert_eq!(parsed.preroll_bytes(), 2048);
        assert_eq!(parsed.upload.quota_bytes, 4 * 1024 * 1024);
    }

    #[test]
    fn test_volume_default() {
        let config = GatewayConfig::default();
        assert!((config.audio.volume - 0.5).abs() < f32::EPSILON);
    }
}
