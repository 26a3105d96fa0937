//! # Smart Alarm Gateway
//!
//! Firmware core of a networked audio/sensor gateway: a concurrent audio
//! pipeline fed by a jittery network byte stream, a priority-ordered
//! wildcard command router on the MQTT bus, and a chunked, ACK-gated
//! file-upload protocol sharing the same constrained transport.
//!
//! ## Architecture Overview
//!
//! ```text
//!                        ┌──────────────────────────────┐
//!   MQTT broker ────────▶│  Bus Loop (bus::client)      │
//!   (commands, chunks)   │  dispatch by priority +      │
//!                        │  wildcard pattern            │
//!                        └───────┬──────────────┬───────┘
//!                                │              │
//!                      control   │              │  START/CHUNK/END
//!                                ▼              ▼
//!                        ┌──────────────┐  ┌──────────────┐
//!                        │ Audio Engine │  │ Upload       │──▶ Storage
//!                        │ Idle/File/   │  │ Receiver     │◀── ACK publish
//!                        │ LiveStream   │  └──────────────┘
//!                        └──────▲───────┘
//!                               │ pop (bounded wait)
//!                        ┌──────┴───────┐
//!   TCP stream ingress ─▶│ Jitter Buffer│  [u16 LE len][payload]
//!   (Opus packets)       └──────────────┘
//!                               │
//!                  audio pump thread (10 ms cadence)
//!                               ▼
//!                        output bus (cpal)
//! ```
//!
//! Sensor relay records (38-byte packed) arrive on a separate socket and
//! are forwarded to per-metric bus topics by the sensor task.

pub mod audio;
pub mod bus;
pub mod config;
pub mod error;
pub mod net;
pub mod sensor;
pub mod storage;
pub mod tasks;
pub mod transfer;

pub use error::{Error, Result};

/// Application-wide constants
pub mod constants {
    /// Sample rate of the live stream path (Opus standard)
    pub const STREAM_SAMPLE_RATE: u32 = 48_000;

    /// Live stream channel count (mono voice)
    pub const STREAM_CHANNELS: u16 = 1;

    /// Samples per Opus frame (20 ms at 48 kHz)
    pub const OPUS_FRAME_SAMPLES: usize = 960;

    /// Output bus rate restored after a streaming session
    pub const FILE_SAMPLE_RATE: u32 = 44_100;

    /// Output bus channels restored after a streaming session
    pub const FILE_CHANNELS: u16 = 2;

    /// Maximum size of one compressed stream packet
    pub const MAX_PACKET_SIZE: usize = 512;

    /// Length-prefix header size in the jitter buffer (u16 little-endian)
    pub const PACKET_HEADER_SIZE: usize = 2;

    /// Jitter buffer capacity in bytes (~200-300 ms of stream audio)
    pub const JITTER_CAPACITY: usize = 8192;

    /// Pre-roll fill threshold as a percentage of capacity
    pub const PREROLL_PERCENT: usize = 50;

    /// Bounded wait for a jitter buffer pop
    pub const POP_TIMEOUT_MS: u64 = 10;

    /// Audio pump period
    pub const AUDIO_TICK_MS: u64 = 10;

    /// Bounded wait for the engine lock on the audio pump path
    pub const ENGINE_LOCK_TIMEOUT_MS: u64 = 5;

    /// Minimum interval between bus reconnection attempts
    pub const RECONNECT_INTERVAL_SECS: u64 = 5;

    /// Write-through cadence for chunked uploads
    pub const FLUSH_INTERVAL_BYTES: usize = 32 * 1024;

    /// Upload session abandoned after this much chunk inactivity
    pub const UPLOAD_TIMEOUT_SECS: u64 = 30;

    /// Destination file name when an upload carries no id
    pub const DEFAULT_UPLOAD_FILE: &str = "sound.mp3";
}
