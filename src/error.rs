//! Error types for the gateway firmware core

use thiserror::Error;

/// Main error type for the application
#[derive(Error, Debug)]
pub enum Error {
    #[error("Audio error: {0}")]
    Audio(#[from] AudioError),

    #[error("Codec error: {0}")]
    Codec(#[from] CodecError),

    #[error("Bus error: {0}")]
    Bus(#[from] BusError),

    #[error("Transfer error: {0}")]
    Transfer(#[from] TransferError),

    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("Sensor error: {0}")]
    Sensor(#[from] SensorError),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Audio subsystem errors
#[derive(Error, Debug)]
pub enum AudioError {
    #[error("Output device not found: {0}")]
    DeviceNotFound(String),

    #[error("Failed to open output stream: {0}")]
    StreamError(String),

    #[error("Unsupported format: {0}")]
    UnsupportedFormat(String),

    #[error("Output thread unavailable")]
    OutputUnavailable,

    #[error("cpal error: {0}")]
    CpalError(String),
}

/// Codec errors
#[derive(Error, Debug)]
pub enum CodecError {
    #[error("Decoder initialization failed: {0}")]
    DecoderInit(String),

    #[error("Decoding failed: {0}")]
    DecodingFailed(String),

    #[error("No audio track in container")]
    NoAudioTrack,

    #[error("Invalid packet length: {0}")]
    InvalidPacketLength(usize),
}

/// Command bus errors
#[derive(Error, Debug)]
pub enum BusError {
    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    #[error("Subscribe failed for '{0}'")]
    SubscribeFailed(String),

    #[error("Publish failed for '{0}'")]
    PublishFailed(String),

    #[error("Outbound channel closed")]
    ChannelClosed,
}

/// Chunked transfer errors
#[derive(Error, Debug)]
pub enum TransferError {
    #[error("Chunk received while not in receiving state")]
    NotReceiving,

    #[error("Malformed chunk header")]
    MalformedHeader,

    #[error("Destination unavailable: {0}")]
    DestinationUnavailable(String),
}

/// Storage backend errors
#[derive(Error, Debug)]
pub enum StorageError {
    #[error("Storage root unavailable: {0}")]
    RootUnavailable(String),

    #[error("Failed to open '{0}' for writing")]
    OpenFailed(String),

    #[error("Failed to open '{0}' for reading")]
    ReadFailed(String),

    #[error("Write failed: {0}")]
    WriteFailed(String),

    #[error("Storage full: {needed} bytes needed, {free} free")]
    Full { needed: u64, free: u64 },

    #[error("Invalid file name: {0}")]
    InvalidName(String),
}

/// Sensor relay errors
#[derive(Error, Debug)]
pub enum SensorError {
    #[error("Invalid record size: expected {expected} bytes, got {actual}")]
    InvalidRecordSize { expected: usize, actual: usize },
}

/// Result type alias for the application
pub type Result<T> = std::result::Result<T, Error>;
