//! Error types for the multicast audio receiver

use thiserror::Error;

/// Main error type for the receiver
#[derive(Error, Debug)]
pub enum Error {
    #[error("Audio error: {0}")]
    Audio(#[from] AudioError),

    #[error("Network error: {0}")]
    Network(#[from] NetworkError),

    #[error("Volume error: {0}")]
    Volume(#[from] VolumeError),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Receiver has been disposed")]
    Disposed,

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Output device errors
#[derive(Error, Debug)]
pub enum AudioError {
    #[error("Device not found: {0}")]
    DeviceNotFound(String),

    #[error("Failed to open stream: {0}")]
    StreamError(String),

    #[error("Unsupported format: {0}")]
    UnsupportedFormat(String),

    #[error("cpal error: {0}")]
    CpalError(String),
}

/// Socket errors
#[derive(Error, Debug)]
pub enum NetworkError {
    #[error("Socket creation failed: {0}")]
    SocketFailed(String),

    #[error("Socket bind failed: {0}")]
    BindFailed(String),

    #[error("Joining multicast group {group} failed: {reason}")]
    JoinFailed { group: String, reason: String },

    #[error("No IPv4 interface named {0}")]
    InterfaceNotFound(String),
}

/// Wire format errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ProtocolError {
    #[error("Datagram truncated: {0} bytes is shorter than the header")]
    Truncated(usize),
}

/// Volume validation errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum VolumeError {
    #[error("Volume {0} is outside 0..=100")]
    OutOfRange(i32),
}

/// Result type alias for the receiver
pub type Result<T> = std::result::Result<T, Error>;
