//! Error types and result definitions for the cozylocal crate.
//! Covers transport, codec and protocol-level failures.

use thiserror::Error;

/// Represents all possible errors that can occur when communicating with a CozyLife device.
#[derive(Error, Debug, Clone)]
pub enum CozyError {
    /// Standard IO error (network, socket options, etc.)
    #[error("IO error: {0}")]
    Io(String),

    /// JSON serialization or deserialization error
    #[error("JSON error: {0}")]
    Json(String),

    /// TCP connection could not be established or the request could not be written
    #[error("Connection failed: {0}")]
    Connection(String),

    /// The received bytes were not a valid command envelope, or the payload
    /// shape contradicts the declared command code
    #[error("Decode error: {0}")]
    Decode(String),

    /// No response arrived within the configured bound
    #[error("Timeout waiting for device")]
    Timeout,

    /// The device answered a QUERY/SET with a non-zero response code
    #[error("Device returned error response code {0}")]
    ProtocolResponse(i64),

    /// The discovery socket could not be bound; discovery cannot proceed at all
    #[error("UDP bind failed: {0}")]
    Bind(String),
}

/// A specialized Result type for CozyLife operations.
pub type Result<T> = std::result::Result<T, CozyError>;

impl From<std::io::Error> for CozyError {
    fn from(err: std::io::Error) -> Self {
        CozyError::Io(err.to_string())
    }
}

impl From<serde_json::Error> for CozyError {
    fn from(err: serde_json::Error) -> Self {
        CozyError::Json(err.to_string())
    }
}
