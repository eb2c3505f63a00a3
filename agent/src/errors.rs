//! Error types for the timelapse agent

use thiserror::Error;

/// Main error type for the timelapse agent
#[derive(Error, Debug)]
pub enum AgentError {
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    JsonError(#[from] serde_json::Error),

    #[error("HTTP error: {0}")]
    HttpError(#[from] reqwest::Error),

    /// Network, timeout or protocol failure while talking to the activity source
    #[error("Transport error: {0}")]
    TransportError(String),

    #[error("MQTT error: {0}")]
    MqttError(String),

    /// The capture source could not be opened
    #[error("Camera unavailable: {0}")]
    CameraUnavailable(String),

    /// Read, decode or resolution failure on an open capture source
    #[error("Camera error: {0}")]
    CameraError(String),

    #[error("Encoding error: {0}")]
    EncodingError(String),

    #[error("Validation error: {0}")]
    ValidationError(String),

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("Server error: {0}")]
    ServerError(String),

    #[error("Shutdown error: {0}")]
    ShutdownError(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl From<anyhow::Error> for AgentError {
    fn from(err: anyhow::Error) -> Self {
        AgentError::Internal(err.to_string())
    }
}

impl From<image::ImageError> for AgentError {
    fn from(err: image::ImageError) -> Self {
        AgentError::CameraError(format!("image decode failed: {}", err))
    }
}
