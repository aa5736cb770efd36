//! Error types for the psalm_core library.

use std::io;

/// Result type alias using our Error type
pub type Result<T> = std::result::Result<T, Error>;

/// Core error type for psalm_core operations
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// IO error occurred
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    /// JSON serialization/deserialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// CSV error
    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    /// TOML parsing error
    #[error("TOML error: {0}")]
    Toml(#[from] toml::de::Error),

    /// Configuration validation error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Hour or minute outside the valid range
    #[error("Invalid alarm time: {0}")]
    InvalidTime(String),

    /// The platform refused to schedule an exact alarm
    #[error("Permission denied: {0}")]
    PermissionDenied(String),

    /// Snooze request rejected
    #[error("Snooze error: {0}")]
    Snooze(String),

    /// Audio playback failed
    #[error("Playback error: {0}")]
    Playback(String),

    /// State management error
    #[error("State error: {0}")]
    State(String),

    /// Generic error
    #[error("{0}")]
    Other(String),
}
