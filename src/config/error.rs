//! Configuration error types

use thiserror::Error;

/// Errors that can occur during configuration loading
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Configuration loading failed: {0}")]
    LoadError(#[from] config::ConfigError),

    #[error("Validation failed: {0}")]
    ValidationFailed(#[from] ValidationError),
}

/// Errors that can occur during configuration validation
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ValidationError {
    #[error("Heartbeat interval must be positive")]
    InvalidHeartbeatInterval,

    #[error("Typing quiet period must be positive")]
    InvalidTypingQuietPeriod,

    #[error("Dedupe tolerance must be positive")]
    InvalidDedupeTolerance,

    #[error("History retry limit must be at least 1")]
    InvalidHistoryRetryLimit,

    #[error("Reconnect base delay must be positive and no larger than the max delay")]
    InvalidReconnectDelays,

    #[error("Reconnect jitter must be between 0.0 and 1.0")]
    InvalidReconnectJitter,
}
