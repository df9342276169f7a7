//! Application configuration module
//!
//! This module provides type-safe configuration loading from environment variables
//! using the `config` and `dotenvy` crates. Configuration is loaded with the
//! `STUDYHALL_` prefix and nested values use double underscores as separators.
//!
//! # Example
//!
//! ```no_run
//! use studyhall_realtime::config::AppConfig;
//!
//! let config = AppConfig::load().expect("Failed to load configuration");
//! config.validate().expect("Invalid configuration");
//!
//! println!("Heartbeat every {:?}", config.realtime.heartbeat_interval());
//! ```

mod error;
mod realtime;

pub use error::{ConfigError, ValidationError};
pub use realtime::RealtimeConfig;

use serde::Deserialize;

/// Root application configuration
///
/// Contains all configuration sections for the StudyHall realtime core.
/// Load using [`AppConfig::load()`] which reads from environment variables.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct AppConfig {
    /// Realtime tuning (heartbeats, typing expiry, reconnect backoff)
    #[serde(default)]
    pub realtime: RealtimeConfig,
}

impl AppConfig {
    /// Load configuration from environment variables
    ///
    /// This function:
    /// 1. Loads `.env` file if present (for development)
    /// 2. Reads environment variables with `STUDYHALL` prefix
    /// 3. Uses `__` (double underscore) to separate nested values
    /// 4. Deserializes into typed configuration structs
    ///
    /// # Environment Variable Format
    ///
    /// - `STUDYHALL__REALTIME__HEARTBEAT_INTERVAL_SECS=15` -> `realtime.heartbeat_interval_secs = 15`
    /// - `STUDYHALL__REALTIME__RECONNECT_JITTER=0.2` -> `realtime.reconnect_jitter = 0.2`
    ///
    /// # Errors
    ///
    /// Returns `ConfigError` if values cannot be parsed into expected types.
    pub fn load() -> Result<Self, ConfigError> {
        // Load .env file if present (development)
        dotenvy::dotenv().ok();

        let config = config::Config::builder()
            .add_source(
                config::Environment::default()
                    .prefix("STUDYHALL")
                    .separator("__"),
            )
            .build()?
            .try_deserialize()?;

        Ok(config)
    }

    /// Validate all configuration values
    ///
    /// # Errors
    ///
    /// Returns `ValidationError` if any configuration value is invalid.
    pub fn validate(&self) -> Result<(), ValidationError> {
        self.realtime.validate()?;
        Ok(())
    }
}
