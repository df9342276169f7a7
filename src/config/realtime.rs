//! Realtime tuning configuration

use serde::Deserialize;
use std::time::Duration;

use super::error::ValidationError;

/// Tuning knobs for room sessions and the channel transport.
#[derive(Debug, Clone, Deserialize)]
pub struct RealtimeConfig {
    /// Expected cadence of presence refreshes, in seconds. Participants
    /// with no update for twice this interval are evicted locally.
    #[serde(default = "default_heartbeat_interval_secs")]
    pub heartbeat_interval_secs: u64,

    /// How long a typing indicator survives without a fresh typing
    /// heartbeat, in seconds.
    #[serde(default = "default_typing_quiet_period_secs")]
    pub typing_quiet_period_secs: u64,

    /// Window within which a confirmed row reconciles with a local
    /// optimistic entry, in seconds.
    #[serde(default = "default_dedupe_tolerance_secs")]
    pub dedupe_tolerance_secs: u64,

    /// Attempts for the historical fetch before the join or catch-up is
    /// declared failed.
    #[serde(default = "default_history_retry_limit")]
    pub history_retry_limit: u32,

    /// First reconnect delay, in milliseconds.
    #[serde(default = "default_reconnect_base_delay_ms")]
    pub reconnect_base_delay_ms: u64,

    /// Reconnect delay cap, in milliseconds.
    #[serde(default = "default_reconnect_max_delay_ms")]
    pub reconnect_max_delay_ms: u64,

    /// Proportional jitter applied to reconnect delays (0.2 = +/-20%).
    #[serde(default = "default_reconnect_jitter")]
    pub reconnect_jitter: f64,
}

impl RealtimeConfig {
    /// Heartbeat interval as a Duration.
    pub fn heartbeat_interval(&self) -> Duration {
        Duration::from_secs(self.heartbeat_interval_secs)
    }

    /// Typing quiet period as a Duration.
    pub fn typing_quiet_period(&self) -> Duration {
        Duration::from_secs(self.typing_quiet_period_secs)
    }

    /// Dedupe tolerance as a Duration.
    pub fn dedupe_tolerance(&self) -> Duration {
        Duration::from_secs(self.dedupe_tolerance_secs)
    }

    /// First reconnect delay as a Duration.
    pub fn reconnect_base_delay(&self) -> Duration {
        Duration::from_millis(self.reconnect_base_delay_ms)
    }

    /// Reconnect delay cap as a Duration.
    pub fn reconnect_max_delay(&self) -> Duration {
        Duration::from_millis(self.reconnect_max_delay_ms)
    }

    /// Cadence of the session maintenance tick that drives typing expiry
    /// and liveness eviction. Half the quiet period keeps expiry latency
    /// bounded without busy-ticking.
    pub fn maintenance_tick(&self) -> Duration {
        Duration::from_millis((self.typing_quiet_period_secs * 1000 / 2).max(100))
    }

    /// Validate realtime configuration
    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.heartbeat_interval_secs == 0 {
            return Err(ValidationError::InvalidHeartbeatInterval);
        }
        if self.typing_quiet_period_secs == 0 {
            return Err(ValidationError::InvalidTypingQuietPeriod);
        }
        if self.dedupe_tolerance_secs == 0 {
            return Err(ValidationError::InvalidDedupeTolerance);
        }
        if self.history_retry_limit == 0 {
            return Err(ValidationError::InvalidHistoryRetryLimit);
        }
        if self.reconnect_base_delay_ms == 0
            || self.reconnect_base_delay_ms > self.reconnect_max_delay_ms
        {
            return Err(ValidationError::InvalidReconnectDelays);
        }
        if !(0.0..=1.0).contains(&self.reconnect_jitter) {
            return Err(ValidationError::InvalidReconnectJitter);
        }
        Ok(())
    }
}

impl Default for RealtimeConfig {
    fn default() -> Self {
        Self {
            heartbeat_interval_secs: default_heartbeat_interval_secs(),
            typing_quiet_period_secs: default_typing_quiet_period_secs(),
            dedupe_tolerance_secs: default_dedupe_tolerance_secs(),
            history_retry_limit: default_history_retry_limit(),
            reconnect_base_delay_ms: default_reconnect_base_delay_ms(),
            reconnect_max_delay_ms: default_reconnect_max_delay_ms(),
            reconnect_jitter: default_reconnect_jitter(),
        }
    }
}

fn default_heartbeat_interval_secs() -> u64 {
    15
}

fn default_typing_quiet_period_secs() -> u64 {
    5
}

fn default_dedupe_tolerance_secs() -> u64 {
    10
}

fn default_history_retry_limit() -> u32 {
    3
}

fn default_reconnect_base_delay_ms() -> u64 {
    1_000
}

fn default_reconnect_max_delay_ms() -> u64 {
    30_000
}

fn default_reconnect_jitter() -> f64 {
    0.2
}
