//! Timestamp value object for immutable points in time.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

/// Immutable point in time, always UTC.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Timestamp(DateTime<Utc>);

impl Timestamp {
    /// Creates a timestamp for the current moment.
    pub fn now() -> Self {
        Self(Utc::now())
    }

    /// Creates a timestamp from a DateTime<Utc>.
    pub fn from_datetime(dt: DateTime<Utc>) -> Self {
        Self(dt)
    }

    /// Creates a timestamp from a unix timestamp in milliseconds.
    ///
    /// Returns `None` for values outside the representable range.
    pub fn from_unix_millis(millis: i64) -> Option<Self> {
        DateTime::<Utc>::from_timestamp_millis(millis).map(Self)
    }

    /// Returns the inner DateTime.
    pub fn as_datetime(&self) -> &DateTime<Utc> {
        &self.0
    }

    /// Checks if this timestamp is before another.
    pub fn is_before(&self, other: &Timestamp) -> bool {
        self.0 < other.0
    }

    /// Checks if this timestamp is after another.
    pub fn is_after(&self, other: &Timestamp) -> bool {
        self.0 > other.0
    }

    /// Returns the duration from another timestamp to this one.
    ///
    /// Returns negative duration if other is after self.
    pub fn duration_since(&self, other: &Timestamp) -> Duration {
        self.0.signed_duration_since(other.0)
    }

    /// Returns the absolute distance between this timestamp and another.
    pub fn abs_distance(&self, other: &Timestamp) -> Duration {
        let delta = self.duration_since(other);
        if delta < Duration::zero() {
            -delta
        } else {
            delta
        }
    }

    /// Creates a new timestamp by adding a std Duration.
    pub fn plus(&self, duration: std::time::Duration) -> Self {
        Self(self.0 + Duration::from_std(duration).unwrap_or_else(|_| Duration::max_value()))
    }

    /// Creates a new timestamp by subtracting a std Duration.
    pub fn minus(&self, duration: std::time::Duration) -> Self {
        Self(self.0 - Duration::from_std(duration).unwrap_or_else(|_| Duration::max_value()))
    }

    /// Checks whether more than `window` has elapsed from `since` to this
    /// timestamp.
    pub fn elapsed_exceeds(&self, since: &Timestamp, window: std::time::Duration) -> bool {
        match Duration::from_std(window) {
            Ok(window) => self.duration_since(since) > window,
            Err(_) => false,
        }
    }
}
