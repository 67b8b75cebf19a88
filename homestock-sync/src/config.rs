//! Engine configuration.
//!
//! All durations serialize as integer milliseconds.

use crate::client::RetryPolicy;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Quiet period after the last edit before an update is sent.
pub const DEBOUNCE_MS: u64 = 400;

/// Interval of the periodic full sync.
pub const PERIODIC_SYNC_INTERVAL: Duration = Duration::from_secs(5 * 60);

/// Quiet period of the "data changed" trigger.
pub const CHANGE_QUIET_PERIOD: Duration = Duration::from_secs(2);

/// Network client configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    /// Base URL of the API, without a trailing slash (e.g. `https://api.homestock.app`).
    pub base_url: String,
    /// Per-attempt request timeout.
    #[serde(with = "duration_ms")]
    pub timeout: Duration,
    pub retry: RetryPolicy,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:3000".to_string(),
            timeout: Duration::from_secs(30),
            retry: RetryPolicy::default(),
        }
    }
}

impl ClientConfig {
    /// Configuration pointing at `base_url` with default timeouts and retries.
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            ..Self::default()
        }
    }

    /// Replaces the retry policy.
    #[must_use]
    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// Replaces the per-attempt timeout.
    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}

/// Debounce scheduler configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SchedulerConfig {
    #[serde(with = "duration_ms")]
    pub debounce: Duration,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            debounce: Duration::from_millis(DEBOUNCE_MS),
        }
    }
}

/// Trigger layer configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TriggerConfig {
    #[serde(with = "duration_ms")]
    pub periodic_interval: Duration,
    #[serde(with = "duration_ms")]
    pub quiet_period: Duration,
}

impl Default for TriggerConfig {
    fn default() -> Self {
        Self {
            periodic_interval: PERIODIC_SYNC_INTERVAL,
            quiet_period: CHANGE_QUIET_PERIOD,
        }
    }
}

/// Everything the engine needs, as loaded from a host config file.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub client: ClientConfig,
    pub scheduler: SchedulerConfig,
    pub triggers: TriggerConfig,
}

pub(crate) mod duration_ms {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(value.as_millis() as u64)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        Ok(Duration::from_millis(u64::deserialize(deserializer)?))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_documented_constants() {
        let config = EngineConfig::default();
        assert_eq!(config.scheduler.debounce, Duration::from_millis(400));
        assert_eq!(config.triggers.periodic_interval, Duration::from_secs(300));
        assert_eq!(config.triggers.quiet_period, Duration::from_secs(2));
        assert_eq!(config.client.retry.max_retries, 3);
    }

    #[test]
    fn durations_roundtrip_as_millis() {
        let json = serde_json::to_value(SchedulerConfig::default()).unwrap();
        assert_eq!(json, serde_json::json!({"debounce": 400}));

        let parsed: TriggerConfig =
            serde_json::from_value(serde_json::json!({"quiet_period": 50})).unwrap();
        assert_eq!(parsed.quiet_period, Duration::from_millis(50));
        assert_eq!(parsed.periodic_interval, PERIODIC_SYNC_INTERVAL);
    }

    #[test]
    fn base_url_trailing_slash_is_trimmed() {
        let config = ClientConfig::new("https://api.example.com/");
        assert_eq!(config.base_url, "https://api.example.com");
    }
}
