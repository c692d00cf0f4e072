//! Reconnect pacing.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// How long to wait between reconnect attempts and when to give up.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReconnectPolicy {
    /// Unit delay scaled by the consecutive failure count.
    #[serde(with = "millis", rename = "base_delay_ms")]
    pub base_delay: Duration,
    /// Consecutive failures after which automatic reconnects stop.
    pub max_failures: u32,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self {
            base_delay: Duration::from_secs(1),
            max_failures: 5,
        }
    }
}

impl ReconnectPolicy {
    /// Delay before the next attempt after `error_count` consecutive
    /// failures: `base * n * (n + 1)`, so 2s, 6s, 12s, 20s at a 1s base.
    pub fn delay(&self, error_count: u32) -> Duration {
        let n = error_count.max(1);
        self.base_delay.saturating_mul(n.saturating_mul(n.saturating_add(1)))
    }

    /// Whether `error_count` consecutive failures exhaust the policy.
    pub const fn exhausted(&self, error_count: u32) -> bool {
        error_count >= self.max_failures
    }
}

mod millis {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    #[allow(clippy::cast_possible_truncation)]
    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(value.as_millis() as u64)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        u64::deserialize(deserializer).map(Duration::from_millis)
    }
}
