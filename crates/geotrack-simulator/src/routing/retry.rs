//! Retry loop around a [`RouteProvider`].

use std::time::Duration;

use serde::{Deserialize, Serialize};

use super::{RoutePlan, RouteProvider, RouteRequest};
use crate::error::RoutingError;

/// Retry budget for one route fetch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// Attempts after the first one
    pub max_retries: u32,
    /// Upper bound for a single attempt
    pub fetch_timeout: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            fetch_timeout: Duration::from_secs(10),
        }
    }
}

impl RetryPolicy {
    pub const fn attempts(&self) -> u32 {
        self.max_retries + 1
    }
}

/// Delay before the attempt following a failed `attempt` (1-based).
///
/// Rate limits honor a server-provided delay, else wait `attempt * 500ms`.
/// Every other failure waits `attempt * 200ms`.
pub fn backoff_delay(error: &RoutingError, attempt: u32) -> Duration {
    match error {
        RoutingError::RateLimited {
            retry_after: Some(delay),
        } => *delay,
        RoutingError::RateLimited { retry_after: None } => Duration::from_millis(500) * attempt,
        _ => Duration::from_millis(200) * attempt,
    }
}

/// Fetch a route, retrying until a non-empty route arrives or the policy
/// is exhausted. Each attempt is cancelled once `fetch_timeout` elapses.
pub async fn fetch_route(
    provider: &dyn RouteProvider,
    request: &RouteRequest,
    policy: &RetryPolicy,
) -> Result<RoutePlan, RoutingError> {
    let attempts = policy.attempts();
    let mut attempt = 0;

    loop {
        attempt += 1;

        let error = match tokio::time::timeout(policy.fetch_timeout, provider.fetch(request)).await
        {
            Ok(Ok(plan)) if !plan.route.is_empty() => {
                tracing::debug!(
                    attempt,
                    points = plan.route.len(),
                    distance_m = ?plan.distance_m,
                    duration_s = ?plan.duration_s,
                    "Route fetched"
                );
                return Ok(plan);
            }
            Ok(Ok(_)) => RoutingError::EmptyRoute,
            Ok(Err(err)) => err,
            Err(_) => RoutingError::Timeout(policy.fetch_timeout),
        };

        if attempt >= attempts {
            tracing::error!(attempts, error = %error, "Failed to fetch route");
            return Err(RoutingError::Exhausted {
                attempts,
                last: Box::new(error),
            });
        }

        let delay = backoff_delay(&error, attempt);
        tracing::warn!(
            attempt,
            delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
            error = %error,
            "Route fetch failed, backing off"
        );
        tokio::time::sleep(delay).await;
    }
}
