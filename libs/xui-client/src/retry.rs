use std::time::Duration;

use tracing::warn;

use crate::error::Error;
use crate::transport::{PanelRequest, PanelResponse, PanelTransport};

/// Bounded retry policy for panel calls. Only transport-level failures
/// (timeouts, refused connections) are retried; any response that made
/// it back from the panel is handled by the caller, whatever its status.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Attempts for idempotent calls, including the first one.
    pub max_attempts: u32,
    /// Delay before the second attempt; doubles each attempt after.
    pub base_delay: Duration,
    /// Per-request timeout handed down to the transport.
    pub request_timeout: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_millis(500),
            request_timeout: Duration::from_secs(30),
        }
    }
}

impl RetryPolicy {
    /// Backoff before the attempt following `attempt` (1-based).
    pub fn backoff(&self, attempt: u32) -> Duration {
        self.base_delay * 2u32.saturating_pow(attempt.saturating_sub(1))
    }
}

/// Runs one request against the transport up to `attempts` times.
/// Non-idempotent calls pass `attempts = 1` so an ambiguous network
/// failure is never replayed against the panel.
pub(crate) async fn execute_with_retry(
    transport: &dyn PanelTransport,
    policy: &RetryPolicy,
    panel_id: i64,
    request: PanelRequest,
    attempts: u32,
) -> Result<PanelResponse, Error> {
    let attempts = attempts.max(1);
    let mut attempt = 1u32;
    loop {
        match transport.execute(request.clone()).await {
            Ok(response) => return Ok(response),
            Err(source) => {
                if attempt >= attempts {
                    return Err(Error::Unreachable {
                        panel_id,
                        attempts: attempt,
                        source,
                    });
                }
                let delay = policy.backoff(attempt);
                warn!(
                    panel_id,
                    attempt,
                    error = %source,
                    "panel request failed, retrying in {:?}",
                    delay
                );
                tokio::time::sleep(delay).await;
                attempt += 1;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backoff_doubles_per_attempt() {
        let policy = RetryPolicy {
            base_delay: Duration::from_millis(500),
            ..Default::default()
        };
        assert_eq!(policy.backoff(1), Duration::from_millis(500));
        assert_eq!(policy.backoff(2), Duration::from_secs(1));
        assert_eq!(policy.backoff(3), Duration::from_secs(2));
    }
}
