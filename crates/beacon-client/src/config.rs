//! Client configuration.

use std::time::Duration;

/// Default delay before a reconnect attempt.
pub const DEFAULT_RECONNECT_DELAY: Duration = Duration::from_secs(1);

/// Reconnect schedule.
///
/// The default retries forever after a fixed one second delay. A multiplier
/// above 1.0 turns it into exponential backoff, capped by `max_delay`.
#[derive(Debug, Clone, PartialEq)]
pub struct ReconnectPolicy {
    pub delay: Duration,
    pub multiplier: f64,
    pub max_delay: Option<Duration>,
}

impl ReconnectPolicy {
    /// Retry after the same delay every time.
    #[must_use]
    pub fn fixed(delay: Duration) -> Self {
        Self {
            delay,
            multiplier: 1.0,
            max_delay: None,
        }
    }

    /// Retry with exponential backoff.
    #[must_use]
    pub fn exponential(delay: Duration, multiplier: f64, max_delay: Duration) -> Self {
        Self {
            delay,
            multiplier,
            max_delay: Some(max_delay),
        }
    }

    /// Delay before the given retry (0 is the first retry after a drop).
    #[must_use]
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let factor = self.multiplier.max(1.0).powi(attempt.min(64) as i32);
        let delay = self.delay.mul_f64(factor.min(1e6));
        match self.max_delay {
            Some(max) => delay.min(max),
            None => delay,
        }
    }
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self::fixed(DEFAULT_RECONNECT_DELAY)
    }
}

/// Client configuration.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// WebSocket URL of the relay or producer endpoint.
    pub url: String,
    pub reconnect: ReconnectPolicy,
    /// Give up on a state request after this long. `None` waits forever.
    pub state_request_timeout: Option<Duration>,
}

impl ClientConfig {
    #[must_use]
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            reconnect: ReconnectPolicy::default(),
            state_request_timeout: None,
        }
    }

    #[must_use]
    pub fn with_reconnect(mut self, reconnect: ReconnectPolicy) -> Self {
        self.reconnect = reconnect;
        self
    }

    #[must_use]
    pub fn with_state_request_timeout(mut self, timeout: Duration) -> Self {
        self.state_request_timeout = Some(timeout);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_is_fixed_one_second() {
        let policy = ReconnectPolicy::default();
        assert_eq!(policy.delay_for(0), Duration::from_secs(1));
        assert_eq!(policy.delay_for(50), Duration::from_secs(1));
    }

    #[test]
    fn test_exponential_backoff_is_capped() {
        let policy = ReconnectPolicy::exponential(
            Duration::from_millis(100),
            2.0,
            Duration::from_secs(1),
        );
        assert_eq!(policy.delay_for(0), Duration::from_millis(100));
        assert_eq!(policy.delay_for(1), Duration::from_millis(200));
        assert_eq!(policy.delay_for(3), Duration::from_millis(800));
        assert_eq!(policy.delay_for(4), Duration::from_secs(1));
        assert_eq!(policy.delay_for(u32::MAX), Duration::from_secs(1));
    }

    #[test]
    fn test_config_builder() {
        let config = ClientConfig::new("ws://localhost:8080/")
            .with_reconnect(ReconnectPolicy::fixed(Duration::from_millis(50)))
            .with_state_request_timeout(Duration::from_secs(2));
        assert_eq!(config.reconnect.delay, Duration::from_millis(50));
        assert_eq!(config.state_request_timeout, Some(Duration::from_secs(2)));
    }
}
