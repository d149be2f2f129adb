//! Timeouts, keepalive and reconnect backoff for sessions.

use std::time::Duration;

use toolhub_core::{Config, ServerDescriptor};

/// Exponential reconnect backoff.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Backoff {
    pub base: Duration,
    pub factor: u32,
    pub cap: Duration,
}

impl Default for Backoff {
    fn default() -> Self {
        Self {
            base: Duration::from_secs(1),
            factor: 2,
            cap: Duration::from_secs(30),
        }
    }
}

impl Backoff {
    /// Delay before retry number `attempt` (0-based): `base * factor^attempt`,
    /// never more than `cap`.
    pub fn delay(&self, attempt: u32) -> Duration {
        let multiplier = self.factor.max(1).saturating_pow(attempt);
        self.base
            .checked_mul(multiplier)
            .map_or(self.cap, |d| d.min(self.cap))
    }
}

/// Effective policy for one session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionPolicy {
    /// Name sent as `clientInfo.name` during the handshake.
    pub client_name: String,
    pub handshake_timeout: Duration,
    pub call_timeout: Duration,
    /// `None` disables keepalive pings.
    pub heartbeat_interval: Option<Duration>,
    pub retry_attempts: u32,
    pub backoff: Backoff,
}

impl Default for SessionPolicy {
    fn default() -> Self {
        Self {
            client_name: "toolhub".to_string(),
            handshake_timeout: Duration::from_secs(10),
            call_timeout: Duration::from_secs(30),
            heartbeat_interval: Some(Duration::from_secs(30)),
            retry_attempts: 3,
            backoff: Backoff::default(),
        }
    }
}

impl SessionPolicy {
    pub fn from_config(config: &Config) -> Self {
        let session = &config.session;
        Self {
            client_name: config.general.client_name.clone(),
            handshake_timeout: Duration::from_millis(session.handshake_timeout_ms),
            call_timeout: Duration::from_millis(session.call_timeout_ms),
            heartbeat_interval: match session.heartbeat_interval_ms {
                0 => None,
                ms => Some(Duration::from_millis(ms)),
            },
            retry_attempts: session.retry_attempts,
            backoff: Backoff {
                base: Duration::from_millis(config.backoff.base_ms),
                factor: config.backoff.factor,
                cap: Duration::from_millis(config.backoff.cap_ms),
            },
        }
    }

    /// Apply a descriptor's timeout and retry overrides.
    pub fn for_descriptor(&self, descriptor: &ServerDescriptor) -> Self {
        let mut policy = self.clone();
        if let Some(timeout) = descriptor.timeout() {
            policy.call_timeout = timeout;
        }
        if let Some(timeout) = descriptor.handshake_timeout() {
            policy.handshake_timeout = timeout;
        }
        if let Some(attempts) = descriptor.retry_attempts {
            policy.retry_attempts = attempts;
        }
        policy
    }

    pub fn with_call_timeout(mut self, timeout: Duration) -> Self {
        self.call_timeout = timeout;
        self
    }

    pub fn with_handshake_timeout(mut self, timeout: Duration) -> Self {
        self.handshake_timeout = timeout;
        self
    }

    pub fn with_heartbeat(mut self, interval: Option<Duration>) -> Self {
        self.heartbeat_interval = interval;
        self
    }

    pub fn with_retry_attempts(mut self, attempts: u32) -> Self {
        self.retry_attempts = attempts;
        self
    }

    pub fn with_backoff(mut self, backoff: Backoff) -> Self {
        self.backoff = backoff;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use toolhub_core::TransportConfig;

    #[test]
    fn test_backoff_doubles_until_cap() {
        let backoff = Backoff::default();
        assert_eq!(backoff.delay(0), Duration::from_secs(1));
        assert_eq!(backoff.delay(1), Duration::from_secs(2));
        assert_eq!(backoff.delay(2), Duration::from_secs(4));
        assert_eq!(backoff.delay(4), Duration::from_secs(16));
        assert_eq!(backoff.delay(5), Duration::from_secs(30));
        assert_eq!(backoff.delay(60), Duration::from_secs(30));
    }

    #[test]
    fn test_policy_from_default_config() {
        let policy = SessionPolicy::from_config(&Config::default());
        assert_eq!(policy, SessionPolicy::default());
    }

    #[test]
    fn test_zero_heartbeat_disables_keepalive() {
        let mut config = Config::default();
        config.session.heartbeat_interval_ms = 0;
        assert_eq!(SessionPolicy::from_config(&config).heartbeat_interval, None);
    }

    #[test]
    fn test_descriptor_overrides() {
        let descriptor = ServerDescriptor::new("slow", "Slow", TransportConfig::stdio("slow-server", vec![]))
            .with_timeout(Duration::from_secs(120))
            .with_retry_attempts(5);

        let policy = SessionPolicy::default().for_descriptor(&descriptor);
        assert_eq!(policy.call_timeout, Duration::from_secs(120));
        assert_eq!(policy.handshake_timeout, Duration::from_secs(10));
        assert_eq!(policy.retry_attempts, 5);
    }
}
