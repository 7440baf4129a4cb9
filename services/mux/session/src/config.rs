//! Session configuration.

use std::time::Duration;

use crate::SessionError;

/// Configuration for a mux session
#[derive(Clone, Debug)]
pub struct SessionConfig {
    /// Whether to run the keepalive task
    pub enable_keepalive: bool,
    /// Interval between keepalive pings
    pub keepalive_interval: Duration,
    /// How long to wait for a replacement connection after a failure
    pub recovery_window: Duration,
    /// How long a ping waits for its answer
    pub ping_timeout: Duration,
    /// Upper bound on a single header or body write
    pub connection_write_timeout: Duration,
    /// Capacity of the outbound send queue
    pub send_queue_depth: usize,
    /// Capacity of the replacement-connection channel
    pub replace_queue_depth: usize,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            enable_keepalive: true,
            keepalive_interval: Duration::from_secs(30),
            recovery_window: Duration::from_secs(20),
            ping_timeout: Duration::from_secs(10),
            connection_write_timeout: Duration::from_secs(10),
            send_queue_depth: 64,
            replace_queue_depth: 1,
        }
    }
}

impl SessionConfig {
    /// Reject configurations the supervisor cannot run with
    pub fn validate(&self) -> Result<(), SessionError> {
        if self.enable_keepalive && self.keepalive_interval.is_zero() {
            return Err(SessionError::InvalidConfig(
                "keepalive interval must be positive".into(),
            ));
        }
        if self.recovery_window.is_zero() {
            return Err(SessionError::InvalidConfig(
                "recovery window must be positive".into(),
            ));
        }
        if self.ping_timeout.is_zero() || self.connection_write_timeout.is_zero() {
            return Err(SessionError::InvalidConfig("timeouts must be positive".into()));
        }
        if self.send_queue_depth == 0 || self.replace_queue_depth == 0 {
            return Err(SessionError::InvalidConfig(
                "queue depths must be positive".into(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = SessionConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.recovery_window, Duration::from_secs(20));
        assert!(config.enable_keepalive);
    }

    #[test]
    fn test_invalid_config() {
        let config = SessionConfig {
            keepalive_interval: Duration::ZERO,
            ..Default::default()
        };
        assert!(matches!(config.validate(), Err(SessionError::InvalidConfig(_))));

        // zero interval is fine when keepalive is off
        let config = SessionConfig {
            enable_keepalive: false,
            keepalive_interval: Duration::ZERO,
            ..Default::default()
        };
        assert!(config.validate().is_ok());

        let config = SessionConfig {
            replace_queue_depth: 0,
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }
}
