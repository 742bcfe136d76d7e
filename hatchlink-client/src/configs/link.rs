use std::time::Duration;

use hatchlink_api::PlausibleRange;

use super::Settings;
use crate::retry::RetryPolicy;
use crate::session::Endpoint;

pub const DEFAULT_HOST: &str = "192.168.4.1";
pub const DEFAULT_PORT: u16 = 80;

/// Runtime parameters of a [`DeviceLinkManager`](crate::DeviceLinkManager).
#[derive(Debug, Clone, PartialEq)]
pub struct LinkConfig {
    pub endpoint: Endpoint,
    /// Attempts made by the monitor when it has to reconnect
    pub retry_count: u32,
    /// Bound on open plus handshake for one connection attempt
    pub attempt_timeout: Duration,
    /// Pause between two failed connection attempts
    pub retry_delay: Duration,
    /// How long a command waits for its reply
    pub command_timeout: Duration,
    /// Bound on the liveness probe after a missed reply
    pub probe_timeout: Duration,
    pub poll_interval: Duration,
    /// Pause between failed reconnect rounds of the monitor
    pub reconnect_backoff: RetryPolicy,
    /// Wait after pushing settings before reading them back
    pub settle_delay: Duration,
    pub plausible_range: PlausibleRange,
}

impl LinkConfig {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            endpoint: Endpoint::new(host, port),
            ..Self::default()
        }
    }

    pub fn with_retry_count(mut self, retry_count: u32) -> Self {
        self.retry_count = retry_count;
        self
    }

    pub fn with_attempt_timeout(mut self, timeout: Duration) -> Self {
        self.attempt_timeout = timeout;
        self
    }

    pub fn with_retry_delay(mut self, delay: Duration) -> Self {
        self.retry_delay = delay;
        self
    }

    pub fn with_command_timeout(mut self, timeout: Duration) -> Self {
        self.command_timeout = timeout;
        self
    }

    pub fn with_probe_timeout(mut self, timeout: Duration) -> Self {
        self.probe_timeout = timeout;
        self
    }

    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    pub fn with_reconnect_backoff(mut self, backoff: RetryPolicy) -> Self {
        self.reconnect_backoff = backoff;
        self
    }

    pub fn with_settle_delay(mut self, delay: Duration) -> Self {
        self.settle_delay = delay;
        self
    }

    pub fn with_plausible_range(mut self, range: PlausibleRange) -> Self {
        self.plausible_range = range;
        self
    }
}

impl Default for LinkConfig {
    fn default() -> Self {
        Self {
            endpoint: Endpoint::new(DEFAULT_HOST, DEFAULT_PORT),
            retry_count: 3,
            attempt_timeout: Duration::from_secs(8),
            retry_delay: Duration::from_secs(1),
            command_timeout: Duration::from_secs(8),
            probe_timeout: Duration::from_secs(2),
            poll_interval: Duration::from_secs(3),
            reconnect_backoff: RetryPolicy::backoff(Duration::from_secs(5), Duration::from_secs(5)),
            settle_delay: Duration::from_millis(500),
            plausible_range: PlausibleRange::default(),
        }
    }
}

impl From<&Settings> for LinkConfig {
    fn from(settings: &Settings) -> Self {
        let link = &settings.link;

        Self {
            endpoint: Endpoint::new(settings.device.host.clone(), settings.device.port),
            retry_count: link.retry_count,
            attempt_timeout: Duration::from_millis(link.attempt_timeout_ms),
            retry_delay: Duration::from_millis(link.retry_delay_ms),
            command_timeout: Duration::from_millis(link.command_timeout_ms),
            probe_timeout: Duration::from_millis(link.probe_timeout_ms),
            poll_interval: Duration::from_millis(link.poll_interval_ms),
            reconnect_backoff: RetryPolicy::backoff(
                Duration::from_millis(link.reconnect_backoff_ms),
                Duration::from_millis(link.reconnect_backoff_max_ms),
            ),
            settle_delay: Duration::from_millis(link.settle_delay_ms),
            plausible_range: PlausibleRange::new(
                settings.telemetry.min_temperature,
                settings.telemetry.max_temperature,
            ),
        }
    }
}
