//! Channel configuration.

use std::time::Duration;

/// Timeout and sweep parameters for a channel.
///
/// The sweep runs per connection every `timeout_check_interval`, offset by
/// uniform fuzz in `[-timeout_fuzz/2, +timeout_fuzz/2)` so many
/// connections do not sweep in lock-step.
#[derive(Clone, Debug)]
pub struct ChannelConfig {
    /// Deadline for outbound operations that carry no explicit timeout.
    pub req_timeout_default: Duration,

    /// Deadline for serving inbound operations; expired ones are dropped
    /// without a response and the caller times out symmetrically.
    pub server_timeout_default: Duration,

    /// Base period of the timeout sweep.
    pub timeout_check_interval: Duration,

    /// Width of the uniform jitter window applied to each sweep period.
    pub timeout_fuzz: Duration,
}

impl Default for ChannelConfig {
    fn default() -> Self {
        Self {
            req_timeout_default: Duration::from_millis(5000),
            server_timeout_default: Duration::from_millis(5000),
            timeout_check_interval: Duration::from_millis(1000),
            timeout_fuzz: Duration::from_millis(100),
        }
    }
}

impl ChannelConfig {
    /// Set the default outbound operation timeout.
    pub fn with_req_timeout(mut self, timeout: Duration) -> Self {
        self.req_timeout_default = timeout;
        self
    }

    /// Set the inbound operation timeout.
    pub fn with_server_timeout(mut self, timeout: Duration) -> Self {
        self.server_timeout_default = timeout;
        self
    }

    /// Set the sweep base period.
    pub fn with_check_interval(mut self, interval: Duration) -> Self {
        self.timeout_check_interval = interval;
        self
    }

    /// Set the sweep jitter window.
    pub fn with_fuzz(mut self, fuzz: Duration) -> Self {
        self.timeout_fuzz = fuzz;
        self
    }

    /// A configuration tuned for fast local tests: short deadlines and a
    /// tight sweep period.
    pub fn local_network() -> Self {
        Self {
            req_timeout_default: Duration::from_millis(500),
            server_timeout_default: Duration::from_millis(500),
            timeout_check_interval: Duration::from_millis(50),
            timeout_fuzz: Duration::from_millis(10),
        }
    }
}
