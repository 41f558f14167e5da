// Lease engine configuration
// Timing and retry settings shared by the registry, coordinator and settings store

use std::time::Duration;

/// Configuration for the leadership lease engine
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct LeaseConfig {
    /// Interval between expiry sweeps in milliseconds (default: 1000ms)
    pub reap_interval_ms: u64,

    /// Maximum attempts for an operation hitting an unavailable store (default: 5)
    pub retry_max_attempts: u32,

    /// First backoff delay in milliseconds, doubled per attempt (default: 50ms)
    pub retry_base_delay_ms: u64,

    /// Upper bound for a single backoff delay in milliseconds (default: 2000ms)
    pub retry_max_delay_ms: u64,

    /// Compare-and-swap attempts before a contended write gives up (default: 16)
    pub cas_max_attempts: u32,

    /// Lease duration used when a caller does not specify one (default: 60s)
    pub default_lease_duration_ms: u64,

    /// Longest lease a caller may request (default: 5 minutes)
    pub max_lease_duration_ms: u64,
}

impl Default for LeaseConfig {
    fn default() -> Self {
        Self {
            reap_interval_ms: 1000,
            retry_max_attempts: 5,
            retry_base_delay_ms: 50,
            retry_max_delay_ms: 2000,
            cas_max_attempts: 16,
            default_lease_duration_ms: 60_000,
            max_lease_duration_ms: 300_000,
        }
    }
}

impl LeaseConfig {
    /// Get the reaper interval as Duration
    pub fn reap_interval(&self) -> Duration {
        Duration::from_millis(self.reap_interval_ms)
    }

    /// Get the first backoff delay as Duration
    pub fn retry_base_delay(&self) -> Duration {
        Duration::from_millis(self.retry_base_delay_ms)
    }

    /// Get the backoff ceiling as Duration
    pub fn retry_max_delay(&self) -> Duration {
        Duration::from_millis(self.retry_max_delay_ms)
    }

    /// Get the default lease duration as Duration
    pub fn default_lease_duration(&self) -> Duration {
        Duration::from_millis(self.default_lease_duration_ms)
    }

    /// Get the maximum lease duration as Duration
    pub fn max_lease_duration(&self) -> Duration {
        Duration::from_millis(self.max_lease_duration_ms)
    }
}
