//! Configuration management for Steward server
//!
//! Values come from an optional `conf/steward.yml` and `STEWARD_*`
//! environment variables (`__` separates nested keys, so
//! `STEWARD_LEASE__REAP_INTERVAL_MS` sets `lease.reap_interval_ms`).

use std::path::Path;

use config::{Config, Environment, File};
use steward_consistency::LeaseConfig;

use crate::service::leadership::CURRENT_API_VERSION;
use crate::startup::logging::LoggingConfig;

const DEFAULT_CONFIG_FILE: &str = "conf/steward";

/// Application configuration loaded from config files and environment
#[derive(Clone, Debug, Default)]
pub struct Configuration {
    pub config: Config,
}

impl Configuration {
    /// Load `conf/steward.yml` (if present) overlaid with the environment
    pub fn new() -> anyhow::Result<Self> {
        Self::load(File::with_name(DEFAULT_CONFIG_FILE).required(false))
    }

    /// Load an explicit configuration file overlaid with the environment
    pub fn from_file(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        Self::load(File::from(path.as_ref()).required(true))
    }

    /// Wrap an already built `Config`
    pub fn from_config(config: Config) -> Self {
        Self { config }
    }

    fn load<S>(file: S) -> anyhow::Result<Self>
    where
        S: config::Source + Send + Sync + 'static,
    {
        Self::load_with_env(file, Self::environment())
    }

    fn load_with_env<S>(file: S, env: Environment) -> anyhow::Result<Self>
    where
        S: config::Source + Send + Sync + 'static,
    {
        let config = Config::builder().add_source(file).add_source(env).build()?;

        Ok(Self { config })
    }

    /// `STEWARD_` prefix, `__` between nested keys
    fn environment() -> Environment {
        Environment::with_prefix("steward")
            .prefix_separator("_")
            .separator("__")
            .try_parsing(true)
    }

    // ========================================================================
    // API Configuration
    // ========================================================================

    /// Negotiated leadership API version
    pub fn api_version(&self) -> u32 {
        self.config
            .get_int("api.version")
            .ok()
            .and_then(|v| u32::try_from(v).ok())
            .unwrap_or(CURRENT_API_VERSION)
    }

    // ========================================================================
    // Lease Configuration
    // ========================================================================

    pub fn lease_reap_interval_ms(&self) -> u64 {
        self.get_u64("lease.reap_interval_ms", LeaseConfig::default().reap_interval_ms)
    }

    pub fn lease_retry_max_attempts(&self) -> u32 {
        self.config
            .get_int("lease.retry_max_attempts")
            .ok()
            .and_then(|v| u32::try_from(v).ok())
            .unwrap_or(LeaseConfig::default().retry_max_attempts)
    }

    pub fn lease_retry_base_delay_ms(&self) -> u64 {
        self.get_u64(
            "lease.retry_base_delay_ms",
            LeaseConfig::default().retry_base_delay_ms,
        )
    }

    pub fn lease_retry_max_delay_ms(&self) -> u64 {
        self.get_u64(
            "lease.retry_max_delay_ms",
            LeaseConfig::default().retry_max_delay_ms,
        )
    }

    pub fn lease_cas_max_attempts(&self) -> u32 {
        self.config
            .get_int("lease.cas_max_attempts")
            .ok()
            .and_then(|v| u32::try_from(v).ok())
            .unwrap_or(LeaseConfig::default().cas_max_attempts)
    }

    pub fn lease_default_duration_ms(&self) -> u64 {
        self.get_u64(
            "lease.default_duration_ms",
            LeaseConfig::default().default_lease_duration_ms,
        )
    }

    pub fn lease_max_duration_ms(&self) -> u64 {
        self.get_u64(
            "lease.max_duration_ms",
            LeaseConfig::default().max_lease_duration_ms,
        )
    }

    /// Get the lease engine configuration
    pub fn lease_config(&self) -> LeaseConfig {
        LeaseConfig {
            reap_interval_ms: self.lease_reap_interval_ms(),
            retry_max_attempts: self.lease_retry_max_attempts(),
            retry_base_delay_ms: self.lease_retry_base_delay_ms(),
            retry_max_delay_ms: self.lease_retry_max_delay_ms(),
            cas_max_attempts: self.lease_cas_max_attempts(),
            default_lease_duration_ms: self.lease_default_duration_ms(),
            max_lease_duration_ms: self.lease_max_duration_ms(),
        }
    }

    // ========================================================================
    // Logging Configuration
    // ========================================================================

    pub fn log_dir(&self) -> Option<String> {
        self.config.get_string("logs.path").ok()
    }

    pub fn log_console_enabled(&self) -> bool {
        self.config.get_bool("logs.console").unwrap_or(true)
    }

    pub fn log_file_enabled(&self) -> bool {
        self.config.get_bool("logs.file").unwrap_or(true)
    }

    pub fn log_level(&self) -> String {
        self.config
            .get_string("logs.level")
            .unwrap_or_else(|_| "info".to_string())
    }

    /// Get the logging configuration
    pub fn logging_config(&self) -> LoggingConfig {
        LoggingConfig::from_config(
            self.log_dir(),
            self.log_console_enabled(),
            self.log_file_enabled(),
            self.log_level(),
        )
    }

    fn get_u64(&self, key: &str, default: u64) -> u64 {
        self.config
            .get_int(key)
            .ok()
            .and_then(|v| u64::try_from(v).ok())
            .unwrap_or(default)
    }
}
