//! Leadership facade
//!
//! The operations exposed to remote callers. Identifiers are validated and
//! the negotiated API version is checked here; everything else is forwarded
//! to the claim coordinator and the settings service.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use steward_common::{
    Clock, Result, StewardError, SystemClock, is_valid_service_name, is_valid_unit_name,
    unit_service,
};
use steward_consistency::{
    ChangeNotifier, ClaimCoordinator, LeadershipSettingsService, Lease, LeaseRecord,
    LeaseRegistry, MemoryRecordStore, SettingsWatcher,
};
use tokio::task::JoinHandle;
use tracing::{debug, info};

use crate::model::config::Configuration;
use crate::model::params::{ClaimLeadershipParams, ErrorResult, ReleaseLeadershipParams};

/// Newest leadership API version
pub const CURRENT_API_VERSION: u32 = 2;

/// First API version offering the leadership settings operations
pub const SETTINGS_API_VERSION: u32 = 2;

/// Leadership facade
pub struct LeadershipService {
    coordinator: Arc<ClaimCoordinator>,
    settings: Arc<LeadershipSettingsService>,
    api_version: u32,
    default_lease_duration: Duration,
    max_lease_duration: Duration,
    reaper: Option<JoinHandle<()>>,
}

impl LeadershipService {
    pub fn new(
        coordinator: Arc<ClaimCoordinator>,
        settings: Arc<LeadershipSettingsService>,
        api_version: u32,
    ) -> Self {
        let lease_config = coordinator.registry().config();
        let default_lease_duration = lease_config.default_lease_duration();
        let max_lease_duration = lease_config.max_lease_duration();
        Self {
            coordinator,
            settings,
            api_version,
            default_lease_duration,
            max_lease_duration,
            reaper: None,
        }
    }

    /// Wire the engine over in-memory stores and start the expiry reaper
    ///
    /// Must be called from within a tokio runtime.
    pub fn start(configuration: &Configuration) -> Self {
        Self::start_with_clock(configuration, Arc::new(SystemClock))
    }

    pub fn start_with_clock(configuration: &Configuration, clock: Arc<dyn Clock>) -> Self {
        let lease_config = configuration.lease_config();
        let registry = Arc::new(LeaseRegistry::new(
            Arc::new(MemoryRecordStore::<LeaseRecord>::new()),
            clock,
            Arc::new(ChangeNotifier::new()),
            lease_config.clone(),
        ));
        let reaper = registry.start_reaper();

        let settings = Arc::new(LeadershipSettingsService::in_memory(registry.clone()));
        let coordinator = Arc::new(ClaimCoordinator::new(registry));

        info!(
            api_version = configuration.api_version(),
            reap_interval_ms = lease_config.reap_interval_ms,
            "Leadership service started"
        );

        let mut service = Self::new(coordinator, settings, configuration.api_version());
        service.reaper = Some(reaper);
        service
    }

    pub fn api_version(&self) -> u32 {
        self.api_version
    }

    pub fn coordinator(&self) -> &Arc<ClaimCoordinator> {
        &self.coordinator
    }

    // ========================================================================
    // Leadership
    // ========================================================================

    /// Claim or renew leadership of a service for one of its units
    pub async fn claim_leadership(
        &self,
        resource_id: &str,
        holder_id: &str,
        duration: Duration,
    ) -> Result<Lease> {
        validate_holder(resource_id, holder_id)?;
        if duration.is_zero() || duration > self.max_lease_duration {
            return Err(StewardError::IllegalArgument(format!(
                "lease duration {:?} must be positive and at most {:?}",
                duration, self.max_lease_duration
            )));
        }

        self.coordinator
            .claim(resource_id, holder_id, duration)
            .await
    }

    /// Release leadership; succeeds when the unit was not the leader
    pub async fn release_leadership(&self, resource_id: &str, holder_id: &str) -> Result<()> {
        validate_holder(resource_id, holder_id)?;
        self.coordinator.release(resource_id, holder_id).await
    }

    /// Wait until the service has no leader
    pub async fn block_until_leadership_released(&self, resource_id: &str) -> Result<()> {
        validate_resource(resource_id)?;
        self.coordinator.block_until_released(resource_id).await
    }

    pub async fn claim_leadership_bulk(&self, params: Vec<ClaimLeadershipParams>) -> Vec<ErrorResult> {
        debug!(count = params.len(), "Bulk leadership claim");
        let mut results = Vec::with_capacity(params.len());
        for p in params {
            let result = self
                .claim_leadership(
                    &p.resource_id,
                    &p.holder_id,
                    p.duration_ms
                        .map(Duration::from_millis)
                        .unwrap_or(self.default_lease_duration),
                )
                .await;
            results.push(ErrorResult::from(result));
        }
        results
    }

    pub async fn release_leadership_bulk(
        &self,
        params: Vec<ReleaseLeadershipParams>,
    ) -> Vec<ErrorResult> {
        debug!(count = params.len(), "Bulk leadership release");
        let mut results = Vec::with_capacity(params.len());
        for p in params {
            let result = self.release_leadership(&p.resource_id, &p.holder_id).await;
            results.push(ErrorResult::from(result));
        }
        results
    }

    // ========================================================================
    // Leadership settings
    // ========================================================================

    pub async fn read_settings(&self, resource_id: &str) -> Result<HashMap<String, String>> {
        self.require_settings_api("Read")?;
        validate_resource(resource_id)?;
        self.settings.read(resource_id).await
    }

    /// Merge settings as the current leader; an empty value deletes the key
    pub async fn merge_settings(
        &self,
        resource_id: &str,
        holder_id: &str,
        delta: &HashMap<String, String>,
    ) -> Result<()> {
        self.require_settings_api("Merge")?;
        validate_holder(resource_id, holder_id)?;
        self.settings
            .merge(resource_id, holder_id, delta)
            .await
            .map(|_| ())
    }

    /// Watch settings; the first delivery is the current state
    pub async fn watch_settings(&self, resource_id: &str) -> Result<SettingsWatcher> {
        self.require_settings_api("WatchLeadershipSettings")?;
        validate_resource(resource_id)?;
        self.settings.watch(resource_id).await
    }

    fn require_settings_api(&self, operation: &str) -> Result<()> {
        if self.api_version < SETTINGS_API_VERSION {
            return Err(StewardError::ProtocolUnsupported {
                operation: operation.to_string(),
                required: SETTINGS_API_VERSION,
                actual: self.api_version,
            });
        }
        Ok(())
    }
}

impl Drop for LeadershipService {
    fn drop(&mut self) {
        if let Some(reaper) = self.reaper.take() {
            reaper.abort();
        }
    }
}

fn validate_resource(resource_id: &str) -> Result<()> {
    if !is_valid_service_name(resource_id) {
        return Err(StewardError::IllegalArgument(format!(
            "\"{}\" is not a valid service name",
            resource_id
        )));
    }
    Ok(())
}

fn validate_holder(resource_id: &str, holder_id: &str) -> Result<()> {
    validate_resource(resource_id)?;
    if !is_valid_unit_name(holder_id) {
        return Err(StewardError::IllegalArgument(format!(
            "\"{}\" is not a valid unit name",
            holder_id
        )));
    }
    if unit_service(holder_id) != Some(resource_id) {
        return Err(StewardError::IllegalArgument(format!(
            "unit \"{}\" does not belong to service \"{}\"",
            holder_id, resource_id
        )));
    }
    Ok(())
}
