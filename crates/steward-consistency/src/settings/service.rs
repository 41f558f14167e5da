// Fenced leadership settings service
// Reads are open to everyone, merges are gated on the caller holding the lease

use std::collections::HashMap;
use std::sync::Arc;

use metrics::counter;
use steward_common::{Result, StewardError};
use tracing::{debug, info};

use super::model::*;
use crate::lease::{LeaseRegistry, RetryPolicy};
use crate::notify::{ChangeNotifier, SettingsWatcher};
use crate::store::{CasOutcome, MemoryRecordStore, RecordStore};

/// Leadership settings service
pub struct LeadershipSettingsService {
    store: Arc<dyn RecordStore<SettingsRecord>>,
    registry: Arc<LeaseRegistry>,
    notifier: Arc<ChangeNotifier>,
    retry: RetryPolicy,
    cas_max_attempts: u32,
}

impl LeadershipSettingsService {
    pub fn new(store: Arc<dyn RecordStore<SettingsRecord>>, registry: Arc<LeaseRegistry>) -> Self {
        let notifier = registry.notifier().clone();
        let retry = RetryPolicy::from_config(registry.config());
        let cas_max_attempts = registry.config().cas_max_attempts;
        Self {
            store,
            registry,
            notifier,
            retry,
            cas_max_attempts,
        }
    }

    /// Service over a fresh in-memory settings store
    pub fn in_memory(registry: Arc<LeaseRegistry>) -> Self {
        Self::new(Arc::new(MemoryRecordStore::<SettingsRecord>::new()), registry)
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// Current settings of `resource_id`; empty when nothing was ever written
    pub async fn read(&self, resource_id: &str) -> Result<HashMap<String, String>> {
        let record = self
            .retry
            .run("read_settings", resource_id, || self.store.load(resource_id))
            .await?;
        Ok(record.map(|current| current.record.values).unwrap_or_default())
    }

    /// Merge `delta` into the settings of `resource_id` on behalf of `holder`
    ///
    /// Fails with `NotLeader` unless `holder` holds a valid lease whose token
    /// is at least the token of the last write. `NotLeader` is final; only
    /// store unavailability is retried.
    pub async fn merge(
        &self,
        resource_id: &str,
        holder: &str,
        delta: &HashMap<String, String>,
    ) -> Result<SettingsSnapshot> {
        self.retry
            .run("merge_settings", resource_id, || {
                self.try_merge(resource_id, holder, delta)
            })
            .await
    }

    /// Subscribe to settings changes; the first delivery is the current state
    pub async fn watch(&self, resource_id: &str) -> Result<SettingsWatcher> {
        let current = self
            .retry
            .run("watch_settings", resource_id, || self.store.load(resource_id))
            .await?
            .map(|current| current.record.snapshot())
            .unwrap_or_default();

        debug!(resource_id = %resource_id, version = current.version, "Settings watcher registered");
        Ok(self.notifier.watch_settings(resource_id, current))
    }

    async fn try_merge(
        &self,
        resource_id: &str,
        holder: &str,
        delta: &HashMap<String, String>,
    ) -> Result<SettingsSnapshot> {
        for _ in 0..self.cas_max_attempts {
            // The lease check and the settings CAS are separate records. A
            // leader whose lease lapses between the two can still land one
            // write, until the successor's first write raises the stored token.
            let lease = self
                .registry
                .current(resource_id)
                .await?
                .filter(|lease| lease.holder == holder)
                .ok_or_else(|| not_leader(resource_id, holder))?;

            let current = self.store.load(resource_id).await?;
            let (expected, mut record) = match current {
                Some(current) => (Some(current.revision), current.record),
                None => (None, SettingsRecord::default()),
            };

            // A newer leader already wrote
            if record.token > lease.token {
                debug!(
                    resource_id = %resource_id,
                    holder = %holder,
                    token = lease.token,
                    stored_token = record.token,
                    "Rejecting settings write from stale leader"
                );
                return Err(not_leader(resource_id, holder));
            }

            record.apply_delta(delta);
            record.token = lease.token;
            record.version += 1;

            match self.store.compare_and_swap(resource_id, expected, record).await? {
                CasOutcome::Applied(stored) => {
                    let snapshot = stored.record.snapshot();
                    self.notifier.publish_settings(resource_id, snapshot.clone());
                    counter!("leadership_settings_merges_total").increment(1);
                    info!(
                        resource_id = %resource_id,
                        holder = %holder,
                        token = lease.token,
                        version = snapshot.version,
                        "Leadership settings merged"
                    );
                    return Ok(snapshot);
                }
                CasOutcome::Conflict(_) => {
                    debug!(resource_id = %resource_id, holder = %holder, "Settings write lost a race, retrying");
                }
            }
        }

        Err(StewardError::StoreUnavailable(format!(
            "settings write on '{}' did not settle after {} attempts",
            resource_id, self.cas_max_attempts
        )))
    }
}

fn not_leader(resource_id: &str, holder: &str) -> StewardError {
    StewardError::NotLeader {
        resource_id: resource_id.to_string(),
        holder: holder.to_string(),
    }
}
