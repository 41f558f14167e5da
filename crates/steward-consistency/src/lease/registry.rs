//! Lease Registry
//!
//! The authoritative view of leadership leases. Every mutation is a
//! compare-and-swap loop against the lease record of one resource, so
//! different resources never contend and a claim racing the reaper resolves
//! to exactly one winner.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use metrics::{counter, gauge};
use steward_common::{Clock, Result, StewardError};
use tokio::task::JoinHandle;
use tokio::time::interval;
use tracing::{debug, info, warn};

use super::model::*;
use crate::config::LeaseConfig;
use crate::notify::ChangeNotifier;
use crate::store::{CasOutcome, MemoryRecordStore, RecordStore, Versioned};

#[derive(Default)]
struct LeaseStatsCollector {
    total_claims: AtomicU64,
    total_renewals: AtomicU64,
    total_releases: AtomicU64,
    total_expirations: AtomicU64,
    claim_conflicts: AtomicU64,
}

/// Registry of leadership leases
pub struct LeaseRegistry {
    store: Arc<dyn RecordStore<LeaseRecord>>,
    clock: Arc<dyn Clock>,
    notifier: Arc<ChangeNotifier>,
    config: LeaseConfig,
    stats: LeaseStatsCollector,
}

impl LeaseRegistry {
    pub fn new(
        store: Arc<dyn RecordStore<LeaseRecord>>,
        clock: Arc<dyn Clock>,
        notifier: Arc<ChangeNotifier>,
        config: LeaseConfig,
    ) -> Self {
        Self {
            store,
            clock,
            notifier,
            config,
            stats: LeaseStatsCollector::default(),
        }
    }

    /// Registry over a fresh in-memory store with default settings
    pub fn in_memory(clock: Arc<dyn Clock>) -> Self {
        Self::new(
            Arc::new(MemoryRecordStore::<LeaseRecord>::new()),
            clock,
            Arc::new(ChangeNotifier::new()),
            LeaseConfig::default(),
        )
    }

    pub fn clock(&self) -> &Arc<dyn Clock> {
        &self.clock
    }

    pub fn notifier(&self) -> &Arc<ChangeNotifier> {
        &self.notifier
    }

    pub fn config(&self) -> &LeaseConfig {
        &self.config
    }

    /// Claim leadership of `resource_id` for `holder`
    ///
    /// A claim by the current holder renews the lease: the expiry moves to
    /// `now + duration` and the token stays. A claim on an unclaimed or
    /// expired resource creates a grant with the next token.
    pub async fn claim(&self, resource_id: &str, holder: &str, duration: Duration) -> Result<Lease> {
        let ttl = chrono::Duration::from_std(duration)
            .ok()
            .filter(|ttl| *ttl > chrono::Duration::zero())
            .ok_or_else(|| {
                StewardError::IllegalArgument(format!(
                    "lease duration must be positive, got {:?}",
                    duration
                ))
            })?;

        for _ in 0..self.config.cas_max_attempts {
            let now = self.clock.now();
            let expiry = now.checked_add_signed(ttl).ok_or_else(|| {
                StewardError::IllegalArgument(format!("lease duration {:?} out of range", duration))
            })?;

            let (expected, previous) = split(self.store.load(resource_id).await?);
            let renewal = previous.is_held_at(now);

            let next = if renewal {
                if !previous.is_held_by(holder, now) {
                    self.stats.claim_conflicts.fetch_add(1, Ordering::Relaxed);
                    counter!("leadership_claim_conflicts_total").increment(1);
                    return Err(StewardError::AlreadyClaimed {
                        resource_id: resource_id.to_string(),
                        holder: previous.holder.clone().unwrap_or_default(),
                    });
                }
                LeaseRecord {
                    expiry: Some(expiry),
                    ..previous.clone()
                }
            } else {
                LeaseRecord::granted(holder, previous.token + 1, expiry)
            };

            let lease = Lease {
                resource_id: resource_id.to_string(),
                holder: holder.to_string(),
                token: next.token,
                expiry,
            };

            match self.store.compare_and_swap(resource_id, expected, next).await? {
                CasOutcome::Applied(_) => {
                    if renewal {
                        self.stats.total_renewals.fetch_add(1, Ordering::Relaxed);
                        debug!(resource_id = %resource_id, holder = %holder, token = lease.token, "Lease renewed");
                    } else {
                        // Taking over a lapsed lease ends the previous grant
                        if previous.is_expired_at(now) {
                            self.announce_release(resource_id, &previous, ReleaseCause::Expired);
                        }
                        self.stats.total_claims.fetch_add(1, Ordering::Relaxed);
                        counter!("leadership_claims_total").increment(1);
                        info!(resource_id = %resource_id, holder = %holder, token = lease.token, "Leadership claimed");
                    }
                    return Ok(lease);
                }
                CasOutcome::Conflict(_) => {
                    debug!(resource_id = %resource_id, holder = %holder, "Claim lost a write race, retrying");
                }
            }
        }

        Err(self.contention(resource_id))
    }

    /// Release leadership of `resource_id` held by `holder`
    ///
    /// Returns whether a valid lease was released. Releasing a lease the
    /// caller does not hold is a no-op.
    pub async fn release(&self, resource_id: &str, holder: &str) -> Result<bool> {
        for _ in 0..self.config.cas_max_attempts {
            let now = self.clock.now();
            let Some(current) = self.store.load(resource_id).await? else {
                return Ok(false);
            };

            if current.record.is_held_by(holder, now) {
                if self.demote(resource_id, current, ReleaseCause::Released).await? {
                    return Ok(true);
                }
                continue;
            }

            if current.record.is_expired_at(now) && current.record.holder.as_deref() == Some(holder) {
                if self.demote(resource_id, current, ReleaseCause::Expired).await? {
                    return Ok(false);
                }
                continue;
            }

            debug!(resource_id = %resource_id, holder = %holder, "Release of a lease not held, ignoring");
            return Ok(false);
        }

        Err(self.contention(resource_id))
    }

    /// Check whether `resource_id` currently has a valid lease
    pub async fn is_valid(&self, resource_id: &str) -> Result<bool> {
        Ok(self.current(resource_id).await?.is_some())
    }

    /// Fencing token of the valid lease on `resource_id`
    pub async fn current_token(&self, resource_id: &str) -> Result<u64> {
        self.current(resource_id)
            .await?
            .map(|lease| lease.token)
            .ok_or_else(|| StewardError::NotFound(resource_id.to_string()))
    }

    /// The valid lease on `resource_id`, if any
    ///
    /// An expired lease reads as unclaimed whether or not it has been reaped.
    pub async fn current(&self, resource_id: &str) -> Result<Option<Lease>> {
        let now = self.clock.now();
        Ok(self
            .store
            .load(resource_id)
            .await?
            .and_then(|current| current.record.lease_at(resource_id, now)))
    }

    /// All valid leases
    pub async fn leases(&self) -> Result<Vec<Lease>> {
        let now = self.clock.now();
        Ok(self
            .store
            .list()
            .await?
            .into_iter()
            .filter_map(|(resource_id, current)| current.record.lease_at(&resource_id, now))
            .collect())
    }

    /// Demote the lease on `resource_id` if it has run out
    ///
    /// Returns whether this call performed the demotion. The expiry check and
    /// the write happen against the same revision, so a concurrent claim and
    /// the reaper never both announce the release.
    pub async fn expire_if_due(&self, resource_id: &str) -> Result<bool> {
        for _ in 0..self.config.cas_max_attempts {
            let now = self.clock.now();
            let Some(current) = self.store.load(resource_id).await? else {
                return Ok(false);
            };
            if !current.record.is_expired_at(now) {
                return Ok(false);
            }
            if self.demote(resource_id, current, ReleaseCause::Expired).await? {
                return Ok(true);
            }
        }

        Err(self.contention(resource_id))
    }

    /// Sweep every lease record and demote the expired ones
    pub async fn reap_expired(&self) -> Result<u32> {
        let now = self.clock.now();
        let mut held = 0u64;
        let mut expired_keys = Vec::new();

        for (resource_id, current) in self.store.list().await? {
            if current.record.is_held_at(now) {
                held += 1;
            } else if current.record.is_expired_at(now) {
                expired_keys.push(resource_id);
            }
        }

        let mut reaped = 0;
        for resource_id in expired_keys {
            if self.expire_if_due(&resource_id).await? {
                reaped += 1;
            }
        }

        gauge!("leadership_leases_held").set(held as f64);
        if reaped > 0 {
            debug!(count = reaped, "Reaped expired leases");
        }
        Ok(reaped)
    }

    /// Start the background reaper
    ///
    /// The task stops by itself once the registry is dropped.
    pub fn start_reaper(self: &Arc<Self>) -> JoinHandle<()> {
        let registry = Arc::downgrade(self);
        let period = self.config.reap_interval();

        tokio::spawn(async move {
            let mut interval = interval(period);
            loop {
                interval.tick().await;
                let Some(registry) = registry.upgrade() else {
                    break;
                };
                if let Err(e) = registry.reap_expired().await {
                    warn!("Lease expiry sweep failed: {}", e);
                }
            }
        })
    }

    /// Get lease statistics
    pub async fn stats(&self) -> LeaseStats {
        let held_leases = self
            .leases()
            .await
            .map(|leases| leases.len() as u64)
            .unwrap_or(0);

        LeaseStats {
            total_claims: self.stats.total_claims.load(Ordering::Relaxed),
            total_renewals: self.stats.total_renewals.load(Ordering::Relaxed),
            total_releases: self.stats.total_releases.load(Ordering::Relaxed),
            total_expirations: self.stats.total_expirations.load(Ordering::Relaxed),
            claim_conflicts: self.stats.claim_conflicts.load(Ordering::Relaxed),
            held_leases,
        }
    }

    /// Write the unclaimed record over `current`; false if another writer won
    async fn demote(
        &self,
        resource_id: &str,
        current: Versioned<LeaseRecord>,
        cause: ReleaseCause,
    ) -> Result<bool> {
        let outcome = self
            .store
            .compare_and_swap(resource_id, Some(current.revision), current.record.unclaimed())
            .await?;

        if !outcome.is_applied() {
            return Ok(false);
        }
        self.announce_release(resource_id, &current.record, cause);
        Ok(true)
    }

    fn announce_release(&self, resource_id: &str, ended: &LeaseRecord, cause: ReleaseCause) {
        let holder = ended.holder.as_deref().unwrap_or_default();
        match cause {
            ReleaseCause::Released => {
                self.stats.total_releases.fetch_add(1, Ordering::Relaxed);
                counter!("leadership_releases_total").increment(1);
                info!(resource_id = %resource_id, holder = %holder, token = ended.token, "Leadership released");
            }
            ReleaseCause::Expired => {
                self.stats.total_expirations.fetch_add(1, Ordering::Relaxed);
                counter!("leadership_expirations_total").increment(1);
                info!(resource_id = %resource_id, holder = %holder, token = ended.token, "Leadership expired");
            }
        }
        self.notifier
            .publish_release(resource_id, holder, ended.token, cause);
    }

    fn contention(&self, resource_id: &str) -> StewardError {
        warn!(
            resource_id = %resource_id,
            attempts = self.config.cas_max_attempts,
            "Lease write did not settle"
        );
        StewardError::StoreUnavailable(format!(
            "compare-and-swap on '{}' did not settle after {} attempts",
            resource_id, self.config.cas_max_attempts
        ))
    }
}

fn split(current: Option<Versioned<LeaseRecord>>) -> (Option<u64>, LeaseRecord) {
    match current {
        Some(current) => (Some(current.revision), current.record),
        None => (None, LeaseRecord::default()),
    }
}

#[cfg(test)]
mod tests {
    use steward_common::ManualClock;

    use super::*;

    const TEN_SECONDS: Duration = Duration::from_secs(10);

    fn registry() -> (Arc<ManualClock>, LeaseRegistry) {
        let clock = Arc::new(ManualClock::default());
        let registry = LeaseRegistry::in_memory(clock.clone());
        (clock, registry)
    }

    #[tokio::test]
    async fn test_claim_conflict() {
        let (_, registry) = registry();

        let lease = registry.claim("mysql", "mysql/0", TEN_SECONDS).await.unwrap();
        assert_eq!(lease.token, 1);

        let err = registry
            .claim("mysql", "mysql/1", TEN_SECONDS)
            .await
            .unwrap_err();
        assert_eq!(
            err,
            StewardError::AlreadyClaimed {
                resource_id: "mysql".to_string(),
                holder: "mysql/0".to_string(),
            }
        );
    }

    #[tokio::test]
    async fn test_renewal_extends_expiry_keeps_token() {
        let (clock, registry) = registry();

        let first = registry.claim("mysql", "mysql/0", TEN_SECONDS).await.unwrap();
        clock.advance(Duration::from_secs(5));
        let renewed = registry.claim("mysql", "mysql/0", TEN_SECONDS).await.unwrap();

        assert_eq!(renewed.token, first.token);
        assert!(renewed.expiry > first.expiry);

        let stats = registry.stats().await;
        assert_eq!(stats.total_claims, 1);
        assert_eq!(stats.total_renewals, 1);
        assert_eq!(stats.held_leases, 1);
    }

    #[tokio::test]
    async fn test_release_then_claim_gets_greater_token() {
        let (_, registry) = registry();

        let first = registry.claim("mysql", "mysql/0", TEN_SECONDS).await.unwrap();
        assert!(registry.release("mysql", "mysql/0").await.unwrap());
        assert!(!registry.is_valid("mysql").await.unwrap());

        let second = registry.claim("mysql", "mysql/1", TEN_SECONDS).await.unwrap();
        assert!(second.token > first.token);
        assert_eq!(registry.current_token("mysql").await.unwrap(), second.token);
    }

    #[tokio::test]
    async fn test_release_is_idempotent() {
        let (_, registry) = registry();

        // Never claimed
        assert!(!registry.release("mysql", "mysql/0").await.unwrap());

        registry.claim("mysql", "mysql/0", TEN_SECONDS).await.unwrap();
        // Not the holder
        assert!(!registry.release("mysql", "mysql/1").await.unwrap());
        assert!(registry.is_valid("mysql").await.unwrap());

        assert!(registry.release("mysql", "mysql/0").await.unwrap());
        // Already released
        assert!(!registry.release("mysql", "mysql/0").await.unwrap());
    }

    #[tokio::test]
    async fn test_expired_lease_reads_as_unclaimed() {
        let (clock, registry) = registry();

        let first = registry.claim("mysql", "mysql/0", TEN_SECONDS).await.unwrap();
        clock.advance(TEN_SECONDS);

        assert!(!registry.is_valid("mysql").await.unwrap());
        assert!(matches!(
            registry.current_token("mysql").await,
            Err(StewardError::NotFound(_))
        ));

        // Another holder takes over before any sweep ran
        let second = registry.claim("mysql", "mysql/1", TEN_SECONDS).await.unwrap();
        assert!(second.token > first.token);
    }

    #[tokio::test]
    async fn test_takeover_announces_expiry_once() {
        let (clock, registry) = registry();
        let mut watcher = registry.notifier().watch_release("mysql");

        registry.claim("mysql", "mysql/0", TEN_SECONDS).await.unwrap();
        clock.advance(Duration::from_secs(11));
        registry.claim("mysql", "mysql/1", TEN_SECONDS).await.unwrap();

        let event = watcher.next().await.unwrap();
        assert_eq!(event.holder, "mysql/0");
        assert_eq!(event.cause, ReleaseCause::Expired);

        // The sweep finds nothing left to demote
        assert_eq!(registry.reap_expired().await.unwrap(), 0);
        assert_eq!(registry.stats().await.total_expirations, 1);
    }

    #[tokio::test]
    async fn test_reaper_demotes_exactly_once() {
        let (clock, registry) = registry();
        let mut watcher = registry.notifier().watch_release("mysql");

        registry.claim("mysql", "mysql/0", TEN_SECONDS).await.unwrap();
        registry.claim("wordpress", "wordpress/0", Duration::from_secs(60)).await.unwrap();
        clock.advance(Duration::from_secs(30));

        assert_eq!(registry.reap_expired().await.unwrap(), 1);
        assert_eq!(registry.reap_expired().await.unwrap(), 0);
        assert!(!registry.expire_if_due("mysql").await.unwrap());

        let event = watcher.next().await.unwrap();
        assert_eq!(event.epoch, 1);
        assert!(registry.is_valid("wordpress").await.unwrap());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_takeover_racing_sweep_announces_expiry_once() {
        let (clock, registry) = registry();
        let registry = Arc::new(registry);

        for round in 0..50 {
            let resource = format!("svc{}", round);
            let mut watcher = registry.notifier().watch_release(&resource);

            registry
                .claim(&resource, &format!("{}/0", resource), TEN_SECONDS)
                .await
                .unwrap();
            clock.advance(Duration::from_secs(11));

            let barrier = Arc::new(tokio::sync::Barrier::new(2));
            let claim = {
                let (registry, barrier, resource) = (registry.clone(), barrier.clone(), resource.clone());
                tokio::spawn(async move {
                    barrier.wait().await;
                    let holder = format!("{}/1", resource);
                    registry.claim(&resource, &holder, TEN_SECONDS).await
                })
            };
            let sweep = {
                let (registry, barrier) = (registry.clone(), barrier.clone());
                tokio::spawn(async move {
                    barrier.wait().await;
                    registry.reap_expired().await
                })
            };
            let lease = claim.await.unwrap().unwrap();
            sweep.await.unwrap().unwrap();
            assert_eq!(lease.token, 2);

            let event = watcher.next().await.unwrap();
            assert_eq!(event.holder, format!("{}/0", resource));
            assert_eq!(event.cause, ReleaseCause::Expired);
            assert_eq!(event.epoch, 1, "round {}: expiry announced twice", round);
        }
    }

    #[tokio::test]
    async fn test_release_of_expired_lease_demotes_it() {
        let (clock, registry) = registry();
        registry.claim("mysql", "mysql/0", TEN_SECONDS).await.unwrap();
        clock.advance(TEN_SECONDS);

        assert!(!registry.release("mysql", "mysql/0").await.unwrap());
        assert_eq!(registry.stats().await.total_expirations, 1);
        assert_eq!(registry.reap_expired().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_zero_duration_rejected() {
        let (_, registry) = registry();
        let err = registry
            .claim("mysql", "mysql/0", Duration::ZERO)
            .await
            .unwrap_err();
        assert!(matches!(err, StewardError::IllegalArgument(_)));
    }

    #[tokio::test]
    async fn test_store_failure_surfaces_as_store_unavailable() {
        let clock = Arc::new(ManualClock::default());
        let store = Arc::new(MemoryRecordStore::<LeaseRecord>::new());
        let registry = LeaseRegistry::new(
            store.clone(),
            clock,
            Arc::new(ChangeNotifier::new()),
            LeaseConfig::default(),
        );

        store.inject_failures(1);
        let err = registry
            .claim("mysql", "mysql/0", TEN_SECONDS)
            .await
            .unwrap_err();
        assert!(err.is_transient());
    }

    #[tokio::test]
    async fn test_resources_are_independent() {
        let (_, registry) = registry();

        registry.claim("mysql", "mysql/0", TEN_SECONDS).await.unwrap();
        let other = registry.claim("wordpress", "mysql/0", TEN_SECONDS).await.unwrap();
        assert_eq!(other.token, 1);

        let mut leases = registry.leases().await.unwrap();
        leases.sort_by(|a, b| a.resource_id.cmp(&b.resource_id));
        assert_eq!(leases.len(), 2);
        assert_eq!(leases[0].resource_id, "mysql");
    }

    #[tokio::test]
    async fn test_reaper_task_stops_with_registry() {
        let clock = Arc::new(ManualClock::default());
        let mut config = LeaseConfig::default();
        config.reap_interval_ms = 10;
        let registry = Arc::new(LeaseRegistry::new(
            Arc::new(MemoryRecordStore::<LeaseRecord>::new()),
            clock.clone(),
            Arc::new(ChangeNotifier::new()),
            config,
        ));
        let handle = registry.start_reaper();

        let mut watcher = registry.notifier().watch_release("mysql");
        registry.claim("mysql", "mysql/0", TEN_SECONDS).await.unwrap();
        clock.advance(TEN_SECONDS);

        let event = tokio::time::timeout(Duration::from_secs(5), watcher.next())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(event.cause, ReleaseCause::Expired);

        drop(registry);
        tokio::time::timeout(Duration::from_secs(5), handle)
            .await
            .unwrap()
            .unwrap();
    }
}
