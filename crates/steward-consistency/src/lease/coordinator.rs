//! Claim Coordinator
//!
//! Public claim/release protocol on top of the registry. Transient store
//! failures are retried with bounded exponential backoff; every other error
//! passes through unchanged. Claims never queue.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use metrics::counter;
use steward_common::{Result, StewardError};
use tokio::sync::mpsc;
use tokio::time::{interval, sleep};
use tracing::{debug, error, info, warn};

use super::model::Lease;
use super::registry::LeaseRegistry;
use crate::config::LeaseConfig;

/// Bounded exponential backoff for transient store failures
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from_config(&LeaseConfig::default())
    }
}

impl RetryPolicy {
    pub fn from_config(config: &LeaseConfig) -> Self {
        Self {
            max_attempts: config.retry_max_attempts.max(1),
            base_delay: config.retry_base_delay(),
            max_delay: config.retry_max_delay(),
        }
    }

    /// Delay before retry number `attempt` (0-based)
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let factor = 1u32.checked_shl(attempt).unwrap_or(u32::MAX);
        self.base_delay.saturating_mul(factor).min(self.max_delay)
    }

    /// Run `op`, retrying it while it fails with a transient error
    pub async fn run<T, F, Fut>(&self, operation: &str, resource_id: &str, mut op: F) -> Result<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let mut attempt = 0;
        loop {
            match op().await {
                Err(e) if e.is_transient() && attempt + 1 < self.max_attempts => {
                    let delay = self.delay_for(attempt);
                    attempt += 1;
                    counter!("leadership_store_retries_total").increment(1);
                    warn!(
                        operation = %operation,
                        resource_id = %resource_id,
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        "Store unavailable, retrying: {}",
                        e
                    );
                    sleep(delay).await;
                }
                result => return result,
            }
        }
    }
}

/// Claim/release protocol used by the facade
pub struct ClaimCoordinator {
    registry: Arc<LeaseRegistry>,
    retry: RetryPolicy,
}

impl ClaimCoordinator {
    pub fn new(registry: Arc<LeaseRegistry>) -> Self {
        let retry = RetryPolicy::from_config(registry.config());
        Self { registry, retry }
    }

    pub fn with_retry(registry: Arc<LeaseRegistry>, retry: RetryPolicy) -> Self {
        Self { registry, retry }
    }

    pub fn registry(&self) -> &Arc<LeaseRegistry> {
        &self.registry
    }

    pub fn retry_policy(&self) -> &RetryPolicy {
        &self.retry
    }

    /// Claim or renew leadership; fails fast with `AlreadyClaimed`
    pub async fn claim(&self, resource_id: &str, holder: &str, duration: Duration) -> Result<Lease> {
        self.retry
            .run("claim", resource_id, || {
                self.registry.claim(resource_id, holder, duration)
            })
            .await
    }

    /// Release leadership; releasing a lease not held succeeds
    pub async fn release(&self, resource_id: &str, holder: &str) -> Result<()> {
        self.retry
            .run("release", resource_id, || {
                self.registry.release(resource_id, holder)
            })
            .await
            .map(|_| ())
    }

    /// Wait until `resource_id` has no valid lease
    ///
    /// Returns immediately when the resource is already unclaimed. The
    /// subscription is taken before the lease is read, so a release landing
    /// between the two is never missed. Expiry is detected from the lease
    /// expiry itself rather than from the reaper.
    pub async fn block_until_released(&self, resource_id: &str) -> Result<()> {
        let mut watcher = self.registry.notifier().watch_release(resource_id);

        loop {
            let current = self
                .retry
                .run("block_until_released", resource_id, || {
                    self.registry.current(resource_id)
                })
                .await?;

            let Some(lease) = current else {
                return Ok(());
            };

            let remaining = lease.remaining(self.registry.clock().now());
            debug!(
                resource_id = %resource_id,
                holder = %lease.holder,
                token = lease.token,
                "Waiting for leadership release"
            );

            tokio::select! {
                event = watcher.next() => {
                    return match event {
                        Some(event) => {
                            debug!(resource_id = %resource_id, epoch = event.epoch, "Leadership released, waking waiter");
                            Ok(())
                        }
                        None => Err(StewardError::Internal(format!(
                            "release notifications for '{}' closed",
                            resource_id
                        ))),
                    };
                }
                _ = sleep(remaining) => {
                    self.retry
                        .run("expire", resource_id, || self.registry.expire_if_due(resource_id))
                        .await?;
                }
            }
        }
    }
}

/// Keeps a claimed lease alive until stopped or lost
pub struct RenewalTask {
    coordinator: Arc<ClaimCoordinator>,
    resource_id: String,
    holder: String,
    duration: Duration,
    interval: Duration,
    stop_tx: mpsc::Sender<()>,
}

impl RenewalTask {
    pub fn start(
        coordinator: Arc<ClaimCoordinator>,
        resource_id: String,
        holder: String,
        duration: Duration,
    ) -> (Self, mpsc::Receiver<()>) {
        let (stop_tx, stop_rx) = mpsc::channel(1);
        // Renew at a third of the lease duration
        let interval = (duration / 3).max(Duration::from_millis(1));

        let task = Self {
            coordinator,
            resource_id,
            holder,
            duration,
            interval,
            stop_tx,
        };

        (task, stop_rx)
    }

    pub async fn run(self, mut stop_rx: mpsc::Receiver<()>) {
        let mut interval = interval(self.interval);

        loop {
            tokio::select! {
                _ = interval.tick() => {
                    match self
                        .coordinator
                        .claim(&self.resource_id, &self.holder, self.duration)
                        .await
                    {
                        Ok(lease) => {
                            debug!(resource_id = %self.resource_id, holder = %self.holder, token = lease.token, "Lease renewal succeeded");
                        }
                        Err(e @ StewardError::AlreadyClaimed { .. }) => {
                            warn!(resource_id = %self.resource_id, holder = %self.holder, "Leadership lost: {}", e);
                            break;
                        }
                        Err(e) => {
                            error!(resource_id = %self.resource_id, holder = %self.holder, "Lease renewal error: {}", e);
                            break;
                        }
                    }
                }
                _ = stop_rx.recv() => {
                    info!(resource_id = %self.resource_id, holder = %self.holder, "Lease renewal stopped");
                    break;
                }
            }
        }
    }

    pub fn stop(&self) {
        let _ = self.stop_tx.try_send(());
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicU32, Ordering};

    use steward_common::ManualClock;

    use super::*;
    use crate::lease::LeaseRecord;
    use crate::notify::ChangeNotifier;
    use crate::store::MemoryRecordStore;

    const TEN_SECONDS: Duration = Duration::from_secs(10);

    fn fast_retry() -> RetryPolicy {
        RetryPolicy {
            max_attempts: 5,
            base_delay: Duration::from_millis(1),
            max_delay: Duration::from_millis(5),
        }
    }

    fn coordinator() -> (
        Arc<ManualClock>,
        Arc<MemoryRecordStore<LeaseRecord>>,
        ClaimCoordinator,
    ) {
        let clock = Arc::new(ManualClock::default());
        let store = Arc::new(MemoryRecordStore::<LeaseRecord>::new());
        let registry = Arc::new(LeaseRegistry::new(
            store.clone(),
            clock.clone(),
            Arc::new(ChangeNotifier::new()),
            LeaseConfig::default(),
        ));
        (clock, store, ClaimCoordinator::with_retry(registry, fast_retry()))
    }

    #[test]
    fn test_backoff_is_bounded() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.delay_for(0), Duration::from_millis(50));
        assert_eq!(policy.delay_for(1), Duration::from_millis(100));
        assert_eq!(policy.delay_for(3), Duration::from_millis(400));
        assert_eq!(policy.delay_for(10), Duration::from_secs(2));
        assert_eq!(policy.delay_for(40), Duration::from_secs(2));
    }

    #[tokio::test]
    async fn test_retry_absorbs_transient_failures() {
        let policy = fast_retry();
        let calls = AtomicU32::new(0);

        let result = policy
            .run("test", "mysql", || async {
                if calls.fetch_add(1, Ordering::SeqCst) < 2 {
                    Err(StewardError::StoreUnavailable("down".to_string()))
                } else {
                    Ok(7)
                }
            })
            .await;

        assert_eq!(result.unwrap(), 7);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_retry_gives_up_after_max_attempts() {
        let policy = fast_retry();
        let calls = AtomicU32::new(0);

        let result: Result<()> = policy
            .run("test", "mysql", || async {
                calls.fetch_add(1, Ordering::SeqCst);
                Err(StewardError::StoreUnavailable("down".to_string()))
            })
            .await;

        assert!(matches!(result, Err(StewardError::StoreUnavailable(_))));
        assert_eq!(calls.load(Ordering::SeqCst), 5);
    }

    #[tokio::test]
    async fn test_permanent_errors_are_not_retried() {
        let policy = fast_retry();
        let calls = AtomicU32::new(0);

        let result: Result<()> = policy
            .run("test", "mysql", || async {
                calls.fetch_add(1, Ordering::SeqCst);
                Err(StewardError::NotLeader {
                    resource_id: "mysql".to_string(),
                    holder: "mysql/1".to_string(),
                })
            })
            .await;

        assert!(matches!(result, Err(StewardError::NotLeader { .. })));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_claim_survives_store_blip() {
        let (_, store, coordinator) = coordinator();

        store.inject_failures(2);
        let lease = coordinator.claim("mysql", "mysql/0", TEN_SECONDS).await.unwrap();
        assert_eq!(lease.token, 1);

        // Unavailability never shows up as a conflict
        store.inject_failures(2);
        let err = coordinator
            .claim("mysql", "mysql/1", TEN_SECONDS)
            .await
            .unwrap_err();
        assert!(matches!(err, StewardError::AlreadyClaimed { .. }));
    }

    #[tokio::test]
    async fn test_block_returns_immediately_when_unclaimed() {
        let (_, _, coordinator) = coordinator();
        tokio::time::timeout(Duration::from_secs(1), coordinator.block_until_released("mysql"))
            .await
            .unwrap()
            .unwrap();
    }

    #[tokio::test]
    async fn test_block_wakes_on_release() {
        let (_, _, coordinator) = coordinator();
        let coordinator = Arc::new(coordinator);
        coordinator.claim("mysql", "mysql/0", TEN_SECONDS).await.unwrap();

        let waiter = {
            let coordinator = coordinator.clone();
            tokio::spawn(async move { coordinator.block_until_released("mysql").await })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!waiter.is_finished());

        coordinator.release("mysql", "mysql/0").await.unwrap();
        tokio::time::timeout(Duration::from_secs(5), waiter)
            .await
            .unwrap()
            .unwrap()
            .unwrap();
    }

    #[tokio::test]
    async fn test_block_wakes_on_expiry() {
        let (clock, _, coordinator) = coordinator();
        let coordinator = Arc::new(coordinator);
        coordinator.claim("mysql", "mysql/0", TEN_SECONDS).await.unwrap();

        let waiter = {
            let coordinator = coordinator.clone();
            tokio::spawn(async move { coordinator.block_until_released("mysql").await })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;

        clock.advance(TEN_SECONDS);
        assert!(coordinator.registry().expire_if_due("mysql").await.unwrap());

        tokio::time::timeout(Duration::from_secs(5), waiter)
            .await
            .unwrap()
            .unwrap()
            .unwrap();
    }

    #[tokio::test]
    async fn test_renewal_task_keeps_lease_alive() {
        let (clock, _, coordinator) = coordinator();
        let coordinator = Arc::new(coordinator);
        let first = coordinator
            .claim("mysql", "mysql/0", Duration::from_millis(300))
            .await
            .unwrap();

        let (task, stop_rx) = RenewalTask::start(
            coordinator.clone(),
            "mysql".to_string(),
            "mysql/0".to_string(),
            Duration::from_millis(300),
        );
        let stop_tx = task.stop_tx.clone();
        let handle = tokio::spawn(task.run(stop_rx));

        clock.advance(Duration::from_millis(200));
        tokio::time::sleep(Duration::from_millis(150)).await;

        let lease = coordinator.registry().current("mysql").await.unwrap().unwrap();
        assert_eq!(lease.token, first.token);
        assert!(lease.expiry > first.expiry);

        stop_tx.send(()).await.unwrap();
        tokio::time::timeout(Duration::from_secs(5), handle)
            .await
            .unwrap()
            .unwrap();
    }

    #[tokio::test]
    async fn test_renewal_task_stops_when_leadership_lost() {
        let (clock, _, coordinator) = coordinator();
        let coordinator = Arc::new(coordinator);
        coordinator.claim("mysql", "mysql/0", TEN_SECONDS).await.unwrap();

        // Lease lapses and another unit takes over before the first renewal
        clock.advance(TEN_SECONDS);
        coordinator.claim("mysql", "mysql/1", TEN_SECONDS).await.unwrap();

        let (task, stop_rx) = RenewalTask::start(
            coordinator.clone(),
            "mysql".to_string(),
            "mysql/0".to_string(),
            TEN_SECONDS,
        );
        tokio::time::timeout(Duration::from_secs(5), task.run(stop_rx))
            .await
            .unwrap();
    }
}
