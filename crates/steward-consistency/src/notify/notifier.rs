//! Change Notifier
//!
//! Every resource owns two single-slot mailboxes: one carrying the latest
//! release event, one carrying the latest settings snapshot. Publishing
//! overwrites the slot and wakes every subscriber without waiting for any of
//! them; a subscriber that falls behind only ever sees the newest value.
//! Dropping a subscription is the only way to cancel it.

use std::collections::HashMap;

use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use futures::Stream;
use serde::{Deserialize, Serialize};
use tokio::sync::watch;
use tokio_stream::StreamExt;
use tokio_stream::wrappers::WatchStream;
use tracing::trace;

use crate::lease::ReleaseCause;
use crate::settings::SettingsSnapshot;

/// A lease that stopped being held
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReleaseEvent {
    pub resource_id: String,
    /// Holder whose lease ended
    pub holder: String,
    /// Fencing token of the lease that ended
    pub token: u64,
    pub cause: ReleaseCause,
    /// Per-resource sequence number, starting at 1
    pub epoch: u64,
}

/// Fan-out of release and settings changes to any number of watchers
#[derive(Default)]
pub struct ChangeNotifier {
    releases: DashMap<String, watch::Sender<Option<ReleaseEvent>>>,
    settings: DashMap<String, watch::Sender<SettingsSnapshot>>,
}

impl ChangeNotifier {
    pub fn new() -> Self {
        Self::default()
    }

    /// Announce that the lease held by `holder` on `resource_id` ended
    pub fn publish_release(
        &self,
        resource_id: &str,
        holder: &str,
        token: u64,
        cause: ReleaseCause,
    ) -> u64 {
        let sender = self
            .releases
            .entry(resource_id.to_string())
            .or_insert_with(|| watch::channel(None).0);

        let mut epoch = 0;
        sender.send_modify(|slot| {
            epoch = slot.as_ref().map_or(0, |event| event.epoch) + 1;
            *slot = Some(ReleaseEvent {
                resource_id: resource_id.to_string(),
                holder: holder.to_string(),
                token,
                cause,
                epoch,
            });
        });

        trace!(
            resource_id = %resource_id,
            epoch,
            watchers = sender.receiver_count(),
            "Published release event"
        );
        epoch
    }

    /// Subscribe to release events published after this call
    pub fn watch_release(&self, resource_id: &str) -> ReleaseWatcher {
        let rx = self
            .releases
            .entry(resource_id.to_string())
            .or_insert_with(|| watch::channel(None).0)
            .subscribe();
        ReleaseWatcher { rx }
    }

    /// Announce a new settings snapshot
    ///
    /// Snapshots carry the record version; an older snapshot never replaces a
    /// newer one, so publishers racing each other cannot move watchers backwards.
    pub fn publish_settings(&self, resource_id: &str, snapshot: SettingsSnapshot) {
        match self.settings.entry(resource_id.to_string()) {
            Entry::Occupied(entry) => {
                let delivered = entry.get().send_if_modified(|current| {
                    if snapshot.version > current.version {
                        *current = snapshot;
                        true
                    } else {
                        false
                    }
                });
                trace!(resource_id = %resource_id, delivered, "Published settings snapshot");
            }
            Entry::Vacant(entry) => {
                entry.insert(watch::channel(snapshot).0);
            }
        }
    }

    /// Subscribe to settings changes
    ///
    /// `current` is the state the caller just read from the store. The first
    /// delivery is the newest of `current` and anything already published.
    pub fn watch_settings(&self, resource_id: &str, current: SettingsSnapshot) -> SettingsWatcher {
        self.publish_settings(resource_id, current.clone());

        let mut rx = self
            .settings
            .entry(resource_id.to_string())
            .or_insert_with(|| watch::channel(current).0)
            .subscribe();
        rx.mark_changed();
        SettingsWatcher { rx }
    }

    /// Number of live release watchers for a resource
    pub fn release_watchers(&self, resource_id: &str) -> usize {
        self.releases
            .get(resource_id)
            .map(|sender| sender.receiver_count())
            .unwrap_or(0)
    }

    /// Number of live settings watchers for a resource
    pub fn settings_watchers(&self, resource_id: &str) -> usize {
        self.settings
            .get(resource_id)
            .map(|sender| sender.receiver_count())
            .unwrap_or(0)
    }
}

/// Subscription to release events of one resource
pub struct ReleaseWatcher {
    rx: watch::Receiver<Option<ReleaseEvent>>,
}

impl ReleaseWatcher {
    /// Wait for the next release event
    ///
    /// Returns `None` once the notifier is gone.
    pub async fn next(&mut self) -> Option<ReleaseEvent> {
        loop {
            self.rx.changed().await.ok()?;
            if let Some(event) = self.rx.borrow_and_update().clone() {
                return Some(event);
            }
        }
    }

    pub fn into_stream(self) -> impl Stream<Item = ReleaseEvent> + Send + Unpin {
        WatchStream::from_changes(self.rx).filter_map(|event| event)
    }

    /// Cancel the subscription
    pub fn stop(self) {}
}

/// Subscription to settings snapshots of one resource
pub struct SettingsWatcher {
    rx: watch::Receiver<SettingsSnapshot>,
}

impl SettingsWatcher {
    /// Wait for the next snapshot; the first call returns the state at
    /// subscription time
    pub async fn next(&mut self) -> Option<SettingsSnapshot> {
        self.rx.changed().await.ok()?;
        Some(self.rx.borrow_and_update().clone())
    }

    /// Settings values of the next snapshot
    pub async fn changes(&mut self) -> Option<HashMap<String, String>> {
        self.next().await.map(|snapshot| snapshot.values)
    }

    pub fn into_stream(self) -> impl Stream<Item = SettingsSnapshot> + Send + Unpin {
        WatchStream::from_changes(self.rx)
    }

    /// Cancel the subscription
    pub fn stop(self) {}
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;

    fn snapshot(version: u64, pairs: &[(&str, &str)]) -> SettingsSnapshot {
        SettingsSnapshot {
            version,
            values: pairs
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect(),
        }
    }

    #[tokio::test]
    async fn test_release_watcher_only_sees_later_events() {
        let notifier = ChangeNotifier::new();
        notifier.publish_release("mysql", "mysql/0", 1, ReleaseCause::Released);

        let mut watcher = notifier.watch_release("mysql");
        let nothing = tokio::time::timeout(Duration::from_millis(20), watcher.next()).await;
        assert!(nothing.is_err());

        notifier.publish_release("mysql", "mysql/1", 2, ReleaseCause::Expired);
        let event = watcher.next().await.unwrap();
        assert_eq!(event.holder, "mysql/1");
        assert_eq!(event.token, 2);
        assert_eq!(event.cause, ReleaseCause::Expired);
        assert_eq!(event.epoch, 2);
    }

    #[tokio::test]
    async fn test_release_events_coalesce() {
        let notifier = ChangeNotifier::new();
        let mut watcher = notifier.watch_release("mysql");

        notifier.publish_release("mysql", "mysql/0", 1, ReleaseCause::Released);
        notifier.publish_release("mysql", "mysql/1", 2, ReleaseCause::Released);
        notifier.publish_release("mysql", "mysql/2", 3, ReleaseCause::Released);

        let event = watcher.next().await.unwrap();
        assert_eq!(event.token, 3);
        assert_eq!(event.epoch, 3);

        let backlog = tokio::time::timeout(Duration::from_millis(20), watcher.next()).await;
        assert!(backlog.is_err(), "no backlog after coalesced delivery");
    }

    #[tokio::test]
    async fn test_release_watchers_are_independent() {
        let notifier = ChangeNotifier::new();
        let mut first = notifier.watch_release("mysql");
        let second = notifier.watch_release("mysql");
        assert_eq!(notifier.release_watchers("mysql"), 2);

        second.stop();
        assert_eq!(notifier.release_watchers("mysql"), 1);

        notifier.publish_release("mysql", "mysql/0", 1, ReleaseCause::Released);
        assert!(first.next().await.is_some());
    }

    #[tokio::test]
    async fn test_settings_first_delivery_is_current_state() {
        let notifier = ChangeNotifier::new();
        let mut watcher = notifier.watch_settings("mysql", snapshot(0, &[]));

        let first = watcher.next().await.unwrap();
        assert_eq!(first.version, 0);
        assert!(first.values.is_empty());

        notifier.publish_settings("mysql", snapshot(1, &[("foo", "bar")]));
        let second = watcher.changes().await.unwrap();
        assert_eq!(second.get("foo").map(String::as_str), Some("bar"));
    }

    #[tokio::test]
    async fn test_settings_never_move_backwards() {
        let notifier = ChangeNotifier::new();
        notifier.publish_settings("mysql", snapshot(3, &[("foo", "new")]));

        // A watcher that read an older record still starts from the newest snapshot
        let mut watcher = notifier.watch_settings("mysql", snapshot(2, &[("foo", "old")]));
        let first = watcher.next().await.unwrap();
        assert_eq!(first.version, 3);

        notifier.publish_settings("mysql", snapshot(2, &[("foo", "old")]));
        let stale = tokio::time::timeout(Duration::from_millis(20), watcher.next()).await;
        assert!(stale.is_err());
    }

    #[tokio::test]
    async fn test_settings_coalesce_for_slow_watcher() {
        let notifier = ChangeNotifier::new();
        let mut watcher = notifier.watch_settings("mysql", snapshot(0, &[]));
        watcher.next().await.unwrap();

        for version in 1..=5 {
            notifier.publish_settings("mysql", snapshot(version, &[("n", "x")]));
        }

        let latest = watcher.next().await.unwrap();
        assert_eq!(latest.version, 5);
    }

    #[tokio::test]
    async fn test_settings_stream() {
        let notifier = ChangeNotifier::new();
        let mut stream = notifier
            .watch_settings("mysql", snapshot(0, &[]))
            .into_stream();

        let first = stream.next().await.unwrap();
        assert_eq!(first.version, 0);

        notifier.publish_settings("mysql", snapshot(1, &[("a", "b")]));
        let second = stream.next().await.unwrap();
        assert_eq!(second.version, 1);
    }

    #[tokio::test]
    async fn test_publish_without_watchers_does_not_block() {
        let notifier = ChangeNotifier::new();
        for token in 1..100 {
            notifier.publish_release("mysql", "mysql/0", token, ReleaseCause::Released);
        }
        assert_eq!(notifier.release_watchers("mysql"), 0);
        assert_eq!(notifier.settings_watchers("mysql"), 0);
    }
}
