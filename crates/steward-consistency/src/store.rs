//! Record store abstraction
//!
//! Lease and settings records live in a store that offers one primitive:
//! atomic compare-and-swap on a single record, keyed by resource id. Every
//! successful write bumps the record's revision; a writer names the revision
//! it read and loses the race if someone else wrote in between.

use std::sync::atomic::{AtomicU32, Ordering};

use async_trait::async_trait;
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use serde::{Deserialize, Serialize};
use steward_common::{Result, StewardError};

/// A record together with the revision it was stored at
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Versioned<R> {
    pub revision: u64,
    pub record: R,
}

/// Result of a compare-and-swap
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CasOutcome<R> {
    /// The write was applied; carries the stored record
    Applied(Versioned<R>),
    /// Another writer got there first; carries what is stored now
    Conflict(Option<Versioned<R>>),
}

impl<R> CasOutcome<R> {
    pub fn is_applied(&self) -> bool {
        matches!(self, CasOutcome::Applied(_))
    }
}

/// Persistent keyed record store with atomic compare-and-swap
#[async_trait]
pub trait RecordStore<R>: Send + Sync
where
    R: Clone + Send + Sync + 'static,
{
    /// Load the record stored under `key`
    async fn load(&self, key: &str) -> Result<Option<Versioned<R>>>;

    /// Store `record` under `key` only if the stored revision is `expected_revision`
    /// (`None` meaning "no record yet")
    async fn compare_and_swap(
        &self,
        key: &str,
        expected_revision: Option<u64>,
        record: R,
    ) -> Result<CasOutcome<R>>;

    /// List every stored record
    async fn list(&self) -> Result<Vec<(String, Versioned<R>)>>;
}

/// In-memory record store
///
/// Each key is updated under its map shard lock, so different resources never
/// contend on a global lock. `inject_failures` makes the next calls fail as if
/// the backing store were unreachable.
pub struct MemoryRecordStore<R> {
    records: DashMap<String, Versioned<R>>,
    pending_failures: AtomicU32,
}

impl<R> MemoryRecordStore<R> {
    pub fn new() -> Self {
        Self {
            records: DashMap::new(),
            pending_failures: AtomicU32::new(0),
        }
    }

    /// Fail the next `count` store calls with `StoreUnavailable`
    pub fn inject_failures(&self, count: u32) {
        self.pending_failures.store(count, Ordering::SeqCst);
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    fn check_available(&self) -> Result<()> {
        let consumed = self
            .pending_failures
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1));
        if consumed.is_ok() {
            return Err(StewardError::StoreUnavailable(
                "injected store failure".to_string(),
            ));
        }
        Ok(())
    }
}

impl<R> Default for MemoryRecordStore<R> {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl<R> RecordStore<R> for MemoryRecordStore<R>
where
    R: Clone + Send + Sync + 'static,
{
    async fn load(&self, key: &str) -> Result<Option<Versioned<R>>> {
        self.check_available()?;
        Ok(self.records.get(key).map(|entry| entry.value().clone()))
    }

    async fn compare_and_swap(
        &self,
        key: &str,
        expected_revision: Option<u64>,
        record: R,
    ) -> Result<CasOutcome<R>> {
        self.check_available()?;

        let outcome = match self.records.entry(key.to_string()) {
            Entry::Occupied(mut entry) => {
                if expected_revision == Some(entry.get().revision) {
                    let stored = Versioned {
                        revision: entry.get().revision + 1,
                        record,
                    };
                    entry.insert(stored.clone());
                    CasOutcome::Applied(stored)
                } else {
                    CasOutcome::Conflict(Some(entry.get().clone()))
                }
            }
            Entry::Vacant(entry) => {
                if expected_revision.is_none() {
                    let stored = Versioned {
                        revision: 1,
                        record,
                    };
                    entry.insert(stored.clone());
                    CasOutcome::Applied(stored)
                } else {
                    CasOutcome::Conflict(None)
                }
            }
        };

        Ok(outcome)
    }

    async fn list(&self) -> Result<Vec<(String, Versioned<R>)>> {
        self.check_available()?;
        Ok(self
            .records
            .iter()
            .map(|entry| (entry.key().clone(), entry.value().clone()))
            .collect())
    }
}
