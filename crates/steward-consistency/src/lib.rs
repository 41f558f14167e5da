//! Steward Consistency - leadership lease engine
//!
//! This crate provides:
//! - Record store abstraction with atomic compare-and-swap
//! - Lease registry (claim/renew/release, lazy expiry, background reaper)
//! - Claim coordinator (transient retry, blocking wait for release, renewal task)
//! - Fenced leadership settings (writes gated on the current lease)
//! - Change notifier (coalesced release and settings subscriptions)

pub mod config;
pub mod lease;
pub mod notify;
pub mod settings;
pub mod store;

pub use config::LeaseConfig;
pub use lease::{
    ClaimCoordinator, Lease, LeaseRecord, LeaseRegistry, LeaseStats, ReleaseCause, RenewalTask,
    RetryPolicy,
};
pub use notify::{ChangeNotifier, ReleaseEvent, ReleaseWatcher, SettingsWatcher};
pub use settings::{LeadershipSettingsService, SettingsRecord, SettingsSnapshot};
pub use store::{CasOutcome, MemoryRecordStore, RecordStore, Versioned};
