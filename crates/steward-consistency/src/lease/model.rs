//! Lease Data Model

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Why a lease stopped being held
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReleaseCause {
    /// The holder gave the lease up
    Released,
    /// The lease ran past its expiry without renewal
    Expired,
}

/// Persisted lease record, one per resource
///
/// The record outlives its leases: releasing or expiring only clears the
/// holder, so the fencing token keeps counting up across holders.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LeaseRecord {
    /// Current holder, `None` when unclaimed
    #[serde(default)]
    pub holder: Option<String>,
    /// Fencing token of the latest grant (0 = never claimed)
    #[serde(default)]
    pub token: u64,
    /// Expiry of the current grant
    #[serde(default)]
    pub expiry: Option<DateTime<Utc>>,
}

impl LeaseRecord {
    /// A fresh grant to `holder`
    pub fn granted(holder: impl Into<String>, token: u64, expiry: DateTime<Utc>) -> Self {
        Self {
            holder: Some(holder.into()),
            token,
            expiry: Some(expiry),
        }
    }

    /// Same record with the holder cleared; the token is kept
    pub fn unclaimed(&self) -> Self {
        Self {
            holder: None,
            token: self.token,
            expiry: None,
        }
    }

    /// Check if the lease is valid at `now`
    pub fn is_held_at(&self, now: DateTime<Utc>) -> bool {
        self.holder.is_some() && self.expiry.is_some_and(|expiry| now < expiry)
    }

    /// Check if `holder` holds a valid lease at `now`
    pub fn is_held_by(&self, holder: &str, now: DateTime<Utc>) -> bool {
        self.is_held_at(now) && self.holder.as_deref() == Some(holder)
    }

    /// Check if the record still names a holder whose lease has run out
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        self.holder.is_some() && !self.is_held_at(now)
    }

    /// View of the record as a valid lease, if it is one at `now`
    pub fn lease_at(&self, resource_id: &str, now: DateTime<Utc>) -> Option<Lease> {
        if !self.is_held_at(now) {
            return None;
        }
        Some(Lease {
            resource_id: resource_id.to_string(),
            holder: self.holder.clone()?,
            token: self.token,
            expiry: self.expiry?,
        })
    }
}

/// A valid leadership grant
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Lease {
    pub resource_id: String,
    pub holder: String,
    pub token: u64,
    pub expiry: DateTime<Utc>,
}

impl Lease {
    /// Time left before expiry, zero once expired
    pub fn remaining(&self, now: DateTime<Utc>) -> std::time::Duration {
        (self.expiry - now).to_std().unwrap_or_default()
    }
}

/// Lease statistics
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LeaseStats {
    /// Successful claims that created a new grant
    pub total_claims: u64,
    /// Successful claims by the current holder
    pub total_renewals: u64,
    /// Explicit releases
    pub total_releases: u64,
    /// Leases demoted after running out
    pub total_expirations: u64,
    /// Claims refused because another holder had the lease
    pub claim_conflicts: u64,
    /// Currently valid leases
    pub held_leases: u64,
}
