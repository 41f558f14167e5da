//! Leadership leases
//!
//! This module provides:
//! - Lease data model and statistics
//! - Lease registry: claim/renew/release, lazy expiry and the background reaper
//! - Claim coordinator: transient-failure retry, blocking wait for release,
//!   and the renewal task that keeps a lease alive

mod coordinator;
mod model;
mod registry;

pub use coordinator::*;
pub use model::*;
pub use registry::*;
