//! Steward Common - Shared types, traits, and utilities
//!
//! This crate provides the foundational types used across all Steward components:
//! - Error taxonomy and API error codes
//! - Injectable clock used for every lease expiry computation
//! - Identifier validation for services and units

pub mod clock;
pub mod error;
pub mod utils;

// Re-exports for convenience
pub use clock::{Clock, ManualClock, SystemClock};
pub use error::{ErrorCode, Result, StewardError};
pub use utils::{is_valid_service_name, is_valid_unit_name, unit_service};
