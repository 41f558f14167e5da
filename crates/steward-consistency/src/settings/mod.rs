//! Leadership settings
//!
//! Per-resource key/value settings writable only by the resource's current
//! lease holder. The fencing token of the authorizing lease is stored with
//! every write so a holder that lost leadership cannot overwrite its
//! successor.

mod model;
mod service;

pub use model::*;
pub use service::*;
