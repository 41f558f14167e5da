//! Application startup utilities

pub mod logging;

pub use logging::{LogRotation, LoggingConfig, LoggingGuard, init_logging};
