//! Error types and error codes for Steward
//!
//! This module defines:
//! - `StewardError`: the leadership error taxonomy shared by every layer
//! - `ErrorCode`: Structured error codes for API responses

use serde::{Deserialize, Serialize};

/// Leadership error taxonomy
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum StewardError {
    #[error("leadership of '{resource_id}' is already claimed by '{holder}'")]
    AlreadyClaimed { resource_id: String, holder: String },

    #[error("'{holder}' is not the leader of '{resource_id}'")]
    NotLeader { resource_id: String, holder: String },

    #[error("lease store unavailable: {0}")]
    StoreUnavailable(String),

    #[error("{operation}() is not supported at API version {actual} (need V{required}+)")]
    ProtocolUnsupported {
        operation: String,
        required: u32,
        actual: u32,
    },

    #[error("'{0}' not found")]
    NotFound(String),

    #[error("caused: {0}")]
    IllegalArgument(String),

    #[error("internal error: {0}")]
    Internal(String),
}

impl StewardError {
    /// Whether the failure is transient and may be retried with backoff.
    ///
    /// Only store unavailability qualifies; every other variant is a
    /// correctness signal the caller has to act on.
    pub fn is_transient(&self) -> bool {
        matches!(self, StewardError::StoreUnavailable(_))
    }

    /// Map the error onto its stable API error code
    pub fn error_code(&self) -> ErrorCode<'static> {
        match self {
            StewardError::AlreadyClaimed { .. } => LEADERSHIP_CLAIM_DENIED,
            StewardError::NotLeader { .. } => NOT_LEADER,
            StewardError::StoreUnavailable(_) => STORE_UNAVAILABLE,
            StewardError::ProtocolUnsupported { .. } => API_NOT_SUPPORTED,
            StewardError::NotFound(_) => RESOURCE_NOT_FOUND,
            StewardError::IllegalArgument(_) => PARAMETER_VALIDATE_ERROR,
            StewardError::Internal(_) => SERVER_ERROR,
        }
    }
}

pub type Result<T> = std::result::Result<T, StewardError>;

/// Error code structure for API responses
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorCode<'a> {
    pub code: i32,
    pub message: &'a str,
}

// General success and error codes
pub const SUCCESS: ErrorCode<'static> = ErrorCode {
    code: 0,
    message: "success",
};

pub const PARAMETER_VALIDATE_ERROR: ErrorCode<'static> = ErrorCode {
    code: 20002,
    message: "parameter validate error",
};

pub const RESOURCE_NOT_FOUND: ErrorCode<'static> = ErrorCode {
    code: 20004,
    message: "resource not found",
};

// Leadership error codes
pub const LEADERSHIP_CLAIM_DENIED: ErrorCode<'static> = ErrorCode {
    code: 24000,
    message: "leadership claim denied",
};

pub const NOT_LEADER: ErrorCode<'static> = ErrorCode {
    code: 24001,
    message: "not the leader",
};

pub const STORE_UNAVAILABLE: ErrorCode<'static> = ErrorCode {
    code: 24002,
    message: "lease store unavailable",
};

pub const SERVER_ERROR: ErrorCode<'static> = ErrorCode {
    code: 30000,
    message: "server error",
};

pub const API_NOT_SUPPORTED: ErrorCode<'static> = ErrorCode {
    code: 40002,
    message: "API not supported at this version.",
};
