//! Request and response types for the leadership facade
//!
//! Bulk operations take one parameter struct per entry and answer with one
//! `ErrorResult` per entry, in the same order.

use serde::{Deserialize, Serialize};
use steward_common::StewardError;

/// A single leadership claim
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClaimLeadershipParams {
    pub resource_id: String,
    pub holder_id: String,
    /// Requested lease duration in milliseconds; the configured default when absent
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duration_ms: Option<u64>,
}

/// A single leadership release
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReleaseLeadershipParams {
    pub resource_id: String,
    pub holder_id: String,
}

/// Serializable error of a failed entry
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorInfo {
    pub code: i32,
    pub message: String,
}

impl From<&StewardError> for ErrorInfo {
    fn from(err: &StewardError) -> Self {
        Self {
            code: err.error_code().code,
            message: err.to_string(),
        }
    }
}

/// Outcome of one bulk entry; `error` is absent on success
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorResult {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<ErrorInfo>,
}

impl ErrorResult {
    pub fn success() -> Self {
        Self { error: None }
    }

    pub fn is_success(&self) -> bool {
        self.error.is_none()
    }
}

impl<T> From<steward_common::Result<T>> for ErrorResult {
    fn from(result: steward_common::Result<T>) -> Self {
        match result {
            Ok(_) => Self::success(),
            Err(e) => Self {
                error: Some(ErrorInfo::from(&e)),
            },
        }
    }
}
