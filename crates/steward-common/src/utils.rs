//! Identifier validation for Steward
//!
//! Resources are services (`mysql`, `wordpress-db`) and holders are units of
//! that service (`mysql/0`).

use std::sync::LazyLock;

/// Regex pattern for service names
static SERVICE_PATTERN: LazyLock<regex::Regex> = LazyLock::new(|| {
    regex::Regex::new("^[a-z][a-z0-9]*(-[a-z0-9]*[a-z][a-z0-9]*)*$")
        .expect("Invalid regex pattern")
});

/// Regex pattern for unit names: `<service>/<number>`
static UNIT_PATTERN: LazyLock<regex::Regex> = LazyLock::new(|| {
    regex::Regex::new("^([a-z][a-z0-9]*(-[a-z0-9]*[a-z][a-z0-9]*)*)/(0|[1-9][0-9]*)$")
        .expect("Invalid regex pattern")
});

/// Validate a service name
///
/// # Examples
///
/// ```
/// use steward_common::is_valid_service_name;
///
/// assert!(is_valid_service_name("mysql"));
/// assert!(is_valid_service_name("wordpress-db"));
/// assert!(!is_valid_service_name("mysql/0"));
/// assert!(!is_valid_service_name("db-1"));
/// ```
pub fn is_valid_service_name(name: &str) -> bool {
    SERVICE_PATTERN.is_match(name)
}

/// Validate a unit name
///
/// # Examples
///
/// ```
/// use steward_common::is_valid_unit_name;
///
/// assert!(is_valid_unit_name("mysql/0"));
/// assert!(!is_valid_unit_name("mysql/01"));
/// assert!(!is_valid_unit_name("mysql"));
/// ```
pub fn is_valid_unit_name(name: &str) -> bool {
    UNIT_PATTERN.is_match(name)
}

/// Service part of a unit name, if the unit name is valid
pub fn unit_service(unit: &str) -> Option<&str> {
    UNIT_PATTERN
        .captures(unit)
        .and_then(|caps| caps.get(1))
        .map(|m| m.as_str())
}
