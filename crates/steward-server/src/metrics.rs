// Metric descriptions for the leadership engine
// The engine records through the metrics facade; the embedding application installs the recorder

use metrics::{describe_counter, describe_gauge};

/// Initialize all metric descriptions
/// Should be called once at application startup, after the recorder is installed
pub fn init_metrics() {
    // Lease metrics
    describe_counter!(
        "leadership_claims_total",
        "Total number of claims that created a new lease"
    );
    describe_counter!(
        "leadership_claim_conflicts_total",
        "Total number of claims refused because another holder had the lease"
    );
    describe_counter!(
        "leadership_releases_total",
        "Total number of explicit leadership releases"
    );
    describe_counter!(
        "leadership_expirations_total",
        "Total number of leases demoted after expiry"
    );
    describe_gauge!(
        "leadership_leases_held",
        "Number of valid leases at the last expiry sweep"
    );

    // Settings metrics
    describe_counter!(
        "leadership_settings_merges_total",
        "Total number of successful leadership settings merges"
    );

    // Store metrics
    describe_counter!(
        "leadership_store_retries_total",
        "Total number of retries after a transient store failure"
    );

    tracing::info!("Metrics initialized");
}
