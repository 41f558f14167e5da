// Steward server library: the leadership facade and its ambient wiring
// Transport is left to the embedding application

pub mod metrics; // Metric descriptions
pub mod model; // Configuration and request/response models
pub mod service; // Leadership facade
pub mod startup; // Logging initialisation

pub use model::config::Configuration;
pub use model::params::{
    ClaimLeadershipParams, ErrorInfo, ErrorResult, ReleaseLeadershipParams,
};
pub use service::leadership::{CURRENT_API_VERSION, LeadershipService, SETTINGS_API_VERSION};
