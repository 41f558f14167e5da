//! Business services for the Steward server

pub mod leadership;
