//! Data models for the Steward server

pub mod config;
pub mod params;
