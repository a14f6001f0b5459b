//! # Configuration Modules
//!
//! Layered service configuration: built-in defaults, a JSON file and
//! `TWINS_*` environment variables, later layers overriding earlier ones.

/// Provides the twins service configuration and its loaders.
pub mod config_twins;

pub use config_twins::{ConfigError, TwinsConfig};
