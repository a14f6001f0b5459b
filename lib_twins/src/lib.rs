//! # lib_twins
//!
//! Digital twins for IoT telemetry: a registry of revisioned twin definitions,
//! an attribute router built from them, and a pipeline that turns SenML
//! messages from a pub/sub transport into stored twin states.

// Declare the modules to re-export
pub mod configs;
#[cfg(feature = "memory")]
pub mod connections;
pub mod core;
#[cfg(feature = "loggers")]
pub mod loggers;

// Re-export the service surface
pub use crate::configs::TwinsConfig;
pub use crate::core::*;
