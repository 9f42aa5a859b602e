//! Postfully Common Utilities
//!
//! Shared infrastructure for all Postfully crates:
//! - Error types and result aliases
//! - Frame timing and export ETA estimation
//! - Tracing/logging initialization
//! - Configuration loading

pub mod clock;
pub mod config;
pub mod error;
pub mod logging;

pub use clock::*;
pub use config::*;
pub use error::*;
