//! Reelcut Common Utilities
//!
//! Shared infrastructure for all Reelcut crates:
//! - Error taxonomy and result aliases
//! - Clock abstractions, throttling and drift measurement
//! - Tracing/logging initialization
//! - Configuration loading and tunable constants

pub mod clock;
pub mod config;
pub mod error;
pub mod logging;

pub use clock::*;
pub use config::*;
pub use error::*;
