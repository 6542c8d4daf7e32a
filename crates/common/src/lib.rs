//! mvgen Common Utilities
//!
//! Shared infrastructure for all mvgen crates:
//! - Error types and result aliases
//! - Retry/backoff for external service calls
//! - Run-level cancellation
//! - Tracing/logging initialization
//! - Configuration loading

pub mod cancel;
pub mod config;
pub mod error;
pub mod logging;
pub mod retry;

pub use cancel::*;
pub use config::*;
pub use error::*;
pub use retry::*;
