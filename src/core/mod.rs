//! Core types shared by the adapters, the clock and the coordinator.
//!
//! Time values are in seconds (`f64`), matching what media elements report.

pub mod config;
pub mod error;
pub mod time;

// Re-export core types for easier access.
pub use config::SyncConfig;
pub use error::{MediaError, SyncError};
pub use time::{Seconds, ZERO};
