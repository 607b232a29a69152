//! Shared types and constants for hop latency measurement
//!
//! This crate provides the trace event data model and the constants
//! shared between the correlation engine, the overhead estimator and
//! the auxiliary conversion tools.

pub mod constants;
pub mod types;

// Re-export commonly used types
pub use constants::*;
pub use types::{Timestamp, TraceEvent};
