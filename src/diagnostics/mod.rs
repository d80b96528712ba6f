//! Run diagnostics for the flux pipeline.
//!
//! This module records what a run processed and which recoverable
//! conditions it met, so a lab engineer can audit the outputs.

pub mod log;

// Re-export commonly used types
pub use log::{MissingSample, RunLog, RunStats, StageRecord, StageStatus};
