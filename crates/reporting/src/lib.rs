//! Channel reporting — deterministic aggregation of scored sessions into
//! per-channel performance rows.

pub mod engine;

pub use engine::ReportingEngine;
