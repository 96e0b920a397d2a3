//! Storage gateway — typed SQLite access for raw touchpoints, scored
//! results, and channel reports, plus the atomic CSV report artifact.

pub mod gateway;

pub use gateway::StorageGateway;
