//! Data transformer — maps raw touchpoints into the request shape the
//! scoring API expects, and packs the result into session-preserving
//! batches.

pub mod batching;
pub mod transformer;

pub use batching::batch_by_session;
pub use transformer::Transformer;
