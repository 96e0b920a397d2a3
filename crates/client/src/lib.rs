//! Attribution API client — delivers journey batches to the external
//! scoring endpoint, classifies every outcome, and retries transient
//! failures with bounded exponential backoff.

pub mod ihc;
pub mod response;
pub mod retry;

pub use ihc::{AttributionApiClient, HttpScoringTransport, ScoringTransport, TransportError, TransportResponse};
pub use response::ApiOutcome;
pub use retry::{BackoffPolicy, FailureKind, RetryState};
