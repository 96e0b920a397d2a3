//! Pipeline coordinator — sequences transform, scoring, persistence, and
//! reporting for one date window and surfaces a run-level summary.

pub mod coordinator;

pub use coordinator::PipelineCoordinator;
