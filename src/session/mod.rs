//! Session — one provider, one plan, one backend query.
//!
//! The controller owns the provider process for the life of the session and
//! feeds successful tool results through the aggregator into the backend.

pub mod aggregator;
pub mod controller;
pub mod errors;
pub mod plan;

pub use aggregator::{ContextAggregator, EvidenceEntry};
pub use controller::{SessionController, SessionOptions, SessionReport, SessionState};
pub use errors::SessionError;
pub use plan::{default_plan, PlannedCall};
