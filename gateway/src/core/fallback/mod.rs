//! Fallback orchestration.
//!
//! A [`FallbackPlan`] lists (provider id, request) attempts. The
//! [`FallbackOrchestrator`] runs them either one after another or all at
//! once, returning the first success or an aggregate [`FallbackError`] that
//! records why every attempt failed.

mod orchestrator;
mod plan;
mod streaming;

pub use orchestrator::FallbackOrchestrator;
pub use plan::{
    AttemptFailure, AttemptOutcome, AttemptRequest, FailureReason, FallbackError, FallbackPlan,
    FallbackSuccess, MAX_ATTEMPTS, MAX_PLAN_DURATION, Strategy,
};
pub use streaming::StreamingSuccess;
