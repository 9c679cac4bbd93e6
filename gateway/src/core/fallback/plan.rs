//! Fallback plans, attempt outcomes and the errors they compose into.

use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::core::provider::{ErrorClass, ProviderError};

/// Upper bound on attempts in one plan.
pub const MAX_ATTEMPTS: usize = 16;

/// Longest per-attempt timeout or deadline a plan accepts.
pub const MAX_PLAN_DURATION: Duration = Duration::from_secs(24 * 60 * 60);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Strategy {
    /// Try attempts in order, stop at the first success.
    #[default]
    Sequential,
    /// Start every attempt at once, first success wins.
    Parallel,
}

impl fmt::Display for Strategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Strategy::Sequential => write!(f, "sequential"),
            Strategy::Parallel => write!(f, "parallel"),
        }
    }
}

/// One (provider, request) pairing of a plan.
#[derive(Debug, Clone)]
pub struct AttemptRequest<P> {
    pub provider_id: String,
    pub payload: P,
}

impl<P> AttemptRequest<P> {
    pub fn new(provider_id: impl Into<String>, payload: P) -> Self {
        Self {
            provider_id: provider_id.into(),
            payload,
        }
    }
}

/// Ordered attempts plus strategy and timeouts. Always holds at least one
/// attempt and a positive per-attempt timeout.
#[derive(Debug, Clone)]
pub struct FallbackPlan<P> {
    attempts: Vec<AttemptRequest<P>>,
    strategy: Strategy,
    timeout_per_attempt: Duration,
    deadline: Option<Duration>,
}

impl<P> FallbackPlan<P> {
    pub fn new(
        attempts: Vec<AttemptRequest<P>>,
        strategy: Strategy,
        timeout_per_attempt: Duration,
    ) -> Result<Self, FallbackError> {
        if attempts.is_empty() {
            return Err(FallbackError::Validation(
                "plan must contain at least one attempt".to_string(),
            ));
        }
        if attempts.len() > MAX_ATTEMPTS {
            return Err(FallbackError::Validation(format!(
                "plan has {} attempts, at most {MAX_ATTEMPTS} are allowed",
                attempts.len()
            )));
        }
        if timeout_per_attempt.is_zero() {
            return Err(FallbackError::Validation(
                "timeout per attempt must be positive".to_string(),
            ));
        }
        if timeout_per_attempt > MAX_PLAN_DURATION {
            return Err(FallbackError::Validation(format!(
                "timeout per attempt must be at most {}s",
                MAX_PLAN_DURATION.as_secs()
            )));
        }
        if let Some(attempt) = attempts.iter().find(|a| a.provider_id.trim().is_empty()) {
            return Err(FallbackError::Validation(format!(
                "attempt has an empty provider id: '{}'",
                attempt.provider_id
            )));
        }
        Ok(Self {
            attempts,
            strategy,
            timeout_per_attempt,
            deadline: None,
        })
    }

    /// Bound the whole plan by `deadline`, measured from the start of execution.
    pub fn with_deadline(mut self, deadline: Duration) -> Result<Self, FallbackError> {
        if deadline.is_zero() {
            return Err(FallbackError::Validation(
                "deadline must be positive".to_string(),
            ));
        }
        if deadline > MAX_PLAN_DURATION {
            return Err(FallbackError::Validation(format!(
                "deadline must be at most {}s",
                MAX_PLAN_DURATION.as_secs()
            )));
        }
        self.deadline = Some(deadline);
        Ok(self)
    }

    pub fn attempts(&self) -> &[AttemptRequest<P>] {
        &self.attempts
    }

    pub fn strategy(&self) -> Strategy {
        self.strategy
    }

    pub fn timeout_per_attempt(&self) -> Duration {
        self.timeout_per_attempt
    }

    pub fn deadline(&self) -> Option<Duration> {
        self.deadline
    }

    pub(crate) fn into_attempts(self) -> Vec<AttemptRequest<P>> {
        self.attempts
    }
}

/// Result of running a single attempt.
#[derive(Debug)]
pub enum AttemptOutcome<T> {
    Success(T),
    Failure(ProviderError),
    TimedOut,
}

/// Why an attempt did not produce the plan's result.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "reason", rename_all = "snake_case")]
pub enum FailureReason {
    ProviderError(ProviderError),
    TimedOut { after_ms: u64 },
    /// Not started because an earlier failure was not retryable.
    Skipped,
    /// Still running when the overall deadline elapsed.
    Aborted,
}

impl fmt::Display for FailureReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FailureReason::ProviderError(err) => write!(f, "{err}"),
            FailureReason::TimedOut { after_ms } => write!(f, "timed out after {after_ms}ms"),
            FailureReason::Skipped => write!(f, "skipped after a non-retryable failure"),
            FailureReason::Aborted => write!(f, "aborted by overall deadline"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AttemptFailure {
    pub index: usize,
    pub provider_id: String,
    #[serde(flatten)]
    pub reason: FailureReason,
}

impl AttemptFailure {
    pub fn class(&self) -> Option<ErrorClass> {
        match &self.reason {
            FailureReason::ProviderError(err) => Some(err.class),
            _ => None,
        }
    }
}

impl fmt::Display for AttemptFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}: {}", self.index, self.provider_id, self.reason)
    }
}

fn join_failures(failures: &[AttemptFailure]) -> String {
    failures
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FallbackError {
    /// Malformed plan. Never retried.
    #[error("Invalid fallback plan: {0}")]
    Validation(String),

    #[error("All {} attempts failed: {}", .failures.len(), join_failures(.failures))]
    AllAttemptsFailed { failures: Vec<AttemptFailure> },

    #[error("Deadline of {}ms exceeded: {}", .deadline.as_millis(), join_failures(.failures))]
    DeadlineExceeded {
        deadline: Duration,
        failures: Vec<AttemptFailure>,
    },
}

impl FallbackError {
    /// Per-attempt failures, in plan order.
    pub fn failures(&self) -> &[AttemptFailure] {
        match self {
            FallbackError::Validation(_) => &[],
            FallbackError::AllAttemptsFailed { failures }
            | FallbackError::DeadlineExceeded { failures, .. } => failures,
        }
    }

    /// True when every attempt failed only because the capability is unsupported.
    pub fn is_all_unsupported(&self) -> bool {
        let failures = self.failures();
        !failures.is_empty()
            && failures
                .iter()
                .all(|f| f.class() == Some(ErrorClass::Unsupported))
    }
}

/// The winning attempt of a plan.
#[derive(Debug)]
pub struct FallbackSuccess<T> {
    pub provider_id: String,
    pub index: usize,
    pub value: T,
    /// Attempts that failed before the winner, in plan order.
    pub failures: Vec<AttemptFailure>,
}
