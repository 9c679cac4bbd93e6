//! Sequential and parallel execution of fallback plans.

use std::collections::BTreeMap;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};

use super::plan::{
    AttemptFailure, AttemptOutcome, AttemptRequest, FailureReason, FallbackError, FallbackPlan,
    FallbackSuccess, Strategy,
};
use crate::core::provider::ProviderResult;
use crate::core::registry::{ProviderRef, ProviderRegistry};
use crate::core::stream::DEFAULT_STREAM_BUFFER;

/// Runs fallback plans against a shared [`ProviderRegistry`].
///
/// The orchestrator is agnostic of the operation being performed: callers
/// pass an executor that maps a resolved provider and the attempt payload to
/// a future. Executor futures that lose a parallel race, or outlive the
/// per-attempt timeout, are dropped, which cancels any in-flight provider I/O.
#[derive(Clone)]
pub struct FallbackOrchestrator {
    registry: Arc<ProviderRegistry>,
    stream_buffer: usize,
}

impl FallbackOrchestrator {
    pub fn new(registry: Arc<ProviderRegistry>) -> Self {
        Self {
            registry,
            stream_buffer: DEFAULT_STREAM_BUFFER,
        }
    }

    /// Bound on chunks buffered between a committed stream and its consumer.
    pub fn with_stream_buffer(mut self, buffer: usize) -> Self {
        self.stream_buffer = buffer.max(1);
        self
    }

    pub fn registry(&self) -> &Arc<ProviderRegistry> {
        &self.registry
    }

    pub(crate) fn stream_buffer(&self) -> usize {
        self.stream_buffer
    }

    pub async fn execute<P, T, F, Fut>(
        &self,
        plan: FallbackPlan<P>,
        executor: F,
    ) -> Result<FallbackSuccess<T>, FallbackError>
    where
        P: Send + 'static,
        T: Send + 'static,
        F: Fn(ProviderRef, P) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ProviderResult<T>> + Send + 'static,
    {
        let strategy = plan.strategy();
        let timeout = plan.timeout_per_attempt();
        let deadline = plan.deadline();
        let attempts = plan.into_attempts();
        debug!(
            strategy = %strategy,
            attempts = attempts.len(),
            timeout_ms = millis(timeout),
            "Executing fallback plan"
        );

        let executor = Arc::new(executor);
        match strategy {
            Strategy::Sequential => {
                self.run_sequential(attempts, timeout, deadline, executor)
                    .await
            }
            Strategy::Parallel => {
                self.run_parallel(attempts, timeout, deadline, executor)
                    .await
            }
        }
    }

    async fn run_sequential<P, T, F, Fut>(
        &self,
        attempts: Vec<AttemptRequest<P>>,
        timeout: Duration,
        deadline: Option<Duration>,
        executor: Arc<F>,
    ) -> Result<FallbackSuccess<T>, FallbackError>
    where
        P: Send + 'static,
        T: Send + 'static,
        F: Fn(ProviderRef, P) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ProviderResult<T>> + Send + 'static,
    {
        let provider_ids: Vec<String> = attempts.iter().map(|a| a.provider_id.clone()).collect();
        let mut failures: Vec<AttemptFailure> = Vec::with_capacity(attempts.len());

        let run = async {
            let mut remaining = attempts.into_iter().enumerate();
            while let Some((index, AttemptRequest { provider_id, payload })) = remaining.next() {
                let outcome = run_attempt(
                    self.registry.clone(),
                    provider_id.clone(),
                    payload,
                    timeout,
                    executor.clone(),
                )
                .await;

                match outcome {
                    AttemptOutcome::Success(value) => return Some((index, provider_id, value)),
                    AttemptOutcome::Failure(err) => {
                        warn!(provider_id = %provider_id, attempt = index, error = %err, "Fallback attempt failed");
                        let retryable = err.retryable;
                        failures.push(AttemptFailure {
                            index,
                            provider_id,
                            reason: FailureReason::ProviderError(err),
                        });
                        if !retryable {
                            for (index, rest) in remaining.by_ref() {
                                failures.push(AttemptFailure {
                                    index,
                                    provider_id: rest.provider_id,
                                    reason: FailureReason::Skipped,
                                });
                            }
                        }
                    }
                    AttemptOutcome::TimedOut => {
                        warn!(provider_id = %provider_id, attempt = index, "Fallback attempt timed out");
                        failures.push(AttemptFailure {
                            index,
                            provider_id,
                            reason: timed_out(timeout),
                        });
                    }
                }
            }
            None
        };

        let outcome = match deadline {
            Some(limit) => match tokio::time::timeout(limit, run).await {
                Ok(outcome) => outcome,
                Err(_) => {
                    // Attempts are recorded in order, so everything past the
                    // last record was in flight or never started.
                    let recorded = failures.len();
                    for (index, provider_id) in provider_ids.into_iter().enumerate().skip(recorded)
                    {
                        failures.push(AttemptFailure {
                            index,
                            provider_id,
                            reason: FailureReason::Aborted,
                        });
                    }
                    warn!(deadline_ms = millis(limit), "Fallback plan deadline exceeded");
                    return Err(FallbackError::DeadlineExceeded {
                        deadline: limit,
                        failures,
                    });
                }
            },
            None => run.await,
        };

        match outcome {
            Some((index, provider_id, value)) => {
                info!(provider_id = %provider_id, attempt = index, strategy = "sequential", "Fallback attempt succeeded");
                Ok(FallbackSuccess {
                    provider_id,
                    index,
                    value,
                    failures,
                })
            }
            None => {
                warn!(attempts = failures.len(), "All fallback attempts failed");
                Err(FallbackError::AllAttemptsFailed { failures })
            }
        }
    }

    async fn run_parallel<P, T, F, Fut>(
        &self,
        attempts: Vec<AttemptRequest<P>>,
        timeout: Duration,
        deadline: Option<Duration>,
        executor: Arc<F>,
    ) -> Result<FallbackSuccess<T>, FallbackError>
    where
        P: Send + 'static,
        T: Send + 'static,
        F: Fn(ProviderRef, P) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ProviderResult<T>> + Send + 'static,
    {
        let mut pending: BTreeMap<usize, String> = BTreeMap::new();
        let mut failures: Vec<AttemptFailure> = Vec::with_capacity(attempts.len());
        let mut tasks = JoinSet::new();

        for (index, AttemptRequest { provider_id, payload }) in attempts.into_iter().enumerate() {
            pending.insert(index, provider_id.clone());
            let registry = self.registry.clone();
            let executor = executor.clone();
            tasks.spawn(async move {
                let outcome = run_attempt(registry, provider_id, payload, timeout, executor).await;
                (index, outcome)
            });
        }

        let race = async {
            while let Some(joined) = tasks.join_next().await {
                let (index, outcome) = match joined {
                    Ok(result) => result,
                    Err(err) => {
                        error!(error = %err, "Fallback attempt task failed");
                        continue;
                    }
                };
                let Some(provider_id) = pending.remove(&index) else {
                    continue;
                };
                match outcome {
                    AttemptOutcome::Success(value) => return Some((index, provider_id, value)),
                    AttemptOutcome::Failure(err) => {
                        warn!(provider_id = %provider_id, attempt = index, error = %err, "Fallback attempt failed");
                        failures.push(AttemptFailure {
                            index,
                            provider_id,
                            reason: FailureReason::ProviderError(err),
                        });
                    }
                    AttemptOutcome::TimedOut => {
                        warn!(provider_id = %provider_id, attempt = index, "Fallback attempt timed out");
                        failures.push(AttemptFailure {
                            index,
                            provider_id,
                            reason: timed_out(timeout),
                        });
                    }
                }
            }
            None
        };

        let outcome = match deadline {
            Some(limit) => tokio::time::timeout(limit, race).await.map_err(|_| limit),
            None => Ok(race.await),
        };

        // Every other attempt is cancelled and joined before a result is returned.
        tasks.abort_all();
        while tasks.join_next().await.is_some() {}

        match outcome {
            Ok(Some((index, provider_id, value))) => {
                info!(provider_id = %provider_id, attempt = index, strategy = "parallel", "Fallback attempt succeeded");
                failures.sort_by_key(|f| f.index);
                Ok(FallbackSuccess {
                    provider_id,
                    index,
                    value,
                    failures,
                })
            }
            Ok(None) => {
                for (index, provider_id) in pending {
                    failures.push(AttemptFailure {
                        index,
                        provider_id,
                        reason: FailureReason::ProviderError(
                            crate::core::provider::ProviderError::unknown(
                                "attempt task terminated unexpectedly",
                            ),
                        ),
                    });
                }
                failures.sort_by_key(|f| f.index);
                warn!(attempts = failures.len(), "All fallback attempts failed");
                Err(FallbackError::AllAttemptsFailed { failures })
            }
            Err(limit) => {
                for (index, provider_id) in pending {
                    failures.push(AttemptFailure {
                        index,
                        provider_id,
                        reason: FailureReason::Aborted,
                    });
                }
                failures.sort_by_key(|f| f.index);
                warn!(deadline_ms = millis(limit), "Fallback plan deadline exceeded");
                Err(FallbackError::DeadlineExceeded {
                    deadline: limit,
                    failures,
                })
            }
        }
    }
}

/// Whole milliseconds, saturating at `u64::MAX`.
fn millis(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}

fn timed_out(timeout: Duration) -> FailureReason {
    FailureReason::TimedOut {
        after_ms: millis(timeout),
    }
}

/// Resolve the provider and run one attempt under the per-attempt timeout.
async fn run_attempt<P, T, F, Fut>(
    registry: Arc<ProviderRegistry>,
    provider_id: String,
    payload: P,
    timeout: Duration,
    executor: Arc<F>,
) -> AttemptOutcome<T>
where
    F: Fn(ProviderRef, P) -> Fut,
    Fut: Future<Output = ProviderResult<T>>,
{
    let attempt = async {
        let provider = registry.resolve(&provider_id).await?;
        executor(provider, payload).await
    };
    match tokio::time::timeout(timeout, attempt).await {
        Ok(Ok(value)) => AttemptOutcome::Success(value),
        Ok(Err(err)) => AttemptOutcome::Failure(err),
        Err(_) => AttemptOutcome::TimedOut,
    }
}
