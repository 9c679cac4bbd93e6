//! Streaming fallback with a commit point.
//!
//! An attempt succeeds once its stream yields the first real event. Until
//! then a failure, an empty stream or a missed per-attempt timeout moves on
//! to the next attempt. After commit, the winning stream is handed to a
//! [`StreamMultiplexer`] and errors surface as a terminal failure chunk; no
//! other provider is tried.

use std::future::Future;
use std::sync::Arc;

use futures::StreamExt;
use tokio::time::Instant;
use tracing::info;

use super::orchestrator::FallbackOrchestrator;
use super::plan::{AttemptFailure, FallbackError, FallbackPlan, FallbackSuccess};
use crate::core::provider::{ProviderError, ProviderResult, ProviderStream};
use crate::core::registry::ProviderRef;
use crate::core::stream::{ChunkStream, StreamMultiplexer};

/// A committed stream and how it was obtained.
pub struct StreamingSuccess {
    pub provider_id: String,
    pub index: usize,
    /// Attempts that failed before commit, in plan order.
    pub failures: Vec<AttemptFailure>,
    pub stream: ChunkStream,
}

impl std::fmt::Debug for StreamingSuccess {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StreamingSuccess")
            .field("provider_id", &self.provider_id)
            .field("index", &self.index)
            .field("failures", &self.failures)
            .finish()
    }
}

impl FallbackOrchestrator {
    /// Run `plan`, committing to the first attempt whose stream produces output.
    ///
    /// The per-attempt timeout bounds the time to the first event and, once
    /// committed, the gap between consecutive events. The plan deadline, when
    /// set, applies across both phases.
    pub async fn execute_streaming<P, F, Fut>(
        &self,
        plan: FallbackPlan<P>,
        open: F,
    ) -> Result<StreamingSuccess, FallbackError>
    where
        P: Send + 'static,
        F: Fn(ProviderRef, P) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ProviderResult<ProviderStream>> + Send + 'static,
    {
        let started = Instant::now();
        let stall_timeout = plan.timeout_per_attempt();
        let deadline = plan.deadline().and_then(|d| started.checked_add(d));

        let open = Arc::new(open);
        let success = self
            .execute(plan, move |provider, payload| {
                let open = open.clone();
                async move {
                    let mut stream = open(provider, payload).await?;
                    match stream.next().await {
                        Some(Ok(first)) => Ok((first, stream)),
                        Some(Err(err)) => Err(err),
                        None => Err(ProviderError::unknown(
                            "stream ended before producing any output",
                        )),
                    }
                }
            })
            .await?;

        let FallbackSuccess {
            provider_id,
            index,
            value: (first, stream),
            failures,
        } = success;
        info!(provider_id = %provider_id, attempt = index, "Committed to provider stream");

        // The first event was consumed to commit; put it back in front.
        let stream: ProviderStream =
            Box::pin(futures::stream::once(async move { Ok(first) }).chain(stream));
        let stream = StreamMultiplexer::new(self.stream_buffer())
            .with_stall_timeout(stall_timeout)
            .with_deadline(deadline)
            .wrap(&provider_id, stream);

        Ok(StreamingSuccess {
            provider_id,
            index,
            failures,
            stream,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::fallback::orchestrator::tests::{CancelWatch, registry_with};
    use crate::core::fallback::{AttemptRequest, FailureReason, MAX_PLAN_DURATION, Strategy};
    use crate::core::provider::{ErrorClass, ProviderEvent};
    use crate::core::stream::{CommitFailureKind, StreamChunk};
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::time::Duration;

    fn text(s: &str) -> ProviderResult<ProviderEvent> {
        Ok(ProviderEvent::TextDelta(s.to_string()))
    }

    /// A stream that sleeps `delay_ms` before each item.
    fn paced(items: Vec<ProviderResult<ProviderEvent>>, delay_ms: u64) -> ProviderStream {
        Box::pin(async_stream::stream! {
            for item in items {
                tokio::time::sleep(Duration::from_millis(delay_ms)).await;
                yield item;
            }
        })
    }

    fn plan(ids: &[&str], strategy: Strategy, timeout_ms: u64) -> FallbackPlan<()> {
        FallbackPlan::new(
            ids.iter().map(|id| AttemptRequest::new(*id, ())).collect(),
            strategy,
            Duration::from_millis(timeout_ms),
        )
        .unwrap()
    }

    async fn collect(stream: ChunkStream) -> Vec<StreamChunk> {
        stream.collect().await
    }

    #[tokio::test]
    async fn test_sequential_commits_on_first_chunk() {
        let orchestrator = FallbackOrchestrator::new(registry_with(&["p1", "p2"]));
        let success = orchestrator
            .execute_streaming(plan(&["p1", "p2"], Strategy::Sequential, 500), |provider, _| async move {
                match provider.id() {
                    "p1" => Err(ProviderError::unavailable("connect refused")),
                    _ => Ok(paced(vec![text("A"), text("B"), text("C")], 5)),
                }
            })
            .await
            .unwrap();

        assert_eq!(success.provider_id, "p2");
        assert_eq!(success.failures.len(), 1);
        let chunks = collect(success.stream).await;
        assert_eq!(
            chunks,
            vec![
                StreamChunk::TextDelta { text: "A".into() },
                StreamChunk::TextDelta { text: "B".into() },
                StreamChunk::TextDelta { text: "C".into() },
                StreamChunk::End,
            ]
        );
    }

    #[tokio::test]
    async fn test_error_before_first_chunk_falls_back() {
        let orchestrator = FallbackOrchestrator::new(registry_with(&["p1", "p2"]));
        let success = orchestrator
            .execute_streaming(plan(&["p1", "p2"], Strategy::Sequential, 500), |provider, _| async move {
                match provider.id() {
                    "p1" => Ok(paced(vec![Err(ProviderError::rate_limited("429"))], 1)),
                    _ => Ok(paced(vec![text("ok")], 1)),
                }
            })
            .await
            .unwrap();

        assert_eq!(success.provider_id, "p2");
        assert_eq!(success.failures[0].class(), Some(ErrorClass::RateLimited));
    }

    #[tokio::test]
    async fn test_mid_stream_failure_is_not_retried() {
        let orchestrator = FallbackOrchestrator::new(registry_with(&["p1", "p2"]));
        let p2_opened = Arc::new(AtomicBool::new(false));
        let flag = p2_opened.clone();
        let success = orchestrator
            .execute_streaming(plan(&["p1", "p2"], Strategy::Sequential, 500), move |provider, _| {
                let flag = flag.clone();
                async move {
                    if provider.id() == "p2" {
                        flag.store(true, Ordering::SeqCst);
                    }
                    Ok(paced(
                        vec![text("X"), Err(ProviderError::unavailable("reset"))],
                        5,
                    ))
                }
            })
            .await
            .unwrap();

        let chunks = collect(success.stream).await;
        assert_eq!(chunks.len(), 2);
        assert_eq!(chunks[0], StreamChunk::TextDelta { text: "X".into() });
        match &chunks[1] {
            StreamChunk::Failure(err) => {
                assert_eq!(err.provider_id, "p1");
                assert_eq!(err.kind, CommitFailureKind::Provider);
            }
            other => panic!("unexpected chunk: {other:?}"),
        }
        assert!(!p2_opened.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn test_empty_stream_counts_as_failure() {
        let orchestrator = FallbackOrchestrator::new(registry_with(&["p1", "p2"]));
        let success = orchestrator
            .execute_streaming(plan(&["p1", "p2"], Strategy::Sequential, 500), |provider, _| async move {
                match provider.id() {
                    "p1" => Ok(paced(vec![], 1)),
                    _ => Ok(paced(vec![text("late")], 1)),
                }
            })
            .await
            .unwrap();

        assert_eq!(success.provider_id, "p2");
        assert_eq!(success.failures[0].class(), Some(ErrorClass::Unknown));
    }

    #[tokio::test]
    async fn test_first_chunk_timeout_falls_back() {
        let orchestrator = FallbackOrchestrator::new(registry_with(&["p1", "p2"]));
        let success = orchestrator
            .execute_streaming(plan(&["p1", "p2"], Strategy::Sequential, 40), |provider, _| async move {
                match provider.id() {
                    "p1" => Ok(paced(vec![text("too late")], 200)),
                    _ => Ok(paced(vec![text("on time")], 5)),
                }
            })
            .await
            .unwrap();

        assert_eq!(success.provider_id, "p2");
        assert_eq!(
            success.failures[0].reason,
            FailureReason::TimedOut { after_ms: 40 }
        );
    }

    #[tokio::test]
    async fn test_parallel_first_chunk_wins_and_losers_are_dropped() {
        let orchestrator = FallbackOrchestrator::new(registry_with(&["p1", "p2"]));
        let slow_cancelled = Arc::new(AtomicBool::new(false));
        let flag = slow_cancelled.clone();

        let success = orchestrator
            .execute_streaming(plan(&["p1", "p2"], Strategy::Parallel, 2000), move |provider, _| {
                let flag = flag.clone();
                async move {
                    if provider.id() == "p1" {
                        let watch = CancelWatch::new(flag);
                        let stream: ProviderStream = Box::pin(async_stream::stream! {
                            tokio::time::sleep(Duration::from_millis(500)).await;
                            yield text("slow");
                            watch.disarm();
                        });
                        Ok(stream)
                    } else {
                        Ok(paced(vec![text("fast"), text("done")], 10))
                    }
                }
            })
            .await
            .unwrap();

        assert_eq!(success.provider_id, "p2");
        assert!(slow_cancelled.load(Ordering::SeqCst));
        let chunks = collect(success.stream).await;
        assert_eq!(chunks.last(), Some(&StreamChunk::End));
        assert_eq!(chunks.len(), 3);
    }

    #[tokio::test]
    async fn test_all_streams_fail_before_commit() {
        let orchestrator = FallbackOrchestrator::new(registry_with(&["p1", "p2"]));
        let err = orchestrator
            .execute_streaming(plan(&["p1", "p2"], Strategy::Parallel, 500), |_provider, _| async move {
                Err::<ProviderStream, _>(ProviderError::unavailable("down"))
            })
            .await
            .unwrap_err();

        assert!(matches!(err, FallbackError::AllAttemptsFailed { .. }));
        assert_eq!(err.failures().len(), 2);
    }

    #[tokio::test]
    async fn test_longest_allowed_timeout_and_deadline() {
        let orchestrator = FallbackOrchestrator::new(registry_with(&["p1"]));
        let plan = FallbackPlan::new(
            vec![AttemptRequest::new("p1", ())],
            Strategy::Sequential,
            MAX_PLAN_DURATION,
        )
        .unwrap()
        .with_deadline(MAX_PLAN_DURATION)
        .unwrap();
        let success = orchestrator
            .execute_streaming(plan, |_provider, _| async move {
                Ok(paced(vec![text("a"), text("b")], 1))
            })
            .await
            .unwrap();

        let chunks = collect(success.stream).await;
        assert_eq!(
            chunks,
            vec![
                StreamChunk::TextDelta { text: "a".into() },
                StreamChunk::TextDelta { text: "b".into() },
                StreamChunk::End,
            ]
        );
    }

    #[tokio::test]
    async fn test_stall_after_commit_yields_timeout_failure() {
        let orchestrator = FallbackOrchestrator::new(registry_with(&["p1"]));
        let success = orchestrator
            .execute_streaming(plan(&["p1"], Strategy::Sequential, 50), |_provider, _| async move {
                let stream: ProviderStream = Box::pin(async_stream::stream! {
                    yield text("first");
                    futures::future::pending::<()>().await;
                });
                Ok(stream)
            })
            .await
            .unwrap();

        let chunks = collect(success.stream).await;
        assert_eq!(chunks.len(), 2);
        assert!(matches!(
            &chunks[1],
            StreamChunk::Failure(err) if err.kind == CommitFailureKind::TimedOut
        ));
    }
}
