//! Write path: runs mutations with exponential backoff on transient failures.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use graphrelay_common::config::MutationConfig;
use tokio::time::Instant;

use crate::backend::{GraphBackend, PutRequest};
use crate::cancel::CancellationToken;
use crate::diagnostics::{DiagnosticEvent, EventSink, TracingEventSink};
use crate::error::{GraphError, Result};

/// Backoff schedule for transient mutation failures.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RetryPolicy {
    pub initial_delay: Duration,
    pub multiplier: f64,
    pub max_delay: Duration,
    /// No retry is scheduled past this much time since the first attempt.
    pub deadline: Duration,
}

impl RetryPolicy {
    /// Delay before retry number `attempt` (1-based).
    pub fn delay(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(i32::MAX as u32) as i32;
        let scaled = self.initial_delay.as_secs_f64() * self.multiplier.max(1.0).powi(exponent);
        if !scaled.is_finite() || scaled >= self.max_delay.as_secs_f64() {
            self.max_delay
        } else {
            Duration::from_secs_f64(scaled)
        }
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from(&MutationConfig::default())
    }
}

impl From<&MutationConfig> for RetryPolicy {
    fn from(config: &MutationConfig) -> Self {
        Self {
            initial_delay: Duration::from_millis(config.initial_delay_ms),
            multiplier: config.multiplier,
            max_delay: Duration::from_millis(config.max_delay_ms),
            deadline: Duration::from_millis(config.deadline_ms),
        }
    }
}

pub struct MutationOrchestrator {
    policy: RetryPolicy,
    sink: Arc<dyn EventSink>,
}

impl MutationOrchestrator {
    pub fn new(policy: RetryPolicy) -> Self {
        Self {
            policy,
            sink: Arc::new(TracingEventSink),
        }
    }

    pub fn with_sink(mut self, sink: Arc<dyn EventSink>) -> Self {
        self.sink = sink;
        self
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    /// Runs `operation` until it succeeds, fails permanently, or the deadline passes.
    ///
    /// Transient backend errors are retried after the policy delay; any other
    /// error is returned as is. Cancellation during a delay returns the last
    /// error. A token cancelled up front fails without invoking `operation`.
    pub async fn mutate<T, F, Fut>(&self, cancel: &CancellationToken, mut operation: F) -> Result<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        if cancel.is_cancelled() {
            return Err(GraphError::operation("mutation cancelled before it started"));
        }

        let started = Instant::now();
        let mut attempt: u32 = 0;
        loop {
            attempt += 1;
            let err = match operation().await {
                Ok(value) => {
                    if attempt > 1 {
                        tracing::info!("Mutation succeeded after {} attempts", attempt);
                    }
                    return Ok(value);
                }
                Err(err) if err.is_transient() => err,
                Err(err) => return Err(err),
            };

            let delay = self.policy.delay(attempt);
            if started.elapsed() + delay > self.policy.deadline {
                tracing::warn!(
                    "Mutation giving up after {} attempts ({:?} elapsed): {}",
                    attempt,
                    started.elapsed(),
                    err
                );
                return Err(err);
            }
            if cancel.is_cancelled() {
                return Err(err);
            }

            self.sink.emit(DiagnosticEvent::MutationRetry {
                attempt,
                delay,
                error: err.to_string(),
            });
            tokio::select! {
                _ = tokio::time::sleep(delay) => {}
                _ = cancel.cancelled() => {
                    tracing::debug!("Mutation retry cancelled after {} attempts", attempt);
                    return Err(err);
                }
            }
        }
    }

    /// Writes `request` through [`GraphBackend::put`] with retries.
    pub async fn put(&self, backend: &dyn GraphBackend, request: PutRequest, cancel: &CancellationToken) -> Result<()> {
        if request.is_empty() {
            return Ok(());
        }
        self.mutate(cancel, move || backend.put(request.clone())).await
    }
}

impl Default for MutationOrchestrator {
    fn default() -> Self {
        Self::new(RetryPolicy::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::MemoryBackend;
    use crate::diagnostics::RecordingEventSink;
    use crate::error::BackendErrorKind;
    use graphrelay_common::Node;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn policy() -> RetryPolicy {
        RetryPolicy {
            initial_delay: Duration::from_millis(100),
            multiplier: 2.0,
            max_delay: Duration::from_millis(300),
            deadline: Duration::from_secs(5),
        }
    }

    fn throttled() -> GraphError {
        GraphError::backend(BackendErrorKind::ThroughputExceeded, "slow down")
    }

    #[test]
    fn test_delay_grows_and_caps() {
        let policy = policy();
        assert_eq!(policy.delay(1), Duration::from_millis(100));
        assert_eq!(policy.delay(2), Duration::from_millis(200));
        assert_eq!(policy.delay(3), Duration::from_millis(300));
        assert_eq!(policy.delay(40), Duration::from_millis(300));
    }

    #[tokio::test(start_paused = true)]
    async fn test_retries_transient_errors_until_success() {
        let sink = Arc::new(RecordingEventSink::new());
        let orchestrator = MutationOrchestrator::new(policy()).with_sink(sink.clone());
        let attempts = AtomicUsize::new(0);
        let counter = &attempts;

        let value = orchestrator
            .mutate(&CancellationToken::new(), move || async move {
                if counter.fetch_add(1, Ordering::SeqCst) < 2 {
                    Err(throttled())
                } else {
                    Ok(7)
                }
            })
            .await
            .unwrap();

        assert_eq!(value, 7);
        assert_eq!(attempts.load(Ordering::SeqCst), 3);
        let delays: Vec<_> = sink
            .events()
            .into_iter()
            .filter_map(|e| match e {
                DiagnosticEvent::MutationRetry { delay, .. } => Some(delay),
                _ => None,
            })
            .collect();
        assert_eq!(delays, vec![Duration::from_millis(100), Duration::from_millis(200)]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_permanent_error_is_not_retried() {
        let orchestrator = MutationOrchestrator::new(policy());
        let attempts = AtomicUsize::new(0);
        let counter = &attempts;
        let result: Result<()> = orchestrator
            .mutate(&CancellationToken::new(), move || async move {
                counter.fetch_add(1, Ordering::SeqCst);
                Err(GraphError::backend(BackendErrorKind::Validation, "bad item"))
            })
            .await;

        assert!(matches!(
            result,
            Err(GraphError::Backend {
                kind: BackendErrorKind::Validation,
                ..
            })
        ));
        assert_eq!(attempts.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_deadline_stops_retries() {
        let orchestrator = MutationOrchestrator::new(RetryPolicy {
            deadline: Duration::from_millis(250),
            ..policy()
        });
        let attempts = AtomicUsize::new(0);
        let counter = &attempts;
        let result: Result<()> = orchestrator
            .mutate(&CancellationToken::new(), move || async move {
                counter.fetch_add(1, Ordering::SeqCst);
                Err(throttled())
            })
            .await;

        assert!(result.unwrap_err().is_transient());
        // 100ms then 200ms would end past 250ms
        assert_eq!(attempts.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancelled_token_skips_operation() {
        let orchestrator = MutationOrchestrator::new(policy());
        let cancel = CancellationToken::new();
        cancel.cancel();
        let attempts = AtomicUsize::new(0);
        let counter = &attempts;
        let result: Result<()> = orchestrator
            .mutate(&cancel, move || async move {
                counter.fetch_add(1, Ordering::SeqCst);
                Ok(())
            })
            .await;

        assert!(matches!(result, Err(GraphError::Operation(_))));
        assert_eq!(attempts.load(Ordering::SeqCst), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_during_delay_returns_last_error() {
        let orchestrator = MutationOrchestrator::new(policy());
        let cancel = CancellationToken::new();
        let attempts = AtomicUsize::new(0);
        let counter = &attempts;

        let canceller = {
            let cancel = cancel.clone();
            tokio::spawn(async move {
                tokio::time::sleep(Duration::from_millis(50)).await;
                cancel.cancel();
            })
        };
        let result: Result<()> = orchestrator
            .mutate(&cancel, move || async move {
                counter.fetch_add(1, Ordering::SeqCst);
                Err(throttled())
            })
            .await;
        canceller.await.unwrap();

        assert!(result.unwrap_err().is_transient());
        assert_eq!(attempts.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_put_retries_against_backend() {
        let backend = MemoryBackend::default();
        backend
            .fail_next_puts([BackendErrorKind::ConcurrencyConflict, BackendErrorKind::Transport])
            .await;
        let orchestrator = MutationOrchestrator::new(policy());
        let request = PutRequest {
            nodes: vec![Node::new("p1", "Person")],
            edges: Vec::new(),
        };

        orchestrator
            .put(&backend, request, &CancellationToken::new())
            .await
            .unwrap();
        assert!(backend.node("p1").await.is_some());
    }
}
