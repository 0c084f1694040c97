//! `JobExecutor`: bounded-concurrency runner for async pipeline operations,
//! with retry, timeout, and cooperative cancellation.
//!
//! A single semaphore permit is held for the lifetime of a job's execution
//! (including its retry back-off), not just its in-flight attempt, so
//! `max_concurrent_jobs` bounds total active jobs the way the dispatcher
//! expects.

use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;
use std::time::Duration;

use cps_capabilities::{CancelToken, ProgressCallback};
use cps_domain::error::{Error, Result};
use cps_domain::retry::RetryPolicy;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;

use crate::runtime::cancel::CancelMap;

#[derive(Debug)]
pub enum ExecutionOutcome<T> {
    Completed(T),
    Failed(Error),
    Cancelled,
    TimedOut,
}

impl<T> ExecutionOutcome<T> {
    pub fn is_terminal_failure(&self) -> bool {
        matches!(self, ExecutionOutcome::Failed(_) | ExecutionOutcome::TimedOut)
    }
}

/// A type-erased attempt operation, boxed so a batch can mix jobs whose
/// pipelines are built from different closures.
pub type BoxedOperation<T> =
    Box<dyn Fn(ProgressCallback, CancelToken) -> BoxFuture<T> + Send + Sync>;
pub type BoxFuture<T> = Pin<Box<dyn Future<Output = Result<T>> + Send>>;

pub struct BatchItem<T> {
    pub job_id: String,
    pub policy: RetryPolicy,
    pub progress: ProgressCallback,
    pub operation: BoxedOperation<T>,
}

pub struct JobExecutor {
    semaphore: Arc<Semaphore>,
    cancels: Arc<CancelMap>,
}

impl JobExecutor {
    pub fn new(max_concurrent_jobs: usize, cancels: Arc<CancelMap>) -> Self {
        Self {
            semaphore: Arc::new(Semaphore::new(max_concurrent_jobs.max(1))),
            cancels,
        }
    }

    pub fn cancel(&self, job_id: &str) -> bool {
        self.cancels.cancel(job_id)
    }

    /// Run `operation` to completion, retrying per `policy` on transient
    /// failures and timeouts. `progress` receives clamped, monotonic updates
    /// for the current attempt only — it resets at the start of each retry.
    pub async fn execute<F, Fut, T>(
        &self,
        job_id: &str,
        policy: &RetryPolicy,
        progress: ProgressCallback,
        operation: F,
    ) -> ExecutionOutcome<T>
    where
        F: Fn(ProgressCallback, CancelToken) -> Fut,
        Fut: Future<Output = Result<T>> + Send,
    {
        let cancel = self.cancels.register(job_id);
        let outcome = self.run(&cancel, policy, progress, operation).await;
        self.cancels.remove(job_id);
        outcome
    }

    async fn run<F, Fut, T>(
        &self,
        cancel: &CancelToken,
        policy: &RetryPolicy,
        progress: ProgressCallback,
        operation: F,
    ) -> ExecutionOutcome<T>
    where
        F: Fn(ProgressCallback, CancelToken) -> Fut,
        Fut: Future<Output = Result<T>> + Send,
    {
        let _permit = match self.semaphore.acquire().await {
            Ok(permit) => permit,
            Err(_) => return ExecutionOutcome::Failed(Error::Internal("executor is shutting down".into())),
        };

        let mut attempt_count: u32 = 0;
        loop {
            if cancel.is_cancelled() {
                return ExecutionOutcome::Cancelled;
            }

            let last_progress = Arc::new(AtomicU8::new(0));
            let wrapped = monotonic_progress(progress.clone(), last_progress);
            let fut = operation(wrapped, cancel.clone());

            let (err, timed_out) = match policy.timeout_secs {
                Some(secs) => match tokio::time::timeout(Duration::from_secs(secs), fut).await {
                    Ok(Ok(value)) => return ExecutionOutcome::Completed(value),
                    Ok(Err(e)) => (e, false),
                    Err(_) => (Error::Transient("attempt timed out".into()), true),
                },
                None => match fut.await {
                    Ok(value) => return ExecutionOutcome::Completed(value),
                    Err(e) => (e, false),
                },
            };

            attempt_count += 1;

            if cancel.is_cancelled() {
                return ExecutionOutcome::Cancelled;
            }

            let retryable = timed_out || err.is_retryable();
            if !retryable || !policy.allows_retry(attempt_count) {
                return if timed_out {
                    ExecutionOutcome::TimedOut
                } else {
                    ExecutionOutcome::Failed(err)
                };
            }

            sleep_cancellable(policy.delay_for_attempt(attempt_count), cancel).await;
        }
    }

    /// Run a batch of operations concurrently (bounded by the same semaphore
    /// as `execute`). With `fail_fast`, the first terminal failure cancels
    /// every other job still registered under `group_id`.
    pub async fn execute_batch<T>(
        self: Arc<Self>,
        group_id: &str,
        items: Vec<BatchItem<T>>,
        fail_fast: bool,
    ) -> Vec<(String, ExecutionOutcome<T>)>
    where
        T: Send + 'static,
    {
        let mut set: JoinSet<(String, ExecutionOutcome<T>)> = JoinSet::new();
        for item in items {
            self.cancels.add_to_group(group_id, &item.job_id);
            let executor = Arc::clone(&self);
            set.spawn(async move {
                let operation = item.operation;
                let outcome = executor
                    .execute(&item.job_id, &item.policy, item.progress, move |p, c| operation(p, c))
                    .await;
                (item.job_id, outcome)
            });
        }

        let mut results = Vec::new();
        while let Some(joined) = set.join_next().await {
            match joined {
                Ok((job_id, outcome)) => {
                    let failed = outcome.is_terminal_failure();
                    results.push((job_id, outcome));
                    if fail_fast && failed {
                        self.cancels.cancel_group(group_id);
                    }
                }
                Err(join_err) => {
                    tracing::error!(error = %join_err, "batch execution task panicked");
                }
            }
        }
        results
    }
}

fn monotonic_progress(inner: ProgressCallback, last: Arc<AtomicU8>) -> ProgressCallback {
    Arc::new(move |pct: u8| {
        let clamped = pct.min(100);
        let prev = last.load(Ordering::SeqCst);
        if clamped >= prev {
            last.store(clamped, Ordering::SeqCst);
            inner(clamped);
        }
    })
}

/// Sleep for `duration`, waking early (within ~100ms) if `cancel` fires.
async fn sleep_cancellable(duration: Duration, cancel: &CancelToken) {
    let deadline = tokio::time::Instant::now() + duration;
    loop {
        if cancel.is_cancelled() {
            return;
        }
        let now = tokio::time::Instant::now();
        if now >= deadline {
            return;
        }
        let step = (deadline - now).min(Duration::from_millis(100));
        tokio::time::sleep(step).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cps_capabilities::no_progress;
    use std::sync::atomic::AtomicU32;

    fn executor() -> JobExecutor {
        JobExecutor::new(4, Arc::new(CancelMap::new()))
    }

    #[tokio::test]
    async fn succeeds_on_first_attempt() {
        let exec = executor();
        let policy = RetryPolicy::default();
        let outcome = exec
            .execute("j1", &policy, no_progress(), |_progress, _cancel| async move { Ok::<_, Error>(42) })
            .await;
        assert!(matches!(outcome, ExecutionOutcome::Completed(42)));
    }

    #[tokio::test]
    async fn retries_transient_failure_then_succeeds() {
        let exec = executor();
        let policy = RetryPolicy {
            max_retries: 3,
            base_delay_secs: 0,
            ..RetryPolicy::default()
        };
        let attempts = Arc::new(AtomicU32::new(0));
        let attempts_clone = Arc::clone(&attempts);
        let outcome = exec
            .execute("j2", &policy, no_progress(), move |_progress, _cancel| {
                let attempts = Arc::clone(&attempts_clone);
                async move {
                    let n = attempts.fetch_add(1, Ordering::SeqCst);
                    if n == 0 {
                        Err(Error::Transient("network blip".into()))
                    } else {
                        Ok(99)
                    }
                }
            })
            .await;
        assert!(matches!(outcome, ExecutionOutcome::Completed(99)));
        assert_eq!(attempts.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn terminal_error_is_not_retried() {
        let exec = executor();
        let policy = RetryPolicy::default();
        let attempts = Arc::new(AtomicU32::new(0));
        let attempts_clone = Arc::clone(&attempts);
        let outcome = exec
            .execute::<_, _, ()>("j3", &policy, no_progress(), move |_progress, _cancel| {
                let attempts = Arc::clone(&attempts_clone);
                async move {
                    attempts.fetch_add(1, Ordering::SeqCst);
                    Err(Error::Terminal("bad credentials".into()))
                }
            })
            .await;
        assert!(matches!(outcome, ExecutionOutcome::Failed(Error::Terminal(_))));
        assert_eq!(attempts.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn max_retries_zero_means_first_failure_is_terminal() {
        let exec = executor();
        let policy = RetryPolicy {
            max_retries: 0,
            base_delay_secs: 0,
            ..RetryPolicy::default()
        };
        let outcome = exec
            .execute::<_, _, ()>("j4", &policy, no_progress(), |_progress, _cancel| async move {
                Err(Error::Transient("down".into()))
            })
            .await;
        assert!(matches!(outcome, ExecutionOutcome::Failed(_)));
    }

    #[tokio::test]
    async fn cancel_before_start_yields_cancelled() {
        let cancels = Arc::new(CancelMap::new());
        let exec = JobExecutor::new(1, Arc::clone(&cancels));
        let token = cancels.register("j5");
        token.cancel();
        let policy = RetryPolicy::default();
        let outcome = exec
            .execute::<_, _, ()>("j5", &policy, no_progress(), |_progress, _cancel| async move { Ok(()) })
            .await;
        assert!(matches!(outcome, ExecutionOutcome::Cancelled));
    }

    #[tokio::test]
    async fn timeout_exhausts_retries_and_reports_timed_out() {
        let exec = executor();
        let policy = RetryPolicy {
            max_retries: 1,
            base_delay_secs: 0,
            timeout_secs: Some(0),
            ..RetryPolicy::default()
        };
        let outcome = exec
            .execute::<_, _, ()>("j6", &policy, no_progress(), |_progress, _cancel| async move {
                tokio::time::sleep(Duration::from_millis(50)).await;
                Ok(())
            })
            .await;
        assert!(matches!(outcome, ExecutionOutcome::TimedOut));
    }

    #[tokio::test]
    async fn execute_batch_fail_fast_cancels_remaining() {
        let cancels = Arc::new(CancelMap::new());
        let exec = Arc::new(JobExecutor::new(4, Arc::clone(&cancels)));
        let policy = RetryPolicy {
            base_delay_secs: 0,
            ..RetryPolicy::default()
        };

        let items = vec![
            BatchItem {
                job_id: "a".into(),
                policy: policy.clone(),
                progress: no_progress(),
                operation: Box::new(|_p: ProgressCallback, _c: CancelToken| {
                    Box::pin(async move { Err::<(), Error>(Error::Terminal("boom".into())) }) as BoxFuture<()>
                }),
            },
            BatchItem {
                job_id: "b".into(),
                policy: policy.clone(),
                progress: no_progress(),
                operation: Box::new(|_p: ProgressCallback, cancel: CancelToken| {
                    Box::pin(async move {
                        for _ in 0..50 {
                            if cancel.is_cancelled() {
                                return Err(Error::Terminal("cancelled".into()));
                            }
                            tokio::time::sleep(Duration::from_millis(10)).await;
                        }
                        Ok(())
                    }) as BoxFuture<()>
                }),
            },
        ];

        let results = exec.execute_batch("batch_1", items, true).await;
        assert_eq!(results.len(), 2);
        let b_outcome = &results.iter().find(|(id, _)| id == "b").unwrap().1;
        assert!(matches!(b_outcome, ExecutionOutcome::Failed(_) | ExecutionOutcome::Cancelled));
    }
}
