//! Resilient invoker
//!
//! Wraps one external judgment call and hides transient rate limiting from
//! the caller. Only [`JudgmentError::RateLimited`] is retried; every other
//! failure is returned on its first occurrence.
//!
//! Retry `n` (1-based) waits `min(max_delay, base_delay * 2^(n-1))`, so the
//! default policy sleeps 2s, 4s, 8s, 16s, 32s across its five retries.
//!
//! An optional overall deadline bounds the whole loop. The in-flight attempt
//! runs under the remaining budget, and a backoff sleep that would cross the
//! deadline is never started.

use sdk::errors::WorkflowError;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, warn};

use crate::config::RetryConfig;
use crate::judge::JudgmentError;

/// Backoff parameters
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
    pub deadline: Option<Duration>,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 5,
            base_delay: Duration::from_secs(2),
            max_delay: Duration::from_secs(120),
            deadline: None,
        }
    }
}

impl From<&RetryConfig> for RetryPolicy {
    fn from(config: &RetryConfig) -> Self {
        Self {
            max_retries: config.max_retries,
            base_delay: Duration::from_millis(config.base_delay_ms),
            max_delay: Duration::from_millis(config.max_delay_ms),
            deadline: config.deadline_secs.map(Duration::from_secs),
        }
    }
}

impl RetryPolicy {
    /// Sleep before retry number `retry` (1-based)
    pub fn delay_for(&self, retry: u32) -> Duration {
        let exponent = retry.saturating_sub(1);
        2u32.checked_pow(exponent)
            .and_then(|factor| self.base_delay.checked_mul(factor))
            .map(|delay| delay.min(self.max_delay))
            .unwrap_or(self.max_delay)
    }

    /// Total attempts including the first one
    pub fn max_attempts(&self) -> u32 {
        self.max_retries.saturating_add(1)
    }
}

/// What happened on one attempt
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AttemptOutcome {
    Succeeded,
    Retrying { delay: Duration },
    Failed,
}

/// Observable record of one attempt
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AttemptEvent {
    pub attempt: u32,
    pub outcome: AttemptOutcome,
    /// `None` on success
    pub error_class: Option<&'static str>,
}

pub type AttemptObserver = Arc<dyn Fn(&AttemptEvent) + Send + Sync>;

/// Terminal invoker failures
#[derive(Debug, Clone, thiserror::Error, PartialEq)]
pub enum InvokeError {
    /// A non-retryable error on its first occurrence
    #[error(transparent)]
    Failed(JudgmentError),

    #[error("Still rate limited after {attempts} attempts: {last}")]
    RateLimitExhausted { attempts: u32, last: JudgmentError },

    #[error("Deadline exceeded after {attempts} attempt(s) in {elapsed:?}")]
    DeadlineExceeded { attempts: u32, elapsed: Duration },
}

impl From<InvokeError> for WorkflowError {
    fn from(err: InvokeError) -> Self {
        match err {
            InvokeError::Failed(inner) => inner.into(),
            InvokeError::RateLimitExhausted { attempts, last } => {
                WorkflowError::RateLimitExhausted {
                    attempts,
                    last_error: last.to_string(),
                }
            }
            InvokeError::DeadlineExceeded { attempts, elapsed } => {
                WorkflowError::DeadlineExceeded {
                    attempts,
                    elapsed_ms: elapsed.as_millis() as u64,
                }
            }
        }
    }
}

/// Retries rate-limited judgment calls with exponential backoff
#[derive(Clone, Default)]
pub struct ResilientInvoker {
    policy: RetryPolicy,
    observer: Option<AttemptObserver>,
}

impl ResilientInvoker {
    pub fn new(policy: RetryPolicy) -> Self {
        Self {
            policy,
            observer: None,
        }
    }

    /// Receive every attempt event
    pub fn with_observer(mut self, observer: AttemptObserver) -> Self {
        self.observer = Some(observer);
        self
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    /// Run `call` under the policy's deadline
    pub async fn invoke<T, F, Fut>(&self, call: F) -> Result<T, InvokeError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, JudgmentError>>,
    {
        self.invoke_with_deadline(self.policy.deadline, call).await
    }

    /// Run `call` under an explicit deadline, overriding the policy's
    pub async fn invoke_with_deadline<T, F, Fut>(
        &self,
        deadline: Option<Duration>,
        mut call: F,
    ) -> Result<T, InvokeError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, JudgmentError>>,
    {
        let started = Instant::now();
        let mut attempt: u32 = 0;

        loop {
            attempt += 1;

            let result = match deadline {
                Some(limit) => {
                    let remaining = limit.saturating_sub(started.elapsed());
                    match tokio::time::timeout(remaining, call()).await {
                        Ok(result) => result,
                        Err(_) => {
                            self.emit(attempt, AttemptOutcome::Failed, Some("deadline"));
                            warn!(attempt, "Judgment call abandoned at deadline");
                            return Err(InvokeError::DeadlineExceeded {
                                attempts: attempt,
                                elapsed: started.elapsed(),
                            });
                        }
                    }
                }
                None => call().await,
            };

            let err = match result {
                Ok(value) => {
                    self.emit(attempt, AttemptOutcome::Succeeded, None);
                    debug!(attempt, "Judgment call succeeded");
                    return Ok(value);
                }
                Err(err) => err,
            };

            if !err.is_rate_limited() {
                self.emit(attempt, AttemptOutcome::Failed, Some(err.class()));
                warn!(attempt, error_class = err.class(), "Judgment call failed: {}", err);
                return Err(InvokeError::Failed(err));
            }

            if attempt > self.policy.max_retries {
                self.emit(attempt, AttemptOutcome::Failed, Some(err.class()));
                warn!(attempt, "Judgment call still rate limited, giving up");
                return Err(InvokeError::RateLimitExhausted {
                    attempts: attempt,
                    last: err,
                });
            }

            let delay = self.policy.delay_for(attempt);

            if let Some(limit) = deadline {
                if started.elapsed() + delay >= limit {
                    self.emit(attempt, AttemptOutcome::Failed, Some("deadline"));
                    warn!(
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        "Next backoff would cross the deadline"
                    );
                    return Err(InvokeError::DeadlineExceeded {
                        attempts: attempt,
                        elapsed: started.elapsed(),
                    });
                }
            }

            self.emit(
                attempt,
                AttemptOutcome::Retrying { delay },
                Some(err.class()),
            );
            debug!(
                attempt,
                delay_ms = delay.as_millis() as u64,
                error_class = err.class(),
                "Judgment call rate limited, backing off"
            );

            tokio::time::sleep(delay).await;
        }
    }

    fn emit(&self, attempt: u32, outcome: AttemptOutcome, error_class: Option<&'static str>) {
        if let Some(observer) = &self.observer {
            observer(&AttemptEvent {
                attempt,
                outcome,
                error_class,
            });
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Mutex;

    fn recording_invoker(policy: RetryPolicy) -> (ResilientInvoker, Arc<Mutex<Vec<AttemptEvent>>>) {
        let events = Arc::new(Mutex::new(Vec::new()));
        let sink = events.clone();
        let invoker = ResilientInvoker::new(policy).with_observer(Arc::new(move |event| {
            sink.lock().unwrap().push(event.clone());
        }));
        (invoker, events)
    }

    fn rate_limited() -> JudgmentError {
        JudgmentError::RateLimited("429 Too Many Requests".to_string())
    }

    #[test]
    fn test_delay_schedule() {
        let policy = RetryPolicy::default();
        let delays: Vec<u64> = (1..=8).map(|n| policy.delay_for(n).as_secs()).collect();
        assert_eq!(delays, vec![2, 4, 8, 16, 32, 64, 120, 120]);
        assert_eq!(policy.delay_for(u32::MAX), Duration::from_secs(120));
        assert_eq!(policy.max_attempts(), 6);
    }

    #[tokio::test(start_paused = true)]
    async fn test_three_rate_limits_then_success() {
        let (invoker, events) = recording_invoker(RetryPolicy::default());
        let calls = AtomicU32::new(0);
        let started = Instant::now();

        let result = invoker
            .invoke(|| {
                let n = calls.fetch_add(1, Ordering::SeqCst);
                async move {
                    if n < 3 {
                        Err(rate_limited())
                    } else {
                        Ok("verdict")
                    }
                }
            })
            .await;

        assert_eq!(result.unwrap(), "verdict");
        assert_eq!(calls.load(Ordering::SeqCst), 4);
        assert!(started.elapsed() >= Duration::from_secs(14));

        let events = events.lock().unwrap();
        assert_eq!(events.len(), 4);
        let delays: Vec<Duration> = events
            .iter()
            .filter_map(|e| match e.outcome {
                AttemptOutcome::Retrying { delay } => Some(delay),
                _ => None,
            })
            .collect();
        assert_eq!(delays.len(), 3);
        for pair in delays.windows(2) {
            assert!(pair[0] < pair[1]);
        }
        assert!(delays.iter().all(|d| *d >= Duration::from_secs(2)));
        assert!(delays.iter().all(|d| *d <= Duration::from_secs(120)));
        assert_eq!(events[3].outcome, AttemptOutcome::Succeeded);
        assert_eq!(events[3].error_class, None);
    }

    #[tokio::test(start_paused = true)]
    async fn test_always_rate_limited_exhausts_after_six_attempts() {
        let (invoker, events) = recording_invoker(RetryPolicy::default());
        let calls = AtomicU32::new(0);

        let result: Result<(), _> = invoker
            .invoke(|| {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Err(rate_limited()) }
            })
            .await;

        match result {
            Err(InvokeError::RateLimitExhausted { attempts, last }) => {
                assert_eq!(attempts, 6);
                assert_eq!(last, rate_limited());
            }
            other => panic!("unexpected result {:?}", other),
        }
        assert_eq!(calls.load(Ordering::SeqCst), 6);

        let events = events.lock().unwrap();
        assert_eq!(events.len(), 6);
        assert_eq!(events[5].outcome, AttemptOutcome::Failed);
        assert_eq!(events[5].error_class, Some("rate_limited"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_non_rate_limit_error_is_not_retried() {
        let (invoker, events) = recording_invoker(RetryPolicy::default());
        let calls = AtomicU32::new(0);

        let result: Result<(), _> = invoker
            .invoke(|| {
                calls.fetch_add(1, Ordering::SeqCst);
                async {
                    Err(JudgmentError::Upstream {
                        status: 500,
                        message: "internal".to_string(),
                    })
                }
            })
            .await;

        assert!(matches!(
            result,
            Err(InvokeError::Failed(JudgmentError::Upstream { status: 500, .. }))
        ));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(events.lock().unwrap().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_deadline_stops_before_oversized_backoff() {
        let policy = RetryPolicy {
            deadline: Some(Duration::from_secs(5)),
            ..RetryPolicy::default()
        };
        let (invoker, _events) = recording_invoker(policy);
        let calls = AtomicU32::new(0);

        let result: Result<(), _> = invoker
            .invoke(|| {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Err(rate_limited()) }
            })
            .await;

        // 2s backoff fits, the following 4s one would end at 6s
        assert!(matches!(
            result,
            Err(InvokeError::DeadlineExceeded { attempts: 2, .. })
        ));
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_deadline_abandons_hanging_attempt() {
        let invoker = ResilientInvoker::new(RetryPolicy::default());

        let result: Result<(), _> = invoker
            .invoke_with_deadline(Some(Duration::from_secs(3)), || async {
                tokio::time::sleep(Duration::from_secs(60)).await;
                Ok(())
            })
            .await;

        match result {
            Err(InvokeError::DeadlineExceeded { attempts, elapsed }) => {
                assert_eq!(attempts, 1);
                assert!(elapsed >= Duration::from_secs(3));
                assert!(elapsed < Duration::from_secs(60));
            }
            other => panic!("unexpected result {:?}", other),
        }
    }

    #[test]
    fn test_workflow_error_mapping() {
        let err: WorkflowError = InvokeError::RateLimitExhausted {
            attempts: 6,
            last: rate_limited(),
        }
        .into();
        assert!(matches!(err, WorkflowError::RateLimitExhausted { attempts: 6, .. }));

        let err: WorkflowError =
            InvokeError::Failed(JudgmentError::Unauthorized("no".into())).into();
        assert!(matches!(err, WorkflowError::Judgment(_)));
    }
}
