//! Retry orchestration over classified provider errors.
//!
//! The orchestrator owns no state beyond the current invocation: every call
//! to [`RetryOrchestrator::execute`] starts its own attempt counter. Which
//! kinds are retried, how many times, and with what backoff comes from a
//! per-kind [`PolicyTable`].

use std::collections::HashMap;
use std::future::Future;
use std::time::Duration;

use rand::Rng;
use tracing::{debug, warn};

use crate::error::{ApiErrorKind, ClassifiedError};

/// Jitter ceiling: up to 30% is *added* to the computed delay, never
/// subtracted, so concurrent callers spread out without ever retrying early.
const JITTER_FACTOR: f64 = 0.3;

/// Retry behavior for one error kind.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RetryPolicy {
    /// Whether this kind may be re-attempted at all
    pub retryable: bool,
    /// Total attempts, including the first (a value of 3 = 3 attempts)
    pub max_attempts: u32,
    /// Delay before the first re-attempt
    pub base_delay: Duration,
    /// Exponential growth factor applied per attempt
    pub backoff_multiplier: f64,
}

impl RetryPolicy {
    /// A policy that never retries; terminal kinds fail on the first
    /// attempt with zero delay.
    pub const fn terminal() -> Self {
        Self {
            retryable: false,
            max_attempts: 1,
            base_delay: Duration::ZERO,
            backoff_multiplier: 1.0,
        }
    }

    /// Exponential backoff policy.
    pub const fn exponential(max_attempts: u32, base_delay: Duration, multiplier: f64) -> Self {
        Self { retryable: true, max_attempts, base_delay, backoff_multiplier: multiplier }
    }

    /// Deterministic delay before re-attempt number `attempt` (0-based),
    /// before jitter: `base_delay × multiplier^attempt`.
    pub fn compute_delay(&self, attempt: u32) -> Duration {
        let factor = self.backoff_multiplier.powi(attempt as i32);
        self.base_delay.mul_f64(factor)
    }
}

/// Per-kind retry policies.
#[derive(Debug, Clone)]
pub struct PolicyTable {
    policies: HashMap<ApiErrorKind, RetryPolicy>,
}

impl Default for PolicyTable {
    /// The propagation policy: `RateLimited`, `Timeout`, `NetworkError` and
    /// `ServiceUnavailable` are retried with bounded exponential backoff;
    /// every other kind is terminal.
    fn default() -> Self {
        let mut policies = HashMap::new();
        policies.insert(
            ApiErrorKind::NetworkError,
            RetryPolicy::exponential(3, Duration::from_millis(1000), 2.0),
        );
        policies.insert(
            ApiErrorKind::Timeout,
            RetryPolicy::exponential(3, Duration::from_millis(1000), 2.0),
        );
        policies.insert(
            ApiErrorKind::ServiceUnavailable,
            RetryPolicy::exponential(3, Duration::from_millis(2000), 2.0),
        );
        policies.insert(
            ApiErrorKind::RateLimited,
            RetryPolicy::exponential(3, Duration::from_millis(5000), 2.0),
        );
        Self { policies }
    }
}

impl PolicyTable {
    /// Table with no retryable kinds.
    pub fn none() -> Self {
        Self { policies: HashMap::new() }
    }

    /// Override the policy for one kind.
    #[must_use]
    pub fn with_policy(mut self, kind: ApiErrorKind, policy: RetryPolicy) -> Self {
        self.policies.insert(kind, policy);
        self
    }

    /// Policy for a kind; kinds without an entry are terminal.
    pub fn policy_for(&self, kind: ApiErrorKind) -> RetryPolicy {
        self.policies.get(&kind).copied().unwrap_or_else(RetryPolicy::terminal)
    }
}

/// Drives an async operation through its per-kind retry policy.
#[derive(Debug, Clone, Default)]
pub struct RetryOrchestrator {
    table: PolicyTable,
}

impl RetryOrchestrator {
    /// Orchestrator with a custom policy table.
    pub fn new(table: PolicyTable) -> Self {
        Self { table }
    }

    /// Run `operation` until it succeeds, its policy is exhausted, or a
    /// terminal kind surfaces. The final error is always the classified
    /// error from the last attempt.
    ///
    /// A provider-supplied `retry_after_hint` overrides the computed
    /// backoff for that attempt.
    pub async fn execute<T, F, Fut>(&self, mut operation: F) -> Result<T, ClassifiedError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, ClassifiedError>>,
    {
        let mut attempt: u32 = 0;
        loop {
            match operation().await {
                Ok(value) => return Ok(value),
                Err(err) => {
                    let policy = self.table.policy_for(err.kind());
                    let attempts_made = attempt + 1;
                    if !policy.retryable || attempts_made >= policy.max_attempts {
                        if policy.retryable {
                            warn!(
                                kind = %err.kind(),
                                attempts = attempts_made,
                                "retries exhausted"
                            );
                        }
                        return Err(err);
                    }

                    let delay = err
                        .retry_after_hint()
                        .unwrap_or_else(|| jittered(policy.compute_delay(attempt)));
                    debug!(
                        kind = %err.kind(),
                        attempt = attempts_made,
                        delay_ms = delay.as_millis() as u64,
                        "retrying after backoff"
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
            }
        }
    }
}

/// Add 0–30% random jitter to a delay.
fn jittered(delay: Duration) -> Duration {
    let factor = 1.0 + rand::thread_rng().gen_range(0.0..=JITTER_FACTOR);
    delay.mul_f64(factor)
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    use super::*;

    fn failing_kind(kind: ApiErrorKind) -> ClassifiedError {
        ClassifiedError::new(kind, "simulated failure")
    }

    #[test]
    fn backoff_doubles_per_attempt() {
        let policy = RetryPolicy::exponential(5, Duration::from_millis(1000), 2.0);
        let delays: Vec<u64> =
            (0..5).map(|n| policy.compute_delay(n).as_millis() as u64).collect();
        assert_eq!(delays, vec![1000, 2000, 4000, 8000, 16000]);
    }

    #[test]
    fn jitter_is_additive_only() {
        let base = Duration::from_millis(1000);
        for _ in 0..100 {
            let j = jittered(base);
            assert!(j >= base, "jitter must never shorten the delay");
            assert!(j <= base.mul_f64(1.0 + JITTER_FACTOR));
        }
    }

    #[tokio::test]
    async fn permanently_failing_operation_makes_exactly_max_attempts() {
        let table = PolicyTable::none().with_policy(
            ApiErrorKind::NetworkError,
            RetryPolicy::exponential(3, Duration::from_millis(1), 2.0),
        );
        let orchestrator = RetryOrchestrator::new(table);
        let calls = Arc::new(AtomicU32::new(0));
        let calls_in = Arc::clone(&calls);

        let result: Result<(), ClassifiedError> = orchestrator
            .execute(move || {
                let calls = Arc::clone(&calls_in);
                async move {
                    calls.fetch_add(1, Ordering::SeqCst);
                    Err(failing_kind(ApiErrorKind::NetworkError))
                }
            })
            .await;

        assert_eq!(calls.load(Ordering::SeqCst), 3);
        let err = result.unwrap_err();
        assert_eq!(err.kind(), ApiErrorKind::NetworkError);
    }

    #[tokio::test]
    async fn terminal_kind_fails_on_first_attempt() {
        let orchestrator = RetryOrchestrator::default();
        let calls = Arc::new(AtomicU32::new(0));
        let calls_in = Arc::clone(&calls);

        let started = std::time::Instant::now();
        let result: Result<(), ClassifiedError> = orchestrator
            .execute(move || {
                let calls = Arc::clone(&calls_in);
                async move {
                    calls.fetch_add(1, Ordering::SeqCst);
                    Err(failing_kind(ApiErrorKind::CredentialRevoked))
                }
            })
            .await;

        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(result.unwrap_err().kind(), ApiErrorKind::CredentialRevoked);
        // No backoff was slept for
        assert!(started.elapsed() < Duration::from_millis(100));
    }

    #[tokio::test]
    async fn transient_failure_then_success_returns_value() {
        let table = PolicyTable::none().with_policy(
            ApiErrorKind::ServiceUnavailable,
            RetryPolicy::exponential(5, Duration::from_millis(1), 2.0),
        );
        let orchestrator = RetryOrchestrator::new(table);
        let calls = Arc::new(AtomicU32::new(0));
        let calls_in = Arc::clone(&calls);

        let result = orchestrator
            .execute(move || {
                let calls = Arc::clone(&calls_in);
                async move {
                    if calls.fetch_add(1, Ordering::SeqCst) < 2 {
                        Err(failing_kind(ApiErrorKind::ServiceUnavailable))
                    } else {
                        Ok(42)
                    }
                }
            })
            .await;

        assert_eq!(result.unwrap(), 42);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn provider_hint_overrides_computed_backoff() {
        let table = PolicyTable::none().with_policy(
            ApiErrorKind::RateLimited,
            // Enormous computed delay; the 1ms hint must win or this test
            // would run for minutes.
            RetryPolicy::exponential(2, Duration::from_secs(600), 2.0),
        );
        let orchestrator = RetryOrchestrator::new(table);
        let calls = Arc::new(AtomicU32::new(0));
        let calls_in = Arc::clone(&calls);

        let result = orchestrator
            .execute(move || {
                let calls = Arc::clone(&calls_in);
                async move {
                    if calls.fetch_add(1, Ordering::SeqCst) == 0 {
                        Err(failing_kind(ApiErrorKind::RateLimited)
                            .with_retry_after(Duration::from_millis(1)))
                    } else {
                        Ok("ok")
                    }
                }
            })
            .await;

        assert_eq!(result.unwrap(), "ok");
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn each_invocation_starts_a_fresh_attempt_counter() {
        let table = PolicyTable::none().with_policy(
            ApiErrorKind::Timeout,
            RetryPolicy::exponential(2, Duration::from_millis(1), 2.0),
        );
        let orchestrator = RetryOrchestrator::new(table);

        for _ in 0..2 {
            let calls = Arc::new(AtomicU32::new(0));
            let calls_in = Arc::clone(&calls);
            let result: Result<(), ClassifiedError> = orchestrator
                .execute(move || {
                    let calls = Arc::clone(&calls_in);
                    async move {
                        calls.fetch_add(1, Ordering::SeqCst);
                        Err(failing_kind(ApiErrorKind::Timeout))
                    }
                })
                .await;
            assert!(result.is_err());
            assert_eq!(calls.load(Ordering::SeqCst), 2);
        }
    }
}
