//! Remote-call plumbing — the host-supplied request/response primitive and
//! the bounded retry wrapper around it.
//!
//! The underlying wire mechanics belong to the host environment; this module
//! only sees a single request/response seam ([`ServiceCall`]) and adds
//! bounded retry with linear backoff on top. Intermediate failures surface
//! as advisory notices; only exhaustion of the attempt budget propagates.

use crate::notice::{Notice, NoticeSink};
use async_trait::async_trait;
use serde_json::Value;
use std::time::Duration;

/// One remote operation: a domain + operation identifier, an opaque payload,
/// and whether the caller expects a payload back.
#[derive(Debug, Clone, PartialEq)]
pub struct ServiceRequest {
    pub domain: String,
    pub operation: String,
    pub payload: Value,
    /// `false` for fire-and-forget calls whose reply is discarded.
    pub return_response: bool,
}

impl ServiceRequest {
    pub fn new(
        domain: impl Into<String>,
        operation: impl Into<String>,
        payload: Value,
    ) -> Self {
        Self {
            domain: domain.into(),
            operation: operation.into(),
            payload,
            return_response: true,
        }
    }

    pub fn fire_and_forget(
        domain: impl Into<String>,
        operation: impl Into<String>,
        payload: Value,
    ) -> Self {
        Self {
            return_response: false,
            ..Self::new(domain, operation, payload)
        }
    }
}

/// The remote-call primitive supplied by the host. A single attempt; all
/// retry behavior lives in [`RetryingTransport`].
#[async_trait]
pub trait ServiceCall: Send + Sync {
    async fn invoke(&self, request: &ServiceRequest) -> anyhow::Result<Value>;
}

/// Attempt budget and backoff scaling.
///
/// The delay before attempt `i + 1` (after `i + 1` failures, 0-indexed) is
/// `base_delay_ms * (i + 1)` — linear in the attempt index, not doubling.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay_ms: u64,
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, base_delay_ms: u64) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            base_delay_ms,
        }
    }

    /// Delay after the failure of 0-indexed attempt `attempt`.
    pub fn delay_after(&self, attempt: u32) -> Duration {
        Duration::from_millis(self.base_delay_ms * u64::from(attempt + 1))
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay_ms: 1000,
        }
    }
}

/// Retry wrapper around a [`ServiceCall`].
pub struct RetryingTransport<C> {
    inner: C,
    policy: RetryPolicy,
}

impl<C: ServiceCall> RetryingTransport<C> {
    pub fn new(inner: C, policy: RetryPolicy) -> Self {
        Self { inner, policy }
    }

    pub fn policy(&self) -> RetryPolicy {
        self.policy
    }

    /// Invoke the request up to `policy.max_attempts` times.
    ///
    /// Each failure before the last emits one warning notice (attempt count
    /// and delay included) and suspends for the policy delay. The final
    /// failure propagates unchanged; the first success returns immediately.
    pub async fn call(
        &self,
        request: &ServiceRequest,
        sink: &dyn NoticeSink,
    ) -> anyhow::Result<Value> {
        let mut attempt: u32 = 0;

        loop {
            match self.inner.invoke(request).await {
                Ok(response) => {
                    if attempt > 0 {
                        tracing::info!(
                            operation = %request.operation,
                            attempt = attempt + 1,
                            "remote call recovered after retry"
                        );
                    }
                    return Ok(response);
                }
                Err(err) => {
                    attempt += 1;
                    if attempt >= self.policy.max_attempts {
                        return Err(err);
                    }

                    let delay = self.policy.delay_after(attempt - 1);
                    tracing::warn!(
                        operation = %request.operation,
                        attempt,
                        max_attempts = self.policy.max_attempts,
                        delay_ms = delay.as_millis() as u64,
                        "remote call failed, retrying: {err:#}"
                    );
                    sink.notify(Notice::warning(format!(
                        "Network error. Retrying in {} ms (attempt {}/{}).",
                        delay.as_millis(),
                        attempt,
                        self.policy.max_attempts
                    )));
                    tokio::time::sleep(delay).await;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::notice::{CollectingSink, Severity};
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct MockCall {
        calls: AtomicUsize,
        fail_first: usize,
        response: Value,
    }

    impl MockCall {
        fn failing_first(fail_first: usize, response: Value) -> Self {
            Self {
                calls: AtomicUsize::new(0),
                fail_first,
                response,
            }
        }

        fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl ServiceCall for MockCall {
        async fn invoke(&self, _request: &ServiceRequest) -> anyhow::Result<Value> {
            let attempt = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
            if attempt <= self.fail_first {
                anyhow::bail!("connection reset (attempt {attempt})");
            }
            Ok(self.response.clone())
        }
    }

    fn request() -> ServiceRequest {
        ServiceRequest::new("conversation", "send_prompt", json!({"prompt": "hi"}))
    }

    #[tokio::test]
    async fn succeeds_without_retry() {
        let transport = RetryingTransport::new(
            MockCall::failing_first(0, json!({"ok": true})),
            RetryPolicy::new(3, 1000),
        );
        let sink = CollectingSink::new();

        let response = transport.call(&request(), &sink).await.unwrap();
        assert_eq!(response, json!({"ok": true}));
        assert_eq!(transport.inner.calls(), 1);
        assert_eq!(sink.count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn two_failures_wait_linear_delays_then_recover() {
        let transport = RetryingTransport::new(
            MockCall::failing_first(2, json!("recovered")),
            RetryPolicy::new(3, 1000),
        );
        let sink = CollectingSink::new();

        let started = tokio::time::Instant::now();
        let response = transport.call(&request(), &sink).await.unwrap();

        // Exactly 1000 ms after the first failure, 2000 ms after the second.
        assert_eq!(started.elapsed(), Duration::from_millis(3000));
        assert_eq!(response, json!("recovered"));
        assert_eq!(transport.inner.calls(), 3);

        let notices = sink.snapshot();
        assert_eq!(notices.len(), 2);
        assert!(notices.iter().all(|n| n.severity == Severity::Warning));
        assert!(notices[0].message.contains("1000 ms"));
        assert!(notices[0].message.contains("attempt 1/3"));
        assert!(notices[1].message.contains("2000 ms"));
        assert!(notices[1].message.contains("attempt 2/3"));
    }

    #[tokio::test(start_paused = true)]
    async fn final_failure_propagates_with_no_extra_attempts() {
        let transport = RetryingTransport::new(
            MockCall::failing_first(usize::MAX, json!("never")),
            RetryPolicy::new(3, 1000),
        );
        let sink = CollectingSink::new();

        let started = tokio::time::Instant::now();
        let err = transport
            .call(&request(), &sink)
            .await
            .expect_err("all attempts should fail");

        assert_eq!(transport.inner.calls(), 3);
        assert!(err.to_string().contains("attempt 3"));
        // Two backoffs only — the last failure is returned, not slept on.
        assert_eq!(started.elapsed(), Duration::from_millis(3000));
        assert_eq!(sink.count(), 2);
    }

    #[tokio::test]
    async fn single_attempt_policy_never_sleeps() {
        let transport = RetryingTransport::new(
            MockCall::failing_first(usize::MAX, json!("never")),
            RetryPolicy::new(1, 1000),
        );
        let sink = CollectingSink::new();

        let err = transport.call(&request(), &sink).await.expect_err("fails");
        assert_eq!(transport.inner.calls(), 1);
        assert!(err.to_string().contains("attempt 1"));
        assert_eq!(sink.count(), 0);
    }

    #[test]
    fn policy_delay_is_linear_in_attempt_index() {
        let policy = RetryPolicy::new(3, 1000);
        assert_eq!(policy.delay_after(0), Duration::from_millis(1000));
        assert_eq!(policy.delay_after(1), Duration::from_millis(2000));
        assert_eq!(policy.delay_after(2), Duration::from_millis(3000));
    }

    #[test]
    fn policy_clamps_attempts_to_at_least_one() {
        assert_eq!(RetryPolicy::new(0, 500).max_attempts, 1);
    }

    #[test]
    fn fire_and_forget_flag() {
        let req = ServiceRequest::fire_and_forget("conversation", "clear_memory", json!({}));
        assert!(!req.return_response);
        assert!(request().return_response);
    }
}
