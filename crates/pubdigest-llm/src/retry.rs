//! Bounded retry around a single model call.

use std::time::{Duration, Instant};

use pubdigest_common::DigestError;
use tracing::warn;

use crate::audit::LlmAuditEntry;
use crate::backend::{LlmBackend, LlmError, LlmRequest, LlmResponse};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts including the first one.
    pub max_attempts: u32,
    /// Pause between attempts (not after the last one).
    pub delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self { max_attempts: 3, delay: Duration::from_millis(500) }
    }
}

impl RetryPolicy {
    pub fn immediate(max_attempts: u32) -> Self {
        Self { max_attempts, delay: Duration::ZERO }
    }
}

/// How a retried call ended. Callers branch on this instead of catching.
#[derive(Debug)]
pub enum CallOutcome {
    Succeeded { response: LlmResponse, attempts: u32 },
    Exhausted { attempts: u32, last_error: LlmError },
}

impl CallOutcome {
    pub fn attempts(&self) -> u32 {
        match self {
            CallOutcome::Succeeded { attempts, .. } | CallOutcome::Exhausted { attempts, .. } => *attempts,
        }
    }

    pub fn into_result(self) -> Result<LlmResponse, DigestError> {
        match self {
            CallOutcome::Succeeded { response, .. } => Ok(response),
            CallOutcome::Exhausted { attempts, last_error } => Err(DigestError::ModelInvocation(
                format!("{last_error} (after {attempts} attempt(s))"),
            )),
        }
    }
}

/// Call `backend` up to `policy.max_attempts` times. Non-retryable errors end
/// the loop early. Every successful call emits an audit record under `task`.
pub async fn complete_with_retry(
    backend: &dyn LlmBackend,
    req: &LlmRequest,
    policy: &RetryPolicy,
    task: &str,
) -> CallOutcome {
    let max_attempts = policy.max_attempts.max(1);
    let mut attempt = 0;

    loop {
        attempt += 1;
        let t0 = Instant::now();
        match backend.complete(req.clone()).await {
            Ok(response) => {
                LlmAuditEntry::new(task, &response, attempt, t0.elapsed()).log();
                return CallOutcome::Succeeded { response, attempts: attempt };
            }
            Err(err) => {
                let retryable = err.is_retryable();
                if attempt >= max_attempts || !retryable {
                    return CallOutcome::Exhausted { attempts: attempt, last_error: err };
                }
                warn!(task, attempt, max_attempts, error = %err, "Model call failed, retrying");
                if !policy.delay.is_zero() {
                    tokio::time::sleep(policy.delay).await;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::ScriptedBackend;

    #[tokio::test]
    async fn test_succeeds_after_transient_failures() {
        let backend = ScriptedBackend::new("gpt-4")
            .fail("timeout")
            .fail("timeout")
            .reply("[]");
        let outcome = complete_with_retry(&backend, &LlmRequest::user("p"), &RetryPolicy::immediate(3), "test").await;
        match outcome {
            CallOutcome::Succeeded { response, attempts } => {
                assert_eq!(attempts, 3);
                assert_eq!(response.content, "[]");
            }
            other => panic!("expected success, got {other:?}"),
        }
        assert_eq!(backend.call_count(), 3);
    }

    #[tokio::test]
    async fn test_exhausts_after_max_attempts() {
        let backend = ScriptedBackend::new("gpt-4").fail("down").fail("down").fail("down").reply("[]");
        let outcome = complete_with_retry(&backend, &LlmRequest::user("p"), &RetryPolicy::immediate(3), "test").await;
        assert!(matches!(outcome, CallOutcome::Exhausted { attempts: 3, .. }));
        // the queued reply is left for the next caller
        assert_eq!(backend.call_count(), 3);
        let err = outcome.into_result().unwrap_err();
        assert_eq!(err.kind(), "ModelInvocationError");
    }

    #[tokio::test]
    async fn test_non_retryable_error_stops_early() {
        let backend = ScriptedBackend::new("gpt-4")
            .fail_with(LlmError::ApiError { status: 401, message: "invalid api key".into() })
            .reply("[]");
        let outcome = complete_with_retry(&backend, &LlmRequest::user("p"), &RetryPolicy::immediate(3), "test").await;
        assert_eq!(outcome.attempts(), 1);
        assert!(matches!(outcome, CallOutcome::Exhausted { .. }));
    }

    #[tokio::test]
    async fn test_zero_attempts_still_calls_once() {
        let backend = ScriptedBackend::new("gpt-4").reply("{}");
        let outcome = complete_with_retry(&backend, &LlmRequest::user("p"), &RetryPolicy::immediate(0), "test").await;
        assert!(matches!(outcome, CallOutcome::Succeeded { attempts: 1, .. }));
    }
}
