//! services/api/src/adapters/retry.rs
//!
//! Timeout and retry wrapper shared by every adapter that calls an external API.

use std::future::Future;
use std::time::Duration;

use autorfp_core::ports::{PortError, PortResult};
use tracing::warn;

use crate::config::RetryPolicy;

/// The outcome of one failed attempt.
#[derive(Debug, Clone, PartialEq)]
pub enum AttemptError {
    /// Worth another try: timeouts, connection failures, rate limits, 5xx.
    Transient(String),
    /// Retrying cannot help: 4xx responses, malformed payloads.
    Fatal(String),
}

impl AttemptError {
    /// Classifies an HTTP status code returned by an external API.
    pub fn from_status(status: u16, body: &str) -> Self {
        let message = format!("HTTP {}: {}", status, truncate(body, 300));
        if status == 429 || status >= 500 {
            AttemptError::Transient(message)
        } else {
            AttemptError::Fatal(message)
        }
    }
}

impl From<reqwest::Error> for AttemptError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() || e.is_connect() || e.is_request() {
            return AttemptError::Transient(e.to_string());
        }
        match e.status() {
            Some(status) => AttemptError::from_status(status.as_u16(), &e.to_string()),
            None => AttemptError::Fatal(e.to_string()),
        }
    }
}

/// Runs `op` until it succeeds, fails fatally, or runs out of attempts.
///
/// Each attempt is bounded by `policy.timeout`. Before attempt `n + 1` the loop
/// sleeps `base_delay * 2^(n - 1)`.
pub async fn with_retry<T, F, Fut>(policy: &RetryPolicy, label: &str, mut op: F) -> PortResult<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, AttemptError>>,
{
    let attempts = policy.max_attempts.max(1);

    for attempt in 1..=attempts {
        let outcome = match tokio::time::timeout(policy.timeout, op()).await {
            Ok(result) => result,
            Err(_) => Err(AttemptError::Transient(format!(
                "timed out after {}s",
                policy.timeout.as_secs_f32()
            ))),
        };

        match outcome {
            Ok(value) => return Ok(value),
            Err(AttemptError::Fatal(message)) => {
                return Err(PortError::External(format!("{}: {}", label, message)));
            }
            Err(AttemptError::Transient(message)) => {
                if attempt >= attempts {
                    return Err(PortError::External(format!(
                        "{} failed after {} attempts: {}",
                        label, attempts, message
                    )));
                }
                let delay = backoff(policy.base_delay, attempt);
                warn!(label, attempt, delay_ms = delay.as_millis() as u64, error = %message, "retrying external call");
                tokio::time::sleep(delay).await;
            }
        }
    }

    Err(PortError::Unexpected("unreachable retry loop".to_string()))
}

fn backoff(base: Duration, attempt: u32) -> Duration {
    base.saturating_mul(2u32.saturating_pow(attempt.saturating_sub(1)))
}

fn truncate(text: &str, max_chars: usize) -> String {
    match text.char_indices().nth(max_chars) {
        Some((idx, _)) => format!("{}...", &text[..idx]),
        None => text.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn policy(max_attempts: u32) -> RetryPolicy {
        RetryPolicy {
            timeout: Duration::from_secs(5),
            max_attempts,
            base_delay: Duration::ZERO,
        }
    }

    #[tokio::test]
    async fn transient_failures_are_retried() {
        let calls = AtomicU32::new(0);
        let result = with_retry(&policy(3), "llm", || {
            let n = calls.fetch_add(1, Ordering::SeqCst);
            async move {
                if n < 2 {
                    Err(AttemptError::Transient("HTTP 503".to_string()))
                } else {
                    Ok("done")
                }
            }
        })
        .await;

        assert_eq!(result.unwrap(), "done");
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn fatal_failures_stop_immediately() {
        let calls = AtomicU32::new(0);
        let result: PortResult<()> = with_retry(&policy(3), "parse upload", || {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Err(AttemptError::Fatal("HTTP 400: bad file".to_string())) }
        })
        .await;

        assert!(matches!(result, Err(PortError::External(m)) if m.contains("parse upload")));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn exhausted_attempts_surface_as_external() {
        let calls = AtomicU32::new(0);
        let result: PortResult<()> = with_retry(&policy(2), "llm", || {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Err(AttemptError::Transient("connection reset".to_string())) }
        })
        .await;

        assert!(matches!(result, Err(PortError::External(m)) if m.contains("after 2 attempts")));
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn slow_attempts_time_out() {
        let policy = RetryPolicy {
            timeout: Duration::from_millis(10),
            max_attempts: 1,
            base_delay: Duration::ZERO,
        };
        let result: PortResult<()> = with_retry(&policy, "llm", || async {
            tokio::time::sleep(Duration::from_secs(5)).await;
            Ok(())
        })
        .await;

        assert!(matches!(result, Err(PortError::External(m)) if m.contains("timed out")));
    }

    #[test]
    fn status_classification() {
        assert!(matches!(AttemptError::from_status(429, ""), AttemptError::Transient(_)));
        assert!(matches!(AttemptError::from_status(502, ""), AttemptError::Transient(_)));
        assert!(matches!(AttemptError::from_status(401, ""), AttemptError::Fatal(_)));
    }

    #[test]
    fn backoff_doubles() {
        let base = Duration::from_millis(100);
        assert_eq!(backoff(base, 1), Duration::from_millis(100));
        assert_eq!(backoff(base, 3), Duration::from_millis(400));
    }
}
