//! Retry with bounded exponential backoff.

use std::cmp;
use std::future::Future;
use std::time::Duration;

use tokio::time;

use super::ClientError;

/// Retry behavior for one logical call.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    /// Total number of attempts, including the first.
    pub max_attempts: u32,

    /// Wait before the second attempt.
    pub initial_backoff: Duration,

    /// Cap on the doubled backoff.
    pub max_backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_backoff: Duration::from_secs(1),
            max_backoff: Duration::from_secs(8),
        }
    }
}

/// Runs `op` until it succeeds, fails non-retryably, or the attempt
/// budget runs out.
///
/// The backoff between attempts is `min(initial * 2^k, max)`. A
/// non-retryable error is surfaced immediately. Cancellation is by
/// drop: the caller bounds the whole call with a timeout and dropping
/// this future aborts the attempt in progress.
pub async fn retry<T, F, Fut>(policy: RetryPolicy, mut op: F) -> Result<T, ClientError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, ClientError>>,
{
    let mut backoff = policy.initial_backoff;
    let mut last_error = None;

    for attempt in 1..=policy.max_attempts {
        match op().await {
            Ok(value) => return Ok(value),
            Err(error) if !error.is_retryable() => return Err(error),
            Err(error) => {
                tracing::debug!("attempt {}/{} failed: {}", attempt, policy.max_attempts, error);
                last_error = Some(error);
            }
        }

        if attempt < policy.max_attempts {
            time::sleep(backoff).await;
            backoff = cmp::min(backoff * 2, policy.max_backoff);
        }
    }

    Err(last_error.expect("at least one attempt was made"))
}

#[cfg(test)]
mod tests {
    use super::*;

    use std::io;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    use hexad::proto::Status;

    fn refused() -> ClientError {
        ClientError::Io(io::Error::new(io::ErrorKind::ConnectionRefused, "refused"))
    }

    #[tokio::test(start_paused = true)]
    async fn test_succeeds_after_transient_failures() {
        let calls = Arc::new(AtomicU32::new(0));

        let result = retry(RetryPolicy::default(), || {
            let calls = calls.clone();
            async move {
                if calls.fetch_add(1, Ordering::SeqCst) < 2 {
                    Err(refused())
                } else {
                    Ok(42)
                }
            }
        })
        .await;

        assert_eq!(result.unwrap(), 42);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_exhausts_attempts() {
        let calls = Arc::new(AtomicU32::new(0));

        let result: Result<(), _> = retry(RetryPolicy::default(), || {
            let calls = calls.clone();
            async move {
                calls.fetch_add(1, Ordering::SeqCst);
                Err(refused())
            }
        })
        .await;

        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_non_retryable_short_circuits() {
        let calls = Arc::new(AtomicU32::new(0));

        let result: Result<(), _> = retry(RetryPolicy::default(), || {
            let calls = calls.clone();
            async move {
                calls.fetch_add(1, Ordering::SeqCst);
                Err(ClientError::Remote {
                    status: Status::DataLoss,
                    message: "checksum mismatch".to_string(),
                })
            }
        })
        .await;

        assert!(matches!(
            result,
            Err(ClientError::Remote {
                status: Status::DataLoss,
                ..
            })
        ));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_circuit_open_is_not_retried() {
        let calls = Arc::new(AtomicU32::new(0));

        let result: Result<(), _> = retry(RetryPolicy::default(), || {
            let calls = calls.clone();
            async move {
                calls.fetch_add(1, Ordering::SeqCst);
                Err(ClientError::CircuitOpen)
            }
        })
        .await;

        assert!(matches!(result, Err(ClientError::CircuitOpen)));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_backoff_doubles_and_caps() {
        let start = time::Instant::now();

        let policy = RetryPolicy {
            max_attempts: 4,
            initial_backoff: Duration::from_secs(1),
            max_backoff: Duration::from_secs(2),
        };

        let _: Result<(), _> = retry(policy, || async { Err(refused()) }).await;

        // 1s + 2s + 2s between four attempts.
        assert_eq!(start.elapsed(), Duration::from_secs(5));
    }
}
