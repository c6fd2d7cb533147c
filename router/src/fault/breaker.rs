//! Per-server circuit breakers.

use std::future::Future;
use std::sync::Mutex;
use std::time::Duration;

use tokio::time::Instant;

use super::ClientError;

/// Circuit breaker behavior.
#[derive(Debug, Clone, Copy)]
pub struct BreakerConfig {
    /// Consecutive failures before the circuit opens.
    pub max_failures: u32,

    /// How long the circuit stays open before probing.
    pub open_timeout: Duration,

    /// Probes admitted while half-open; the same number of successes
    /// closes the circuit.
    pub half_open_max_requests: u32,
}

impl Default for BreakerConfig {
    fn default() -> Self {
        Self {
            max_failures: 5,
            open_timeout: Duration::from_secs(30),
            half_open_max_requests: 3,
        }
    }
}

/// The state of a circuit breaker.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BreakerState {
    /// Requests pass; consecutive failures are counted.
    Closed,

    /// Requests fail fast.
    Open,

    /// A limited number of probes pass to test the server.
    HalfOpen,
}

#[derive(Debug)]
struct Inner {
    state: BreakerState,
    failures: u32,
    successes: u32,
    half_open_requests: u32,
    last_failure: Option<Instant>,
}

/// A circuit breaker guarding one chunk server.
///
/// Transitions are guarded by the breaker's own mutex, never the
/// map that owns the breaker.
#[derive(Debug)]
pub struct CircuitBreaker {
    config: BreakerConfig,
    inner: Mutex<Inner>,
}

impl CircuitBreaker {
    pub fn new(config: BreakerConfig) -> Self {
        Self {
            config,
            inner: Mutex::new(Inner {
                state: BreakerState::Closed,
                failures: 0,
                successes: 0,
                half_open_requests: 0,
                last_failure: None,
            }),
        }
    }

    /// Runs `op` if the circuit admits it and records the outcome.
    pub async fn execute<T, F, Fut>(&self, op: F) -> Result<T, ClientError>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, ClientError>>,
    {
        self.before_request()?;

        let result = op().await;
        self.after_request(result.is_ok());

        result
    }

    pub fn state(&self) -> BreakerState {
        self.inner.lock().unwrap().state
    }

    /// Forces the circuit closed, e.g. after the server's connection
    /// has been re-established out of band.
    pub fn reset(&self) {
        let mut inner = self.inner.lock().unwrap();
        inner.state = BreakerState::Closed;
        inner.failures = 0;
        inner.successes = 0;
        inner.half_open_requests = 0;
    }

    fn before_request(&self) -> Result<(), ClientError> {
        let mut inner = self.inner.lock().unwrap();

        match inner.state {
            BreakerState::Closed => Ok(()),

            BreakerState::Open => {
                let elapsed = inner
                    .last_failure
                    .map(|at| at.elapsed())
                    .unwrap_or(Duration::MAX);

                if elapsed > self.config.open_timeout {
                    inner.state = BreakerState::HalfOpen;
                    inner.half_open_requests = 1;
                    inner.successes = 0;
                    Ok(())
                } else {
                    Err(ClientError::CircuitOpen)
                }
            }

            BreakerState::HalfOpen => {
                if inner.half_open_requests >= self.config.half_open_max_requests {
                    return Err(ClientError::CircuitOpen);
                }
                inner.half_open_requests += 1;
                Ok(())
            }
        }
    }

    fn after_request(&self, success: bool) {
        let mut inner = self.inner.lock().unwrap();

        if success {
            inner.successes += 1;

            match inner.state {
                BreakerState::Closed => {
                    inner.failures = 0;
                }
                BreakerState::HalfOpen => {
                    if inner.successes >= self.config.half_open_max_requests {
                        inner.state = BreakerState::Closed;
                        inner.failures = 0;
                        inner.successes = 0;
                        inner.half_open_requests = 0;
                    }
                }
                BreakerState::Open => {}
            }
        } else {
            inner.failures += 1;
            inner.successes = 0;
            inner.last_failure = Some(Instant::now());

            match inner.state {
                BreakerState::Closed => {
                    if inner.failures >= self.config.max_failures {
                        inner.state = BreakerState::Open;
                    }
                }
                BreakerState::HalfOpen => {
                    // Any probe failure reopens the circuit.
                    inner.state = BreakerState::Open;
                    inner.half_open_requests = 0;
                }
                BreakerState::Open => {}
            }
        }
    }
}
