//! The fault shell.
//!
//! Every outbound chunk-service call runs inside two cooperating
//! primitives: a bounded-backoff retry for transient transport faults,
//! wrapped by a per-server circuit breaker that fails fast once a
//! server has proven itself unhealthy. The breaker sits outside, so an
//! open circuit is never fed back into the retry loop.

mod breaker;
mod retry;

use std::error::Error as StdError;
use std::io;

use displaydoc::Display;

use hexad::proto::{ProtoError, Status};

pub use breaker::{BreakerConfig, BreakerState, CircuitBreaker};
pub use retry::{retry, RetryPolicy};

/// An error from a chunk-service call.
#[derive(Debug, Display)]
pub enum ClientError {
    /// Connection error: {0}
    Io(io::Error),

    /// Chunk server replied {status:?}: {message}
    Remote { status: Status, message: String },

    /// Protocol violation: {0}
    Protocol(String),

    /// The operation timed out.
    Timeout,

    /// The circuit breaker is open.
    CircuitOpen,

    /// No connection is established to the chunk server.
    NotConnected,
}

impl StdError for ClientError {}

impl ClientError {
    /// Whether another attempt could plausibly succeed.
    ///
    /// Connection-level faults and unavailable-class statuses are
    /// retryable; everything else short-circuits. An open circuit is
    /// deliberately non-retryable.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Io(error) => matches!(
                error.kind(),
                io::ErrorKind::ConnectionRefused
                    | io::ErrorKind::ConnectionReset
                    | io::ErrorKind::ConnectionAborted
                    | io::ErrorKind::BrokenPipe
                    | io::ErrorKind::TimedOut
                    | io::ErrorKind::UnexpectedEof
                    | io::ErrorKind::NotConnected
            ),
            Self::Timeout => true,
            Self::Remote {
                status: Status::Unavailable,
                ..
            } => true,
            _ => false,
        }
    }
}

impl From<io::Error> for ClientError {
    fn from(error: io::Error) -> Self {
        Self::Io(error)
    }
}

impl From<ProtoError> for ClientError {
    fn from(error: ProtoError) -> Self {
        match error {
            ProtoError::Io(error) => Self::Io(error),
            other => Self::Protocol(other.to_string()),
        }
    }
}
