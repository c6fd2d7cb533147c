//! Error handling.

use std::error::Error as StdError;
use std::io;

use displaydoc::Display;

pub type HexadResult<T> = Result<T, HexadError>;

/// An error.
#[derive(Debug, Display)]
pub enum HexadError {
    /// Invalid checksum string "{value}": {reason}
    InvalidChecksum { value: String, reason: &'static str },

    /// Checksum mismatch: expected {expected}, got {actual}
    ChecksumMismatch { expected: String, actual: String },

    /// No chunk servers available.
    NoServersAvailable,

    /// Protocol error: {0}
    ProtocolError(crate::proto::ProtoError),

    /// I/O error: {error}.
    IoError { error: io::Error },
}

impl HexadError {
    pub fn name(&self) -> &'static str {
        match self {
            Self::InvalidChecksum { .. } => "InvalidChecksum",
            Self::ChecksumMismatch { .. } => "ChecksumMismatch",
            Self::NoServersAvailable => "NoServersAvailable",
            Self::ProtocolError(_) => "ProtocolError",
            Self::IoError { .. } => "IoError",
        }
    }
}

impl StdError for HexadError {}

impl From<io::Error> for HexadError {
    fn from(error: io::Error) -> Self {
        Self::IoError { error }
    }
}

impl From<crate::proto::ProtoError> for HexadError {
    fn from(error: crate::proto::ProtoError) -> Self {
        Self::ProtocolError(error)
    }
}
