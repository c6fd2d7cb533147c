//! Error handling.

use std::error::Error as StdError;

use anyhow::Error as AnyError;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use displaydoc::Display;
use serde::Serialize;

use crate::fault::ClientError;
use hexad::proto::Status;
use hexad::HexadError;

pub type ServerResult<T> = Result<T, ServerError>;

/// The kind of an error.
#[derive(Debug, Display)]
pub enum ErrorKind {
    // Generic responses
    /// The URL you requested was not found.
    NotFound,

    /// The server encountered an internal error or misconfiguration.
    InternalServerError,

    // Specialized responses
    /// Invalid request: {0}
    InvalidInput(AnyError),

    /// The file is not available for download (state "{state}").
    Conflict { state: &'static str },

    /// The file exceeds the maximum size of {max_bytes} bytes.
    PayloadTooLarge { max_bytes: u64 },

    /// No chunk servers are available.
    NoServersAvailable,

    /// Chunk server unavailable: {0}
    ServerUnavailable(AnyError),

    /// A chunk server is out of disk space.
    ResourceExhausted,

    /// Data integrity violation: {0}
    DataLoss(AnyError),

    /// Database error: {0}
    DatabaseError(AnyError),

    /// General request error: {0}
    RequestError(AnyError),
}

/// An error.
#[derive(Debug)]
pub struct ServerError {
    kind: ErrorKind,
}

#[derive(Serialize)]
pub struct ErrorResponse {
    code: u16,
    error: String,
    message: String,
}

impl ServerError {
    pub fn database_error(error: impl StdError + Send + Sync + 'static) -> Self {
        ErrorKind::DatabaseError(AnyError::new(error)).into()
    }

    pub fn request_error(error: impl StdError + Send + Sync + 'static) -> Self {
        ErrorKind::RequestError(AnyError::new(error)).into()
    }
}

impl ErrorKind {
    fn name(&self) -> &'static str {
        match self {
            Self::NotFound => "NotFound",
            Self::InternalServerError => "InternalServerError",
            Self::InvalidInput(_) => "InvalidInput",
            Self::Conflict { .. } => "Conflict",
            Self::PayloadTooLarge { .. } => "PayloadTooLarge",
            Self::NoServersAvailable => "NoServersAvailable",
            Self::ServerUnavailable(_) => "ServerUnavailable",
            Self::ResourceExhausted => "ResourceExhausted",
            Self::DataLoss(_) => "DataLoss",
            Self::DatabaseError(_) => "DatabaseError",
            Self::RequestError(_) => "RequestError",
        }
    }

    /// Returns a version of this error for clients.
    ///
    /// Internal details (database causes, integrity traces) are not
    /// the client's business.
    fn into_clients(self) -> Self {
        match self {
            Self::DatabaseError(_) => Self::InternalServerError,
            Self::DataLoss(_) => Self::InternalServerError,
            _ => self,
        }
    }

    fn http_status_code(&self) -> StatusCode {
        match self {
            Self::NotFound => StatusCode::NOT_FOUND,
            Self::InvalidInput(_) => StatusCode::BAD_REQUEST,
            Self::RequestError(_) => StatusCode::BAD_REQUEST,
            Self::Conflict { .. } => StatusCode::CONFLICT,
            Self::PayloadTooLarge { .. } => StatusCode::PAYLOAD_TOO_LARGE,
            Self::NoServersAvailable => StatusCode::SERVICE_UNAVAILABLE,
            Self::ServerUnavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
            Self::ResourceExhausted => StatusCode::INTERNAL_SERVER_ERROR,
            Self::DataLoss(_) => StatusCode::INTERNAL_SERVER_ERROR,
            Self::DatabaseError(_) => StatusCode::INTERNAL_SERVER_ERROR,
            Self::InternalServerError => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl std::fmt::Display for ServerError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        std::fmt::Display::fmt(&self.kind, f)
    }
}

impl StdError for ServerError {}

impl From<ErrorKind> for ServerError {
    fn from(kind: ErrorKind) -> Self {
        Self { kind }
    }
}

impl From<sea_orm::DbErr> for ServerError {
    fn from(error: sea_orm::DbErr) -> Self {
        ErrorKind::DatabaseError(AnyError::new(error)).into()
    }
}

impl From<HexadError> for ServerError {
    fn from(error: HexadError) -> Self {
        let kind = match &error {
            HexadError::NoServersAvailable => ErrorKind::NoServersAvailable,
            HexadError::ChecksumMismatch { .. } => ErrorKind::DataLoss(AnyError::new(error)),
            _ => {
                // The cause is only interesting in the logs.
                tracing::debug!("internal error: {}", error);
                ErrorKind::InternalServerError
            }
        };
        kind.into()
    }
}

impl From<ClientError> for ServerError {
    fn from(error: ClientError) -> Self {
        let kind = match error {
            ClientError::Remote {
                status: Status::NotFound,
                ..
            } => ErrorKind::NotFound,
            e @ ClientError::Remote {
                status: Status::DataLoss,
                ..
            } => ErrorKind::DataLoss(AnyError::new(e)),
            ClientError::Remote {
                status: Status::ResourceExhausted,
                ..
            } => ErrorKind::ResourceExhausted,
            e @ ClientError::Remote {
                status: Status::Unavailable,
                ..
            } => ErrorKind::ServerUnavailable(AnyError::new(e)),
            ClientError::Remote { .. } => ErrorKind::InternalServerError,
            e @ (ClientError::CircuitOpen
            | ClientError::Timeout
            | ClientError::NotConnected
            | ClientError::Io(_)) => ErrorKind::ServerUnavailable(AnyError::new(e)),
            ClientError::Protocol(_) => ErrorKind::InternalServerError,
        };
        kind.into()
    }
}

impl IntoResponse for ServerError {
    fn into_response(self) -> Response {
        if matches!(
            self.kind,
            ErrorKind::DatabaseError(_) | ErrorKind::DataLoss(_) | ErrorKind::InternalServerError
        ) {
            tracing::error!("{:?}", self);
        }

        let sanitized = self.kind.into_clients();

        let status_code = sanitized.http_status_code();
        let error_response = ErrorResponse {
            code: status_code.as_u16(),
            message: sanitized.to_string(),
            error: sanitized.name().to_string(),
        };

        (status_code, Json(error_response)).into_response()
    }
}
