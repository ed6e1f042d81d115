//! Errors surfaced to clients of the sync service.

use serde::Serialize;
use thiserror::Error;

use crate::lists::{EncodeError, ParseError, UnsupportedFormat};
use crate::storage::DatabaseError;

/// Line-oriented status tokens understood by legacy clients.
pub const STATUS_SUCCESS: &str = "@SUCCESS";
pub const STATUS_AUTH_FAILURE: &str = "@AUTHFAIL";
pub const STATUS_PROTOCOL_ERROR: &str = "@PROTOERROR";

#[derive(Debug, Error)]
pub enum SyncError {
    /// Unknown identity or wrong secret; never says which.
    #[error("Authentication failed")]
    AuthFailure,

    #[error("Malformed request: {0}")]
    MalformedRequest(String),

    #[error(transparent)]
    Parse(#[from] ParseError),

    #[error(transparent)]
    UnsupportedFormat(#[from] UnsupportedFormat),

    /// Concurrent writers kept winning until retries ran out.
    #[error("Write conflict persisted after {attempts} attempts")]
    WriteConflict { attempts: u32 },

    #[error("Not found: {0}")]
    NotFound(String),

    #[error(transparent)]
    Encode(#[from] EncodeError),

    #[error(transparent)]
    Storage(DatabaseError),
}

impl From<DatabaseError> for SyncError {
    fn from(err: DatabaseError) -> Self {
        match err {
            DatabaseError::Conflict => SyncError::WriteConflict { attempts: 1 },
            other => SyncError::Storage(other),
        }
    }
}

impl SyncError {
    /// Stable machine-readable kind.
    pub fn kind(&self) -> &'static str {
        match self {
            SyncError::AuthFailure => "auth_failure",
            SyncError::MalformedRequest(_) => "malformed_request",
            SyncError::Parse(_) => "parse_error",
            SyncError::UnsupportedFormat(_) => "unsupported_format",
            SyncError::WriteConflict { .. } => "write_conflict",
            SyncError::NotFound(_) => "not_found",
            SyncError::Encode(_) | SyncError::Storage(_) => "internal",
        }
    }

    /// Status token for line-oriented clients.
    ///
    /// Anything that is not an authentication problem is reported as a
    /// protocol error; the detail goes to the log, not to the client.
    pub fn status_token(&self) -> &'static str {
        match self {
            SyncError::AuthFailure => STATUS_AUTH_FAILURE,
            _ => STATUS_PROTOCOL_ERROR,
        }
    }

    /// Structured error for JSON-oriented clients.
    pub fn to_body(&self) -> ErrorBody {
        let message = match self {
            SyncError::Encode(_) | SyncError::Storage(_) => "internal error".to_string(),
            other => other.to_string(),
        };
        ErrorBody {
            error: self.kind(),
            message,
        }
    }
}

/// Status token reported by a legacy endpoint for `result`.
pub fn status_for<T>(result: &Result<T, SyncError>) -> &'static str {
    match result {
        Ok(_) => STATUS_SUCCESS,
        Err(e) => e.status_token(),
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ErrorBody {
    pub error: &'static str,
    pub message: String,
}
