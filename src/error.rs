use axum::{
    extract::rejection::{JsonRejection, PathRejection, QueryRejection},
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use rust_decimal::Decimal;
use serde::Serialize;
use thiserror::Error;
use uuid::Uuid;

use crate::storage::StorageError;

#[derive(Debug, Error)]
pub enum LedgerError {
    #[error("validation failed: {0}")]
    Validation(String),
    #[error("{0}")]
    NotFound(String),
    #[error("{0}")]
    Conflict(String),
    #[error("journal is unbalanced: debits {debit} != credits {credit}")]
    Unbalanced {
        journal_id: Option<Uuid>,
        debit: Decimal,
        credit: Decimal,
    },
    #[error("forbidden: {0}")]
    Forbidden(String),
    #[error("agent error: {0}")]
    Agent(String),
    #[error("storage error: {0}")]
    Storage(StorageError),
}

impl From<StorageError> for LedgerError {
    fn from(e: StorageError) -> Self {
        match e {
            StorageError::AccountNotFound(code) => LedgerError::NotFound(format!("account not found: {}", code)),
            StorageError::JournalNotFound(id) => LedgerError::NotFound(format!("journal not found: {}", id)),
            StorageError::AttachmentNotFound(id) => LedgerError::NotFound(format!("attachment not found: {}", id)),
            StorageError::AccountExists(code) => LedgerError::Conflict(format!("account already exists: {}", code)),
            StorageError::Unbalanced { journal_id, debit, credit } => LedgerError::Unbalanced {
                journal_id: Some(journal_id),
                debit,
                credit,
            },
            other => LedgerError::Storage(other),
        }
    }
}

impl From<JsonRejection> for LedgerError {
    fn from(rejection: JsonRejection) -> Self {
        LedgerError::Validation(format!("invalid request body: {}", rejection.body_text()))
    }
}

impl From<PathRejection> for LedgerError {
    fn from(rejection: PathRejection) -> Self {
        LedgerError::Validation(format!("invalid path: {}", rejection.body_text()))
    }
}

impl From<QueryRejection> for LedgerError {
    fn from(rejection: QueryRejection) -> Self {
        LedgerError::Validation(format!("invalid query string: {}", rejection.body_text()))
    }
}

impl LedgerError {
    pub fn status(&self) -> StatusCode {
        match self {
            LedgerError::Validation(_) | LedgerError::Unbalanced { .. } => StatusCode::BAD_REQUEST,
            LedgerError::NotFound(_) => StatusCode::NOT_FOUND,
            LedgerError::Conflict(_) => StatusCode::CONFLICT,
            LedgerError::Forbidden(_) => StatusCode::FORBIDDEN,
            LedgerError::Agent(_) => StatusCode::BAD_GATEWAY,
            LedgerError::Storage(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn summary(&self) -> &'static str {
        match self {
            LedgerError::Validation(_) => "Validation failed",
            LedgerError::NotFound(_) => "Not found",
            LedgerError::Conflict(_) => "Conflict",
            LedgerError::Unbalanced { .. } => "Journal is not balanced",
            LedgerError::Forbidden(_) => "Forbidden",
            LedgerError::Agent(_) => "Agent request failed",
            LedgerError::Storage(_) => "Internal server error",
        }
    }
}

#[derive(Serialize)]
struct ErrorBody {
    error: &'static str,
    details: String,
}

impl IntoResponse for LedgerError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            tracing::error!(error = %self, "Request failed");
        } else {
            tracing::debug!(error = %self, status = status.as_u16(), "Request rejected");
        }
        (status, Json(ErrorBody {
            error: self.summary(),
            details: self.to_string(),
        }))
            .into_response()
    }
}
