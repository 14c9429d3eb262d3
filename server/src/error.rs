//! HTTP error mapping. Grounded on the teacher's `api/rest/error.rs`: a single enum that
//! implements `IntoResponse` and carries `From` impls for the error types call sites
//! naturally produce, so handlers can just use `?`.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use tangled_common::error::{ErrorBody, ErrorCode};

#[derive(Debug)]
pub enum AppError {
    Unauthorized(String),
    Forbidden(String),
    NotFound(String),
    Gone(String),
    Conflict(String),
    /// `{error: "missing_nodes", missing: [...]}`, HTTP 409.
    MissingNodes(Vec<String>),
    HashMismatch(String),
    InvalidNode(String),
    QuotaExceeded(String),
    InvalidRequest(String),
    Internal(anyhow::Error),
}

impl AppError {
    fn code(&self) -> ErrorCode {
        match self {
            AppError::Unauthorized(_) => ErrorCode::Unauthorized,
            AppError::Forbidden(_) => ErrorCode::Forbidden,
            AppError::NotFound(_) => ErrorCode::NotFound,
            AppError::Gone(_) => ErrorCode::Gone,
            AppError::Conflict(_) => ErrorCode::Conflict,
            AppError::MissingNodes(_) => ErrorCode::MissingNodes,
            AppError::HashMismatch(_) => ErrorCode::HashMismatch,
            AppError::InvalidNode(_) => ErrorCode::InvalidNode,
            AppError::QuotaExceeded(_) => ErrorCode::QuotaExceeded,
            AppError::InvalidRequest(_) => ErrorCode::InvalidRequest,
            AppError::Internal(_) => ErrorCode::Internal,
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let code = self.code();
        let status = StatusCode::from_u16(code.http_status()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);

        let body = match self {
            AppError::MissingNodes(missing) => {
                ErrorBody::new(code, "referenced nodes are not yet known to the server").with_missing_nodes(missing)
            }
            AppError::Internal(err) => {
                tracing::error!("internal error: {err:#}");
                ErrorBody::new(code, "internal error")
            }
            AppError::Unauthorized(msg)
            | AppError::Forbidden(msg)
            | AppError::NotFound(msg)
            | AppError::Gone(msg)
            | AppError::Conflict(msg)
            | AppError::HashMismatch(msg)
            | AppError::InvalidNode(msg)
            | AppError::QuotaExceeded(msg)
            | AppError::InvalidRequest(msg) => ErrorBody::new(code, msg),
        };

        (status, Json(body)).into_response()
    }
}

impl From<sqlx::Error> for AppError {
    fn from(err: sqlx::Error) -> Self {
        AppError::Internal(err.into())
    }
}

impl From<anyhow::Error> for AppError {
    fn from(err: anyhow::Error) -> Self {
        AppError::Internal(err)
    }
}

impl From<std::io::Error> for AppError {
    fn from(err: std::io::Error) -> Self {
        AppError::Internal(err.into())
    }
}
