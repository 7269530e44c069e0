use axum::extract::rejection::{JsonRejection, QueryRejection};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use order_types::domain::order::DomainError;
use order_types::ports::order_repository::RepoError;
use thiserror::Error;

use crate::inbound::http::ApiResponse;

#[derive(Error, Debug)]
pub enum AppError {
    #[error("{0}")]
    BadRequest(String),

    #[error("User ID required")]
    Unauthenticated,

    #[error("{0}")]
    Forbidden(String),

    #[error("{0}")]
    NotFound(String),

    #[error("{0}")]
    Conflict(String),

    #[error("Insufficient stock for product: {0}")]
    InsufficientStock(String),

    #[error("{0}")]
    ProductFetch(String),

    #[error("Internal error")]
    Internal(#[from] anyhow::Error),
}

impl AppError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            AppError::BadRequest(_)
            | AppError::InsufficientStock(_)
            | AppError::ProductFetch(_) => StatusCode::BAD_REQUEST,
            AppError::Unauthenticated => StatusCode::UNAUTHORIZED,
            AppError::Forbidden(_) => StatusCode::FORBIDDEN,
            AppError::NotFound(_) => StatusCode::NOT_FOUND,
            AppError::Conflict(_) => StatusCode::CONFLICT,
            AppError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl From<DomainError> for AppError {
    fn from(e: DomainError) -> Self {
        match e {
            DomainError::Validation(m) => AppError::BadRequest(m),
            DomainError::AmountOverflow => AppError::BadRequest(e.to_string()),
            DomainError::InvalidTransition { .. } | DomainError::InvalidPaymentTransition { .. } => {
                AppError::Conflict(e.to_string())
            }
        }
    }
}

impl From<RepoError> for AppError {
    fn from(e: RepoError) -> Self {
        match e {
            RepoError::StaleRevision(_) => {
                AppError::Conflict("Order was modified concurrently, retry".into())
            }
            other => AppError::Internal(anyhow::anyhow!(other.to_string())),
        }
    }
}

impl From<JsonRejection> for AppError {
    fn from(e: JsonRejection) -> Self {
        AppError::BadRequest(e.body_text())
    }
}

impl From<QueryRejection> for AppError {
    fn from(e: QueryRejection) -> Self {
        AppError::BadRequest(e.body_text())
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let code = self.status_code();
        let msg = match &self {
            AppError::Internal(e) => {
                tracing::error!(error = %e, "request failed");
                "Internal server error".to_string()
            }
            other => other.to_string(),
        };

        let body = serde_json::to_string(&ApiResponse::<()>::error(msg))
            .unwrap_or_else(|_| "{\"success\":false,\"message\":\"internal serialization\"}".into());
        (code, [("content-type", "application/json")], body).into_response()
    }
}
