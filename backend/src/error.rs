use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use log::error;
use serde_json::json;
use thiserror::Error;

use crate::domain::DomainError;

/// Error returned by REST handlers
#[derive(Error, Debug)]
pub enum ApiError {
    #[error("{0}")]
    BadRequest(String),

    #[error("Unauthorized")]
    Unauthorized,

    #[error("{0}")]
    Forbidden(String),

    #[error("{0}")]
    NotFound(String),

    #[error("{message}")]
    Internal { message: String, details: String },
}

impl ApiError {
    pub fn internal(message: &str, err: anyhow::Error) -> Self {
        Self::from_domain(err).unwrap_or_else(|err| {
            error!("{}: {:?}", message, err);
            ApiError::Internal {
                message: message.to_string(),
                details: err.to_string(),
            }
        })
    }

    fn from_domain(err: anyhow::Error) -> Result<Self, anyhow::Error> {
        match err.downcast::<DomainError>() {
            Ok(DomainError::Validation(msg)) => Ok(ApiError::BadRequest(msg)),
            Ok(DomainError::NotFound(msg)) => Ok(ApiError::NotFound(msg)),
            Ok(DomainError::Forbidden(msg)) => Ok(ApiError::Forbidden(msg)),
            Err(err) => Err(err),
        }
    }

    pub fn status(&self) -> StatusCode {
        match self {
            ApiError::BadRequest(_) => StatusCode::BAD_REQUEST,
            ApiError::Unauthorized => StatusCode::UNAUTHORIZED,
            ApiError::Forbidden(_) => StatusCode::FORBIDDEN,
            ApiError::NotFound(_) => StatusCode::NOT_FOUND,
            ApiError::Internal { .. } => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl From<anyhow::Error> for ApiError {
    fn from(err: anyhow::Error) -> Self {
        ApiError::internal("Internal server error", err)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        let body = match &self {
            ApiError::Internal { message, details } => json!({
                "success": false,
                "error": message,
                "details": details,
            }),
            other => json!({
                "success": false,
                "error": other.to_string(),
            }),
        };
        (status, Json(body)).into_response()
    }
}
