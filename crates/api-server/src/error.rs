//! HTTP error mapping

use axum::{
    extract::rejection::{JsonRejection, QueryRejection},
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use thiserror::Error;
use tm_core::FieldError;

use crate::response::{ApiResponse, ErrorBody};

const GENERIC_INTERNAL_MESSAGE: &str = "An unexpected error occurred";

#[derive(Debug, Error)]
pub enum ApiError {
    #[error("Validation failed")]
    Validation(Vec<FieldError>),

    #[error("{0}")]
    BadRequest(String),

    #[error("{0}")]
    NotFound(String),

    #[error("Resource already exists")]
    Conflict,

    #[error("Too many requests, please try again later")]
    RateLimited,

    /// Carries the message actually sent to the client
    #[error("{0}")]
    Internal(String),
}

impl ApiError {
    /// Map a core error; internal details are only passed through when `expose` is set
    pub fn from_core(err: tm_core::Error, expose: bool) -> Self {
        match err {
            tm_core::Error::TaskNotFound(_) => Self::NotFound(err.to_string()),
            tm_core::Error::Validation(details) => {
                tracing::warn!("Validation failed: {:?}", details);
                Self::Validation(details)
            }
            tm_core::Error::Conflict(reason) => {
                tracing::warn!("Conflict: {}", reason);
                Self::Conflict
            }
            other => {
                tracing::error!("Internal error: {}", other);
                if expose {
                    Self::Internal(other.to_string())
                } else {
                    Self::Internal(GENERIC_INTERNAL_MESSAGE.to_string())
                }
            }
        }
    }

    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::Validation(_) => StatusCode::UNPROCESSABLE_ENTITY,
            Self::BadRequest(_) => StatusCode::BAD_REQUEST,
            Self::NotFound(_) => StatusCode::NOT_FOUND,
            Self::Conflict => StatusCode::CONFLICT,
            Self::RateLimited => StatusCode::TOO_MANY_REQUESTS,
            Self::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    pub fn error_code(&self) -> &'static str {
        match self {
            Self::Validation(_) => "VALIDATION_FAILED",
            Self::BadRequest(_) => "BAD_REQUEST",
            Self::NotFound(_) => "NOT_FOUND",
            Self::Conflict => "DUPLICATE_KEY",
            Self::RateLimited => "RATE_LIMIT_EXCEEDED",
            Self::Internal(_) => "INTERNAL_ERROR",
        }
    }
}

impl From<JsonRejection> for ApiError {
    fn from(rejection: JsonRejection) -> Self {
        match rejection {
            // Well-formed JSON of the wrong shape, e.g. an unknown status
            JsonRejection::JsonDataError(err) => Self::Validation(vec![FieldError::new(
                "body",
                err.body_text(),
            )]),
            JsonRejection::JsonSyntaxError(_) => {
                Self::BadRequest("Invalid JSON in request body".to_string())
            }
            other => Self::BadRequest(other.body_text()),
        }
    }
}

impl From<QueryRejection> for ApiError {
    fn from(rejection: QueryRejection) -> Self {
        Self::BadRequest(rejection.body_text())
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let code = self.error_code();
        let message = self.to_string();
        let details = match self {
            Self::Validation(details) => Some(details),
            _ => None,
        };

        let body = ApiResponse::failure(ErrorBody {
            code,
            message,
            details,
        });
        (status, Json(body)).into_response()
    }
}
