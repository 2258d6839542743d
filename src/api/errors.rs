use axum::http::{header, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;

use crate::core::time::format_primitive;
use crate::schemas::attempt::AttemptSummary;
use crate::services::attempt_orchestrator::AttemptError;

#[derive(Debug, Serialize)]
struct ErrorResponse {
    status: u16,
    detail: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    code: Option<&'static str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    expires_at: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    prior_attempts: Option<Vec<AttemptSummary>>,
}

impl ErrorResponse {
    fn plain(status: StatusCode, detail: impl Into<String>) -> Self {
        Self {
            status: status.as_u16(),
            detail: detail.into(),
            code: None,
            expires_at: None,
            prior_attempts: None,
        }
    }
}

#[derive(Debug)]
pub(crate) enum ApiError {
    Unauthorized(&'static str),
    Forbidden(&'static str),
    BadRequest(String),
    NotFound(String),
    Conflict(String),
    MaxAttemptsReached(Vec<AttemptSummary>),
    AttemptExpired { expires_at: String },
    Internal(String),
}

impl ApiError {
    /// Log the underlying error with context and return an `Internal` variant.
    pub(crate) fn internal(err: impl std::fmt::Display, context: &str) -> Self {
        tracing::error!(error = %err, "{context}");
        Self::Internal(context.to_string())
    }
}

impl From<AttemptError> for ApiError {
    fn from(err: AttemptError) -> Self {
        match err {
            AttemptError::TestNotFound => Self::NotFound("Test not found".to_string()),
            AttemptError::AttemptNotFound => Self::NotFound("Attempt not found".to_string()),
            AttemptError::TestInactive => Self::Conflict("Test is not active".to_string()),
            AttemptError::EmptyTest => {
                Self::Conflict("Test has no questions worth any points".to_string())
            }
            AttemptError::Forbidden => Self::Forbidden("Access denied"),
            AttemptError::MaxAttemptsReached { prior } => {
                Self::MaxAttemptsReached(prior.iter().map(AttemptSummary::from).collect())
            }
            AttemptError::AlreadySubmitted { .. } => {
                Self::Conflict("Attempt was already submitted".to_string())
            }
            AttemptError::AttemptExpiredOnSubmit { expires_at } => {
                Self::AttemptExpired { expires_at: format_primitive(expires_at) }
            }
            AttemptError::NotAwaitingGrading { status } => {
                Self::Conflict(format!("Attempt is {}, not awaiting grading", status.as_str()))
            }
            AttemptError::Store(err) => Self::internal(err, "Assessment store failure"),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        match self {
            ApiError::Unauthorized(message) => {
                let status = StatusCode::UNAUTHORIZED;
                let mut response =
                    (status, Json(ErrorResponse::plain(status, message))).into_response();
                response
                    .headers_mut()
                    .insert(header::WWW_AUTHENTICATE, HeaderValue::from_static("Bearer"));
                response
            }
            ApiError::Forbidden(message) => {
                let status = StatusCode::FORBIDDEN;
                (status, Json(ErrorResponse::plain(status, message))).into_response()
            }
            ApiError::BadRequest(message) => {
                let status = StatusCode::BAD_REQUEST;
                (status, Json(ErrorResponse::plain(status, message))).into_response()
            }
            ApiError::NotFound(message) => {
                let status = StatusCode::NOT_FOUND;
                (status, Json(ErrorResponse::plain(status, message))).into_response()
            }
            ApiError::Conflict(message) => {
                let status = StatusCode::CONFLICT;
                (status, Json(ErrorResponse::plain(status, message))).into_response()
            }
            ApiError::MaxAttemptsReached(prior) => {
                let status = StatusCode::CONFLICT;
                let body = ErrorResponse {
                    code: Some("max_attempts_reached"),
                    prior_attempts: Some(prior),
                    ..ErrorResponse::plain(status, "Maximum number of attempts reached")
                };
                (status, Json(body)).into_response()
            }
            ApiError::AttemptExpired { expires_at } => {
                let status = StatusCode::BAD_REQUEST;
                let body = ErrorResponse {
                    code: Some("attempt_expired"),
                    expires_at: Some(expires_at),
                    ..ErrorResponse::plain(status, "Attempt time limit has passed")
                };
                (status, Json(body)).into_response()
            }
            ApiError::Internal(message) => {
                tracing::error!(error = %message, "Internal server error");
                let status = StatusCode::INTERNAL_SERVER_ERROR;
                (status, Json(ErrorResponse::plain(status, message))).into_response()
            }
        }
    }
}
