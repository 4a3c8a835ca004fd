use axum::{
    http::{header::RETRY_AFTER, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use thiserror::Error;

use crate::analytics::models::DateRangeError;
use crate::auth::AuthError;
use crate::links::CreateLinkError;

/// Every failure an HTTP handler can report, mapped 1:1 onto a status and code.
#[derive(Debug, Error)]
pub enum ApiError {
    #[error(transparent)]
    Auth(#[from] AuthError),
    #[error(transparent)]
    CreateLink(#[from] CreateLinkError),
    #[error("request body is not valid JSON: {0}")]
    InvalidRequest(String),
    #[error(transparent)]
    InvalidDateRange(#[from] DateRangeError),
    #[error("a valid session token is required")]
    Unauthorized,
    #[error("{0} not found")]
    NotFound(&'static str),
    #[error("too many requests; retry in {0}s")]
    RateLimited(u64),
    #[error("internal error")]
    Internal(#[from] anyhow::Error),
}

#[derive(Serialize)]
pub struct ErrorBody {
    pub success: bool,
    pub code: &'static str,
    pub message: String,
}

impl ApiError {
    pub fn status(&self) -> StatusCode {
        match self {
            ApiError::Auth(err) => match err {
                AuthError::Forbidden | AuthError::InvalidKey | AuthError::InvalidSignature => {
                    StatusCode::FORBIDDEN
                }
                AuthError::MissingHeaders | AuthError::InvalidNonce => StatusCode::BAD_REQUEST,
                AuthError::Expired { .. } | AuthError::NonceUsed => StatusCode::UNAUTHORIZED,
                AuthError::RateLimited(_) => StatusCode::TOO_MANY_REQUESTS,
                AuthError::Storage(_) => StatusCode::INTERNAL_SERVER_ERROR,
            },
            ApiError::CreateLink(err) => match err {
                CreateLinkError::InvalidUrl(_) | CreateLinkError::InvalidSlug => {
                    StatusCode::BAD_REQUEST
                }
                CreateLinkError::Conflict(_) => StatusCode::CONFLICT,
                CreateLinkError::GenerationFailed
                | CreateLinkError::StoredMismatch
                | CreateLinkError::Storage(_) => StatusCode::INTERNAL_SERVER_ERROR,
            },
            ApiError::InvalidRequest(_) | ApiError::InvalidDateRange(_) => StatusCode::BAD_REQUEST,
            ApiError::Unauthorized => StatusCode::UNAUTHORIZED,
            ApiError::NotFound(_) => StatusCode::NOT_FOUND,
            ApiError::RateLimited(_) => StatusCode::TOO_MANY_REQUESTS,
            ApiError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    pub fn code(&self) -> &'static str {
        match self {
            ApiError::Auth(err) => match err {
                AuthError::Forbidden => "forbidden",
                AuthError::MissingHeaders => "missing_headers",
                AuthError::InvalidNonce => "invalid_nonce",
                AuthError::Expired { .. } => "expired",
                AuthError::NonceUsed => "nonce_used",
                AuthError::RateLimited(_) => "rate_limit_exceeded",
                AuthError::InvalidKey => "invalid_key",
                AuthError::InvalidSignature => "invalid_signature",
                AuthError::Storage(_) => "db_error",
            },
            ApiError::CreateLink(err) => match err {
                CreateLinkError::InvalidUrl(_) => "invalid_url",
                CreateLinkError::InvalidSlug => "invalid_slug",
                CreateLinkError::Conflict(_) => "conflict",
                CreateLinkError::GenerationFailed => "generation_failed",
                CreateLinkError::StoredMismatch | CreateLinkError::Storage(_) => "db_error",
            },
            ApiError::InvalidRequest(_) => "invalid_request",
            ApiError::InvalidDateRange(_) => "invalid_date_range",
            ApiError::Unauthorized => "unauthorized",
            ApiError::NotFound(_) => "not_found",
            ApiError::RateLimited(_) => "rate_limit_exceeded",
            ApiError::Internal(_) => "db_error",
        }
    }

    fn retry_after(&self) -> Option<u64> {
        match self {
            ApiError::Auth(AuthError::RateLimited(limited)) => Some(limited.retry_after_secs),
            ApiError::RateLimited(secs) => Some(*secs),
            _ => None,
        }
    }

    /// Internal details stay in the log; clients get a generic message.
    fn public_message(&self) -> String {
        match self {
            ApiError::Auth(AuthError::Storage(_))
            | ApiError::CreateLink(CreateLinkError::Storage(_))
            | ApiError::Internal(_) => "internal storage error".to_string(),
            other => other.to_string(),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            tracing::error!(code = self.code(), error = ?self, "request failed");
        }

        let body = ErrorBody {
            success: false,
            code: self.code(),
            message: self.public_message(),
        };
        let retry_after = self.retry_after();

        let mut response = (status, Json(body)).into_response();
        if let Some(secs) = retry_after {
            if let Ok(value) = HeaderValue::from_str(&secs.to_string()) {
                response.headers_mut().insert(RETRY_AFTER, value);
            }
        }
        response
    }
}
