// HTTP API Error Types
use axum::{http::StatusCode, response::IntoResponse, Json};
use serde_json::{json, Value};

use crate::comments::service::CommentError;
use crate::import::token::TokenError;
use crate::import::ImportError;

/// HTTP API error with appropriate status codes and client-friendly messages
#[derive(Debug)]
pub enum ApiError {
    // 400 Bad Request
    BadRequest(String),
    InvalidSpreadsheet(String),

    // 401 Unauthorized
    Unauthorized(String),
    TokenExpired(String),
    TokenInvalid(String),

    // 403 Forbidden
    Forbidden(String),
    TokenWrongInstitution(String),

    // 404 Not Found
    NotFound(String),

    // 409 Conflict
    Conflict(String),
    DataChanged(String),

    // 422 Unprocessable Entity
    TokenWrongType(String),

    // 500 Internal Server Error
    InternalServerError(String),

    // 503 Service Unavailable
    ServiceUnavailable(String),
}

impl ApiError {
    /// Get HTTP status code
    pub fn status_code(&self) -> u16 {
        match self {
            ApiError::BadRequest(_) => 400,
            ApiError::InvalidSpreadsheet(_) => 400,
            ApiError::Unauthorized(_) => 401,
            ApiError::TokenExpired(_) => 401,
            ApiError::TokenInvalid(_) => 401,
            ApiError::Forbidden(_) => 403,
            ApiError::TokenWrongInstitution(_) => 403,
            ApiError::NotFound(_) => 404,
            ApiError::Conflict(_) => 409,
            ApiError::DataChanged(_) => 409,
            ApiError::TokenWrongType(_) => 422,
            ApiError::InternalServerError(_) => 500,
            ApiError::ServiceUnavailable(_) => 503,
        }
    }

    /// Get client-safe error message
    pub fn message(&self) -> &str {
        match self {
            ApiError::BadRequest(msg)
            | ApiError::InvalidSpreadsheet(msg)
            | ApiError::Unauthorized(msg)
            | ApiError::TokenExpired(msg)
            | ApiError::TokenInvalid(msg)
            | ApiError::Forbidden(msg)
            | ApiError::TokenWrongInstitution(msg)
            | ApiError::NotFound(msg)
            | ApiError::Conflict(msg)
            | ApiError::DataChanged(msg)
            | ApiError::TokenWrongType(msg)
            | ApiError::InternalServerError(msg)
            | ApiError::ServiceUnavailable(msg) => msg,
        }
    }

    /// Get error code for client handling
    pub fn error_code(&self) -> &'static str {
        match self {
            ApiError::BadRequest(_) => "BAD_REQUEST",
            ApiError::InvalidSpreadsheet(_) => "INVALID_SPREADSHEET",
            ApiError::Unauthorized(_) => "UNAUTHORIZED",
            ApiError::TokenExpired(_) => "TOKEN_EXPIRED",
            ApiError::TokenInvalid(_) => "TOKEN_INVALID",
            ApiError::Forbidden(_) => "FORBIDDEN",
            ApiError::TokenWrongInstitution(_) => "TOKEN_WRONG_INSTITUTION",
            ApiError::NotFound(_) => "NOT_FOUND",
            ApiError::Conflict(_) => "CONFLICT",
            ApiError::DataChanged(_) => "DATA_CHANGED",
            ApiError::TokenWrongType(_) => "TOKEN_WRONG_TYPE",
            ApiError::InternalServerError(_) => "INTERNAL_SERVER_ERROR",
            ApiError::ServiceUnavailable(_) => "SERVICE_UNAVAILABLE",
        }
    }

    /// Convert to JSON response body
    pub fn to_json(&self) -> Value {
        json!({
            "success": false,
            "error": self.message(),
            "code": self.error_code()
        })
    }
}

// Static constructor methods
impl ApiError {
    pub fn bad_request(message: impl Into<String>) -> Self {
        ApiError::BadRequest(message.into())
    }

    pub fn unauthorized(message: impl Into<String>) -> Self {
        ApiError::Unauthorized(message.into())
    }

    pub fn forbidden(message: impl Into<String>) -> Self {
        ApiError::Forbidden(message.into())
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        ApiError::NotFound(message.into())
    }

    pub fn conflict(message: impl Into<String>) -> Self {
        ApiError::Conflict(message.into())
    }

    pub fn internal_server_error(message: impl Into<String>) -> Self {
        ApiError::InternalServerError(message.into())
    }

    pub fn service_unavailable(message: impl Into<String>) -> Self {
        ApiError::ServiceUnavailable(message.into())
    }
}

// Convert module error types to ApiError
impl From<crate::database::manager::DatabaseError> for ApiError {
    fn from(err: crate::database::manager::DatabaseError) -> Self {
        match err {
            crate::database::manager::DatabaseError::NotFound(msg) => ApiError::not_found(msg),
            crate::database::manager::DatabaseError::ConfigMissing(_) => {
                ApiError::service_unavailable("Database is not configured")
            }
            other => {
                tracing::error!("database error: {}", other);
                ApiError::internal_server_error("An error occurred while processing your request")
            }
        }
    }
}

impl From<TokenError> for ApiError {
    fn from(err: TokenError) -> Self {
        let msg = err.to_string();
        match err {
            TokenError::Expired => ApiError::TokenExpired(msg),
            TokenError::Malformed => ApiError::TokenInvalid(msg),
            TokenError::WrongType => ApiError::TokenWrongType(msg),
            TokenError::WrongInstitution => ApiError::TokenWrongInstitution(msg),
            TokenError::DataChanged => ApiError::DataChanged(msg),
            TokenError::MissingSecret => {
                tracing::error!("token signing secret is not configured");
                ApiError::service_unavailable("Token service is not configured")
            }
        }
    }
}

impl From<ImportError> for ApiError {
    fn from(err: ImportError) -> Self {
        match err {
            ImportError::Token(token_err) => token_err.into(),
            ImportError::Database(db_err) => db_err.into(),
            ImportError::MissingReference(msg) => {
                tracing::error!("save aborted, missing reference: {}", msg);
                ApiError::internal_server_error("Save failed; no rows were written")
            }
            ImportError::Sqlx(sqlx_err) => {
                tracing::error!("sqlx error during import: {}", sqlx_err);
                ApiError::internal_server_error("Save failed; no rows were written")
            }
        }
    }
}

impl From<CommentError> for ApiError {
    fn from(err: CommentError) -> Self {
        match err {
            CommentError::NotFound(msg) => ApiError::not_found(msg),
            CommentError::Forbidden(msg) => ApiError::forbidden(msg),
            CommentError::AlreadyDeleted(msg) => ApiError::conflict(msg),
            CommentError::Database(sqlx_err) => {
                tracing::error!("comment query error: {}", sqlx_err);
                ApiError::internal_server_error("An error occurred while processing your request")
            }
        }
    }
}

// Standard error trait implementations
impl std::fmt::Display for ApiError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.message())
    }
}

impl std::error::Error for ApiError {}

// Automatic HTTP response conversion for Axum
impl IntoResponse for ApiError {
    fn into_response(self) -> axum::response::Response {
        let status =
            StatusCode::from_u16(self.status_code()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        (status, Json(self.to_json())).into_response()
    }
}
