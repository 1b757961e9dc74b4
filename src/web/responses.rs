use axum::Json;
use axum::http::StatusCode;
use serde::Serialize;
use tracing::error;

/// Canonical JSON payload for error responses: `{"success": false, "error": "..."}`.
#[derive(Debug, Serialize, Clone)]
pub struct ApiError {
    pub success: bool,
    pub error: String,
}

impl ApiError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            success: false,
            error: message.into(),
        }
    }
}

pub type JsonError = (StatusCode, Json<ApiError>);
pub type ApiResult<T> = Result<T, JsonError>;

/// Payload for mutations that only report success.
#[derive(Debug, Serialize, Clone)]
pub struct Success {
    pub success: bool,
}

impl Success {
    pub fn ok() -> Json<Self> {
        Json(Self { success: true })
    }
}

/// Helper for controllers that need to return `(StatusCode, Json<ApiError>)`.
pub fn json_error(status: StatusCode, message: impl Into<String>) -> JsonError {
    (status, Json(ApiError::new(message)))
}

pub fn bad_request(message: impl Into<String>) -> JsonError {
    json_error(StatusCode::BAD_REQUEST, message)
}

pub fn not_found(message: impl Into<String>) -> JsonError {
    json_error(StatusCode::NOT_FOUND, message)
}

pub fn conflict(message: impl Into<String>) -> JsonError {
    json_error(StatusCode::CONFLICT, message)
}

/// Logs the error and hides it behind a generic 500.
pub fn internal_error(err: impl Into<anyhow::Error>) -> JsonError {
    let err = err.into();
    error!(?err, "unhandled error while serving request");
    json_error(StatusCode::INTERNAL_SERVER_ERROR, "Server error occurred")
}

/// SQLSTATE of the database error, if `err` came from the database.
pub fn sqlstate(err: &sqlx::Error) -> Option<String> {
    match err {
        sqlx::Error::Database(db_err) => db_err.code().map(|code| code.into_owned()),
        _ => None,
    }
}

pub fn is_unique_violation(err: &sqlx::Error) -> bool {
    sqlstate(err).as_deref() == Some("23505")
}

pub fn is_foreign_key_violation(err: &sqlx::Error) -> bool {
    sqlstate(err).as_deref() == Some("23503")
}
