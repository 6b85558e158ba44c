//! API errors and their JSON responses.
//!
//! Body shape: `{"error": {"code": ..., "message": ..., "suggestion": ...}}`.

use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde_json::json;

use crate::error::DbError;

#[derive(Debug)]
pub enum ApiError {
    /// Data-layer failure, status picked from the variant.
    Db(DbError),

    /// Request is malformed (400)
    BadRequest { message: String },

    /// Resource not found (404)
    NotFound { resource: &'static str, id: String },
}

impl ApiError {
    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::BadRequest {
            message: message.into(),
        }
    }

    pub fn not_found(resource: &'static str, id: impl ToString) -> Self {
        Self::NotFound {
            resource,
            id: id.to_string(),
        }
    }

    pub fn status(&self) -> StatusCode {
        match self {
            Self::Db(DbError::DuplicateKey { .. }) => StatusCode::CONFLICT,
            Self::Db(DbError::ReferentialIntegrity { .. }) => StatusCode::BAD_REQUEST,
            Self::Db(DbError::Connectivity { .. }) => StatusCode::SERVICE_UNAVAILABLE,
            Self::Db(DbError::Execution { .. } | DbError::Aggregation { .. }) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
            Self::BadRequest { .. } => StatusCode::BAD_REQUEST,
            Self::NotFound { .. } => StatusCode::NOT_FOUND,
        }
    }

    fn code(&self) -> &'static str {
        match self {
            Self::Db(DbError::Connectivity { .. }) => "connectivity_error",
            Self::Db(DbError::Execution { .. }) => "execution_error",
            Self::Db(DbError::DuplicateKey { .. }) => "duplicate_key",
            Self::Db(DbError::ReferentialIntegrity { .. }) => "referential_integrity",
            Self::Db(DbError::Aggregation { .. }) => "aggregation_error",
            Self::BadRequest { .. } => "bad_request",
            Self::NotFound { .. } => "not_found",
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            tracing::error!(status = status.as_u16(), error = ?self, "Request failed");
        }

        let (message, suggestion) = match &self {
            Self::Db(e) => (e.to_string(), e.suggestion().map(str::to_string)),
            Self::BadRequest { message } => (message.clone(), None),
            Self::NotFound { resource, id } => (format!("{} '{}' not found", resource, id), None),
        };

        let mut error = json!({
            "code": self.code(),
            "message": message,
        });
        if let Some(suggestion) = suggestion {
            error["suggestion"] = json!(suggestion);
        }

        (status, Json(json!({ "error": error }))).into_response()
    }
}

impl From<DbError> for ApiError {
    fn from(e: DbError) -> Self {
        Self::Db(e)
    }
}

pub type ApiResult<T> = Result<T, ApiError>;
