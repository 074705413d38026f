//! Unified error handling for the API

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};

use hearth_core::error::HearthError;
use hearth_core::proto::ErrorBody;

pub const CODE_NOT_FOUND: &str = "NOT_FOUND";
pub const CODE_BAD_REQUEST: &str = "BAD_REQUEST";
pub const CODE_PERMISSION_DENIED: &str = "PERMISSION_DENIED";
pub const CODE_INTERNAL: &str = "INTERNAL_ERROR";

/// Application error types
#[derive(Debug)]
pub enum AppError {
    NotFound(String),
    BadRequest(String),
    PermissionDenied(String),
    Internal(String),
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, code, message) = match self {
            AppError::NotFound(msg) => (StatusCode::NOT_FOUND, CODE_NOT_FOUND, msg),
            AppError::BadRequest(msg) => (StatusCode::BAD_REQUEST, CODE_BAD_REQUEST, msg),
            AppError::PermissionDenied(msg) => {
                (StatusCode::FORBIDDEN, CODE_PERMISSION_DENIED, msg)
            }
            AppError::Internal(msg) => (StatusCode::INTERNAL_SERVER_ERROR, CODE_INTERNAL, msg),
        };

        (
            status,
            Json(ErrorBody {
                message,
                code: code.to_string(),
            }),
        )
            .into_response()
    }
}

impl From<HearthError> for AppError {
    fn from(err: HearthError) -> Self {
        if err.is_not_found() {
            return AppError::NotFound(err.to_string());
        }
        match err {
            HearthError::PermissionDenied => AppError::PermissionDenied(err.to_string()),
            HearthError::InvalidRequest(_) | HearthError::SessionBusy(_) | HearthError::Hook(_) => {
                AppError::BadRequest(err.to_string())
            }
            other => {
                tracing::error!("Internal error: {:?}", other);
                AppError::Internal(other.to_string())
            }
        }
    }
}

impl From<anyhow::Error> for AppError {
    fn from(err: anyhow::Error) -> Self {
        tracing::error!("Internal error: {:?}", err);
        AppError::Internal(err.to_string())
    }
}

impl From<serde_json::Error> for AppError {
    fn from(err: serde_json::Error) -> Self {
        AppError::BadRequest(format!("JSON error: {}", err))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use hearth_core::hooks::HookError;

    fn status_of(err: HearthError) -> StatusCode {
        AppError::from(err).into_response().status()
    }

    #[test]
    fn core_errors_map_to_status_codes() {
        assert_eq!(
            status_of(HearthError::InstanceNotFound("x".into())),
            StatusCode::NOT_FOUND
        );
        assert_eq!(
            status_of(HearthError::TaskNotFound("x".into())),
            StatusCode::NOT_FOUND
        );
        assert_eq!(
            status_of(HearthError::PermissionDenied),
            StatusCode::FORBIDDEN
        );
        assert_eq!(
            status_of(HearthError::InvalidRequest("empty path".into())),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            status_of(HearthError::Hook(HookError::UnsupportedType("prompt".into()))),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            status_of(HearthError::Other(anyhow::anyhow!("boom"))),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }
}
