//! API error types and JSON error response formatting.
//!
//! ApiError provides a consistent JSON error response format across all
//! endpoints, mapping engine errors to HTTP status codes.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;

use tessera_action::ActionError;

/// JSON error response body.
#[derive(Debug, Serialize)]
pub struct ErrorBody {
    /// Machine-readable error code (e.g., "bad_request", "invalid_operation").
    pub error: String,
    /// Human-readable error message.
    pub message: String,
}

/// API error type that maps to HTTP status codes and JSON responses.
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    /// 400 - missing or invalid parameters.
    #[error("{0}")]
    BadRequest(String),
    /// 401 - missing caller identity or bad internal token.
    #[error("{0}")]
    Unauthorized(String),
    /// 403 - the action belongs to another user.
    #[error("{0}")]
    Forbidden(String),
    #[error("{0}")]
    NotFound(String),
    /// 409 - the action's status does not allow the operation.
    #[error("{0}")]
    InvalidOperation(String),
    /// 409 - illegal status edge.
    #[error("{0}")]
    InvalidTransition(String),
    /// 422 - no handler is registered for the action type.
    #[error("{0}")]
    UnprocessableEntity(String),
    #[error("{0}")]
    Internal(String),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, error_code) = match &self {
            ApiError::BadRequest(_) => (StatusCode::BAD_REQUEST, "bad_request"),
            ApiError::Unauthorized(_) => (StatusCode::UNAUTHORIZED, "unauthorized"),
            ApiError::Forbidden(_) => (StatusCode::FORBIDDEN, "forbidden"),
            ApiError::NotFound(_) => (StatusCode::NOT_FOUND, "not_found"),
            ApiError::InvalidOperation(_) => (StatusCode::CONFLICT, "invalid_operation"),
            ApiError::InvalidTransition(_) => (StatusCode::CONFLICT, "invalid_transition"),
            ApiError::UnprocessableEntity(_) => {
                (StatusCode::UNPROCESSABLE_ENTITY, "unprocessable_entity")
            }
            ApiError::Internal(_) => (StatusCode::INTERNAL_SERVER_ERROR, "internal_error"),
        };

        if status.is_server_error() {
            tracing::error!(error = %self, "Request failed");
        }

        let body = ErrorBody {
            error: error_code.to_string(),
            message: self.to_string(),
        };
        (status, Json(body)).into_response()
    }
}

impl From<ActionError> for ApiError {
    fn from(err: ActionError) -> Self {
        let message = err.to_string();
        match err {
            ActionError::Validation(_) => ApiError::BadRequest(message),
            ActionError::NotFound(_) => ApiError::NotFound(message),
            ActionError::Forbidden(_) => ApiError::Forbidden(message),
            ActionError::InvalidOperation(_) => ApiError::InvalidOperation(message),
            ActionError::InvalidTransition(..) => ApiError::InvalidTransition(message),
            ActionError::UnregisteredHandler(_) => ApiError::UnprocessableEntity(message),
            ActionError::Storage(_) => ApiError::Internal(message),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tessera_core::types::{ActionStatus, ActionType};
    use uuid::Uuid;

    fn status_of(err: ActionError) -> StatusCode {
        ApiError::from(err).into_response().status()
    }

    #[test]
    fn test_action_errors_map_to_statuses() {
        let id = Uuid::new_v4();
        assert_eq!(status_of(ActionError::Validation("x".into())), StatusCode::BAD_REQUEST);
        assert_eq!(status_of(ActionError::NotFound(id)), StatusCode::NOT_FOUND);
        assert_eq!(status_of(ActionError::Forbidden(id)), StatusCode::FORBIDDEN);
        assert_eq!(
            status_of(ActionError::InvalidOperation("x".into())),
            StatusCode::CONFLICT
        );
        assert_eq!(
            status_of(ActionError::InvalidTransition(
                ActionStatus::Completed,
                ActionStatus::Rejected
            )),
            StatusCode::CONFLICT
        );
        assert_eq!(
            status_of(ActionError::UnregisteredHandler(ActionType::Note)),
            StatusCode::UNPROCESSABLE_ENTITY
        );
        assert_eq!(
            status_of(ActionError::Storage("disk".into())),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }
}
