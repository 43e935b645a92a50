use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;

use crate::agents::errors::AgentError;

/// API error type with HTTP status code and message
#[derive(Debug)]
pub struct ApiError {
    pub status: StatusCode,
    pub message: String,
}

impl ApiError {
    /// Creates a new API error
    pub fn new(status: StatusCode, message: impl Into<String>) -> Self {
        Self {
            status,
            message: message.into(),
        }
    }

    /// Creates a 400 Bad Request error
    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, message)
    }

    /// Creates a 409 Conflict error
    pub fn conflict(message: impl Into<String>) -> Self {
        Self::new(StatusCode::CONFLICT, message)
    }

    /// Creates a 422 Unprocessable Entity error
    pub fn unprocessable(message: impl Into<String>) -> Self {
        Self::new(StatusCode::UNPROCESSABLE_ENTITY, message)
    }

    /// Creates a 404 Not Found error
    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(StatusCode::NOT_FOUND, message)
    }

    /// Creates a 500 Internal Server Error
    pub fn internal_server_error(message: impl Into<String>) -> Self {
        Self::new(StatusCode::INTERNAL_SERVER_ERROR, message)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = Json(json!({
            "error": self.message
        }));

        (self.status, body).into_response()
    }
}

/// Maps core failures onto HTTP statuses
///
/// Plans the system cannot act on are 422, oracle transport failures are
/// 502, and everything that went wrong while executing is 500.
impl From<AgentError> for ApiError {
    fn from(err: AgentError) -> Self {
        let status = match &err {
            AgentError::Planning(_)
            | AgentError::MalformedResponse { .. }
            | AgentError::UnknownRole(_)
            | AgentError::DependencyDeadlock { .. } => StatusCode::UNPROCESSABLE_ENTITY,
            AgentError::InvalidMessage(_) => StatusCode::BAD_REQUEST,
            AgentError::AgentNotFound(_) | AgentError::SyncPointNotFound(_) => StatusCode::NOT_FOUND,
            AgentError::InvalidStateTransition { .. } => StatusCode::CONFLICT,
            AgentError::Oracle(_) => StatusCode::BAD_GATEWAY,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };
        Self::new(status, err.to_string())
    }
}

impl From<String> for ApiError {
    fn from(message: String) -> Self {
        Self::internal_server_error(message)
    }
}

impl From<&str> for ApiError {
    fn from(message: &str) -> Self {
        Self::internal_server_error(message)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn agent_errors_map_to_statuses() {
        let cases = [
            (AgentError::Planning("empty".into()), StatusCode::UNPROCESSABLE_ENTITY),
            (
                AgentError::DependencyDeadlock { pending: vec!["a".into()] },
                StatusCode::UNPROCESSABLE_ENTITY,
            ),
            (AgentError::Oracle("down".into()), StatusCode::BAD_GATEWAY),
            (AgentError::AgentNotFound("x".into()), StatusCode::NOT_FOUND),
            (
                AgentError::PhaseExecution { phase: "p".into(), message: "m".into() },
                StatusCode::INTERNAL_SERVER_ERROR,
            ),
        ];

        for (err, status) in cases {
            assert_eq!(ApiError::from(err).status, status);
        }
    }

    #[test]
    fn message_keeps_error_text() {
        let err = ApiError::from(AgentError::UnknownRole("wizard".into()));
        assert!(err.message.contains("wizard"));
    }
}
