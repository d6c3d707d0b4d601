use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};

use crate::agent::AgentError;

/// Structured error type for all API handlers.
///
/// Each variant maps to an HTTP status code, a machine-readable code string,
/// and a human-readable message. Implements [`IntoResponse`] so handlers can
/// return `Result<T, ApiError>` directly.
#[derive(Debug)]
pub enum ApiError {
    /// 401 - No authentication credentials provided.
    AuthRequired,
    /// 403 - Credentials provided but invalid.
    AuthInvalid,
    /// 404 - Generic not-found.
    NotFound,
    /// 400 - Malformed or invalid request.
    InvalidRequest(String),
    /// 400 - Session id failed validation.
    InvalidSessionId(String),
    /// 400 - Action name is not one the canvas understands.
    UnknownAction(String),
    /// 404 - No live canvas is registered for the session.
    ClientNotConnected,
    /// 502 - The canvas connection failed while a call was in flight.
    TransportFailed(String),
    /// 502 - The language model request failed or never produced a reply.
    ModelFailed(String),
    /// 500 - Catch-all internal error.
    InternalError(String),
}

impl ApiError {
    /// Returns the HTTP status code for this error variant.
    pub fn status_code(&self) -> StatusCode {
        match self {
            ApiError::AuthRequired => StatusCode::UNAUTHORIZED,
            ApiError::AuthInvalid => StatusCode::FORBIDDEN,
            ApiError::NotFound => StatusCode::NOT_FOUND,
            ApiError::InvalidRequest(_) => StatusCode::BAD_REQUEST,
            ApiError::InvalidSessionId(_) => StatusCode::BAD_REQUEST,
            ApiError::UnknownAction(_) => StatusCode::BAD_REQUEST,
            ApiError::ClientNotConnected => StatusCode::NOT_FOUND,
            ApiError::TransportFailed(_) => StatusCode::BAD_GATEWAY,
            ApiError::ModelFailed(_) => StatusCode::BAD_GATEWAY,
            ApiError::InternalError(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Returns a machine-readable error code string.
    pub fn code(&self) -> &'static str {
        match self {
            ApiError::AuthRequired => "auth_required",
            ApiError::AuthInvalid => "auth_invalid",
            ApiError::NotFound => "not_found",
            ApiError::InvalidRequest(_) => "invalid_request",
            ApiError::InvalidSessionId(_) => "invalid_session_id",
            ApiError::UnknownAction(_) => "unknown_action",
            ApiError::ClientNotConnected => "client_not_connected",
            ApiError::TransportFailed(_) => "transport_failed",
            ApiError::ModelFailed(_) => "model_failed",
            ApiError::InternalError(_) => "internal_error",
        }
    }

    /// Returns a human-readable error message.
    pub fn message(&self) -> String {
        match self {
            ApiError::AuthRequired => {
                "Authentication required. Provide a token via Authorization header or ?token= query parameter.".to_string()
            }
            ApiError::AuthInvalid => "Invalid authentication token.".to_string(),
            ApiError::NotFound => "Not found.".to_string(),
            ApiError::InvalidRequest(detail) => format!("Invalid request: {}.", detail),
            ApiError::InvalidSessionId(detail) => format!("Invalid session id: {}.", detail),
            ApiError::UnknownAction(name) => format!("Unknown action: {}.", name),
            ApiError::ClientNotConnected => "Client not connected.".to_string(),
            ApiError::TransportFailed(detail) => format!("Canvas transport failed: {}.", detail),
            ApiError::ModelFailed(detail) => format!("Model request failed: {}.", detail),
            ApiError::InternalError(detail) => format!("Internal error: {}.", detail),
        }
    }
}

impl From<AgentError> for ApiError {
    fn from(err: AgentError) -> Self {
        match err {
            AgentError::NotConnected => ApiError::ClientNotConnected,
            AgentError::Transport(e) => ApiError::TransportFailed(e.to_string()),
            AgentError::Model(e) => ApiError::ModelFailed(e.to_string()),
            e @ AgentError::StepLimit(_) => ApiError::ModelFailed(e.to_string()),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = serde_json::json!({
            "error": {
                "code": self.code(),
                "message": self.message(),
            }
        });
        (self.status_code(), Json(body)).into_response()
    }
}
