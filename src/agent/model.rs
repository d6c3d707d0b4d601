//! Language-model abstraction used by the orchestrator.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::tools::ToolSpec;

/// Abstraction over chat-completion providers.
#[async_trait]
pub trait LanguageModel: Send + Sync {
    /// Run one completion step: either a text reply or a batch of tool calls.
    async fn complete(&self, request: &ModelRequest) -> Result<ModelTurn, LlmError>;

    /// Provider name, for logs.
    fn provider(&self) -> &'static str;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
    Tool,
}

/// A tool call requested by the model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCall {
    pub id: String,
    pub name: String,
    pub arguments: Value,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: Role,
    pub content: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tool_calls: Vec<ToolCall>,
    /// Set on `Role::Tool` messages.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_call_id: Option<String>,
}

impl ChatMessage {
    fn plain(role: Role, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
            tool_calls: Vec::new(),
            tool_call_id: None,
        }
    }

    pub fn system(content: impl Into<String>) -> Self {
        Self::plain(Role::System, content)
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self::plain(Role::User, content)
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self::plain(Role::Assistant, content)
    }

    pub fn assistant_tool_calls(content: Option<String>, tool_calls: Vec<ToolCall>) -> Self {
        Self {
            role: Role::Assistant,
            content: content.unwrap_or_default(),
            tool_calls,
            tool_call_id: None,
        }
    }

    pub fn tool(tool_call_id: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            role: Role::Tool,
            content: content.into(),
            tool_calls: Vec::new(),
            tool_call_id: Some(tool_call_id.into()),
        }
    }
}

/// Request for one completion step.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelRequest {
    pub model: String,
    pub messages: Vec<ChatMessage>,
    #[serde(default)]
    pub tools: Vec<ToolSpec>,
}

/// What the model produced in one step.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ModelTurn {
    pub text: Option<String>,
    #[serde(default)]
    pub tool_calls: Vec<ToolCall>,
}

impl ModelTurn {
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            text: Some(text.into()),
            tool_calls: Vec::new(),
        }
    }

    pub fn tool_calls(tool_calls: Vec<ToolCall>) -> Self {
        Self {
            text: None,
            tool_calls,
        }
    }
}

/// Errors from model providers.
#[derive(Debug, Clone, thiserror::Error)]
pub enum LlmError {
    #[error("Rate limited")]
    RateLimited,

    #[error("Network timeout after {duration_ms}ms")]
    NetworkTimeout { duration_ms: u64 },

    #[error("Network error: {message}")]
    Network { message: String },

    #[error("Server error: {status} - {message}")]
    ServerError { status: u16, message: String },

    #[error("Invalid request: {message}")]
    InvalidRequest { message: String },

    #[error("Authentication failed: {message}")]
    AuthenticationFailed { message: String },

    #[error("Model not found: {model}")]
    ModelNotFound { model: String },

    #[error("Malformed response: {message}")]
    MalformedResponse { message: String },

    #[error("Unknown error: {message}")]
    Unknown { message: String },
}

impl LlmError {
    /// Create from HTTP status code and message
    pub fn from_http_status(status: u16, message: String) -> Self {
        match status {
            401 | 403 => Self::AuthenticationFailed { message },
            404 => Self::ModelNotFound { model: message },
            429 => Self::RateLimited,
            s if s >= 500 => Self::ServerError { status: s, message },
            s if s >= 400 => Self::InvalidRequest { message },
            _ => Self::Unknown { message },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn http_status_mapping() {
        assert!(matches!(
            LlmError::from_http_status(401, "nope".into()),
            LlmError::AuthenticationFailed { .. }
        ));
        assert!(matches!(LlmError::from_http_status(429, String::new()), LlmError::RateLimited));
        assert!(matches!(
            LlmError::from_http_status(502, "bad gateway".into()),
            LlmError::ServerError { status: 502, .. }
        ));
        assert!(matches!(
            LlmError::from_http_status(422, "bad".into()),
            LlmError::InvalidRequest { .. }
        ));
    }

    #[test]
    fn tool_message_carries_call_id() {
        let msg = ChatMessage::tool("call_1", "{}");
        assert_eq!(msg.role, Role::Tool);
        assert_eq!(msg.tool_call_id.as_deref(), Some("call_1"));
        let value = serde_json::to_value(&msg).unwrap();
        assert!(value.get("tool_calls").is_none());
    }
}
