//! Wire types shared by the dispatcher, the WebSocket hub, and canvas clients.
//!
//! Every frame on the canvas WebSocket is a JSON text frame:
//!
//! ```text
//! server -> client  {"id":"<corr>","method":"execute_tool","params":{"action":..,"payload":..}}
//! client -> server  {"id":"<corr>","method":"tool_result","params":{"success":true,..}}
//! client -> server  {"id":7,"method":"send_message","params":{"message":..,"history":[..]}}
//! server -> client  {"id":7,"method":"send_message","result":{..}}
//! ```

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Method name of server-initiated tool invocations.
pub const EXECUTE_TOOL: &str = "execute_tool";
/// Method name of client replies to [`EXECUTE_TOOL`].
pub const TOOL_RESULT: &str = "tool_result";
/// Method name of chat submissions from the browser.
pub const SEND_MESSAGE: &str = "send_message";
/// Keepalive method.
pub const PING: &str = "ping";

pub const NOT_CONNECTED_ERROR: &str = "client not connected";
pub const NOT_FOUND_ERROR: &str = "not found";
pub const UNKNOWN_ACTION_ERROR: &str = "unknown action";

// ---------------------------------------------------------------------------
// Actions and results
// ---------------------------------------------------------------------------

/// A named canvas mutation or query the agent can ask a browser to perform.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ToolAction {
    AddElement,
    UpdateElement,
    DeleteElements,
    ClearCanvas,
    GetCanvasState,
}

impl ToolAction {
    pub const ALL: [ToolAction; 5] = [
        ToolAction::AddElement,
        ToolAction::UpdateElement,
        ToolAction::DeleteElements,
        ToolAction::ClearCanvas,
        ToolAction::GetCanvasState,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ToolAction::AddElement => "addElement",
            ToolAction::UpdateElement => "updateElement",
            ToolAction::DeleteElements => "deleteElements",
            ToolAction::ClearCanvas => "clearCanvas",
            ToolAction::GetCanvasState => "getCanvasState",
        }
    }
}

impl fmt::Display for ToolAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown action: {0}")]
pub struct UnknownAction(pub String);

impl FromStr for ToolAction {
    type Err = UnknownAction;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        ToolAction::ALL
            .into_iter()
            .find(|action| action.as_str() == s)
            .ok_or_else(|| UnknownAction(s.to_string()))
    }
}

/// Outcome of one tool invocation.
///
/// Field names follow the browser's camelCase convention so results
/// round-trip unchanged between the canvas, the dispatcher, and the agent.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolCallResult {
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub element_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

impl ToolCallResult {
    pub fn ok() -> Self {
        Self {
            success: true,
            ..Default::default()
        }
    }

    pub fn failure(error: impl Into<String>) -> Self {
        Self {
            success: false,
            error: Some(error.into()),
            ..Default::default()
        }
    }

    pub fn with_element_id(mut self, element_id: impl Into<String>) -> Self {
        self.element_id = Some(element_id.into());
        self
    }

    pub fn with_data(mut self, data: Value) -> Self {
        self.data = Some(data);
        self
    }
}

// ---------------------------------------------------------------------------
// Correlation
// ---------------------------------------------------------------------------

/// Ties one outbound `execute_tool` frame to its `tool_result` reply.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CorrelationId(String);

impl CorrelationId {
    pub fn generate() -> Self {
        Self(uuid::Uuid::new_v4().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for CorrelationId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

impl From<String> for CorrelationId {
    fn from(value: String) -> Self {
        Self(value)
    }
}

impl fmt::Display for CorrelationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

// ---------------------------------------------------------------------------
// Envelope types
// ---------------------------------------------------------------------------

/// Incoming WebSocket request (JSON-RPC-ish).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WsRequest {
    /// Optional request id, echoed back in the response.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<Value>,
    pub method: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub params: Option<Value>,
}

/// Outgoing WebSocket response to a client-initiated request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WsResponse {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub method: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<WsError>,
}

impl WsResponse {
    /// Build a successful response.
    pub fn success(id: Option<Value>, method: &str, result: Value) -> Self {
        Self {
            id,
            method: Some(method.to_owned()),
            result: Some(result),
            error: None,
        }
    }

    /// Build an error response tied to a particular request.
    pub fn error(id: Option<Value>, method: &str, code: &str, message: &str) -> Self {
        Self {
            id,
            method: Some(method.to_owned()),
            result: None,
            error: Some(WsError {
                code: code.to_owned(),
                message: message.to_owned(),
            }),
        }
    }

    /// Build a protocol-level error (no method or id available).
    pub fn protocol_error(code: &str, message: &str) -> Self {
        Self {
            id: None,
            method: None,
            result: None,
            error: Some(WsError {
                code: code.to_owned(),
                message: message.to_owned(),
            }),
        }
    }
}

/// Error payload inside a [`WsResponse`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WsError {
    pub code: String,
    pub message: String,
}

/// Parameters of an `execute_tool` invocation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecuteToolParams {
    pub action: String,
    #[serde(default)]
    pub payload: Value,
}

/// Frames the server pushes to a canvas connection.
#[derive(Debug, Clone, PartialEq)]
pub enum ServerFrame {
    /// Sent once after the upgrade completes.
    Hello {
        session: Option<String>,
        connection: String,
    },
    /// Server-initiated tool invocation awaiting a `tool_result`.
    Invoke {
        id: CorrelationId,
        action: ToolAction,
        payload: Value,
    },
    /// Reply to a client-initiated request.
    Response(WsResponse),
}

impl ServerFrame {
    pub fn to_json(&self) -> Value {
        match self {
            ServerFrame::Hello {
                session,
                connection,
            } => serde_json::json!({
                "connected": true,
                "session": session,
                "connection": connection,
            }),
            ServerFrame::Invoke {
                id,
                action,
                payload,
            } => serde_json::json!({
                "id": id,
                "method": EXECUTE_TOOL,
                "params": ExecuteToolParams {
                    action: action.as_str().to_string(),
                    payload: payload.clone(),
                },
            }),
            ServerFrame::Response(response) => {
                serde_json::to_value(response).unwrap_or(Value::Null)
            }
        }
    }

    pub fn to_text(&self) -> String {
        self.to_json().to_string()
    }
}
