//! Client-initiated methods on the canvas WebSocket.
//!
//! `tool_result` frames are not dispatched here: they answer a server
//! invocation and are routed straight to the dispatcher by the hub.

use serde::Deserialize;
use serde_json::json;

use crate::agent::HistoryEntry;
use crate::protocol::{WsRequest, WsResponse, PING, SEND_MESSAGE};

use super::error::ApiError;
use super::AppState;

pub const SESSION_NOT_FOUND_MESSAGE: &str = "Session not found. Please refresh the page.";

/// Parameters for the `send_message` method.
#[derive(Debug, Deserialize)]
pub struct SendMessageParams {
    pub message: String,
    #[serde(default)]
    pub history: Vec<HistoryEntry>,
}

fn parse_params<T: serde::de::DeserializeOwned>(req: &WsRequest) -> Result<T, WsResponse> {
    let params = req.params.clone().unwrap_or(serde_json::Value::Null);
    serde_json::from_value(params).map_err(|e| {
        WsResponse::error(
            req.id.clone(),
            &req.method,
            "invalid_request",
            &format!("Invalid params: {}.", e),
        )
    })
}

/// Dispatch a WebSocket request from the connection serving `session`.
///
/// `send_message` runs a whole agent turn, so callers should drive this on
/// a task separate from the socket read loop.
pub async fn dispatch(req: &WsRequest, session: Option<&str>, state: &AppState) -> WsResponse {
    let id = req.id.clone();
    let method = req.method.as_str();

    match method {
        PING => WsResponse::success(id, method, json!({ "pong": true })),
        SEND_MESSAGE => {
            let params: SendMessageParams = match parse_params(req) {
                Ok(p) => p,
                Err(e) => return e,
            };
            let Some(session) = session else {
                return WsResponse::error(id, method, "session_not_found", SESSION_NOT_FOUND_MESSAGE);
            };
            if params.message.trim().is_empty() {
                return WsResponse::error(id, method, "invalid_request", "Message must not be empty.");
            }

            match state
                .agent
                .process_message(session, &params.message, &params.history)
                .await
            {
                Ok(reply) => WsResponse::success(
                    id,
                    method,
                    json!({ "role": "assistant", "content": reply }),
                ),
                Err(e) => {
                    tracing::warn!(session = %session, error = %e, "chat turn failed");
                    let err = ApiError::from(e);
                    WsResponse::error(id, method, err.code(), &err.message())
                }
            }
        }
        _ => WsResponse::error(
            id,
            method,
            "unknown_method",
            &format!("Unknown method: {}.", method),
        ),
    }
}
