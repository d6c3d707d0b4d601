use std::time::Duration;

use axum::{
    extract::{
        ws::{CloseFrame, Message, WebSocket, WebSocketUpgrade},
        Path, Query, State,
    },
    response::IntoResponse,
    Json,
};
use futures::{SinkExt, StreamExt};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::mpsc;

use crate::agent::HistoryEntry;
use crate::dispatch::PendingSummary;
use crate::protocol::{
    CorrelationId, ServerFrame, ToolAction, ToolCallResult, WsRequest, WsResponse, SEND_MESSAGE,
    TOOL_RESULT,
};
use crate::session::{validate_session_id, Connection, ConnectionId, SessionInfo};

use super::error::ApiError;
use super::ws_methods;
use super::AppState;

/// Frames queued for one canvas socket before senders start waiting.
const OUTBOUND_QUEUE: usize = 64;

#[derive(Serialize)]
pub(super) struct HealthResponse {
    status: &'static str,
}

pub(super) async fn health() -> Json<HealthResponse> {
    Json(HealthResponse { status: "ok" })
}

// ---------------------------------------------------------------------------
// Chat
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(super) struct ChatRequest {
    session_id: String,
    message: String,
    #[serde(default)]
    history: Vec<HistoryEntry>,
}

#[derive(Debug, Serialize)]
pub(super) struct ChatResponse {
    response: String,
}

pub(super) async fn chat(
    State(state): State<AppState>,
    Json(req): Json<ChatRequest>,
) -> Result<Json<ChatResponse>, ApiError> {
    if req.message.trim().is_empty() {
        return Err(ApiError::InvalidRequest("message must not be empty".into()));
    }
    validate_session_id(&req.session_id).map_err(ApiError::InvalidSessionId)?;

    let response = state
        .agent
        .process_message(&req.session_id, &req.message, &req.history)
        .await
        .map_err(|e| {
            tracing::warn!(session = %req.session_id, error = %e, "chat turn failed");
            ApiError::from(e)
        })?;
    Ok(Json(ChatResponse { response }))
}

// ---------------------------------------------------------------------------
// Sessions
// ---------------------------------------------------------------------------

pub(super) async fn session_list(State(state): State<AppState>) -> Json<Vec<SessionInfo>> {
    Json(state.sessions.list())
}

pub(super) async fn pending_list(State(state): State<AppState>) -> Json<Vec<PendingSummary>> {
    Json(state.dispatcher.pending_snapshot())
}

#[derive(Debug, Deserialize)]
pub(super) struct InvokeRequest {
    action: String,
    #[serde(default)]
    payload: Value,
    timeout_ms: Option<u64>,
}

pub(super) async fn session_invoke(
    State(state): State<AppState>,
    Path(session): Path<String>,
    Json(req): Json<InvokeRequest>,
) -> Result<Json<ToolCallResult>, ApiError> {
    validate_session_id(&session).map_err(ApiError::InvalidSessionId)?;
    let action: ToolAction = req
        .action
        .parse()
        .map_err(|_| ApiError::UnknownAction(req.action.clone()))?;
    let timeout = match req.timeout_ms {
        Some(0) => {
            return Err(ApiError::InvalidRequest(
                "timeout_ms must be greater than zero".into(),
            ))
        }
        Some(ms) => Some(Duration::from_millis(ms)),
        None => None,
    };

    let result = state
        .dispatcher
        .invoke(&session, action, req.payload, timeout)
        .await;
    Ok(Json(result))
}

// ---------------------------------------------------------------------------
// Canvas WebSocket hub
// ---------------------------------------------------------------------------

#[derive(Debug, Default, Deserialize)]
pub(super) struct HubQuery {
    #[serde(rename = "sessionId", alias = "session_id")]
    session_id: Option<String>,
}

pub(super) async fn ws_hub(
    ws: WebSocketUpgrade,
    Query(query): Query<HubQuery>,
    State(state): State<AppState>,
) -> Result<impl IntoResponse, ApiError> {
    let session = match query.session_id.map(|s| s.trim().to_string()) {
        Some(id) if !id.is_empty() => {
            validate_session_id(&id).map_err(ApiError::InvalidSessionId)?;
            Some(id)
        }
        _ => None,
    };
    Ok(ws.on_upgrade(move |socket| handle_ws_hub(socket, state, session)))
}

async fn handle_ws_hub(socket: WebSocket, state: AppState, session: Option<String>) {
    let (_guard, mut shutdown_rx) = state.shutdown.register();
    let (mut ws_tx, mut ws_rx) = socket.split();

    let (out_tx, mut out_rx) = mpsc::channel::<ServerFrame>(OUTBOUND_QUEUE);
    let connection = Connection::new(out_tx);
    let connection_id = connection.id();

    let hello = ServerFrame::Hello {
        session: session.clone(),
        connection: connection_id.to_string(),
    };
    if ws_tx.send(Message::Text(hello.to_text().into())).await.is_err() {
        return;
    }

    // Register only after the hello frame so it is always the first frame
    // the canvas sees.
    if let Some(ref id) = session {
        state.sessions.register(id, connection.clone());
    }
    tracing::info!(session = ?session, connection = %connection_id, "canvas connected");

    loop {
        tokio::select! {
            frame = out_rx.recv() => {
                let Some(frame) = frame else { break };
                if ws_tx.send(Message::Text(frame.to_text().into())).await.is_err() {
                    break;
                }
            }

            msg = ws_rx.next() => {
                match msg {
                    Some(Ok(Message::Text(text))) => {
                        let reply = route_frame(text.as_str(), session.as_deref(), &connection, &state).await;
                        if let Some(reply) = reply {
                            let frame = ServerFrame::Response(reply);
                            if ws_tx.send(Message::Text(frame.to_text().into())).await.is_err() {
                                break;
                            }
                        }
                    }
                    Some(Ok(Message::Close(_))) | None => break,
                    Some(Err(e)) => {
                        tracing::debug!(connection = %connection_id, error = %e, "canvas socket error");
                        break;
                    }
                    _ => continue,
                }
            }

            _ = shutdown_rx.changed() => {
                if *shutdown_rx.borrow() {
                    tracing::debug!(connection = %connection_id, "canvas hub received shutdown signal");
                    let close_frame = CloseFrame {
                        code: axum::extract::ws::close_code::NORMAL,
                        reason: "server shutting down".into(),
                    };
                    let _ = ws_tx.send(Message::Close(Some(close_frame))).await;
                    let _ = ws_tx.flush().await;
                    break;
                }
            }
        }
    }

    connection.close();
    if session.is_some() {
        state.sessions.unregister(connection_id);
    }
    let abandoned = state.dispatcher.abandon_connection(connection_id);
    tracing::info!(
        session = ?session,
        connection = %connection_id,
        abandoned,
        "canvas disconnected"
    );
}

/// Handle one text frame from a canvas.
///
/// Returns a reply to write straight back to the socket, if any. Chat
/// requests are answered later through the connection's outbound queue.
async fn route_frame(
    text: &str,
    session: Option<&str>,
    connection: &Connection,
    state: &AppState,
) -> Option<WsResponse> {
    let req: WsRequest = match serde_json::from_str(text) {
        Ok(req) => req,
        Err(e) => {
            tracing::debug!(connection = %connection.id(), error = %e, "malformed canvas frame");
            return Some(WsResponse::protocol_error(
                "invalid_request",
                &format!("Invalid JSON: {}.", e),
            ));
        }
    };

    match req.method.as_str() {
        TOOL_RESULT => {
            resolve_tool_result(req, connection.id(), state);
            None
        }
        SEND_MESSAGE => {
            let state = state.clone();
            let connection = connection.clone();
            let session = session.map(str::to_string);
            tokio::spawn(async move {
                let resp = ws_methods::dispatch(&req, session.as_deref(), &state).await;
                if connection.send(ServerFrame::Response(resp)).await.is_err() {
                    tracing::debug!(connection = %connection.id(), "chat reply dropped, canvas gone");
                }
            });
            None
        }
        _ => Some(ws_methods::dispatch(&req, session, state).await),
    }
}

fn resolve_tool_result(req: WsRequest, from: ConnectionId, state: &AppState) {
    let Some(correlation) = req
        .id
        .as_ref()
        .and_then(Value::as_str)
        .map(CorrelationId::from)
    else {
        tracing::debug!(connection = %from, "tool_result without correlation id");
        return;
    };

    // A reply the canvas could not express as a result still settles the
    // call, rather than leaving the caller waiting for its deadline.
    let result = match serde_json::from_value::<ToolCallResult>(req.params.unwrap_or(Value::Null)) {
        Ok(result) => result,
        Err(e) => {
            tracing::warn!(%correlation, connection = %from, error = %e, "malformed tool_result");
            ToolCallResult::failure(format!("invalid tool result: {e}"))
        }
    };
    state.dispatcher.resolve(from, &correlation, result);
}
