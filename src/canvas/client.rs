use std::sync::Arc;
use std::time::Duration;

use futures::{SinkExt, StreamExt};
use parking_lot::Mutex;
use serde_json::Value;
use tokio::sync::watch;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::header::{HeaderValue, AUTHORIZATION};
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::MaybeTlsStream;

use super::handler::execute;
use super::scene::Scene;
use crate::protocol::{ExecuteToolParams, WsRequest, EXECUTE_TOOL, TOOL_RESULT};

type WsStream = tokio_tungstenite::WebSocketStream<MaybeTlsStream<tokio::net::TcpStream>>;

const INITIAL_BACKOFF: Duration = Duration::from_secs(1);
const MAX_BACKOFF: Duration = Duration::from_secs(30);

#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    #[error("invalid canvas url {url}: {source}")]
    InvalidUrl {
        url: String,
        source: tokio_tungstenite::tungstenite::Error,
    },
    #[error("invalid token: {0}")]
    InvalidToken(#[from] tokio_tungstenite::tungstenite::http::header::InvalidHeaderValue),
}

/// Headless canvas that serves tool calls from an in-memory [`Scene`].
///
/// Spawns a tokio task that:
/// - Connects to `{url}?sessionId={session}` (with optional Bearer token)
/// - Answers every `execute_tool` frame with a `tool_result`
/// - On disconnect, retries with exponential backoff (1s..30s) until shut down
///
/// The scene survives reconnects.
pub struct CanvasClient {
    shutdown_tx: watch::Sender<bool>,
    connected_rx: watch::Receiver<bool>,
    scene: Arc<Mutex<Scene>>,
    task: tokio::task::JoinHandle<()>,
}

impl CanvasClient {
    /// Validate the target and spawn the connection task.
    pub fn spawn(url: &str, session: &str, token: Option<&str>) -> Result<Self, ClientError> {
        let url = session_url(url, session);
        // Fail fast on a malformed url or token instead of retrying forever.
        build_request(&url, token)?;

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let (connected_tx, connected_rx) = watch::channel(false);
        let scene = Arc::new(Mutex::new(Scene::new()));
        let task = tokio::spawn(connection_loop(
            url,
            token.map(str::to_string),
            scene.clone(),
            connected_tx,
            shutdown_rx,
        ));
        Ok(Self {
            shutdown_tx,
            connected_rx,
            scene,
            task,
        })
    }

    /// Shared handle to the scene this client mutates.
    pub fn scene(&self) -> Arc<Mutex<Scene>> {
        self.scene.clone()
    }

    /// Watch channel that is `true` while the socket is up.
    pub fn connected(&self) -> watch::Receiver<bool> {
        self.connected_rx.clone()
    }

    /// Signal the connection task to shut down.
    pub fn shutdown(&self) {
        let _ = self.shutdown_tx.send(true);
    }

    /// Wait for the connection task to complete. Consumes the handle.
    pub async fn join(self) {
        let _ = self.task.await;
    }
}

fn session_url(url: &str, session: &str) -> String {
    let separator = if url.contains('?') { '&' } else { '?' };
    format!("{url}{separator}sessionId={session}")
}

fn build_request(
    url: &str,
    token: Option<&str>,
) -> Result<tokio_tungstenite::tungstenite::handshake::client::Request, ClientError> {
    let mut request = url
        .into_client_request()
        .map_err(|source| ClientError::InvalidUrl {
            url: url.to_string(),
            source,
        })?;
    if let Some(token) = token {
        request
            .headers_mut()
            .insert(AUTHORIZATION, HeaderValue::from_str(&format!("Bearer {token}"))?);
    }
    Ok(request)
}

async fn connection_loop(
    url: String,
    token: Option<String>,
    scene: Arc<Mutex<Scene>>,
    connected_tx: watch::Sender<bool>,
    mut shutdown_rx: watch::Receiver<bool>,
) {
    let mut backoff = INITIAL_BACKOFF;

    loop {
        if *shutdown_rx.borrow() {
            return;
        }

        let request = match build_request(&url, token.as_deref()) {
            Ok(request) => request,
            Err(e) => {
                tracing::error!(%url, error = %e, "cannot build canvas request");
                return;
            }
        };

        match tokio_tungstenite::connect_async(request).await {
            Ok((ws_stream, _)) => {
                backoff = INITIAL_BACKOFF;
                tracing::info!(%url, "canvas connected");
                connected_tx.send_replace(true);

                run_connection(ws_stream, &scene, &mut shutdown_rx).await;

                connected_tx.send_replace(false);
                if *shutdown_rx.borrow() {
                    return;
                }
                tracing::warn!(%url, "canvas disconnected");
            }
            Err(e) => {
                tracing::debug!(%url, error = %e, "canvas connection failed");
            }
        }

        tokio::select! {
            _ = tokio::time::sleep(backoff) => {}
            _ = shutdown_rx.changed() => { return; }
        }
        backoff = (backoff * 2).min(MAX_BACKOFF);
    }
}

async fn run_connection(
    ws_stream: WsStream,
    scene: &Mutex<Scene>,
    shutdown_rx: &mut watch::Receiver<bool>,
) {
    let (mut sink, mut stream) = ws_stream.split();

    loop {
        tokio::select! {
            msg = stream.next() => {
                match msg {
                    Some(Ok(Message::Text(text))) => {
                        if let Some(reply) = handle_text(&text, scene) {
                            if sink.send(Message::Text(reply.into())).await.is_err() {
                                break;
                            }
                        }
                    }
                    Some(Ok(Message::Ping(data))) => {
                        if sink.send(Message::Pong(data)).await.is_err() {
                            break;
                        }
                    }
                    Some(Ok(Message::Close(_))) | None => break,
                    Some(Ok(_)) => {}
                    Some(Err(_)) => break,
                }
            }
            _ = shutdown_rx.changed() => {
                let _ = sink.send(Message::Close(None)).await;
                break;
            }
        }
    }
}

/// Handle one inbound text frame, returning the reply frame if any.
fn handle_text(text: &str, scene: &Mutex<Scene>) -> Option<String> {
    let request: WsRequest = match serde_json::from_str(text) {
        Ok(request) => request,
        Err(_) => {
            // Hello and response frames carry no method.
            tracing::trace!(frame = %text, "ignoring non-request frame");
            return None;
        }
    };
    if request.method != EXECUTE_TOOL {
        tracing::debug!(method = %request.method, "ignoring unsupported method");
        return None;
    }

    let params: ExecuteToolParams =
        match serde_json::from_value(request.params.unwrap_or(Value::Null)) {
            Ok(params) => params,
            Err(e) => {
                tracing::warn!(error = %e, "malformed execute_tool params");
                ExecuteToolParams {
                    action: String::new(),
                    payload: Value::Null,
                }
            }
        };

    let result = execute(&mut *scene.lock(), &params.action, &params.payload);
    tracing::debug!(action = %params.action, success = result.success, "executed tool call");

    let reply = WsRequest {
        id: request.id,
        method: TOOL_RESULT.to_string(),
        params: serde_json::to_value(&result).ok(),
    };
    serde_json::to_string(&reply).ok()
}
