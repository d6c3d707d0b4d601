#![allow(dead_code)]

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use drawbridge::agent::{AgentConfig, LanguageModel};
use drawbridge::api::{router, AppState, RouterConfig};
use drawbridge::canvas::CanvasClient;
use drawbridge::dispatch::Dispatcher;
use drawbridge::session::SessionRegistry;
use futures::{SinkExt, StreamExt};
use serde_json::Value;
use tokio::net::TcpListener;
use tokio_tungstenite::tungstenite::Message;

pub type WsClient =
    tokio_tungstenite::WebSocketStream<tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>>;

/// How long a test waits on any single frame or condition.
pub const WAIT: Duration = Duration::from_secs(5);

/// Create a test AppState whose tool calls time out after `timeout`.
pub fn create_test_state(model: Arc<dyn LanguageModel>, timeout: Duration) -> AppState {
    let dispatcher = Dispatcher::with_timeout(SessionRegistry::new(), timeout);
    AppState::new(dispatcher, model, AgentConfig::default())
}

pub async fn start_test_server(state: AppState, config: RouterConfig) -> SocketAddr {
    let app = router(state, config);
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    tokio::time::sleep(Duration::from_millis(10)).await;
    addr
}

/// Connect a hand-driven canvas and consume its hello frame.
pub async fn connect_canvas(addr: SocketAddr, session: &str) -> (WsClient, Value) {
    let url = format!("ws://{addr}/ws?sessionId={session}");
    let (mut ws, _) = tokio_tungstenite::connect_async(url).await.unwrap();
    let hello = recv_json(&mut ws).await;
    assert_eq!(hello["connected"], true);
    (ws, hello)
}

/// Wait until `session` is routable, i.e. the hub has registered it.
pub async fn wait_for_session(state: &AppState, session: &str) {
    tokio::time::timeout(WAIT, async {
        while state.sessions.lookup(session).is_none() {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("session never registered");
}

/// Wait until no connection serves `session` anymore.
pub async fn wait_for_session_gone(state: &AppState, session: &str) {
    tokio::time::timeout(WAIT, async {
        while state.sessions.lookup(session).is_some() {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("session never unregistered");
}

/// Start a headless canvas for `session` and wait until it is routable.
pub async fn spawn_headless_canvas(
    addr: SocketAddr,
    state: &AppState,
    session: &str,
    token: Option<&str>,
) -> CanvasClient {
    let client = CanvasClient::spawn(&format!("ws://{addr}/ws"), session, token).unwrap();
    wait_for_session(state, session).await;
    client
}

/// Receive the next JSON text frame, skipping pings.
pub async fn recv_json(ws: &mut WsClient) -> Value {
    loop {
        let msg = tokio::time::timeout(WAIT, ws.next())
            .await
            .expect("timed out waiting for frame")
            .expect("socket closed")
            .expect("socket error");
        match msg {
            Message::Text(text) => return serde_json::from_str(text.as_str()).unwrap(),
            Message::Ping(_) | Message::Pong(_) => continue,
            other => panic!("unexpected frame: {other:?}"),
        }
    }
}

pub async fn send_json(ws: &mut WsClient, value: Value) {
    ws.send(Message::Text(value.to_string().into())).await.unwrap();
}
