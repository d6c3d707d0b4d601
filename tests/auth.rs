//! Bearer-token protection of the canvas hub and HTTP routes.

mod common;

use std::sync::Arc;
use std::time::Duration;

use common::*;
use drawbridge::agent::ScriptedModel;
use drawbridge::api::{AppState, RouterConfig};
use drawbridge::protocol::ToolAction;
use serde_json::json;

async fn start_protected() -> (AppState, std::net::SocketAddr) {
    let state = create_test_state(Arc::new(ScriptedModel::default()), Duration::from_secs(5));
    let config = RouterConfig {
        token: Some("s3cret".into()),
        ..Default::default()
    };
    let addr = start_test_server(state.clone(), config).await;
    (state, addr)
}

#[tokio::test]
async fn health_is_open() {
    let (_state, addr) = start_protected().await;
    let resp = reqwest::get(format!("http://{addr}/health")).await.unwrap();
    assert_eq!(resp.status(), 200);
}

#[tokio::test]
async fn chat_requires_token() {
    let (_state, addr) = start_protected().await;
    let client = reqwest::Client::new();
    let body = json!({"sessionId": "tab-1", "message": "hi"});

    let resp = client
        .post(format!("http://{addr}/api/chat"))
        .json(&body)
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 401);

    let resp = client
        .post(format!("http://{addr}/api/chat"))
        .bearer_auth("wrong")
        .json(&body)
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 403);

    // Authenticated, but nothing is connected for the session.
    let resp = client
        .post(format!("http://{addr}/api/chat"))
        .bearer_auth("s3cret")
        .json(&body)
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 404);
}

#[tokio::test]
async fn canvas_upgrade_without_token_is_rejected() {
    let (_state, addr) = start_protected().await;
    let err = tokio_tungstenite::connect_async(format!("ws://{addr}/ws?sessionId=tab-1"))
        .await
        .unwrap_err();
    match err {
        tokio_tungstenite::tungstenite::Error::Http(response) => {
            assert_eq!(response.status(), 401);
        }
        other => panic!("expected HTTP rejection, got {other:?}"),
    }
}

#[tokio::test]
async fn canvas_may_pass_token_in_query() {
    let (state, addr) = start_protected().await;
    let (mut ws, _) =
        tokio_tungstenite::connect_async(format!("ws://{addr}/ws?sessionId=tab-1&token=s3cret"))
            .await
            .unwrap();
    let hello = recv_json(&mut ws).await;
    assert_eq!(hello["session"], "tab-1");
    wait_for_session(&state, "tab-1").await;
}

#[tokio::test]
async fn headless_canvas_authenticates_with_bearer_header() {
    let (state, addr) = start_protected().await;
    let canvas = spawn_headless_canvas(addr, &state, "tab-1", Some("s3cret")).await;

    let result = state
        .dispatcher
        .invoke("tab-1", ToolAction::ClearCanvas, json!({}), None)
        .await;
    assert!(result.success, "{result:?}");

    canvas.shutdown();
    canvas.join().await;
}
