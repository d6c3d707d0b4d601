pub mod auth;
pub mod error;
mod handlers;
pub mod ws_methods;

use axum::{
    extract::DefaultBodyLimit,
    http::{header, HeaderName, HeaderValue, Method},
    routing::{get, post},
    Router,
};
use tower_http::cors::CorsLayer;
use tower_http::set_header::SetResponseHeaderLayer;
use tower_http::trace::TraceLayer;

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use crate::agent::{AgentConfig, LanguageModel, Orchestrator};
use crate::dispatch::Dispatcher;
use crate::mcp::DiagramMcpServer;
use crate::session::SessionRegistry;
use crate::shutdown::ShutdownCoordinator;

use handlers::*;

/// Maximum concurrent MCP sessions allowed via the Streamable HTTP transport.
const MAX_MCP_SESSIONS: usize = 256;

#[derive(Clone)]
pub struct AppState {
    pub sessions: SessionRegistry,
    pub dispatcher: Dispatcher,
    pub agent: Arc<Orchestrator>,
    pub shutdown: ShutdownCoordinator,
    /// Counter for active MCP sessions (Streamable HTTP transport).
    pub mcp_session_count: Arc<AtomicUsize>,
}

impl AppState {
    pub fn new(dispatcher: Dispatcher, model: Arc<dyn LanguageModel>, agent: AgentConfig) -> Self {
        Self {
            sessions: dispatcher.registry().clone(),
            agent: Arc::new(Orchestrator::new(dispatcher.clone(), model, agent)),
            dispatcher,
            shutdown: ShutdownCoordinator::new(),
            mcp_session_count: Arc::new(AtomicUsize::new(0)),
        }
    }
}

/// Configuration for the HTTP/WS router.
///
/// Use `RouterConfig::default()` in tests for a minimal no-auth setup.
#[derive(Debug, Clone, Default)]
pub struct RouterConfig {
    pub token: Option<String>,
    pub cors_origins: Vec<String>,
}

pub fn router(state: AppState, config: RouterConfig) -> Router {
    use rmcp::transport::streamable_http_server::{
        session::local::LocalSessionManager, StreamableHttpServerConfig, StreamableHttpService,
    };

    let mcp_dispatcher = state.dispatcher.clone();
    let mcp_counter = state.mcp_session_count.clone();
    let mcp_service = StreamableHttpService::new(
        move || {
            let current = mcp_counter.fetch_add(1, Ordering::AcqRel);
            if current >= MAX_MCP_SESSIONS {
                mcp_counter.fetch_sub(1, Ordering::Release);
                return Err(std::io::Error::other("maximum MCP sessions reached"));
            }
            Ok(DiagramMcpServer::new(mcp_dispatcher.clone())
                .with_session_counter(mcp_counter.clone()))
        },
        Arc::new(LocalSessionManager::default()),
        StreamableHttpServerConfig::default(),
    );

    let protected = Router::new()
        .route("/ws", get(ws_hub))
        .route("/api/chat", post(chat))
        .route("/sessions", get(session_list))
        .route("/sessions/{id}/invoke", post(session_invoke))
        .route("/pending", get(pending_list))
        .nest_service("/mcp", mcp_service)
        .with_state(state);

    let protected = match config.token {
        Some(token) => protected.layer(axum::middleware::from_fn(move |req, next| {
            let t = token.clone();
            async move { auth::require_auth(t, req, next).await }
        })),
        None => protected,
    };

    let router = Router::new()
        .route("/health", get(health))
        .merge(protected)
        .layer(DefaultBodyLimit::max(1024 * 1024)) // 1 MB
        .layer(TraceLayer::new_for_http())
        .layer(SetResponseHeaderLayer::overriding(
            HeaderName::from_static("x-frame-options"),
            HeaderValue::from_static("DENY"),
        ))
        .layer(SetResponseHeaderLayer::overriding(
            HeaderName::from_static("x-content-type-options"),
            HeaderValue::from_static("nosniff"),
        ))
        .layer(SetResponseHeaderLayer::overriding(
            HeaderName::from_static("referrer-policy"),
            HeaderValue::from_static("no-referrer"),
        ));

    // Conditionally apply CORS if origins are configured.
    if config.cors_origins.is_empty() {
        router
    } else {
        let origins: Vec<HeaderValue> = config
            .cors_origins
            .iter()
            .filter_map(|o| o.parse().ok())
            .collect();
        router.layer(
            CorsLayer::new()
                .allow_origin(origins)
                .allow_methods([Method::GET, Method::POST, Method::DELETE, Method::OPTIONS])
                .allow_headers([
                    header::AUTHORIZATION,
                    header::CONTENT_TYPE,
                    HeaderName::from_static(crate::mcp::SESSION_HEADER),
                ])
                .allow_credentials(true),
        )
    }
}
