//! drawbridge - tool-call bridge between a diagramming agent and browser canvases.
//!
//! ## Modes
//!
//! **Serve** (default): hosts the canvas WebSocket hub, the chat endpoint,
//! and the MCP tool surface.
//!
//! **Canvas** (`drawbridge canvas`): a headless canvas that connects to a
//! running server and executes tool calls against an in-memory scene.
//!
//! **Chat** (`drawbridge chat`): sends one chat message to a running server
//! and prints the assistant's reply.

use clap::{Parser as ClapParser, Subcommand};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use drawbridge::{
    agent::OpenAiChatModel,
    api,
    canvas::{CanvasClient, ClientError},
    config::{BridgeConfig, ConfigError},
    dispatch::Dispatcher,
    session::SessionRegistry,
};

#[derive(ClapParser, Debug)]
#[command(name = "drawbridge", version, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,

    /// Path to the TOML config file
    /// (default: $XDG_CONFIG_HOME/drawbridge/config.toml)
    #[arg(long, global = true)]
    config: Option<PathBuf>,
}

#[derive(clap::Args, Debug, Default)]
struct ServeArgs {
    /// Address to bind the HTTP/WebSocket server
    #[arg(long)]
    bind: Option<SocketAddr>,

    /// Bearer token required by every route except /health
    #[arg(long, env = "DRAWBRIDGE_TOKEN")]
    token: Option<String>,

    /// Tool call deadline in milliseconds
    #[arg(long)]
    timeout_ms: Option<u64>,

    /// Base URL of an OpenAI-compatible API
    #[arg(long)]
    model_endpoint: Option<String>,

    /// Model name sent with each completion request
    #[arg(long)]
    model: Option<String>,

    /// API key for the model endpoint
    #[arg(long, env = "OPENAI_API_KEY", hide_env_values = true)]
    api_key: Option<String>,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Run the bridge server (default)
    Serve(ServeArgs),

    /// Run a headless canvas client against a server
    Canvas {
        /// WebSocket URL of the canvas hub, e.g. ws://127.0.0.1:5500/ws
        #[arg(long)]
        url: String,

        /// Session id to register under
        #[arg(long)]
        session: String,

        /// Bearer token for the server
        #[arg(long, env = "DRAWBRIDGE_TOKEN")]
        token: Option<String>,
    },

    /// Send one chat message to a running server
    Chat {
        /// Base HTTP URL of the server, e.g. http://127.0.0.1:5500
        #[arg(long)]
        url: String,

        /// Session whose canvas the agent should draw on
        #[arg(long)]
        session: String,

        /// Bearer token for the server
        #[arg(long, env = "DRAWBRIDGE_TOKEN")]
        token: Option<String>,

        /// The message to send
        message: String,
    },
}

#[derive(Error, Debug)]
pub enum BridgeError {
    #[error("config error: {0}")]
    Config(#[from] ConfigError),

    #[error("model client error: {0}")]
    Model(#[from] drawbridge::agent::LlmError),

    #[error("canvas client error: {0}")]
    Client(#[from] ClientError),

    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("chat failed ({status}): {message}")]
    Chat { status: u16, message: String },

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

#[tokio::main]
async fn main() -> Result<(), BridgeError> {
    let cli = Cli::parse();
    init_tracing();

    match cli.command {
        Some(Commands::Serve(args)) => run_server(cli.config, args).await,
        Some(Commands::Canvas { url, session, token }) => {
            run_canvas(url, session, token).await
        }
        Some(Commands::Chat { url, session, token, message }) => {
            run_chat(url, session, token, message).await
        }
        None => run_server(cli.config, ServeArgs::default()).await,
    }
}

fn init_tracing() {
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "drawbridge=info,tower_http=info".into()),
        ))
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();
}

/// Load the config file and layer CLI/env overrides on top.
fn resolve_config(path: Option<PathBuf>, args: ServeArgs) -> Result<BridgeConfig, BridgeError> {
    let mut config = match path.or_else(BridgeConfig::default_path) {
        Some(path) => BridgeConfig::load(&path)?,
        None => BridgeConfig::default(),
    };

    if let Some(bind) = args.bind {
        config.server.bind = bind;
    }
    if args.token.is_some() {
        config.server.token = args.token;
    }
    if let Some(ms) = args.timeout_ms {
        config.dispatch.timeout_ms = ms;
    }
    if let Some(endpoint) = args.model_endpoint {
        config.model.endpoint = endpoint;
    }
    if let Some(model) = args.model {
        config.model.model = model;
    }
    if args.api_key.is_some() {
        config.model.api_key = args.api_key;
    }

    config.validate()?;
    Ok(config)
}

// ── Server mode ────────────────────────────────────────────────────

async fn run_server(config_path: Option<PathBuf>, args: ServeArgs) -> Result<(), BridgeError> {
    let config = resolve_config(config_path, args)?;
    tracing::info!("drawbridge server starting");
    if config.server.token.is_some() {
        tracing::info!("auth token configured");
    }

    let dispatcher = Dispatcher::with_timeout(SessionRegistry::new(), config.dispatch.timeout());
    let model = OpenAiChatModel::new(config.model.endpoint.clone(), config.model.api_key.clone())?;
    tracing::info!(
        endpoint = %config.model.endpoint,
        model = %config.model.model,
        "language model configured"
    );

    let state = api::AppState::new(dispatcher, Arc::new(model), config.agent_config());
    let shutdown = state.shutdown.clone();
    let app = api::router(
        state,
        api::RouterConfig {
            token: config.server.token.clone(),
            cors_origins: config.server.cors_origins.clone(),
        },
    );

    let bind = config.server.bind;
    let listener = tokio::net::TcpListener::bind(bind).await.map_err(|e| {
        tracing::error!(addr = %bind, error = %e, "failed to bind");
        e
    })?;
    tracing::info!(addr = %bind, "HTTP/WS server listening");

    let (server_shutdown_tx, server_shutdown_rx) = tokio::sync::oneshot::channel::<()>();
    let http_handle = tokio::spawn(async move {
        axum::serve(listener, app)
            .with_graceful_shutdown(async {
                server_shutdown_rx.await.ok();
            })
            .await
    });

    tokio::signal::ctrl_c().await?;
    tracing::info!("received Ctrl+C");

    // Signal WebSocket handlers to send close frames
    shutdown.shutdown();
    // Give handlers a moment to flush close frames before stopping the server
    tokio::time::sleep(Duration::from_millis(100)).await;

    let _ = server_shutdown_tx.send(());
    match http_handle.await {
        Ok(Ok(())) => {}
        Ok(Err(e)) => tracing::warn!(error = %e, "HTTP server error"),
        Err(e) => tracing::warn!(?e, "HTTP server task panicked"),
    }

    tracing::info!("drawbridge server exiting");
    Ok(())
}

// ── Canvas client mode ─────────────────────────────────────────────

async fn run_canvas(url: String, session: String, token: Option<String>) -> Result<(), BridgeError> {
    let client = CanvasClient::spawn(&url, &session, token.as_deref())?;
    tracing::info!(url = %url, session = %session, "headless canvas running, Ctrl+C to stop");

    tokio::signal::ctrl_c().await?;
    client.shutdown();
    let elements = client.scene().lock().len();
    client.join().await;
    tracing::info!(elements, "headless canvas stopped");
    Ok(())
}

// ── Chat mode ──────────────────────────────────────────────────────

async fn run_chat(
    url: String,
    session: String,
    token: Option<String>,
    message: String,
) -> Result<(), BridgeError> {
    let endpoint = format!("{}/api/chat", url.trim_end_matches('/'));
    let mut req = reqwest::Client::new()
        .post(&endpoint)
        .json(&serde_json::json!({ "sessionId": session, "message": message }));
    if let Some(token) = token {
        req = req.bearer_auth(token);
    }

    let resp = req.send().await?;
    let status = resp.status();
    let body: serde_json::Value = resp.json().await.unwrap_or_default();
    if !status.is_success() {
        let message = body["error"]["message"]
            .as_str()
            .unwrap_or("request failed")
            .to_string();
        return Err(BridgeError::Chat {
            status: status.as_u16(),
            message,
        });
    }

    println!("{}", body["response"].as_str().unwrap_or_default());
    Ok(())
}
