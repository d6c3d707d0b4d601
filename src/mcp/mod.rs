//! MCP tool surface for external agents.
//!
//! Served over Streamable HTTP at `/mcp`. The target canvas is taken from
//! the `X-Session-ID` header of each HTTP request; tool failures come back
//! as tool output with `isError` set, never as protocol errors.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use axum::http::request::Parts;
use rmcp::{
    handler::server::router::tool::ToolRouter,
    handler::server::wrapper::Parameters,
    model::*,
    service::RequestContext,
    tool, tool_handler, tool_router, RoleServer, ServerHandler,
};
use serde_json::{json, Value};

use crate::dispatch::Dispatcher;
use crate::tools::{
    CanvasTool, ConnectorParams, DeleteElementsParams, ShapeParams, TextParams, ToolInvocation,
    UpdateElementParams,
};

/// Request header naming the browser session a tool call targets.
pub const SESSION_HEADER: &str = "x-session-id";

pub const NO_SESSION_ERROR: &str = "No session ID provided";

#[derive(Clone)]
pub struct DiagramMcpServer {
    dispatcher: Dispatcher,
    tool_router: ToolRouter<DiagramMcpServer>,
    /// Decrements the active MCP session count once the last clone drops.
    session_guard: Option<Arc<SessionCountGuard>>,
}

struct SessionCountGuard(Arc<AtomicUsize>);

impl Drop for SessionCountGuard {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::Release);
    }
}

impl DiagramMcpServer {
    pub fn new(dispatcher: Dispatcher) -> Self {
        Self {
            dispatcher,
            tool_router: Self::tool_router(),
            session_guard: None,
        }
    }

    /// Attach a shared session counter that is decremented when this server is dropped.
    pub fn with_session_counter(mut self, counter: Arc<AtomicUsize>) -> Self {
        self.session_guard = Some(Arc::new(SessionCountGuard(counter)));
        self
    }

    async fn run(
        &self,
        context: &RequestContext<RoleServer>,
        invocation: ToolInvocation,
    ) -> Result<CallToolResult, ErrorData> {
        let Some(session) = session_header(context) else {
            tracing::warn!(tool = %invocation.tool, "MCP tool call without session header");
            return Ok(to_call_result(
                json!({ "success": false, "error": NO_SESSION_ERROR }),
                false,
            ));
        };

        let result = self
            .dispatcher
            .invoke(&session, invocation.action(), invocation.payload.clone(), None)
            .await;
        tracing::debug!(
            session = %session,
            tool = %invocation.tool,
            success = result.success,
            "MCP tool call finished"
        );
        Ok(to_call_result(invocation.render(&result), result.success))
    }
}

fn session_header(context: &RequestContext<RoleServer>) -> Option<String> {
    context
        .extensions
        .get::<Parts>()
        .and_then(|parts| parts.headers.get(SESSION_HEADER))
        .and_then(|value| value.to_str().ok())
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .map(str::to_string)
}

fn to_call_result(value: Value, success: bool) -> CallToolResult {
    let content = vec![Content::text(value.to_string())];
    if success {
        CallToolResult::success(content)
    } else {
        CallToolResult::error(content)
    }
}

#[tool_handler(router = self.tool_router)]
impl ServerHandler for DiagramMcpServer {
    fn get_info(&self) -> ServerInfo {
        ServerInfo {
            protocol_version: ProtocolVersion::V_2024_11_05,
            capabilities: ServerCapabilities::builder().enable_tools().build(),
            server_info: Implementation {
                name: "drawbridge".to_string(),
                title: None,
                version: env!("CARGO_PKG_VERSION").to_string(),
                description: Some(
                    "Drawing tools for a connected browser canvas. Each call blocks until \
                     the canvas confirms it."
                        .to_string(),
                ),
                icons: None,
                website_url: None,
            },
            instructions: Some(
                "Send the target browser session in the X-Session-ID header. Use add_* tools \
                 to draw, update_element and delete_elements to edit by element id, and \
                 get_canvas_state to inspect the scene."
                    .to_string(),
            ),
        }
    }
}

#[tool_router]
impl DiagramMcpServer {
    #[tool(description = "Add a rectangle to the canvas")]
    async fn add_rectangle(
        &self,
        Parameters(params): Parameters<ShapeParams>,
        context: RequestContext<RoleServer>,
    ) -> Result<CallToolResult, ErrorData> {
        self.run(&context, CanvasTool::AddRectangle.shape(params)).await
    }

    #[tool(description = "Add an ellipse or circle to the canvas")]
    async fn add_ellipse(
        &self,
        Parameters(params): Parameters<ShapeParams>,
        context: RequestContext<RoleServer>,
    ) -> Result<CallToolResult, ErrorData> {
        self.run(&context, CanvasTool::AddEllipse.shape(params)).await
    }

    #[tool(description = "Add a diamond shape to the canvas")]
    async fn add_diamond(
        &self,
        Parameters(params): Parameters<ShapeParams>,
        context: RequestContext<RoleServer>,
    ) -> Result<CallToolResult, ErrorData> {
        self.run(&context, CanvasTool::AddDiamond.shape(params)).await
    }

    #[tool(description = "Add text to the canvas")]
    async fn add_text(
        &self,
        Parameters(params): Parameters<TextParams>,
        context: RequestContext<RoleServer>,
    ) -> Result<CallToolResult, ErrorData> {
        self.run(&context, ToolInvocation::text(params)).await
    }

    #[tool(description = "Draw an arrow connecting two points on the canvas")]
    async fn add_arrow(
        &self,
        Parameters(params): Parameters<ConnectorParams>,
        context: RequestContext<RoleServer>,
    ) -> Result<CallToolResult, ErrorData> {
        self.run(&context, CanvasTool::AddArrow.connector(params)).await
    }

    #[tool(description = "Add a line between two points on the canvas")]
    async fn add_line(
        &self,
        Parameters(params): Parameters<ConnectorParams>,
        context: RequestContext<RoleServer>,
    ) -> Result<CallToolResult, ErrorData> {
        self.run(&context, CanvasTool::AddLine.connector(params)).await
    }

    #[tool(description = "Update an existing element on the canvas. Only the given fields change.")]
    async fn update_element(
        &self,
        Parameters(params): Parameters<UpdateElementParams>,
        context: RequestContext<RoleServer>,
    ) -> Result<CallToolResult, ErrorData> {
        self.run(&context, ToolInvocation::update(params)).await
    }

    #[tool(description = "Delete elements from the canvas by their IDs")]
    async fn delete_elements(
        &self,
        Parameters(params): Parameters<DeleteElementsParams>,
        context: RequestContext<RoleServer>,
    ) -> Result<CallToolResult, ErrorData> {
        self.run(&context, ToolInvocation::delete(params)).await
    }

    #[tool(description = "Clear all elements from the canvas")]
    async fn clear_canvas(
        &self,
        context: RequestContext<RoleServer>,
    ) -> Result<CallToolResult, ErrorData> {
        self.run(&context, ToolInvocation::clear()).await
    }

    #[tool(description = "Get the current state of the canvas including all elements")]
    async fn get_canvas_state(
        &self,
        context: RequestContext<RoleServer>,
    ) -> Result<CallToolResult, ErrorData> {
        self.run(&context, ToolInvocation::get_state()).await
    }
}
