//! drawbridge - a session-scoped tool-call RPC bridge.
//!
//! A language-model agent issues drawing commands (add shape, update
//! element, delete, clear) against a browser canvas. Each browser tab
//! connects over a WebSocket carrying a session id; the agent's tool calls
//! are routed to that connection and block until the canvas answers or the
//! call times out.

pub mod agent;
pub mod api;
pub mod canvas;
pub mod config;
pub mod dispatch;
pub mod mcp;
pub mod protocol;
pub mod session;
pub mod shutdown;
pub mod tools;
