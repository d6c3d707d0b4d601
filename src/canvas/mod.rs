//! Canvas side of the bridge: element schema, scene store, the tool
//! execution handler, and a headless WebSocket canvas client.

pub mod client;
pub mod element;
pub mod handler;
pub mod scene;

pub use client::{CanvasClient, ClientError};
pub use element::{Element, ElementType, NewElement};
pub use handler::{execute, ToolExecutor};
pub use scene::Scene;
