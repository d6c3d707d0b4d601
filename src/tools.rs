//! Canvas tool catalog shared by the MCP surface and the agent.
//!
//! Each tool maps its typed arguments onto one [`ToolAction`] payload, and
//! renders the canvas's [`ToolCallResult`] back into the JSON the caller
//! sees.

use std::fmt;
use std::str::FromStr;

use schemars::JsonSchema;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};

use crate::canvas::element::{DEFAULT_BACKGROUND_COLOR, DEFAULT_FONT_SIZE, DEFAULT_STROKE_COLOR};
use crate::protocol::{ToolAction, ToolCallResult};

// ---------------------------------------------------------------------------
// Arguments
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ShapeParams {
    /// X coordinate of the top-left corner
    pub x: f64,
    /// Y coordinate of the top-left corner
    pub y: f64,
    /// Width in pixels
    pub width: f64,
    /// Height in pixels
    pub height: f64,
    /// Stroke color in hex format (default #000000)
    #[serde(default)]
    pub stroke_color: Option<String>,
    /// Background fill color in hex format (default transparent)
    #[serde(default)]
    pub background_color: Option<String>,
}

#[derive(Debug, Clone, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct TextParams {
    /// X coordinate of the text
    pub x: f64,
    /// Y coordinate of the text
    pub y: f64,
    /// The text content to display
    pub text: String,
    /// Font size in pixels (default 20)
    #[serde(default)]
    pub font_size: Option<f64>,
    /// Text color in hex format (default #000000)
    #[serde(default)]
    pub stroke_color: Option<String>,
}

#[derive(Debug, Clone, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ConnectorParams {
    /// Starting X coordinate
    pub start_x: f64,
    /// Starting Y coordinate
    pub start_y: f64,
    /// Ending X coordinate
    pub end_x: f64,
    /// Ending Y coordinate
    pub end_y: f64,
    /// Stroke color in hex format (default #000000)
    #[serde(default)]
    pub stroke_color: Option<String>,
}

#[derive(Debug, Clone, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct UpdateElementParams {
    /// ID of the element to update
    pub element_id: String,
    /// New X coordinate
    #[serde(default)]
    pub x: Option<f64>,
    /// New Y coordinate
    #[serde(default)]
    pub y: Option<f64>,
    /// New width
    #[serde(default)]
    pub width: Option<f64>,
    /// New height
    #[serde(default)]
    pub height: Option<f64>,
    /// New text content for text elements
    #[serde(default)]
    pub text: Option<String>,
    /// New stroke color
    #[serde(default)]
    pub stroke_color: Option<String>,
    /// New background color
    #[serde(default)]
    pub background_color: Option<String>,
}

#[derive(Debug, Clone, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct DeleteElementsParams {
    /// IDs of the elements to delete
    pub element_ids: Vec<String>,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize, JsonSchema)]
pub struct NoParams {}

// ---------------------------------------------------------------------------
// Catalog
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CanvasTool {
    AddRectangle,
    AddEllipse,
    AddDiamond,
    AddText,
    AddArrow,
    AddLine,
    UpdateElement,
    DeleteElements,
    ClearCanvas,
    GetCanvasState,
}

impl CanvasTool {
    pub const ALL: [CanvasTool; 10] = [
        CanvasTool::AddRectangle,
        CanvasTool::AddEllipse,
        CanvasTool::AddDiamond,
        CanvasTool::AddText,
        CanvasTool::AddArrow,
        CanvasTool::AddLine,
        CanvasTool::UpdateElement,
        CanvasTool::DeleteElements,
        CanvasTool::ClearCanvas,
        CanvasTool::GetCanvasState,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            CanvasTool::AddRectangle => "add_rectangle",
            CanvasTool::AddEllipse => "add_ellipse",
            CanvasTool::AddDiamond => "add_diamond",
            CanvasTool::AddText => "add_text",
            CanvasTool::AddArrow => "add_arrow",
            CanvasTool::AddLine => "add_line",
            CanvasTool::UpdateElement => "update_element",
            CanvasTool::DeleteElements => "delete_elements",
            CanvasTool::ClearCanvas => "clear_canvas",
            CanvasTool::GetCanvasState => "get_canvas_state",
        }
    }

    pub fn description(&self) -> &'static str {
        match self {
            CanvasTool::AddRectangle => "Add a rectangle to the canvas",
            CanvasTool::AddEllipse => "Add an ellipse or circle to the canvas",
            CanvasTool::AddDiamond => "Add a diamond shape to the canvas",
            CanvasTool::AddText => "Add text to the canvas",
            CanvasTool::AddArrow => "Draw an arrow connecting two points on the canvas",
            CanvasTool::AddLine => "Add a line between two points on the canvas",
            CanvasTool::UpdateElement => {
                "Update an existing element on the canvas. Only the given fields change."
            }
            CanvasTool::DeleteElements => "Delete elements from the canvas by their IDs",
            CanvasTool::ClearCanvas => "Clear all elements from the canvas",
            CanvasTool::GetCanvasState => {
                "Get the current state of the canvas including all elements"
            }
        }
    }

    pub fn action(&self) -> ToolAction {
        match self {
            CanvasTool::AddRectangle
            | CanvasTool::AddEllipse
            | CanvasTool::AddDiamond
            | CanvasTool::AddText
            | CanvasTool::AddArrow
            | CanvasTool::AddLine => ToolAction::AddElement,
            CanvasTool::UpdateElement => ToolAction::UpdateElement,
            CanvasTool::DeleteElements => ToolAction::DeleteElements,
            CanvasTool::ClearCanvas => ToolAction::ClearCanvas,
            CanvasTool::GetCanvasState => ToolAction::GetCanvasState,
        }
    }

    /// JSON schema of the tool's arguments.
    pub fn input_schema(&self) -> Value {
        let schema = match self {
            CanvasTool::AddRectangle | CanvasTool::AddEllipse | CanvasTool::AddDiamond => {
                schemars::schema_for!(ShapeParams)
            }
            CanvasTool::AddText => schemars::schema_for!(TextParams),
            CanvasTool::AddArrow | CanvasTool::AddLine => schemars::schema_for!(ConnectorParams),
            CanvasTool::UpdateElement => schemars::schema_for!(UpdateElementParams),
            CanvasTool::DeleteElements => schemars::schema_for!(DeleteElementsParams),
            CanvasTool::ClearCanvas | CanvasTool::GetCanvasState => {
                schemars::schema_for!(NoParams)
            }
        };
        let mut value = schema.to_value();
        if let Some(obj) = value.as_object_mut() {
            obj.remove("$schema");
            obj.remove("title");
        }
        value
    }

    pub fn spec(&self) -> ToolSpec {
        ToolSpec {
            name: self.name().to_string(),
            description: self.description().to_string(),
            parameters: self.input_schema(),
        }
    }

    /// Parse raw JSON arguments into an invocation.
    pub fn parse(&self, args: Value) -> Result<ToolInvocation, ToolArgsError> {
        // Models sometimes send `null` for tools without parameters.
        let args = if args.is_null() { json!({}) } else { args };
        match self {
            CanvasTool::AddRectangle | CanvasTool::AddEllipse | CanvasTool::AddDiamond => {
                Ok(self.shape(decode(*self, args)?))
            }
            CanvasTool::AddText => Ok(ToolInvocation::text(decode(*self, args)?)),
            CanvasTool::AddArrow | CanvasTool::AddLine => Ok(self.connector(decode(*self, args)?)),
            CanvasTool::UpdateElement => Ok(ToolInvocation::update(decode(*self, args)?)),
            CanvasTool::DeleteElements => Ok(ToolInvocation::delete(decode(*self, args)?)),
            CanvasTool::ClearCanvas => Ok(ToolInvocation::clear()),
            CanvasTool::GetCanvasState => Ok(ToolInvocation::get_state()),
        }
    }

    pub fn shape(&self, params: ShapeParams) -> ToolInvocation {
        let kind = match self {
            CanvasTool::AddEllipse => "ellipse",
            CanvasTool::AddDiamond => "diamond",
            _ => "rectangle",
        };
        ToolInvocation {
            tool: *self,
            payload: json!({
                "type": kind,
                "x": params.x,
                "y": params.y,
                "width": params.width,
                "height": params.height,
                "strokeColor": params.stroke_color.unwrap_or_else(|| DEFAULT_STROKE_COLOR.into()),
                "backgroundColor": params
                    .background_color
                    .unwrap_or_else(|| DEFAULT_BACKGROUND_COLOR.into()),
            }),
        }
    }

    pub fn connector(&self, params: ConnectorParams) -> ToolInvocation {
        let kind = if *self == CanvasTool::AddLine { "line" } else { "arrow" };
        ToolInvocation {
            tool: *self,
            payload: json!({
                "type": kind,
                "startX": params.start_x,
                "startY": params.start_y,
                "endX": params.end_x,
                "endY": params.end_y,
                "strokeColor": params.stroke_color.unwrap_or_else(|| DEFAULT_STROKE_COLOR.into()),
            }),
        }
    }
}

impl fmt::Display for CanvasTool {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for CanvasTool {
    type Err = ToolArgsError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        CanvasTool::ALL
            .into_iter()
            .find(|tool| tool.name() == s)
            .ok_or_else(|| ToolArgsError::UnknownTool(s.to_string()))
    }
}

/// Tool definition advertised to a language model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolSpec {
    pub name: String,
    pub description: String,
    pub parameters: Value,
}

/// The full catalog, in advertisement order.
pub fn catalog() -> Vec<ToolSpec> {
    CanvasTool::ALL.iter().map(CanvasTool::spec).collect()
}

#[derive(Debug, thiserror::Error)]
pub enum ToolArgsError {
    #[error("unknown tool: {0}")]
    UnknownTool(String),
    #[error("invalid arguments for {tool}: {source}")]
    InvalidArguments {
        tool: CanvasTool,
        source: serde_json::Error,
    },
}

fn decode<T: DeserializeOwned>(tool: CanvasTool, args: Value) -> Result<T, ToolArgsError> {
    serde_json::from_value(args).map_err(|source| ToolArgsError::InvalidArguments { tool, source })
}

/// Resolve a tool by name and parse its arguments.
pub fn parse_tool_call(name: &str, args: Value) -> Result<ToolInvocation, ToolArgsError> {
    name.parse::<CanvasTool>()?.parse(args)
}

// ---------------------------------------------------------------------------
// Invocations
// ---------------------------------------------------------------------------

/// A tool call translated into the canvas action it performs.
#[derive(Debug, Clone, PartialEq)]
pub struct ToolInvocation {
    pub tool: CanvasTool,
    pub payload: Value,
}

impl ToolInvocation {
    pub fn text(params: TextParams) -> Self {
        Self {
            tool: CanvasTool::AddText,
            payload: json!({
                "type": "text",
                "x": params.x,
                "y": params.y,
                "text": params.text,
                "fontSize": params.font_size.unwrap_or(DEFAULT_FONT_SIZE),
                "strokeColor": params.stroke_color.unwrap_or_else(|| DEFAULT_STROKE_COLOR.into()),
            }),
        }
    }

    /// Only fields that are present are sent.
    pub fn update(params: UpdateElementParams) -> Self {
        let mut payload = Map::new();
        payload.insert("elementId".into(), json!(params.element_id));
        let optional = [
            ("x", params.x.map(Value::from)),
            ("y", params.y.map(Value::from)),
            ("width", params.width.map(Value::from)),
            ("height", params.height.map(Value::from)),
            ("text", params.text.map(Value::from)),
            ("strokeColor", params.stroke_color.map(Value::from)),
            ("backgroundColor", params.background_color.map(Value::from)),
        ];
        for (key, value) in optional {
            if let Some(value) = value {
                payload.insert(key.into(), value);
            }
        }
        Self {
            tool: CanvasTool::UpdateElement,
            payload: Value::Object(payload),
        }
    }

    pub fn delete(params: DeleteElementsParams) -> Self {
        Self {
            tool: CanvasTool::DeleteElements,
            payload: json!({ "elementIds": params.element_ids }),
        }
    }

    pub fn clear() -> Self {
        Self {
            tool: CanvasTool::ClearCanvas,
            payload: json!({}),
        }
    }

    pub fn get_state() -> Self {
        Self {
            tool: CanvasTool::GetCanvasState,
            payload: json!({}),
        }
    }

    pub fn action(&self) -> ToolAction {
        self.tool.action()
    }

    /// Shape the canvas result into the JSON reported back to the caller.
    pub fn render(&self, result: &ToolCallResult) -> Value {
        let mut out = json!({
            "success": result.success,
            "error": result.error,
        });
        let Some(obj) = out.as_object_mut() else {
            return out;
        };
        match self.tool {
            CanvasTool::AddRectangle
            | CanvasTool::AddEllipse
            | CanvasTool::AddDiamond
            | CanvasTool::AddText
            | CanvasTool::AddArrow
            | CanvasTool::AddLine => {
                obj.insert("elementId".into(), json!(result.element_id));
                obj.insert("element".into(), self.payload.clone());
            }
            CanvasTool::UpdateElement => {
                obj.insert("elementId".into(), self.payload["elementId"].clone());
            }
            CanvasTool::DeleteElements => {
                let requested = self.payload["elementIds"].as_array().map_or(0, Vec::len);
                obj.insert("deletedCount".into(), json!(requested));
            }
            CanvasTool::ClearCanvas => {}
            CanvasTool::GetCanvasState => {
                if let Some(data) = &result.data {
                    obj.insert("data".into(), data.clone());
                }
            }
        }
        out
    }
}
