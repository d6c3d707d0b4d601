//! Diagram element schema.
//!
//! Elements serialize in the browser canvas's camelCase layout. Fields the
//! bridge does not model are carried in [`Element::extra`] so a scene
//! round-trips without loss.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

pub const DEFAULT_STROKE_COLOR: &str = "#000000";
pub const DEFAULT_BACKGROUND_COLOR: &str = "transparent";
pub const DEFAULT_FONT_SIZE: f64 = 20.0;
const DEFAULT_TEXT_WIDTH: f64 = 200.0;
const DEFAULT_TEXT_HEIGHT: f64 = 25.0;

/// Keys a patch or a creation payload may never override.
const RESERVED_KEYS: [&str; 3] = ["id", "type", "version"];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ElementType {
    Rectangle,
    Ellipse,
    Diamond,
    Arrow,
    Line,
    Text,
}

impl ElementType {
    pub fn is_linear(&self) -> bool {
        matches!(self, ElementType::Arrow | ElementType::Line)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ElementError {
    #[error("missing field: {0}")]
    MissingField(&'static str),
    #[error("{0}")]
    Malformed(#[from] serde_json::Error),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Element {
    pub id: String,
    #[serde(rename = "type")]
    pub kind: ElementType,
    pub x: f64,
    pub y: f64,
    pub width: f64,
    pub height: f64,
    #[serde(default)]
    pub angle: f64,
    pub stroke_color: String,
    pub background_color: String,
    pub fill_style: String,
    pub stroke_width: f64,
    pub stroke_style: String,
    pub roughness: f64,
    pub opacity: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub font_size: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub points: Option<Vec<[f64; 2]>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub end_arrowhead: Option<String>,
    #[serde(default = "initial_version")]
    pub version: u64,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

fn initial_version() -> u64 {
    1
}

impl Element {
    /// Merge a partial field set into this element and bump its version.
    ///
    /// `id`, `type`, and `version` are ignored. On error the element is left
    /// unchanged.
    pub fn apply_patch(&mut self, patch: &Map<String, Value>) -> Result<(), ElementError> {
        let Value::Object(mut fields) = serde_json::to_value(&*self)? else {
            return Err(ElementError::MissingField("id"));
        };
        for (key, value) in patch {
            if RESERVED_KEYS.contains(&key.as_str()) {
                continue;
            }
            fields.insert(key.clone(), value.clone());
        }
        let mut updated: Element = serde_json::from_value(Value::Object(fields))?;
        updated.version = self.version + 1;
        *self = updated;
        Ok(())
    }
}

/// Creation payload of an `addElement` call.
///
/// Everything but `type` is optional here; [`NewElement::build`] decides
/// which fields the element type actually requires.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewElement {
    #[serde(rename = "type")]
    pub kind: ElementType,
    pub x: Option<f64>,
    pub y: Option<f64>,
    pub width: Option<f64>,
    pub height: Option<f64>,
    pub start_x: Option<f64>,
    pub start_y: Option<f64>,
    pub end_x: Option<f64>,
    pub end_y: Option<f64>,
    pub stroke_color: Option<String>,
    pub background_color: Option<String>,
    pub fill_style: Option<String>,
    pub stroke_width: Option<f64>,
    pub stroke_style: Option<String>,
    pub roughness: Option<f64>,
    pub opacity: Option<f64>,
    pub text: Option<String>,
    pub font_size: Option<f64>,
    pub end_arrowhead: Option<String>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl NewElement {
    pub fn from_payload(payload: &Value) -> Result<Self, ElementError> {
        Ok(NewElement::deserialize(payload)?)
    }

    /// Materialize the element under `id`, filling canvas defaults.
    pub fn build(self, id: String) -> Result<Element, ElementError> {
        let (x, y, width, height, points) = match self.kind {
            kind if kind.is_linear() => {
                let x = self.start_x.or(self.x).ok_or(ElementError::MissingField("startX"))?;
                let y = self.start_y.or(self.y).ok_or(ElementError::MissingField("startY"))?;
                let width = match self.end_x {
                    Some(end_x) => end_x - x,
                    None => self.width.ok_or(ElementError::MissingField("endX"))?,
                };
                let height = match self.end_y {
                    Some(end_y) => end_y - y,
                    None => self.height.ok_or(ElementError::MissingField("endY"))?,
                };
                (x, y, width, height, Some(vec![[0.0, 0.0], [width, height]]))
            }
            ElementType::Text => (
                self.x.ok_or(ElementError::MissingField("x"))?,
                self.y.ok_or(ElementError::MissingField("y"))?,
                self.width.unwrap_or(DEFAULT_TEXT_WIDTH),
                self.height.unwrap_or(DEFAULT_TEXT_HEIGHT),
                None,
            ),
            _ => (
                self.x.ok_or(ElementError::MissingField("x"))?,
                self.y.ok_or(ElementError::MissingField("y"))?,
                self.width.ok_or(ElementError::MissingField("width"))?,
                self.height.ok_or(ElementError::MissingField("height"))?,
                None,
            ),
        };

        let (text, font_size) = if self.kind == ElementType::Text {
            (
                Some(self.text.ok_or(ElementError::MissingField("text"))?),
                Some(self.font_size.unwrap_or(DEFAULT_FONT_SIZE)),
            )
        } else {
            (self.text, self.font_size)
        };

        let end_arrowhead = match self.kind {
            ElementType::Arrow => Some(self.end_arrowhead.unwrap_or_else(|| "arrow".into())),
            _ => self.end_arrowhead,
        };

        let mut extra = self.extra;
        for key in RESERVED_KEYS {
            extra.remove(key);
        }

        Ok(Element {
            id,
            kind: self.kind,
            x,
            y,
            width,
            height,
            angle: 0.0,
            stroke_color: self
                .stroke_color
                .unwrap_or_else(|| DEFAULT_STROKE_COLOR.into()),
            background_color: self
                .background_color
                .unwrap_or_else(|| DEFAULT_BACKGROUND_COLOR.into()),
            fill_style: self.fill_style.unwrap_or_else(|| "solid".into()),
            stroke_width: self.stroke_width.unwrap_or(2.0),
            stroke_style: self.stroke_style.unwrap_or_else(|| "solid".into()),
            roughness: self.roughness.unwrap_or(1.0),
            opacity: self.opacity.unwrap_or(100.0),
            text,
            font_size,
            points,
            end_arrowhead,
            version: initial_version(),
            extra,
        })
    }
}
