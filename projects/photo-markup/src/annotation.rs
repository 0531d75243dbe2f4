// Annotation payload definitions
//
// This module contains the persisted annotation set for a photo as the editor
// saves it, plus the ingestion path that turns a stored JSON value back into
// typed data.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;

/// Schema version that stores geometry as image-relative normalized units.
pub const NORMALIZED_VERSION: u32 = 2;

/// Upstream sometimes stores the payload JSON-encoded inside a JSON string.
/// Three passes covers every case seen so far.
pub const MAX_DECODE_PASSES: usize = 3;

pub const DEFAULT_COLOR: &str = "#ff0000";
pub const DEFAULT_STROKE_WIDTH: f64 = 3.0;
pub const DEFAULT_TEXT_FONT_SIZE: f64 = 20.0;
pub const DEFAULT_DIMENSION_FONT_SIZE: f64 = 16.0;

fn default_color() -> String {
    DEFAULT_COLOR.to_string()
}

fn default_side() -> f64 {
    1.0
}

/// How the image was fit inside the stage when the annotations were authored.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ImageRenderTransform {
    pub image_scale: f64,
    #[serde(default)]
    pub image_x: f64,
    #[serde(default)]
    pub image_y: f64,
    #[serde(default)]
    pub image_rotation: f64,
}

/// Freehand or straight polyline.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct LineShape {
    #[serde(default)]
    pub points: Vec<f64>,
    #[serde(default = "default_color")]
    pub color: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stroke_width: Option<f64>,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct RectShape {
    pub x: f64,
    pub y: f64,
    pub width: f64,
    pub height: f64,
    #[serde(default = "default_color")]
    pub color: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stroke_width: Option<f64>,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ArrowShape {
    #[serde(default)]
    pub points: Vec<f64>,
    #[serde(default = "default_color")]
    pub color: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stroke_width: Option<f64>,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct TextShape {
    pub x: f64,
    pub y: f64,
    #[serde(default)]
    pub text: String,
    #[serde(default = "default_color")]
    pub color: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub font_size: Option<f64>,
}

/// Measured value shown on a dimension label. The editor stores either a
/// number or free text.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(untagged)]
pub enum MeasurementValue {
    Number(f64),
    Text(String),
}

impl fmt::Display for MeasurementValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MeasurementValue::Number(n) => write!(f, "{}", n),
            MeasurementValue::Text(s) => write!(f, "{}", s.trim()),
        }
    }
}

/// Measurement callout between two points.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct DimensionShape {
    #[serde(default)]
    pub points: Vec<f64>,
    #[serde(default = "default_color")]
    pub color: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stroke_width: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub font_size: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<MeasurementValue>,
    #[serde(default)]
    pub unit: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub comment: Option<String>,
    /// +1 places the label on the left of the p1->p2 direction, -1 on the right.
    #[serde(default = "default_side")]
    pub label_side: f64,
}

impl DimensionShape {
    /// Label text as the editor shows it: `"{value} {unit}"`.
    pub fn label_text(&self) -> String {
        let value = self
            .value
            .as_ref()
            .map(|v| v.to_string())
            .unwrap_or_default();
        let unit = self.unit.trim();
        match (value.is_empty(), unit.is_empty()) {
            (_, true) => value,
            (true, false) => unit.to_string(),
            (false, false) => format!("{} {}", value, unit),
        }
    }

    pub fn comment_text(&self) -> Option<&str> {
        self.comment
            .as_deref()
            .map(str::trim)
            .filter(|c| !c.is_empty())
    }

    pub fn side_sign(&self) -> f64 {
        if self.label_side < 0.0 {
            -1.0
        } else {
            1.0
        }
    }
}

/// The persisted annotation set for one photo.
#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct AnnotationData {
    #[serde(default)]
    pub lines: Vec<LineShape>,
    #[serde(default)]
    pub rects: Vec<RectShape>,
    #[serde(default)]
    pub arrows: Vec<ArrowShape>,
    #[serde(default)]
    pub texts: Vec<TextShape>,
    #[serde(default)]
    pub dimensions: Vec<DimensionShape>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image_natural_width: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image_natural_height: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stage_width: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stage_height: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image_render_transform: Option<ImageRenderTransform>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub normalized_version: Option<u32>,
}

/// Borrowed view over one shape of any kind, in render order.
#[derive(Debug, Clone, Copy)]
pub enum Shape<'a> {
    Line(&'a LineShape),
    Rect(&'a RectShape),
    Arrow(&'a ArrowShape),
    Text(&'a TextShape),
    Dimension(&'a DimensionShape),
}

/// Mutable counterpart of [`Shape`], used by coordinate migration.
#[derive(Debug)]
pub enum ShapeMut<'a> {
    Line(&'a mut LineShape),
    Rect(&'a mut RectShape),
    Arrow(&'a mut ArrowShape),
    Text(&'a mut TextShape),
    Dimension(&'a mut DimensionShape),
}

impl AnnotationData {
    pub fn is_empty(&self) -> bool {
        self.lines.is_empty()
            && self.rects.is_empty()
            && self.arrows.is_empty()
            && self.texts.is_empty()
            && self.dimensions.is_empty()
    }

    pub fn shape_count(&self) -> usize {
        self.lines.len()
            + self.rects.len()
            + self.arrows.len()
            + self.texts.len()
            + self.dimensions.len()
    }

    pub fn is_normalized(&self) -> bool {
        self.normalized_version == Some(NORMALIZED_VERSION)
    }

    /// All shapes in render order: lines, rects, arrows, texts, dimensions.
    pub fn shapes(&self) -> impl Iterator<Item = Shape<'_>> {
        self.lines
            .iter()
            .map(Shape::Line)
            .chain(self.rects.iter().map(Shape::Rect))
            .chain(self.arrows.iter().map(Shape::Arrow))
            .chain(self.texts.iter().map(Shape::Text))
            .chain(self.dimensions.iter().map(Shape::Dimension))
    }

    pub fn shapes_mut(&mut self) -> impl Iterator<Item = ShapeMut<'_>> {
        self.lines
            .iter_mut()
            .map(ShapeMut::Line)
            .chain(self.rects.iter_mut().map(ShapeMut::Rect))
            .chain(self.arrows.iter_mut().map(ShapeMut::Arrow))
            .chain(self.texts.iter_mut().map(ShapeMut::Text))
            .chain(self.dimensions.iter_mut().map(ShapeMut::Dimension))
    }

    /// Natural image size recorded at authoring time, if both sides are usable.
    pub fn recorded_natural_size(&self) -> Option<(f64, f64)> {
        match (self.image_natural_width, self.image_natural_height) {
            (Some(w), Some(h)) if is_positive(w) && is_positive(h) => Some((w, h)),
            _ => None,
        }
    }

    pub fn recorded_stage_size(&self) -> Option<(f64, f64)> {
        match (self.stage_width, self.stage_height) {
            (Some(w), Some(h)) if is_positive(w) && is_positive(h) => Some((w, h)),
            _ => None,
        }
    }
}

pub(crate) fn is_positive(v: f64) -> bool {
    v.is_finite() && v > 0.0
}

#[derive(Debug, thiserror::Error)]
pub enum AnnotationParseError {
    #[error("annotation payload is not valid JSON: {0}")]
    Json(#[from] serde_json::Error),
    #[error("annotation payload is still a string after {0} decode passes")]
    TooDeeplyEncoded(usize),
    #[error("annotation payload has unexpected JSON type: {0}")]
    UnexpectedType(&'static str),
}

/// Decodes a stored annotation value, unwrapping string-encoded JSON up to
/// [`MAX_DECODE_PASSES`] times. `null` and empty strings decode to an empty set.
pub fn parse_annotation_value(value: &Value) -> Result<AnnotationData, AnnotationParseError> {
    let mut current = value.clone();
    let mut passes = 0;

    loop {
        match current {
            Value::Null => return Ok(AnnotationData::default()),
            Value::Object(map) => return Ok(serde_json::from_value(Value::Object(map))?),
            Value::String(s) => {
                if s.trim().is_empty() {
                    return Ok(AnnotationData::default());
                }
                if passes == MAX_DECODE_PASSES {
                    return Err(AnnotationParseError::TooDeeplyEncoded(passes));
                }
                current = serde_json::from_str(&s)?;
                passes += 1;
            }
            Value::Array(_) => return Err(AnnotationParseError::UnexpectedType("array")),
            Value::Bool(_) => return Err(AnnotationParseError::UnexpectedType("bool")),
            Value::Number(_) => return Err(AnnotationParseError::UnexpectedType("number")),
        }
    }
}
