// SVG overlay builder
//
// Annotations are drawn by emitting an SVG document the size of the target
// raster and rasterizing it with resvg. Text measurement goes through the same
// text element writer so layout and drawing agree on fonts.

use crate::pipeline::fonts::font_family_chain;
use crate::pipeline::text::TextStyle;
use geo_types::Coord;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TextAnchor {
    Start,
    Middle,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TextBaseline {
    /// Top of the em box sits on `y`.
    Top,
    /// Vertical center sits on `y`.
    Middle,
}

/// A single line of text placed on the overlay.
pub struct TextRun<'a> {
    pub text: &'a str,
    pub x: f64,
    pub y: f64,
    pub style: &'a TextStyle,
    pub color: &'a str,
    pub anchor: TextAnchor,
    pub baseline: TextBaseline,
    /// Degrees, clockwise, around (`x`, `y`).
    pub rotation: f64,
}

pub struct SvgScene {
    width: u32,
    height: u32,
    body: String,
    elements: usize,
}

impl SvgScene {
    pub fn new(width: u32, height: u32) -> Self {
        Self {
            width,
            height,
            body: String::new(),
            elements: 0,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.elements == 0
    }

    pub fn element_count(&self) -> usize {
        self.elements
    }

    pub fn stroke_polyline(&mut self, points: &[Coord<f64>], color: &str, stroke_width: f64) {
        if points.len() < 2 {
            return;
        }
        self.push(format!(
            r#"<polyline points="{}" fill="none" stroke="{}" stroke-width="{}" stroke-linecap="round" stroke-linejoin="round"/>"#,
            format_points(points),
            escape_xml(color),
            num(stroke_width)
        ));
    }

    pub fn stroke_rect(
        &mut self,
        x: f64,
        y: f64,
        width: f64,
        height: f64,
        color: &str,
        stroke_width: f64,
    ) {
        self.push(format!(
            r#"<rect x="{}" y="{}" width="{}" height="{}" fill="none" stroke="{}" stroke-width="{}" stroke-linecap="round" stroke-linejoin="round"/>"#,
            num(x),
            num(y),
            num(width),
            num(height),
            escape_xml(color),
            num(stroke_width)
        ));
    }

    pub fn fill_polygon(&mut self, points: &[Coord<f64>], color: &str) {
        if points.len() < 3 {
            return;
        }
        self.push(format!(
            r#"<polygon points="{}" fill="{}" stroke="none"/>"#,
            format_points(points),
            escape_xml(color)
        ));
    }

    pub fn fill_circle(&mut self, center: Coord<f64>, radius: f64, color: &str) {
        self.push(format!(
            r#"<circle cx="{}" cy="{}" r="{}" fill="{}" stroke="none"/>"#,
            num(center.x),
            num(center.y),
            num(radius),
            escape_xml(color)
        ));
    }

    pub fn text(&mut self, run: &TextRun) {
        if run.text.is_empty() {
            return;
        }
        let anchor = match run.anchor {
            TextAnchor::Start => "start",
            TextAnchor::Middle => "middle",
        };
        let baseline = match run.baseline {
            TextBaseline::Top => "text-before-edge",
            TextBaseline::Middle => "central",
        };
        let transform = if run.rotation != 0.0 {
            format!(
                r#" transform="rotate({} {} {})""#,
                num(run.rotation),
                num(run.x),
                num(run.y)
            )
        } else {
            String::new()
        };

        self.push(format!(
            r#"<text x="{}" y="{}" font-family="{}" font-size="{}" font-weight="{}" font-style="{}" fill="{}" text-anchor="{}" dominant-baseline="{}"{} xml:space="preserve">{}</text>"#,
            num(run.x),
            num(run.y),
            escape_xml(&font_family_chain(&run.style.family)),
            num(run.style.size),
            if run.style.bold { "bold" } else { "normal" },
            if run.style.italic { "italic" } else { "normal" },
            escape_xml(run.color),
            anchor,
            baseline,
            transform,
            escape_xml(run.text)
        ));
    }

    pub fn finish(self) -> String {
        format!(
            r#"<svg xmlns="http://www.w3.org/2000/svg" width="{w}" height="{h}" viewBox="0 0 {w} {h}">{body}</svg>"#,
            w = self.width,
            h = self.height,
            body = self.body
        )
    }

    fn push(&mut self, element: String) {
        self.body.push_str(&element);
        self.elements += 1;
    }
}

/// Fixed precision keeps the document, and therefore the raster, deterministic.
fn num(v: f64) -> String {
    let s = format!("{:.3}", v);
    if s == "-0.000" {
        "0.000".to_string()
    } else {
        s
    }
}

fn format_points(points: &[Coord<f64>]) -> String {
    points
        .iter()
        .map(|p| format!("{},{}", num(p.x), num(p.y)))
        .collect::<Vec<_>>()
        .join(" ")
}

pub fn escape_xml(input: &str) -> String {
    input
        .replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
        .replace('\'', "&apos;")
}
