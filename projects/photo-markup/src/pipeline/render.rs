// Annotation renderer
//
// Draws the five annotation kinds over an upright raster. Geometry is stored
// in image-relative units, so it maps straight onto whatever raster size the
// output policy chose; stroke widths and font sizes are scaled by how much
// larger the raster is than the surface the annotations were authored on.

use crate::annotation::{
    is_positive, AnnotationData, Shape, DEFAULT_DIMENSION_FONT_SIZE, DEFAULT_STROKE_WIDTH,
    DEFAULT_TEXT_FONT_SIZE,
};
use crate::pipeline::canonical::{decode_upright, encode_jpeg, RenderOptions};
use crate::pipeline::fonts::{shared_font_database, svg_options};
use crate::pipeline::geometry::{
    build_normalization_context, check_pixel_ratio_consistency, point_pairs,
};
use crate::pipeline::layout::{
    compute_dimension_layout, scaled_stroke_width, DimensionLayoutRequest, StageBounds,
};
use crate::pipeline::migrate::{migrate_legacy, normalize_with_context, Migration};
use crate::pipeline::svg::{SvgScene, TextAnchor, TextBaseline, TextRun};
use crate::pipeline::text::{split_lines, SvgTextMeasurer, TextMeasurer, TextStyle};
use crate::pipeline::types::RenderError;
use geo_types::{coord, Coord};
use image::RgbImage;
use resvg::tiny_skia;
use std::borrow::Cow;
use std::sync::Arc;
use usvg::fontdb::Database;

pub const MIN_FONT_SIZE: f64 = 10.0;
/// Arrow pointer length and width at authoring scale.
pub const ARROW_POINTER_SIZE: f64 = 10.0;
pub const MIN_END_CAP_RADIUS: f64 = 3.0;

pub fn scaled_font_size(font_size: f64, size_scale: f64) -> f64 {
    (font_size * size_scale).max(MIN_FONT_SIZE)
}

pub fn end_cap_radius(stroke_width: f64) -> f64 {
    (stroke_width * 0.6).max(MIN_END_CAP_RADIUS)
}

/// Size of the surface the annotations were drawn on, in display pixels.
///
/// Priority: the recorded fit (`natural * imageScale`), then the recorded
/// stage size, then the natural size itself. A stage size whose axes imply
/// different pixel ratios is replaced by `natural / smaller ratio`.
pub fn authoring_display_size(data: &AnnotationData, natural_width: f64, natural_height: f64) -> (f64, f64) {
    let (nat_w, nat_h) = data
        .recorded_natural_size()
        .unwrap_or((natural_width, natural_height));

    if let Some(transform) = data.image_render_transform {
        if is_positive(transform.image_scale) {
            return (nat_w * transform.image_scale, nat_h * transform.image_scale);
        }
    }

    if let Some((stage_w, stage_h)) = data.recorded_stage_size() {
        let check = check_pixel_ratio_consistency(nat_w, nat_h, stage_w, stage_h);
        if !check.consistent {
            tracing::warn!(
                "Inconsistent pixel ratio between natural {}x{} and stage {}x{} ({:.3} vs {:.3})",
                nat_w,
                nat_h,
                stage_w,
                stage_h,
                check.ratio_x,
                check.ratio_y
            );
            let ratio = check.preferred_ratio();
            return (nat_w / ratio, nat_h / ratio);
        }
        return (stage_w, stage_h);
    }

    (natural_width, natural_height)
}

pub fn size_scale(canvas_width: f64, canvas_height: f64, authoring: (f64, f64)) -> f64 {
    let (auth_w, auth_h) = authoring;
    if !is_positive(auth_w) || !is_positive(auth_h) {
        return 1.0;
    }
    (canvas_width / auth_w + canvas_height / auth_h) / 2.0
}

/// Geometry in normalized units. Legacy records are migrated; records that
/// cannot be migrated are read as pixels of the actual image.
pub fn resolve_geometry<'a>(
    data: &'a AnnotationData,
    natural_width: f64,
    natural_height: f64,
) -> Cow<'a, AnnotationData> {
    match migrate_legacy(data) {
        Migration::Current => Cow::Borrowed(data),
        Migration::Migrated(migrated) => Cow::Owned(migrated),
        Migration::Unmigratable => {
            tracing::warn!(
                "Legacy annotations without recorded dimensions, treating them as image pixels"
            );
            let identity =
                build_normalization_context(natural_width, natural_height, natural_width, natural_height);
            Cow::Owned(normalize_with_context(data, &identity))
        }
    }
}

pub struct AnnotationRenderer {
    measurer: Arc<dyn TextMeasurer>,
    fonts: Arc<Database>,
    font_family: String,
}

impl AnnotationRenderer {
    pub fn new(measurer: Arc<dyn TextMeasurer>, fonts: Arc<Database>, font_family: &str) -> Self {
        Self {
            measurer,
            fonts,
            font_family: font_family.to_string(),
        }
    }

    /// Production renderer: process-wide font database for both measuring and drawing.
    pub fn with_system_fonts(font_family: &str) -> Self {
        let fonts = shared_font_database();
        let measurer = Arc::new(SvgTextMeasurer::new(fonts.clone()));
        Self::new(measurer, fonts, font_family)
    }

    /// Decodes, orients, resizes, draws and encodes one photo.
    pub fn render_photo(
        &self,
        bytes: &[u8],
        annotations: Option<&AnnotationData>,
        options: &RenderOptions,
    ) -> Result<Vec<u8>, RenderError> {
        let policy = options.policy();
        let mut upright = decode_upright(bytes, policy.max_edge)?;

        if let Some(data) = annotations.filter(|d| !d.is_empty()) {
            self.draw_annotations(
                &mut upright.image,
                data,
                upright.natural_width as f64,
                upright.natural_height as f64,
            )?;
        }

        encode_jpeg(&upright.image, policy.quality)
    }

    pub fn draw_annotations(
        &self,
        canvas: &mut RgbImage,
        data: &AnnotationData,
        natural_width: f64,
        natural_height: f64,
    ) -> Result<(), RenderError> {
        let geometry = resolve_geometry(data, natural_width, natural_height);
        let (cw, ch) = canvas.dimensions();
        let scale = size_scale(
            cw as f64,
            ch as f64,
            authoring_display_size(&geometry, natural_width, natural_height),
        );

        let scene = self.build_scene(&geometry, cw, ch, scale)?;
        if scene.is_empty() {
            return Ok(());
        }
        tracing::debug!(
            "Drawing {} shapes as {} overlay elements at size scale {:.3}",
            geometry.shape_count(),
            scene.element_count(),
            scale
        );
        self.composite(canvas, scene)
    }

    fn build_scene(
        &self,
        data: &AnnotationData,
        width: u32,
        height: u32,
        scale: f64,
    ) -> Result<SvgScene, RenderError> {
        let mut scene = SvgScene::new(width, height);
        let canvas = Canvas {
            width: width as f64,
            height: height as f64,
            scale,
        };

        // Failure records name shapes by their position within their own kind.
        let mut seen = [0usize; 5];
        for shape in data.shapes() {
            let slot = match shape {
                Shape::Line(_) => 0,
                Shape::Rect(_) => 1,
                Shape::Arrow(_) => 2,
                Shape::Text(_) => 3,
                Shape::Dimension(_) => 4,
            };
            let index = seen[slot];
            seen[slot] += 1;

            match shape {
                Shape::Line(line) => {
                    let points = canvas.points("line", index, &line.points)?;
                    let sw = canvas.stroke(line.stroke_width);
                    if points.len() < 2 {
                        tracing::debug!("Skipping line #{} with fewer than two points", index);
                        continue;
                    }
                    scene.stroke_polyline(&points, &line.color, sw);
                }
                Shape::Rect(rect) => {
                    let values = [rect.x, rect.y, rect.width, rect.height];
                    if values.iter().any(|v| !v.is_finite()) {
                        return Err(geometry_error("rect", index, "non-finite bounds"));
                    }
                    let (mut x, mut y) = (rect.x * canvas.width, rect.y * canvas.height);
                    let (mut w, mut h) = (rect.width * canvas.width, rect.height * canvas.height);
                    if w < 0.0 {
                        x += w;
                        w = -w;
                    }
                    if h < 0.0 {
                        y += h;
                        h = -h;
                    }
                    if w == 0.0 && h == 0.0 {
                        tracing::debug!("Skipping empty rect #{}", index);
                        continue;
                    }
                    scene.stroke_rect(x, y, w, h, &rect.color, canvas.stroke(rect.stroke_width));
                }
                Shape::Arrow(arrow) => {
                    let points = canvas.points("arrow", index, &arrow.points)?;
                    if points.len() < 2 {
                        tracing::debug!("Skipping arrow #{} with fewer than two points", index);
                        continue;
                    }
                    draw_arrow(&mut scene, &points, &arrow.color, canvas.stroke(arrow.stroke_width), scale);
                }
                Shape::Text(text) => {
                    if !text.x.is_finite() || !text.y.is_finite() {
                        return Err(geometry_error("text", index, "non-finite position"));
                    }
                    let size = scaled_font_size(text.font_size.unwrap_or(DEFAULT_TEXT_FONT_SIZE), scale);
                    let style = TextStyle::regular(&self.font_family, size);
                    let (x, y) = (text.x * canvas.width, text.y * canvas.height);
                    for (line_no, line) in split_lines(&text.text).into_iter().enumerate() {
                        scene.text(&TextRun {
                            text: line,
                            x,
                            y: y + line_no as f64 * size,
                            style: &style,
                            color: &text.color,
                            anchor: TextAnchor::Start,
                            baseline: TextBaseline::Top,
                            rotation: 0.0,
                        });
                    }
                }
                Shape::Dimension(dim) => {
                    let points = canvas.points("dimension", index, &dim.points)?;
                    if points.len() < 2 {
                        tracing::debug!("Skipping dimension #{} with fewer than two points", index);
                        continue;
                    }
                    let fs = scaled_font_size(dim.font_size.unwrap_or(DEFAULT_DIMENSION_FONT_SIZE), scale);
                    let label = dim.label_text();
                    let request = DimensionLayoutRequest {
                        p1: points[0],
                        p2: points[1],
                        stroke_width: dim.stroke_width.unwrap_or(DEFAULT_STROKE_WIDTH),
                        size_scale: scale,
                        font_size: fs,
                        label_text: &label,
                        comment_text: dim.comment_text(),
                        bounds: StageBounds::new(canvas.width, canvas.height),
                        preferred_side_sign: dim.side_sign(),
                        font_family: &self.font_family,
                        font_style: "normal",
                    };
                    self.draw_dimension(&mut scene, &request, &dim.color);
                }
            }
        }

        Ok(scene)
    }

    fn draw_dimension(&self, scene: &mut SvgScene, request: &DimensionLayoutRequest, color: &str) {
        let layout = compute_dimension_layout(request, self.measurer.as_ref());
        let (p1, p2) = (request.p1, request.p2);
        let sw = request.pixel_stroke_width();

        if let Some((ux, uy, len)) = unit_direction(p1, p2) {
            let trim = layout.arrow_length.min(len / 2.0);
            let start = coord! { x: p1.x + ux * trim, y: p1.y + uy * trim };
            let end = coord! { x: p2.x - ux * trim, y: p2.y - uy * trim };
            if trim < len / 2.0 {
                scene.stroke_polyline(&[start, end], color, sw);
            }
            scene.fill_polygon(&arrow_head(p2, ux, uy, trim, layout.arrow_width), color);
            scene.fill_polygon(&arrow_head(p1, -ux, -uy, trim, layout.arrow_width), color);
        }

        let cap = end_cap_radius(request.stroke_width) * request.size_scale;
        scene.fill_circle(p1, cap, color);
        scene.fill_circle(p2, cap, color);

        let label_style = TextStyle::bold(&self.font_family, layout.label_font_size);
        scene.text(&TextRun {
            text: request.label_text,
            x: layout.label.center.x,
            y: layout.label.center.y,
            style: &label_style,
            color,
            anchor: TextAnchor::Middle,
            baseline: TextBaseline::Middle,
            rotation: layout.rotation,
        });

        if let (Some(text), Some(comment)) = (request.comment_text, layout.comment) {
            let comment_style = TextStyle::regular(&self.font_family, layout.comment_font_size);
            scene.text(&TextRun {
                text,
                x: comment.center.x,
                y: comment.center.y,
                style: &comment_style,
                color,
                anchor: TextAnchor::Middle,
                baseline: TextBaseline::Middle,
                rotation: layout.rotation,
            });
        }
    }

    /// Rasterizes the overlay and blends it over the canvas.
    fn composite(&self, canvas: &mut RgbImage, scene: SvgScene) -> Result<(), RenderError> {
        let (width, height) = canvas.dimensions();
        let opt = svg_options(&self.fonts, &self.font_family);
        let tree = usvg::Tree::from_str(&scene.finish(), &opt)?;

        let mut pixmap =
            tiny_skia::Pixmap::new(width, height).ok_or(RenderError::Allocation(width, height))?;
        resvg::render(&tree, tiny_skia::Transform::default(), &mut pixmap.as_mut());

        // Premultiplied source-over onto an opaque destination.
        for (dst, src) in canvas.pixels_mut().zip(pixmap.data().chunks_exact(4)) {
            let alpha = src[3] as u32;
            if alpha == 0 {
                continue;
            }
            for c in 0..3 {
                let blended = src[c] as u32 + (dst.0[c] as u32 * (255 - alpha) + 127) / 255;
                dst.0[c] = blended.min(255) as u8;
            }
        }
        Ok(())
    }
}

/// Raster size the normalized geometry is mapped onto.
struct Canvas {
    width: f64,
    height: f64,
    scale: f64,
}

impl Canvas {
    fn points(&self, kind: &'static str, index: usize, flat: &[f64]) -> Result<Vec<Coord<f64>>, RenderError> {
        let points = point_pairs(flat)
            .ok_or_else(|| geometry_error(kind, index, "odd-length or non-finite point list"))?;
        Ok(points
            .into_iter()
            .map(|p| coord! { x: p.x * self.width, y: p.y * self.height })
            .collect())
    }

    fn stroke(&self, stroke_width: Option<f64>) -> f64 {
        scaled_stroke_width(stroke_width.unwrap_or(DEFAULT_STROKE_WIDTH), self.scale)
    }
}

fn geometry_error(kind: &'static str, index: usize, reason: &str) -> RenderError {
    RenderError::Geometry {
        kind,
        index,
        reason: reason.to_string(),
    }
}

fn unit_direction(from: Coord<f64>, to: Coord<f64>) -> Option<(f64, f64, f64)> {
    let (dx, dy) = (to.x - from.x, to.y - from.y);
    let len = (dx * dx + dy * dy).sqrt();
    (len > f64::EPSILON).then(|| (dx / len, dy / len, len))
}

/// Triangle with its tip on `tip`, pointing along (`ux`, `uy`).
fn arrow_head(tip: Coord<f64>, ux: f64, uy: f64, length: f64, width: f64) -> [Coord<f64>; 3] {
    let base = coord! { x: tip.x - ux * length, y: tip.y - uy * length };
    let (nx, ny) = (-uy * width / 2.0, ux * width / 2.0);
    [
        tip,
        coord! { x: base.x + nx, y: base.y + ny },
        coord! { x: base.x - nx, y: base.y - ny },
    ]
}

fn draw_arrow(scene: &mut SvgScene, points: &[Coord<f64>], color: &str, stroke_width: f64, scale: f64) {
    let tip = points[points.len() - 1];
    let prev = points[points.len() - 2];
    let Some((ux, uy, len)) = unit_direction(prev, tip) else {
        scene.stroke_polyline(points, color, stroke_width);
        return;
    };

    let pointer = ARROW_POINTER_SIZE * scale;
    let trim = pointer.min(len);
    let mut shaft = points.to_vec();
    if let Some(last) = shaft.last_mut() {
        *last = coord! { x: tip.x - ux * trim, y: tip.y - uy * trim };
    }
    scene.stroke_polyline(&shaft, color, stroke_width);
    scene.fill_polygon(&arrow_head(tip, ux, uy, pointer, pointer), color);
}
