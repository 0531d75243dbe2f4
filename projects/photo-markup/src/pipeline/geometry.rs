use geo::Intersects;
use geo_types::{coord, Coord, Line, Rect};

/// Relative tolerance for the pixel-ratio consistency check (1%).
pub const PIXEL_RATIO_TOLERANCE: f64 = 0.01;

/// Placement of the image inside the stage, recomputed per render and never persisted.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct NormalizationContext {
    pub image_natural_width: f64,
    pub image_natural_height: f64,
    pub stage_width: f64,
    pub stage_height: f64,
    pub image_scale: f64,
    pub image_x: f64,
    pub image_y: f64,
}

/// Contain fit: uniform scale so the image fits entirely inside the stage,
/// centered on both axes. Must match the editor's placement exactly.
pub fn build_normalization_context(
    image_natural_width: f64,
    image_natural_height: f64,
    stage_width: f64,
    stage_height: f64,
) -> NormalizationContext {
    let scale = (stage_width / image_natural_width).min(stage_height / image_natural_height);
    let image_x = (stage_width - image_natural_width * scale) / 2.0;
    let image_y = (stage_height - image_natural_height * scale) / 2.0;

    NormalizationContext {
        image_natural_width,
        image_natural_height,
        stage_width,
        stage_height,
        image_scale: scale,
        image_x,
        image_y,
    }
}

impl NormalizationContext {
    /// False when any dimension or the derived scale is unusable.
    pub fn is_valid(&self) -> bool {
        [
            self.image_natural_width,
            self.image_natural_height,
            self.stage_width,
            self.stage_height,
            self.image_scale,
        ]
        .iter()
        .all(|v| v.is_finite() && *v > 0.0)
            && self.image_x.is_finite()
            && self.image_y.is_finite()
    }
}

/// Stage pixels -> fraction of the natural image size.
pub fn stage_to_image_normalized(stage_x: f64, stage_y: f64, ctx: &NormalizationContext) -> (f64, f64) {
    let nx = (stage_x - ctx.image_x) / ctx.image_scale / ctx.image_natural_width;
    let ny = (stage_y - ctx.image_y) / ctx.image_scale / ctx.image_natural_height;
    (nx, ny)
}

/// Exact inverse of [`stage_to_image_normalized`].
pub fn image_normalized_to_stage(nx: f64, ny: f64, ctx: &NormalizationContext) -> (f64, f64) {
    let x = nx * ctx.image_natural_width * ctx.image_scale + ctx.image_x;
    let y = ny * ctx.image_natural_height * ctx.image_scale + ctx.image_y;
    (x, y)
}

/// Sizes are translation invariant, so only the scale applies.
pub fn normalize_size_to_image(width: f64, height: f64, ctx: &NormalizationContext) -> (f64, f64) {
    (
        width / (ctx.image_scale * ctx.image_natural_width),
        height / (ctx.image_scale * ctx.image_natural_height),
    )
}

pub fn denormalize_size_from_image(
    width: f64,
    height: f64,
    ctx: &NormalizationContext,
) -> (f64, f64) {
    (
        width * ctx.image_scale * ctx.image_natural_width,
        height * ctx.image_scale * ctx.image_natural_height,
    )
}

/// Result of comparing horizontal and vertical pixel density.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PixelRatioCheck {
    pub ratio_x: f64,
    pub ratio_y: f64,
    pub consistent: bool,
}

impl PixelRatioCheck {
    /// Ratio callers should use: the smaller one when the axes disagree.
    pub fn preferred_ratio(&self) -> f64 {
        if self.consistent {
            self.ratio_x
        } else {
            self.ratio_x.min(self.ratio_y)
        }
    }
}

pub fn check_pixel_ratio_consistency(
    natural_width: f64,
    natural_height: f64,
    stage_width: f64,
    stage_height: f64,
) -> PixelRatioCheck {
    let ratio_x = natural_width / stage_width;
    let ratio_y = natural_height / stage_height;
    let consistent =
        (ratio_x - ratio_y).abs() < PIXEL_RATIO_TOLERANCE * ratio_x.max(ratio_y);

    PixelRatioCheck {
        ratio_x,
        ratio_y,
        consistent,
    }
}

/// Splits a flat `[x0, y0, x1, y1, ...]` list into coordinates.
/// Returns `None` when the list has an odd length or a non-finite value.
pub fn point_pairs(points: &[f64]) -> Option<Vec<Coord<f64>>> {
    if points.len() % 2 != 0 || points.iter().any(|v| !v.is_finite()) {
        return None;
    }
    Some(
        points
            .chunks_exact(2)
            .map(|pair| coord! { x: pair[0], y: pair[1] })
            .collect(),
    )
}

/// Axis-aligned rectangle from a center point and full extents.
pub fn rect_from_center(center: Coord<f64>, width: f64, height: f64) -> Rect<f64> {
    Rect::new(
        coord! { x: center.x - width / 2.0, y: center.y - height / 2.0 },
        coord! { x: center.x + width / 2.0, y: center.y + height / 2.0 },
    )
}

pub fn pad_rect(rect: &Rect<f64>, padding: f64) -> Rect<f64> {
    Rect::new(
        coord! { x: rect.min().x - padding, y: rect.min().y - padding },
        coord! { x: rect.max().x + padding, y: rect.max().y + padding },
    )
}

/// Segment/rectangle test: either endpoint inside the rectangle, or the
/// segment crossing any of its four edges. Boundaries count as intersecting.
pub fn segment_intersects_rect(p1: Coord<f64>, p2: Coord<f64>, rect: &Rect<f64>) -> bool {
    if rect.intersects(&p1) || rect.intersects(&p2) {
        return true;
    }
    let segment = Line::new(p1, p2);
    rect.to_lines().iter().any(|edge| edge.intersects(&segment))
}

/// True when `rect` stays inside `[0, width] x [0, height]` widened by `tolerance`.
pub fn rect_within_bounds(rect: &Rect<f64>, width: f64, height: f64, tolerance: f64) -> bool {
    rect.min().x >= -tolerance
        && rect.min().y >= -tolerance
        && rect.max().x <= width + tolerance
        && rect.max().y <= height + tolerance
}
