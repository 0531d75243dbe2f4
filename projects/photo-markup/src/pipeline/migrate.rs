// Legacy annotation migration
//
// Records written before schema version 2 hold raw stage pixels. They are
// normalized once against a contain fit rebuilt from their own dimensions.

use crate::annotation::{AnnotationData, ImageRenderTransform, ShapeMut, NORMALIZED_VERSION};
use crate::pipeline::geometry::{
    build_normalization_context, normalize_size_to_image, stage_to_image_normalized,
    NormalizationContext,
};

#[derive(Debug, Clone, PartialEq)]
pub enum Migration {
    /// Already stored in normalized units.
    Current,
    /// Legacy record converted to normalized units.
    Migrated(AnnotationData),
    /// Legacy record missing one of the four dimensions; passed through as-is.
    Unmigratable,
}

/// Context a legacy record was authored against, rebuilt from its own fields.
/// Legacy records predate `imageRenderTransform`, so the fit is recomputed.
pub fn legacy_context(data: &AnnotationData) -> Option<NormalizationContext> {
    let (natural_w, natural_h) = data.recorded_natural_size()?;
    let (stage_w, stage_h) = data.recorded_stage_size()?;
    let ctx = build_normalization_context(natural_w, natural_h, stage_w, stage_h);
    ctx.is_valid().then_some(ctx)
}

pub fn migrate_legacy(data: &AnnotationData) -> Migration {
    if data.is_normalized() {
        return Migration::Current;
    }
    match legacy_context(data) {
        Some(ctx) => Migration::Migrated(normalize_with_context(data, &ctx)),
        None => Migration::Unmigratable,
    }
}

/// Runs the forward normalization over every shape. Stroke widths and font
/// sizes are left untouched.
pub fn normalize_with_context(data: &AnnotationData, ctx: &NormalizationContext) -> AnnotationData {
    let mut out = data.clone();

    for shape in out.shapes_mut() {
        match shape {
            ShapeMut::Line(line) => normalize_points(&mut line.points, ctx),
            ShapeMut::Arrow(arrow) => normalize_points(&mut arrow.points, ctx),
            ShapeMut::Dimension(dim) => normalize_points(&mut dim.points, ctx),
            ShapeMut::Rect(rect) => {
                let (x, y) = stage_to_image_normalized(rect.x, rect.y, ctx);
                let (w, h) = normalize_size_to_image(rect.width, rect.height, ctx);
                rect.x = x;
                rect.y = y;
                rect.width = w;
                rect.height = h;
            }
            ShapeMut::Text(text) => {
                let (x, y) = stage_to_image_normalized(text.x, text.y, ctx);
                text.x = x;
                text.y = y;
            }
        }
    }

    out.normalized_version = Some(NORMALIZED_VERSION);
    out.image_render_transform = Some(ImageRenderTransform {
        image_scale: ctx.image_scale,
        image_x: ctx.image_x,
        image_y: ctx.image_y,
        image_rotation: 0.0,
    });
    out
}

fn normalize_points(points: &mut [f64], ctx: &NormalizationContext) {
    for pair in points.chunks_exact_mut(2) {
        let (nx, ny) = stage_to_image_normalized(pair[0], pair[1], ctx);
        pair[0] = nx;
        pair[1] = ny;
    }
}
