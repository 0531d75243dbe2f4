// Dimension label layout
//
// Places a measurement label beside the midpoint of its segment, pushed out
// along the segment normal until it clears both the segment and the stage
// edges. The preferred side is tried first, then the opposite side, then the
// closer of the two failed attempts is used.

use crate::pipeline::geometry::{pad_rect, rect_from_center, rect_within_bounds, segment_intersects_rect};
use crate::pipeline::text::{TextMeasurer, TextStyle};
use geo_types::{coord, Coord, Rect};

pub const LABEL_PADDING: f64 = 8.0;
pub const MAX_PLACEMENT_ATTEMPTS: usize = 8;
pub const DEFAULT_BOUNDS_TOLERANCE: f64 = 10.0;
/// Vertical gap between the label and the comment underneath it.
pub const COMMENT_GAP: f64 = 2.0;
pub const MIN_STROKE_WIDTH: f64 = 1.0;

pub fn scaled_stroke_width(stroke_width: f64, size_scale: f64) -> f64 {
    (stroke_width * size_scale).max(MIN_STROKE_WIDTH)
}

pub fn arrow_length(stroke_width: f64) -> f64 {
    (stroke_width * 3.0).clamp(10.0, 28.0)
}

pub fn arrow_width(stroke_width: f64) -> f64 {
    (stroke_width * 2.0).clamp(6.0, 20.0)
}

pub fn cap_radius(stroke_width: f64) -> f64 {
    (stroke_width * 1.5).clamp(6.0, 18.0)
}

pub fn comment_font_size(font_size: f64) -> f64 {
    (font_size * 0.8).max(10.0)
}

/// Initial perpendicular distance from the segment to the label block center.
pub fn base_offset(stroke_width: f64, font_size: f64, block_height: f64) -> f64 {
    (stroke_width * 2.0 + font_size * 0.4).max(8.0)
        + block_height / 2.0
        + stroke_width / 2.0
        + 4.0
}

pub fn offset_step(stroke_width: f64) -> f64 {
    stroke_width.max(6.0)
}

/// Rotation in degrees that keeps text along the segment readable: angles
/// past vertical are flipped by 180°.
pub fn upright_angle(dx: f64, dy: f64) -> f64 {
    let angle = dy.atan2(dx).to_degrees();
    if angle > 90.0 {
        angle - 180.0
    } else if angle < -90.0 {
        angle + 180.0
    } else {
        angle
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct StageBounds {
    pub width: f64,
    pub height: f64,
    pub tolerance: f64,
}

impl StageBounds {
    pub fn new(width: f64, height: f64) -> Self {
        Self {
            width,
            height,
            tolerance: DEFAULT_BOUNDS_TOLERANCE,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LabelBox {
    pub center: Coord<f64>,
    pub width: f64,
    pub height: f64,
}

/// Points, bounds and `font_size` are in target raster pixels. `stroke_width`
/// is the authored width; arrow and cap sizes are clamped at authoring scale
/// and then multiplied by `size_scale`.
#[derive(Debug, Clone)]
pub struct DimensionLayoutRequest<'a> {
    pub p1: Coord<f64>,
    pub p2: Coord<f64>,
    pub stroke_width: f64,
    pub size_scale: f64,
    pub font_size: f64,
    pub label_text: &'a str,
    pub comment_text: Option<&'a str>,
    pub bounds: StageBounds,
    pub preferred_side_sign: f64,
    pub font_family: &'a str,
    pub font_style: &'a str,
}

impl DimensionLayoutRequest<'_> {
    /// Stroke width on the target raster.
    pub fn pixel_stroke_width(&self) -> f64 {
        scaled_stroke_width(self.stroke_width, self.size_scale)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct DimensionLayoutResult {
    pub label: LabelBox,
    pub comment: Option<LabelBox>,
    pub label_font_size: f64,
    pub comment_font_size: f64,
    pub arrow_length: f64,
    pub arrow_width: f64,
    pub cap_radius: f64,
    /// Text rotation in degrees, already flipped to stay upright.
    pub rotation: f64,
    /// Final distance from the segment to the block center.
    pub offset: f64,
    pub used_side_sign: f64,
    /// False when neither side found a legal spot and the result is best effort.
    pub fits: bool,
    /// Padded axis-aligned box that was tested against the segment and bounds.
    pub clearance_rect: Rect<f64>,
}

struct Block {
    width: f64,
    height: f64,
    label_height: f64,
    comment_height: Option<f64>,
}

struct Frame {
    p1: Coord<f64>,
    p2: Coord<f64>,
    mid: Coord<f64>,
    /// Left-hand normal of p1->p2 in screen coordinates.
    normal: Coord<f64>,
    /// Text rotation in radians.
    theta: f64,
}

impl Frame {
    fn new(p1: Coord<f64>, p2: Coord<f64>) -> Self {
        let dx = p2.x - p1.x;
        let dy = p2.y - p1.y;
        let len = (dx * dx + dy * dy).sqrt();
        let (ux, uy) = if len > f64::EPSILON {
            (dx / len, dy / len)
        } else {
            (1.0, 0.0)
        };
        Self {
            p1,
            p2,
            mid: coord! { x: (p1.x + p2.x) / 2.0, y: (p1.y + p2.y) / 2.0 },
            normal: coord! { x: uy, y: -ux },
            theta: upright_angle(ux, uy).to_radians(),
        }
    }

    fn block_center(&self, side: f64, offset: f64) -> Coord<f64> {
        coord! {
            x: self.mid.x + self.normal.x * side * offset,
            y: self.mid.y + self.normal.y * side * offset,
        }
    }

    /// Rotates a vector given in the upright text frame into stage coordinates.
    fn rotate(&self, local: Coord<f64>) -> Coord<f64> {
        let (sin, cos) = self.theta.sin_cos();
        coord! {
            x: local.x * cos - local.y * sin,
            y: local.x * sin + local.y * cos,
        }
    }

    /// Axis-aligned box around the rotated block, padded.
    fn clearance_rect(&self, center: Coord<f64>, block: &Block) -> Rect<f64> {
        let (sin, cos) = self.theta.sin_cos();
        let (sin, cos) = (sin.abs(), cos.abs());
        let width = cos * block.width + sin * block.height;
        let height = sin * block.width + cos * block.height;
        pad_rect(&rect_from_center(center, width, height), LABEL_PADDING)
    }
}

struct Attempt {
    side: f64,
    offset: f64,
    center: Coord<f64>,
    rect: Rect<f64>,
    ok: bool,
}

fn try_placement(
    frame: &Frame,
    block: &Block,
    side: f64,
    base: f64,
    step: f64,
    bounds: &StageBounds,
) -> Attempt {
    let mut offset = base;
    for attempt in 0..MAX_PLACEMENT_ATTEMPTS {
        let center = frame.block_center(side, offset);
        let rect = frame.clearance_rect(center, block);
        let in_bounds = rect_within_bounds(&rect, bounds.width, bounds.height, bounds.tolerance);
        let clear = !segment_intersects_rect(frame.p1, frame.p2, &rect);

        if in_bounds && clear {
            return Attempt {
                side,
                offset,
                center,
                rect,
                ok: true,
            };
        }
        // Pushing further out can't fix a box that already starts off-stage.
        let last = attempt + 1 == MAX_PLACEMENT_ATTEMPTS;
        if (attempt == 0 && !in_bounds) || last {
            return Attempt {
                side,
                offset,
                center,
                rect,
                ok: false,
            };
        }
        offset += step;
    }
    unreachable!("placement loop always returns")
}

pub fn compute_dimension_layout(
    request: &DimensionLayoutRequest,
    measurer: &dyn TextMeasurer,
) -> DimensionLayoutResult {
    let sw = request.pixel_stroke_width();
    let frame = Frame::new(request.p1, request.p2);

    let label_style = TextStyle::bold(request.font_family, request.font_size)
        .with_font_style(request.font_style);
    let comment_size = comment_font_size(request.font_size);
    let comment_style =
        TextStyle::regular(request.font_family, comment_size).with_font_style(request.font_style);

    let label_metrics = measurer.measure(request.label_text, &label_style);
    let comment_metrics = request
        .comment_text
        .map(|text| measurer.measure(text, &comment_style));

    let block = Block {
        width: comment_metrics
            .map(|c| c.width.max(label_metrics.width))
            .unwrap_or(label_metrics.width),
        height: label_metrics.height
            + comment_metrics.map(|c| COMMENT_GAP + c.height).unwrap_or(0.0),
        label_height: label_metrics.height,
        comment_height: comment_metrics.map(|c| c.height),
    };

    let base = base_offset(sw, request.font_size, block.height);
    let step = offset_step(sw);
    let preferred = if request.preferred_side_sign < 0.0 { -1.0 } else { 1.0 };

    let first = try_placement(&frame, &block, preferred, base, step, &request.bounds);
    let chosen = if first.ok {
        first
    } else {
        let second = try_placement(&frame, &block, -preferred, base, step, &request.bounds);
        if second.ok || second.offset < first.offset {
            second
        } else {
            first
        }
    };

    if !chosen.ok {
        tracing::debug!(
            "No legal spot for dimension label {:?}, using side {} at offset {:.1}",
            request.label_text,
            chosen.side,
            chosen.offset
        );
    }

    let label_center = add(
        chosen.center,
        frame.rotate(coord! { x: 0.0, y: -block.height / 2.0 + block.label_height / 2.0 }),
    );
    let comment = comment_metrics.zip(block.comment_height).map(|(metrics, height)| LabelBox {
        center: add(
            chosen.center,
            frame.rotate(coord! { x: 0.0, y: block.height / 2.0 - height / 2.0 }),
        ),
        width: metrics.width,
        height,
    });

    DimensionLayoutResult {
        label: LabelBox {
            center: label_center,
            width: label_metrics.width,
            height: label_metrics.height,
        },
        comment,
        label_font_size: request.font_size,
        comment_font_size: comment_size,
        arrow_length: arrow_length(request.stroke_width) * request.size_scale,
        arrow_width: arrow_width(request.stroke_width) * request.size_scale,
        cap_radius: cap_radius(request.stroke_width) * request.size_scale,
        rotation: frame.theta.to_degrees(),
        offset: chosen.offset,
        used_side_sign: chosen.side,
        fits: chosen.ok,
        clearance_rect: chosen.rect,
    }
}

fn add(a: Coord<f64>, b: Coord<f64>) -> Coord<f64> {
    coord! { x: a.x + b.x, y: a.y + b.y }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::text::ApproximateTextMeasurer;

    fn request<'a>(
        p1: Coord<f64>,
        p2: Coord<f64>,
        label: &'a str,
        bounds: StageBounds,
        side: f64,
    ) -> DimensionLayoutRequest<'a> {
        DimensionLayoutRequest {
            p1,
            p2,
            stroke_width: 2.0,
            size_scale: 1.0,
            font_size: 16.0,
            label_text: label,
            comment_text: None,
            bounds,
            preferred_side_sign: side,
            font_family: "Arial",
            font_style: "bold",
        }
    }

    #[test]
    fn test_shared_size_formulas() {
        assert_eq!(arrow_length(1.0), 10.0);
        assert_eq!(arrow_length(5.0), 15.0);
        assert_eq!(arrow_length(20.0), 28.0);
        assert_eq!(arrow_width(1.0), 6.0);
        assert_eq!(arrow_width(20.0), 20.0);
        assert_eq!(cap_radius(2.0), 6.0);
        assert_eq!(cap_radius(8.0), 12.0);
        assert_eq!(cap_radius(30.0), 18.0);
        // max(8, 4 + 6.4) + 8 + 1 + 4
        assert!((base_offset(2.0, 16.0, 16.0) - 23.4).abs() < 1e-9);
        assert_eq!(base_offset(0.0, 0.0, 0.0), 12.0);
    }

    #[test]
    fn test_upright_angle() {
        assert_eq!(upright_angle(1.0, 0.0), 0.0);
        assert!((upright_angle(-1.0, 0.0)).abs() < 1e-9);
        assert!((upright_angle(-1.0, -1.0) - 45.0).abs() < 1e-9);
        assert!((upright_angle(-1.0, 1.0) + 45.0).abs() < 1e-9);
        assert!((upright_angle(0.0, 1.0) - 90.0).abs() < 1e-9);
    }

    #[test]
    fn test_places_on_preferred_side_when_free() {
        let measurer = ApproximateTextMeasurer::default();
        let req = request(
            coord! { x: 100.0, y: 200.0 },
            coord! { x: 300.0, y: 200.0 },
            "12 cm",
            StageBounds::new(800.0, 600.0),
            1.0,
        );
        let layout = compute_dimension_layout(&req, &measurer);
        assert!(layout.fits);
        assert_eq!(layout.used_side_sign, 1.0);
        // Side +1 is above a left-to-right segment.
        assert!(layout.label.center.y < 200.0);
        assert!((layout.label.center.x - 200.0).abs() < 1e-9);
        assert!((layout.offset - 23.4).abs() < 1e-9);
        assert_eq!(layout.rotation, 0.0);
    }

    #[test]
    fn test_never_intersects_segment_on_success_and_best_effort() {
        let measurer = ApproximateTextMeasurer::default();
        let p1 = coord! { x: 100.0, y: 100.0 };
        let p2 = coord! { x: 300.0, y: 100.0 };
        let long_label = "123456.789 millimetres";

        let roomy = compute_dimension_layout(
            &request(p1, p2, long_label, StageBounds::new(1000.0, 1000.0), 1.0),
            &measurer,
        );
        assert!(roomy.fits);
        assert!(!segment_intersects_rect(p1, p2, &roomy.clearance_rect));

        let cramped = compute_dimension_layout(
            &request(p1, p2, long_label, StageBounds::new(250.0, 150.0), 1.0),
            &measurer,
        );
        assert!(!cramped.fits);
        assert!(!segment_intersects_rect(p1, p2, &cramped.clearance_rect));
        let label_rect = rect_from_center(cramped.label.center, cramped.label.width, cramped.label.height);
        assert!(!segment_intersects_rect(p1, p2, &label_rect));
        // Both sides abort immediately at the same offset, so the preferred side is kept.
        assert_eq!(cramped.used_side_sign, 1.0);
    }

    #[test]
    fn test_flips_side_near_top_edge() {
        let measurer = ApproximateTextMeasurer::default();
        let layout = compute_dimension_layout(
            &request(
                coord! { x: 100.0, y: 20.0 },
                coord! { x: 300.0, y: 20.0 },
                "2.5 m",
                StageBounds::new(400.0, 400.0),
                1.0,
            ),
            &measurer,
        );
        assert!(layout.fits);
        assert_eq!(layout.used_side_sign, -1.0);
        assert!(layout.label.center.y > 20.0);
    }

    #[test]
    fn test_steep_segment_pushes_label_out() {
        let measurer = ApproximateTextMeasurer::default();
        let p1 = coord! { x: 200.0, y: 100.0 };
        let p2 = coord! { x: 260.0, y: 160.0 };
        let bounds = StageBounds::new(1000.0, 1000.0);

        // The rotated box clears the segment once 0.707 * offset exceeds its
        // padded half extent (24.35 for "5 m"), i.e. on the third attempt.
        let short = compute_dimension_layout(&request(p1, p2, "5 m", bounds, 1.0), &measurer);
        assert!(short.fits);
        assert_eq!(short.used_side_sign, 1.0);
        assert!((short.offset - (23.4 + 2.0 * 6.0)).abs() < 1e-9);
        assert!(!segment_intersects_rect(p1, p2, &short.clearance_rect));
        assert!((short.rotation - 45.0).abs() < 1e-9);

        // A wide label needs an offset past 115; eight steps stop at 65.4 on
        // both sides, so the tie keeps the preferred side.
        let wide = compute_dimension_layout(
            &request(p1, p2, "a fairly wide label", bounds, 1.0),
            &measurer,
        );
        assert!(!wide.fits);
        assert_eq!(wide.used_side_sign, 1.0);
        assert!((wide.offset - (23.4 + 7.0 * 6.0)).abs() < 1e-9);
        assert!(segment_intersects_rect(p1, p2, &wide.clearance_rect));
    }

    #[test]
    fn test_arrow_sizes_clamp_before_scaling() {
        let measurer = ApproximateTextMeasurer::default();
        let mut req = request(
            coord! { x: 400.0, y: 1500.0 },
            coord! { x: 3600.0, y: 1500.0 },
            "3.2 m",
            StageBounds::new(4000.0, 3000.0),
            1.0,
        );
        req.stroke_width = 3.0;
        req.size_scale = 4.0;
        let layout = compute_dimension_layout(&req, &measurer);
        assert_eq!(req.pixel_stroke_width(), 12.0);
        assert_eq!(layout.arrow_length, 40.0);
        assert_eq!(layout.arrow_width, 24.0);
        assert_eq!(layout.cap_radius, 24.0);
    }

    #[test]
    fn test_comment_stacks_under_label() {
        let measurer = ApproximateTextMeasurer::default();
        let mut req = request(
            coord! { x: 100.0, y: 300.0 },
            coord! { x: 300.0, y: 300.0 },
            "40 cm",
            StageBounds::new(800.0, 800.0),
            1.0,
        );
        req.comment_text = Some("behind the cabinet");
        let layout = compute_dimension_layout(&req, &measurer);
        let comment = layout.comment.expect("comment box");
        assert!(comment.center.y > layout.label.center.y);
        assert!((comment.height - 12.8).abs() < 1e-9);
        // Block height 16 + 2 + 12.8 feeds the base offset.
        assert!((layout.offset - base_offset(2.0, 16.0, 30.8)).abs() < 1e-9);
    }
}
