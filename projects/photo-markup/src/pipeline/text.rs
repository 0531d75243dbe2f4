// Text measurement capability
//
// The layout engine needs label sizes measured with the same fonts the
// renderer will draw with. The measurer is injected so tests can substitute a
// deterministic implementation.

use crate::pipeline::fonts::svg_options;
use crate::pipeline::svg::{SvgScene, TextAnchor, TextBaseline, TextRun};
use std::sync::Arc;
use usvg::fontdb::Database;

#[derive(Debug, Clone, PartialEq)]
pub struct TextStyle {
    pub family: String,
    pub size: f64,
    pub bold: bool,
    pub italic: bool,
}

impl TextStyle {
    pub fn regular(family: &str, size: f64) -> Self {
        Self {
            family: family.to_string(),
            size,
            bold: false,
            italic: false,
        }
    }

    pub fn bold(family: &str, size: f64) -> Self {
        Self {
            bold: true,
            ..Self::regular(family, size)
        }
    }

    /// Applies an editor font style string such as `"bold"`, `"italic"` or
    /// `"italic bold"`. Unknown tokens are ignored.
    pub fn with_font_style(mut self, font_style: &str) -> Self {
        for token in font_style.split_whitespace() {
            match token.to_ascii_lowercase().as_str() {
                "bold" => self.bold = true,
                "italic" => self.italic = true,
                "normal" => {}
                other => tracing::debug!("Ignoring unknown font style token {:?}", other),
            }
        }
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TextMetrics {
    pub width: f64,
    pub height: f64,
}

pub trait TextMeasurer: Send + Sync {
    /// Width of the widest line and height of the stacked lines (one em per line).
    fn measure(&self, text: &str, style: &TextStyle) -> TextMetrics;
}

/// Fixed advance per character. Deterministic regardless of installed fonts.
#[derive(Debug, Clone, Copy)]
pub struct ApproximateTextMeasurer {
    pub advance_em: f64,
}

impl Default for ApproximateTextMeasurer {
    fn default() -> Self {
        Self { advance_em: 0.6 }
    }
}

impl ApproximateTextMeasurer {
    fn line_width(&self, line: &str, style: &TextStyle) -> f64 {
        let weight = if style.bold { 1.05 } else { 1.0 };
        line.chars().count() as f64 * style.size * self.advance_em * weight
    }
}

impl TextMeasurer for ApproximateTextMeasurer {
    fn measure(&self, text: &str, style: &TextStyle) -> TextMetrics {
        let lines = split_lines(text);
        let width = lines
            .iter()
            .map(|line| self.line_width(line, style))
            .fold(0.0, f64::max);
        TextMetrics {
            width,
            height: style.size * lines.len() as f64,
        }
    }
}

/// Lays text out with usvg against the shared font database, the same path the
/// renderer rasterizes through. Falls back to the approximate measurer when no
/// face can be resolved.
pub struct SvgTextMeasurer {
    fonts: Arc<Database>,
    fallback: ApproximateTextMeasurer,
}

impl SvgTextMeasurer {
    pub fn new(fonts: Arc<Database>) -> Self {
        Self {
            fonts,
            fallback: ApproximateTextMeasurer::default(),
        }
    }

    fn laid_out_width(&self, line: &str, style: &TextStyle) -> Option<f64> {
        let mut scene = SvgScene::new(1, 1);
        scene.text(&TextRun {
            text: line,
            x: 0.0,
            y: 0.0,
            style,
            color: "#000000",
            anchor: TextAnchor::Start,
            baseline: TextBaseline::Top,
            rotation: 0.0,
        });
        let opt = svg_options(&self.fonts, &style.family);
        let tree = usvg::Tree::from_str(&scene.finish(), &opt).ok()?;
        if !tree.root().has_children() {
            return None;
        }
        let bbox = tree.root().abs_bounding_box();
        Some(bbox.width() as f64)
    }
}

impl TextMeasurer for SvgTextMeasurer {
    fn measure(&self, text: &str, style: &TextStyle) -> TextMetrics {
        let lines = split_lines(text);
        let width = lines
            .iter()
            .filter(|line| !line.trim().is_empty())
            .map(|line| {
                self.laid_out_width(line, style)
                    .unwrap_or_else(|| self.fallback.line_width(line, style))
            })
            .fold(0.0, f64::max);
        TextMetrics {
            width,
            height: style.size * lines.len() as f64,
        }
    }
}

/// Never empty: an empty string is one empty line.
pub fn split_lines(text: &str) -> Vec<&str> {
    text.split('\n').map(|l| l.trim_end_matches('\r')).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_approximate_measurer() {
        let m = ApproximateTextMeasurer::default();
        let style = TextStyle::regular("Arial", 10.0);
        let metrics = m.measure("abcd", &style);
        assert!((metrics.width - 24.0).abs() < 1e-9);
        assert!((metrics.height - 10.0).abs() < 1e-9);

        let bold = m.measure("abcd", &TextStyle::bold("Arial", 10.0));
        assert!(bold.width > metrics.width);

        let multi = m.measure("ab\nabcdef", &style);
        assert!((multi.width - 36.0).abs() < 1e-9);
        assert!((multi.height - 20.0).abs() < 1e-9);
    }

    #[test]
    fn test_font_style_parsing() {
        let style = TextStyle::regular("Arial", 12.0).with_font_style("italic bold");
        assert!(style.bold && style.italic);
        let plain = TextStyle::regular("Arial", 12.0).with_font_style("normal");
        assert!(!plain.bold && !plain.italic);
    }

    #[test]
    fn test_svg_measurer_is_positive_and_monotonic() {
        let m = SvgTextMeasurer::new(crate::pipeline::fonts::shared_font_database());
        let style = TextStyle::bold("Arial", 16.0);
        let short = m.measure("12 cm", &style);
        let long = m.measure("12 cm and a much longer label", &style);
        assert!(short.width > 0.0);
        assert!(long.width > short.width);
        assert!((short.height - 16.0).abs() < 1e-9);
    }
}
