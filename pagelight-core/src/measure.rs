//! Screen-space measurement of matched character ranges.
//!
//! A [`TextNode`] is one positioned run of rendered text. When the rendering
//! engine supplies a box per character the measurer unions those boxes line
//! by line, which is glyph tight. Without glyph boxes it falls back to an
//! estimate from the font size, which is usable but only as accurate as the
//! average advance ratio.
//!
//! Line detection runs in the node's reading frame: screen boxes are turned
//! back by the node's rotation so text always advances left to right, and
//! the resulting line boxes are turned forward again.

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, warn};

use crate::config::MeasureSettings;
use crate::geometry::{Rotation, ScreenRect};
use crate::matcher::MatchSpan;

#[derive(Debug, Error, Clone, PartialEq)]
pub enum MeasureError {
    #[error("glyph box {index} is not finite")]
    NonFiniteGlyph { index: usize },
    #[error("node has neither glyph boxes nor usable font metrics (font size {font_size})")]
    NoMetrics { font_size: f64 },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TextNode {
    /// Back-reference for scroll hints only.
    pub id: Option<String>,
    pub text: String,
    /// Box of the whole node in screen pixels.
    pub bounds: ScreenRect,
    pub font_size: f64,
    /// One box per character of `text`, in screen pixels. Empty when the
    /// engine cannot measure ranges precisely.
    #[serde(default)]
    pub glyphs: Vec<ScreenRect>,
    /// Clockwise rotation the page was rendered with. Deg90 means the text
    /// advances downward on screen.
    #[serde(default)]
    pub rotation: Rotation,
}

impl TextNode {
    pub fn char_count(&self) -> usize {
        self.text.chars().count()
    }

    pub fn has_glyph_boxes(&self) -> bool {
        !self.glyphs.is_empty() && self.glyphs.len() == self.char_count()
    }
}

pub trait GeometryMeasurer: Send + Sync {
    fn measure_substrings(&self, node: &TextNode, spans: &[MatchSpan]) -> Vec<ScreenRect>;
}

#[derive(Debug, Clone, Default)]
pub struct GlyphMeasurer {
    settings: MeasureSettings,
}

impl GlyphMeasurer {
    pub fn new(settings: MeasureSettings) -> Self {
        Self { settings }
    }

    pub fn measure_span(
        &self,
        node: &TextNode,
        span: &MatchSpan,
    ) -> Result<Vec<ScreenRect>, MeasureError> {
        let count = node.char_count();
        if span.start_index >= span.end_index || span.end_index > count {
            debug!(
                start = span.start_index,
                end = span.end_index,
                chars = count,
                "skipping degenerate span"
            );
            return Ok(Vec::new());
        }

        let rects = if node.has_glyph_boxes() {
            self.measure_glyphs(node, span)?
        } else {
            self.estimate(node, span)?
        };
        Ok(rects.into_iter().filter(ScreenRect::is_valid).collect())
    }

    fn measure_glyphs(
        &self,
        node: &TextNode,
        span: &MatchSpan,
    ) -> Result<Vec<ScreenRect>, MeasureError> {
        let tolerance = self.settings.line_break_tolerance;
        let mut lines: Vec<ScreenRect> = Vec::new();
        let mut last_right = f64::NEG_INFINITY;

        for index in span.start_index..span.end_index {
            let glyph = node.glyphs[index];
            let finite = [glyph.left, glyph.top, glyph.width, glyph.height]
                .iter()
                .all(|v| v.is_finite());
            if !finite {
                return Err(MeasureError::NonFiniteGlyph { index });
            }
            // Collapsed glyphs (typically spaces at a wrap) carry no extent.
            if glyph.width <= 0.0 || glyph.height <= 0.0 {
                continue;
            }
            let glyph = to_reading_frame(glyph, node.rotation);

            match lines.last_mut() {
                Some(line) if same_line(line, &glyph, last_right, tolerance) => {
                    *line = line.union(&glyph);
                }
                _ => lines.push(glyph),
            }
            last_right = glyph.right();
        }

        Ok(lines
            .into_iter()
            .map(|line| from_reading_frame(line, node.rotation))
            .collect())
    }

    fn estimate(&self, node: &TextNode, span: &MatchSpan) -> Result<Vec<ScreenRect>, MeasureError> {
        let font_size = node.font_size;
        if !font_size.is_finite() || font_size <= 0.0 {
            return Err(MeasureError::NoMetrics { font_size });
        }
        let advance = font_size * self.settings.fallback_advance_ratio;
        let line_height = font_size * self.settings.fallback_line_height_ratio;
        if !(advance > 0.0 && line_height > 0.0) {
            return Err(MeasureError::NoMetrics { font_size });
        }

        let bounds = to_reading_frame(node.bounds, node.rotation);
        let per_line = if bounds.width.is_finite() && bounds.width >= advance {
            ((bounds.width / advance).floor() as usize).max(1)
        } else {
            usize::MAX
        };

        let first = span.start_index;
        let last = span.end_index - 1;
        let mut rects = Vec::new();
        for line in first / per_line..=last / per_line {
            let line_start = line.saturating_mul(per_line);
            let from = first.max(line_start) - line_start;
            let to = last.min(line_start.saturating_add(per_line - 1)) - line_start + 1;
            let rect = ScreenRect::new(
                bounds.left + from as f64 * advance,
                bounds.top + line as f64 * line_height,
                (to - from) as f64 * advance,
                line_height,
            );
            rects.push(from_reading_frame(rect, node.rotation));
        }
        Ok(rects)
    }
}

// One counter-clockwise quarter turn about the screen origin.
fn quarter_turn_ccw(rect: ScreenRect) -> ScreenRect {
    ScreenRect::new(rect.top, -(rect.left + rect.width), rect.height, rect.width)
}

fn turns(rotation: Rotation) -> usize {
    (rotation.degrees() / 90) as usize
}

fn to_reading_frame(rect: ScreenRect, rotation: Rotation) -> ScreenRect {
    (0..turns(rotation)).fold(rect, |rect, _| quarter_turn_ccw(rect))
}

fn from_reading_frame(rect: ScreenRect, rotation: Rotation) -> ScreenRect {
    (0..(4 - turns(rotation)) % 4).fold(rect, |rect, _| quarter_turn_ccw(rect))
}

fn same_line(line: &ScreenRect, glyph: &ScreenRect, last_right: f64, tolerance: f64) -> bool {
    let slack = tolerance * line.height.max(glyph.height);
    (glyph.top - line.top).abs() <= slack && glyph.left >= last_right - slack
}

impl GeometryMeasurer for GlyphMeasurer {
    fn measure_substrings(&self, node: &TextNode, spans: &[MatchSpan]) -> Vec<ScreenRect> {
        let mut rects = Vec::new();
        for span in spans {
            match self.measure_span(node, span) {
                Ok(measured) => rects.extend(measured),
                Err(err) => warn!(
                    %err,
                    node = node.id.as_deref().unwrap_or("<anonymous>"),
                    start = span.start_index,
                    end = span.end_index,
                    "failed to measure span"
                ),
            }
        }
        rects
    }
}
