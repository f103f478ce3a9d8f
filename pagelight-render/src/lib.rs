//! Rendering-engine side of the overlay: positioned glyph runs, the
//! [`TextGeometrySource`] that turns them into screen-space text nodes, and a
//! Pdfium backend (feature `pdf`) that extracts runs from real documents and
//! rasterizes pages at a [`Viewport`].

use std::collections::BTreeMap;

use async_trait::async_trait;
use pagelight_core::{
    to_screen, DocumentRect, GeometryError, PageId, PageText, TextGeometrySource, TextNode,
    Viewport,
};
use thiserror::Error;
use tracing::debug;

#[cfg(feature = "pdf")]
mod document;

#[cfg(feature = "pdf")]
pub use document::{PdfiumLibrary, PdfiumPageSource, LIBRARY_PATH_ENV};

#[derive(Debug, Error, Clone, PartialEq)]
pub enum RenderError {
    #[error("page {page} is out of range (document has {count} pages)")]
    PageOutOfRange { page: PageId, count: usize },
    #[error("page {page} has an empty media box")]
    EmptyPage { page: PageId },
}

/// RGBA8 pixels of one rendered page.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RenderedPage {
    pub width: u32,
    pub height: u32,
    pub pixels: Vec<u8>,
}

/// A run of characters laid out on the unrotated page, one document-space box
/// per character. Runs are independent of zoom and rotation, so a backend can
/// extract them once per page and project them for every viewport.
#[derive(Debug, Clone, PartialEq)]
pub struct GlyphRun {
    pub id: String,
    pub glyphs: Vec<(char, DocumentRect)>,
    /// Font size in document units.
    pub font_size: f64,
}

impl GlyphRun {
    pub fn text(&self) -> String {
        self.glyphs.iter().map(|(c, _)| *c).collect()
    }

    /// Union of the glyph boxes that have an extent.
    pub fn bounds(&self) -> DocumentRect {
        let corners: Vec<(f64, f64)> = self
            .glyphs
            .iter()
            .filter(|(_, rect)| rect.is_valid())
            .flat_map(|(_, rect)| rect.corners())
            .collect();
        if corners.is_empty() {
            return DocumentRect::new(0.0, 0.0, 0.0, 0.0);
        }
        DocumentRect::from_corners(&corners)
    }

    pub fn to_text_node(&self, viewport: &Viewport) -> TextNode {
        TextNode {
            id: Some(self.id.clone()),
            text: self.text(),
            bounds: to_screen(&self.bounds(), viewport),
            font_size: self.font_size * viewport.scale(),
            glyphs: self
                .glyphs
                .iter()
                .map(|(_, rect)| to_screen(rect, viewport))
                .collect(),
            rotation: viewport.rotation(),
        }
    }
}

/// Document rect from a PDF-style box given by its edges, bottom-left origin.
pub fn pdf_rect(left: f64, bottom: f64, right: f64, top: f64) -> DocumentRect {
    let (x0, x1) = if left <= right { (left, right) } else { (right, left) };
    let (y0, y1) = if bottom <= top { (bottom, top) } else { (top, bottom) };
    DocumentRect::new(x0, y0, x1 - x0, y1 - y0)
}

pub fn page_text(runs: &[GlyphRun], viewport: &Viewport) -> PageText {
    PageText {
        width: viewport.width(),
        height: viewport.height(),
        nodes: runs.iter().map(|run| run.to_text_node(viewport)).collect(),
    }
}

/// Glyph runs held in memory, keyed by page. Serves fixtures and documents
/// whose layout was produced elsewhere.
#[derive(Debug, Clone, Default)]
pub struct GlyphRunSource {
    pages: BTreeMap<PageId, Vec<GlyphRun>>,
}

impl GlyphRunSource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_page(mut self, page: PageId, runs: Vec<GlyphRun>) -> Self {
        self.pages.insert(page, runs);
        self
    }

    pub fn runs(&self, page: PageId) -> Option<&[GlyphRun]> {
        self.pages.get(&page).map(Vec::as_slice)
    }
}

#[async_trait]
impl TextGeometrySource for GlyphRunSource {
    async fn text_geometry(
        &self,
        page: PageId,
        viewport: &Viewport,
    ) -> Result<PageText, GeometryError> {
        let runs = self.pages.get(&page).ok_or_else(|| {
            anyhow::Error::from(RenderError::PageOutOfRange {
                page,
                count: self.pages.len(),
            })
        })?;
        debug!(page, runs = runs.len(), "projecting glyph runs");
        Ok(page_text(runs, viewport))
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use pagelight_core::{MemoryOverlay, PageOutcome, Rotation, SearchController};

    /// Monospaced run starting at (x, baseline), 6 units per character.
    fn run(id: &str, text: &str, x: f64, baseline: f64) -> GlyphRun {
        GlyphRun {
            id: id.to_string(),
            glyphs: text
                .chars()
                .enumerate()
                .map(|(i, c)| (c, DocumentRect::new(x + i as f64 * 6.0, baseline, 6.0, 12.0)))
                .collect(),
            font_size: 12.0,
        }
    }

    #[test]
    fn pdf_rect_normalizes_edges() {
        assert_eq!(
            pdf_rect(80.0, 700.0, 72.0, 688.0),
            DocumentRect::new(72.0, 688.0, 8.0, 12.0)
        );
    }

    #[test]
    fn run_bounds_skip_empty_glyphs() {
        let mut run = run("r", "ab c", 72.0, 700.0);
        run.glyphs[2].1 = DocumentRect::new(0.0, 0.0, 0.0, 0.0);
        let bounds = run.bounds();
        assert!(bounds.approx_eq(&DocumentRect::new(72.0, 700.0, 24.0, 12.0), 1e-9));
        assert_eq!(
            GlyphRun {
                id: "empty".into(),
                glyphs: Vec::new(),
                font_size: 12.0
            }
            .bounds(),
            DocumentRect::new(0.0, 0.0, 0.0, 0.0)
        );
    }

    #[test]
    fn text_node_scales_font_and_glyphs() {
        let vp = Viewport::for_page(612.0, 792.0, 2.0, Rotation::Deg0).unwrap();
        let node = run("r", "abc", 72.0, 700.0).to_text_node(&vp);
        assert_eq!(node.text, "abc");
        assert_eq!(node.font_size, 24.0);
        assert!(node.has_glyph_boxes());
        assert!((node.glyphs[1].left - 156.0).abs() < 1e-9);
        assert!((node.glyphs[1].top - (1584.0 - 1424.0)).abs() < 1e-9);
    }

    #[tokio::test]
    async fn unknown_page_is_a_geometry_failure() {
        let source = GlyphRunSource::new().with_page(0, vec![run("r", "abc", 0.0, 0.0)]);
        let vp = Viewport::for_page(612.0, 792.0, 1.0, Rotation::Deg0).unwrap();
        let err = source.text_geometry(3, &vp).await.unwrap_err();
        assert!(matches!(err, GeometryError::Failed(_)));
    }

    #[tokio::test]
    async fn stored_match_lands_on_the_glyphs_at_every_rotation() {
        let source = GlyphRunSource::new().with_page(
            0,
            vec![
                run("line-1", "The contractor shall comply.", 72.0, 700.0),
                run("line-2", "Nothing here.", 72.0, 680.0),
            ],
        );
        let expected = DocumentRect::new(72.0 + 15.0 * 6.0, 700.0, 30.0, 12.0);

        for rotation in Rotation::all() {
            for scale in [0.5, 1.0, 2.0] {
                let controller = SearchController::new(Arc::new(source.clone()));
                let layer = MemoryOverlay::new();
                controller.start_search("shall");
                let vp = Viewport::for_page(612.0, 792.0, scale, rotation).unwrap();
                let outcome = controller.process_page(0, "shall", vp, &layer).await;
                assert_eq!(outcome, PageOutcome::Processed { matches: 1 });

                let stored = controller.matches(0);
                assert!(
                    stored[0].bbox_doc.approx_eq(&expected, 1e-6),
                    "{rotation:?} x{scale}: {:?}",
                    stored[0].bbox_doc
                );
                let painted = layer.highlights(0);
                assert_eq!(painted.len(), 1);
                assert!(painted[0]
                    .rect
                    .approx_eq(&to_screen(&expected, &vp), 1e-6));
            }
        }
    }
}
