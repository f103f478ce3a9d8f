use std::collections::BTreeMap;

use parking_lot::Mutex;
use serde::Serialize;

use crate::geometry::{ScreenRect, Viewport};
use crate::matcher::TermId;
use crate::projector::to_screen;
use crate::store::MatchRect;
use crate::PageId;

/// A highlight positioned for one particular viewport.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PaintedHighlight {
    pub page: PageId,
    pub order: u64,
    pub term_id: TermId,
    pub rect: ScreenRect,
    pub active: bool,
    pub source_id: Option<String>,
}

/// The overlay layer highlights are painted into, owned by the UI side.
pub trait OverlaySurface: Send + Sync {
    fn clear(&self, page: PageId);
    fn draw(&self, highlight: PaintedHighlight);
}

/// Keeps painted highlights in memory, per page.
#[derive(Debug, Default)]
pub struct MemoryOverlay {
    layers: Mutex<BTreeMap<PageId, Vec<PaintedHighlight>>>,
}

impl MemoryOverlay {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn highlights(&self, page: PageId) -> Vec<PaintedHighlight> {
        self.layers.lock().get(&page).cloned().unwrap_or_default()
    }

    pub fn active(&self) -> Option<PaintedHighlight> {
        self.layers
            .lock()
            .values()
            .flatten()
            .find(|h| h.active)
            .cloned()
    }
}

impl OverlaySurface for MemoryOverlay {
    fn clear(&self, page: PageId) {
        self.layers.lock().remove(&page);
    }

    fn draw(&self, highlight: PaintedHighlight) {
        self.layers
            .lock()
            .entry(highlight.page)
            .or_default()
            .push(highlight);
    }
}

/// Projects stored rects through the current viewport and paints them. Never
/// measures, never writes back to the store.
#[derive(Debug, Clone, Copy, Default)]
pub struct Renderer;

impl Renderer {
    pub fn new() -> Self {
        Self
    }

    pub fn project(
        &self,
        viewport: &Viewport,
        rects: &[MatchRect],
        active_within_page: Option<usize>,
    ) -> Vec<PaintedHighlight> {
        rects
            .iter()
            .enumerate()
            .map(|(index, rect)| PaintedHighlight {
                page: rect.page,
                order: rect.order,
                term_id: rect.term_id,
                rect: to_screen(&rect.bbox_doc, viewport),
                active: active_within_page == Some(index),
                source_id: rect.source_id.clone(),
            })
            .collect()
    }

    /// Clears `page` on the layer and paints every rect. Returns the number
    /// of highlights painted.
    pub fn paint(
        &self,
        page: PageId,
        viewport: &Viewport,
        rects: &[MatchRect],
        active_within_page: Option<usize>,
        layer: &dyn OverlaySurface,
    ) -> usize {
        layer.clear(page);
        let painted = self.project(viewport, rects, active_within_page);
        let count = painted.len();
        for highlight in painted {
            layer.draw(highlight);
        }
        count
    }

    /// Like [`Renderer::paint`], skipping highlights outside `region`.
    pub fn paint_visible(
        &self,
        page: PageId,
        viewport: &Viewport,
        rects: &[MatchRect],
        active_within_page: Option<usize>,
        region: &ScreenRect,
        layer: &dyn OverlaySurface,
    ) -> usize {
        layer.clear(page);
        let mut count = 0;
        for highlight in self.project(viewport, rects, active_within_page) {
            if highlight.rect.intersects(region) {
                layer.draw(highlight);
                count += 1;
            }
        }
        count
    }

    pub fn visible_matches<'a>(
        &self,
        viewport: &Viewport,
        rects: &'a [MatchRect],
        region: &ScreenRect,
    ) -> Vec<&'a MatchRect> {
        rects
            .iter()
            .filter(|rect| to_screen(&rect.bbox_doc, viewport).intersects(region))
            .collect()
    }
}
