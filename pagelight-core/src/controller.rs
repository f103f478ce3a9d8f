//! Drives the per-page pipeline: tokenize, match, measure, project to
//! document space, store, paint.
//!
//! All mutable state sits behind one lock that is never held across an
//! `.await`, so the store has a single writer even when several page requests
//! are in flight.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use serde::Serialize;
use thiserror::Error;
use tracing::{debug, instrument, warn};

use crate::config::OverlayConfig;
use crate::geometry::{DocumentRect, ScreenRect, Viewport};
use crate::matcher::{Matcher, SubstringMatcher, TermId};
use crate::measure::{GeometryMeasurer, GlyphMeasurer, TextNode};
use crate::projector::{to_document, to_screen};
use crate::render::{OverlaySurface, Renderer};
use crate::store::{
    MatchRect, MatchStore, PageState, ProcessDecision, SearchStats, SubscriptionId,
    Ticket,
};
use crate::tokenizer::tokenize;
use crate::PageId;

/// Text geometry of one rendered page. `width`/`height` are the rendered page
/// box in pixels and must match the viewport it was produced for.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PageText {
    pub width: f64,
    pub height: f64,
    pub nodes: Vec<TextNode>,
}

#[derive(Debug, Error)]
pub enum GeometryError {
    #[error("text geometry request for page {page} was cancelled")]
    Cancelled { page: PageId },
    #[error(transparent)]
    Failed(#[from] anyhow::Error),
}

/// Boundary to the rendering engine. The only place the pipeline suspends.
#[async_trait]
pub trait TextGeometrySource: Send + Sync {
    async fn text_geometry(&self, page: PageId, viewport: &Viewport)
        -> Result<PageText, GeometryError>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PageOutcome {
    /// The full pipeline ran and its results were committed.
    Processed { matches: usize },
    /// Results for this query were already stored; only repainted.
    Cached { matches: usize },
    /// A run for this page was already in flight.
    Coalesced,
    /// The run was cancelled or superseded and left no trace.
    Abandoned,
}

/// Where the caller should scroll to bring the active match into view.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct ScrollTarget {
    pub page: PageId,
    pub rect: ScreenRect,
    pub viewport: Viewport,
}

struct Located {
    bbox: DocumentRect,
    source_id: Option<String>,
}

#[derive(Default)]
struct ControllerState {
    store: MatchStore,
    viewports: HashMap<PageId, Viewport>,
}

pub struct SearchController {
    source: Arc<dyn TextGeometrySource>,
    matcher: Arc<dyn Matcher>,
    measurer: Arc<dyn GeometryMeasurer>,
    renderer: Renderer,
    state: Mutex<ControllerState>,
}

impl SearchController {
    pub fn new(source: Arc<dyn TextGeometrySource>) -> Self {
        Self {
            source,
            matcher: Arc::new(SubstringMatcher),
            measurer: Arc::new(GlyphMeasurer::default()),
            renderer: Renderer::new(),
            state: Mutex::new(ControllerState::default()),
        }
    }

    pub fn with_config(source: Arc<dyn TextGeometrySource>, config: &OverlayConfig) -> Self {
        Self::new(source).with_measurer(Arc::new(GlyphMeasurer::new(config.measure)))
    }

    pub fn with_matcher(mut self, matcher: Arc<dyn Matcher>) -> Self {
        self.matcher = matcher;
        self
    }

    pub fn with_measurer(mut self, measurer: Arc<dyn GeometryMeasurer>) -> Self {
        self.measurer = measurer;
        self
    }

    /// Resets the session when `query` differs from the current one. Does not
    /// touch any overlay.
    pub fn start_search(&self, query: &str) {
        let mut state = self.state.lock();
        if state.store.set_query(query) {
            debug!(query, "started new search session");
        }
    }

    #[instrument(skip(self, viewport, layer), fields(rotation = viewport.rotation().degrees(), scale = viewport.scale()))]
    pub async fn process_page(
        &self,
        page: PageId,
        query: &str,
        viewport: Viewport,
        layer: &dyn OverlaySurface,
    ) -> PageOutcome {
        let ticket = {
            let mut state = self.state.lock();
            if state.store.set_query(query) {
                debug!(query, "query changed, session reset");
            }
            state.viewports.insert(page, viewport);
            match state.store.begin_processing(page, query) {
                ProcessDecision::Run(ticket) => ticket,
                ProcessDecision::InFlight => {
                    debug!("page already processing, coalesced");
                    return PageOutcome::Coalesced;
                }
                ProcessDecision::Cached => {
                    let matches = self.paint_locked(&state, page, layer);
                    return PageOutcome::Cached { matches };
                }
            }
        };
        // Returns the page to Idle on every exit that does not commit,
        // including the caller dropping this future and a panicking matcher.
        let mut run = RunGuard {
            state: &self.state,
            page,
            ticket,
            armed: true,
        };

        let (located, painted_viewport) = match self.source.text_geometry(page, &viewport).await {
            Ok(text) => {
                let viewport = reconcile_viewport(page, viewport, &text);
                (self.locate(&text, query, &viewport), viewport)
            }
            Err(GeometryError::Cancelled { .. }) => {
                debug!("text geometry cancelled, abandoning page");
                return PageOutcome::Abandoned;
            }
            Err(GeometryError::Failed(err)) => {
                warn!(?err, "failed to obtain text geometry, treating page as empty");
                (Vec::new(), viewport)
            }
        };

        let mut state = self.state.lock();
        if !state.store.is_current(page, ticket) {
            debug!("superseded while waiting for geometry, abandoning page");
            return PageOutcome::Abandoned;
        }

        let term_id = TermId::for_query(query);
        let orders = state.store.allocate_orders(located.len());
        let rects: Vec<MatchRect> = orders
            .zip(located)
            .map(|(order, found)| MatchRect {
                page,
                term_id,
                order,
                bbox_doc: found.bbox,
                source_id: found.source_id,
            })
            .collect();
        let matches = rects.len();
        state.store.finish_processing(page, ticket, rects);
        run.armed = false;

        // A viewport change that landed while we were waiting wins.
        if state.viewports.get(&page) == Some(&viewport) {
            state.viewports.insert(page, painted_viewport);
        }
        self.paint_locked(&state, page, layer);
        debug!(matches, "page processed");
        PageOutcome::Processed { matches }
    }

    /// Repaints every listed page that already has stored results. Never
    /// re-runs tokenize, match or measure.
    pub fn on_viewport_change(
        &self,
        viewport: &Viewport,
        pages_in_view: &[PageId],
        layer: &dyn OverlaySurface,
    ) -> usize {
        let mut state = self.state.lock();
        let mut painted = 0;
        for &page in pages_in_view {
            if !state.store.has_page(page) {
                continue;
            }
            state.viewports.insert(page, *viewport);
            painted += self.paint_locked(&state, page, layer);
        }
        painted
    }

    /// Repaints one page at its last known viewport.
    pub fn repaint(&self, page: PageId, layer: &dyn OverlaySurface) -> usize {
        let state = self.state.lock();
        self.paint_locked(&state, page, layer)
    }

    /// Advances the active match, repaints the pages whose active marker
    /// moved and returns where to scroll. `None` means there are no matches:
    /// a page only gets stored matches from `process_page`, which records its
    /// viewport first, and viewports are never forgotten.
    pub fn next(&self, layer: &dyn OverlaySurface) -> Option<ScrollTarget> {
        self.navigate(layer, MatchStore::next)
    }

    pub fn previous(&self, layer: &dyn OverlaySurface) -> Option<ScrollTarget> {
        self.navigate(layer, MatchStore::previous)
    }

    fn navigate(
        &self,
        layer: &dyn OverlaySurface,
        step: fn(&mut MatchStore) -> Option<usize>,
    ) -> Option<ScrollTarget> {
        let mut state = self.state.lock();
        let before = state.store.active_match().map(|m| m.page);
        step(&mut state.store)?;
        let active = state.store.active_match()?.clone();

        if let Some(page) = before.filter(|page| *page != active.page) {
            self.paint_locked(&state, page, layer);
        }
        self.paint_locked(&state, active.page, layer);

        let viewport = *state.viewports.get(&active.page)?;
        Some(ScrollTarget {
            page: active.page,
            rect: to_screen(&active.bbox_doc, &viewport),
            viewport,
        })
    }

    /// Drops a page's results, e.g. after its content was reloaded.
    pub fn invalidate_page(&self, page: PageId) {
        self.state.lock().store.invalidate_page(page);
    }

    /// Abandons an in-flight run for `page`. Returns whether one was running.
    pub fn cancel_page(&self, page: PageId) -> bool {
        self.state.lock().store.cancel_processing(page)
    }

    pub fn stats(&self) -> SearchStats {
        self.state.lock().store.stats()
    }

    pub fn page_state(&self, page: PageId) -> PageState {
        self.state.lock().store.page_state(page)
    }

    pub fn matches(&self, page: PageId) -> Vec<MatchRect> {
        self.state.lock().store.matches(page).to_vec()
    }

    pub fn active_match(&self) -> Option<MatchRect> {
        self.state.lock().store.active_match().cloned()
    }

    /// Listeners get a snapshot after each state change. They run while the
    /// controller is locked and must not call back into it.
    pub fn subscribe<F>(&self, listener: F) -> SubscriptionId
    where
        F: Fn(&SearchStats) + Send + Sync + 'static,
    {
        self.state.lock().store.subscribe(listener)
    }

    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        self.state.lock().store.unsubscribe(id)
    }

    fn paint_locked(&self, state: &ControllerState, page: PageId, layer: &dyn OverlaySurface) -> usize {
        let Some(viewport) = state.viewports.get(&page) else {
            return 0;
        };
        let rects = state.store.matches(page);
        let active = state.store.active_index_within(page);
        self.renderer.paint(page, viewport, rects, active, layer)
    }

    fn locate(&self, text: &PageText, query: &str, viewport: &Viewport) -> Vec<Located> {
        let mut located = Vec::new();
        for node in &text.nodes {
            let tokens = tokenize(&node.text);
            let spans = self.matcher.find_matches(&tokens, query);
            if spans.is_empty() {
                continue;
            }
            for rect in self.measurer.measure_substrings(node, &spans) {
                if !rect.is_valid() {
                    warn!(?rect, "measurer emitted an invalid rectangle, dropping it");
                    continue;
                }
                let bbox = to_document(&rect, viewport);
                if !bbox.is_valid() {
                    warn!(?rect, ?bbox, "projection produced an invalid rectangle, dropping it");
                    continue;
                }
                located.push(Located {
                    bbox,
                    source_id: node.id.clone(),
                });
            }
        }
        located
    }
}

struct RunGuard<'a> {
    state: &'a Mutex<ControllerState>,
    page: PageId,
    ticket: Ticket,
    armed: bool,
}

impl Drop for RunGuard<'_> {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }
        let mut state = self.state.lock();
        if state.store.is_current(self.page, self.ticket) {
            state.store.cancel_processing(self.page);
            debug!(page = self.page, "pipeline run ended without committing, page reset");
        }
    }
}

/// The rendered page box is authoritative for the y-flip.
fn reconcile_viewport(page: PageId, viewport: Viewport, text: &PageText) -> Viewport {
    let stale = (text.width - viewport.width()).abs() > 0.5
        || (text.height - viewport.height()).abs() > 0.5;
    if !stale {
        return viewport;
    }
    match viewport.with_size(text.width, text.height) {
        Ok(fixed) => {
            warn!(
                page,
                expected_width = viewport.width(),
                expected_height = viewport.height(),
                width = text.width,
                height = text.height,
                "viewport did not match rendered page box, using rendered box"
            );
            fixed
        }
        Err(err) => {
            warn!(page, %err, "rendered page box is invalid, keeping viewport");
            viewport
        }
    }
}
