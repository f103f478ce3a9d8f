//! Search-match highlights that stay pixel aligned with a zoomable, rotatable
//! page.
//!
//! Matches are measured once in screen space, projected into document space
//! and stored there. Every repaint projects the stored rects back through the
//! current [`Viewport`], so zoom and rotation never re-run the search.

pub mod config;
pub mod controller;
pub mod geometry;
pub mod matcher;
pub mod measure;
pub mod projector;
pub mod render;
pub mod store;
pub mod tokenizer;

/// Zero-based page number.
pub type PageId = usize;

pub use config::{ConfigError, HighlightStyle, MeasureSettings, OverlayConfig, ProjectorSettings};
pub use controller::{
    GeometryError, PageOutcome, PageText, ScrollTarget, SearchController, TextGeometrySource,
};
pub use geometry::{DocumentRect, Rotation, ScreenRect, Viewport, ViewportError};
pub use matcher::{find_matches, normalize, MatchSpan, Matcher, SubstringMatcher, TermId};
pub use measure::{GeometryMeasurer, GlyphMeasurer, MeasureError, TextNode};
pub use projector::{
    crosshair_drift, to_document, to_screen, validation_crosshairs, validation_crosshairs_sized,
};
pub use render::{MemoryOverlay, OverlaySurface, PaintedHighlight, Renderer};
pub use store::{MatchRect, MatchStore, PageState, SearchStats, SubscriptionId};
pub use tokenizer::{tokenize, Token};
