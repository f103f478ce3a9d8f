use std::collections::HashMap;
use std::convert::TryFrom;
use std::mem;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use pagelight_core::{
    DocumentRect, GeometryError, PageId, PageText, Rotation, TextGeometrySource, Viewport,
};
use parking_lot::Mutex;
use pdfium_render::prelude::*;
use tracing::{debug, instrument, warn};

use crate::{page_text, pdf_rect, GlyphRun, RenderError, RenderedPage};

/// Runtime override for the Pdfium shared library location.
pub const LIBRARY_PATH_ENV: &str = "PAGELIGHT_PDFIUM_LIBRARY_PATH";

/// Bound Pdfium library. Open documents through it.
pub struct PdfiumLibrary {
    pdfium: Arc<Pdfium>,
}

impl PdfiumLibrary {
    pub fn bind() -> Result<Self> {
        let pdfium = match bind_pdfium_from_env() {
            Some(pdfium) => pdfium,
            None => bind_pdfium_default()?,
        };
        Ok(Self {
            pdfium: Arc::new(pdfium),
        })
    }

    pub fn open(&self, path: &Path) -> Result<PdfiumPageSource> {
        let absolute = path
            .canonicalize()
            .with_context(|| format!("failed to resolve path for {:?}", path))?;
        PdfiumPageSource::open(Arc::clone(&self.pdfium), absolute)
    }
}

/// One open PDF. Glyph runs are extracted once per page and cached in
/// document space; every viewport projects the cached runs.
pub struct PdfiumPageSource {
    path: PathBuf,
    page_sizes: Vec<(f64, f64)>,
    runs: Mutex<HashMap<PageId, Arc<Vec<GlyphRun>>>>,
    // Declared before the bindings so it drops first.
    document: Mutex<PdfDocument<'static>>,
    _bindings: Arc<Pdfium>,
}

impl PdfiumPageSource {
    fn open(pdfium: Arc<Pdfium>, path: PathBuf) -> Result<Self> {
        let document = pdfium
            .load_pdf_from_file(&path, None)
            .with_context(|| format!("failed to open {:?}", path))?;
        // SAFETY: the document borrows the bindings owned by `pdfium`, an Arc
        // this struct keeps alive. Fields drop in declaration order, so
        // `document` is gone before that Arc is released.
        let document = unsafe { mem::transmute::<PdfDocument<'_>, PdfDocument<'static>>(document) };

        let page_sizes = document
            .pages()
            .iter()
            .map(|page| (f64::from(page.width().value), f64::from(page.height().value)))
            .collect::<Vec<_>>();
        debug!(path = %path.display(), pages = page_sizes.len(), "opened document");

        Ok(Self {
            path,
            page_sizes,
            runs: Mutex::new(HashMap::new()),
            document: Mutex::new(document),
            _bindings: pdfium,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn page_count(&self) -> usize {
        self.page_sizes.len()
    }

    /// Intrinsic page size in points.
    pub fn page_size(&self, page: PageId) -> Result<(f64, f64), RenderError> {
        let &(width, height) = self
            .page_sizes
            .get(page)
            .ok_or(RenderError::PageOutOfRange {
                page,
                count: self.page_sizes.len(),
            })?;
        if width <= 0.0 || height <= 0.0 {
            return Err(RenderError::EmptyPage { page });
        }
        Ok((width, height))
    }

    pub fn viewport(&self, page: PageId, scale: f64, rotation: Rotation) -> Result<Viewport> {
        let (width, height) = self.page_size(page)?;
        Ok(Viewport::for_page(width, height, scale, rotation)?)
    }

    pub fn glyph_runs(&self, page: PageId) -> Result<Arc<Vec<GlyphRun>>> {
        if let Some(runs) = self.runs.lock().get(&page) {
            return Ok(Arc::clone(runs));
        }

        let runs = Arc::new(self.with_page(page, |pdf_page| extract_runs(page, pdf_page))?);
        self.runs.lock().insert(page, Arc::clone(&runs));
        Ok(runs)
    }

    #[instrument(skip(self, viewport), fields(scale = viewport.scale(), rotation = viewport.rotation().degrees()))]
    pub fn render(&self, page: PageId, viewport: &Viewport) -> Result<RenderedPage> {
        self.with_page(page, |pdf_page| {
            let config = PdfRenderConfig::new()
                .scale_page_by_factor(viewport.scale() as f32)
                .rotate(render_rotation(viewport.rotation()), true);
            let bitmap = pdf_page
                .render_with_config(&config)
                .with_context(|| format!("failed to render page {}", page))?;
            let image = bitmap.as_image().to_rgba8();
            Ok(RenderedPage {
                width: u32::try_from(bitmap.width()).unwrap_or_default(),
                height: u32::try_from(bitmap.height()).unwrap_or_default(),
                pixels: image.into_raw(),
            })
        })
    }

    fn with_page<R, F>(&self, page: PageId, f: F) -> Result<R>
    where
        F: FnOnce(&PdfPage<'_>) -> Result<R>,
    {
        self.page_size(page)?;
        let index: PdfPageIndex = page
            .try_into()
            .map_err(|_| anyhow!("page {} is out of supported range", page))?;
        let document = self.document.lock();
        let pdf_page = document
            .pages()
            .get(index)
            .with_context(|| format!("page {} out of range", page))?;
        f(&pdf_page)
    }
}

#[async_trait]
impl TextGeometrySource for PdfiumPageSource {
    #[instrument(skip(self, viewport))]
    async fn text_geometry(
        &self,
        page: PageId,
        viewport: &Viewport,
    ) -> Result<PageText, GeometryError> {
        let runs = self.glyph_runs(page)?;
        Ok(page_text(&runs, viewport))
    }
}

fn extract_runs(page: PageId, pdf_page: &PdfPage<'_>) -> Result<Vec<GlyphRun>> {
    let text = pdf_page
        .text()
        .with_context(|| format!("failed to extract text for page {}", page))?;

    let mut runs = Vec::new();
    for (segment_index, segment) in text.segments().iter().enumerate() {
        let chars = match segment.chars() {
            Ok(chars) => chars,
            Err(err) => {
                warn!(?err, page, segment = segment_index, "failed to read segment characters");
                continue;
            }
        };

        let mut glyphs = Vec::new();
        let mut font_size = 0.0;
        for ch in chars.iter() {
            let Some(c) = ch.unicode_char() else {
                continue;
            };
            // A char without bounds still occupies its index; it just has no
            // extent for the measurer to union.
            let rect = match ch.loose_bounds() {
                Ok(bounds) => pdf_rect(
                    f64::from(bounds.left().value),
                    f64::from(bounds.bottom().value),
                    f64::from(bounds.right().value),
                    f64::from(bounds.top().value),
                ),
                Err(_) => DocumentRect::new(0.0, 0.0, 0.0, 0.0),
            };
            if font_size <= 0.0 {
                font_size = f64::from(ch.scaled_font_size().value);
            }
            glyphs.push((c, rect));
        }

        if glyphs.is_empty() {
            continue;
        }
        runs.push(GlyphRun {
            id: format!("p{page}-s{segment_index}"),
            glyphs,
            font_size,
        });
    }

    debug!(page, runs = runs.len(), "extracted glyph runs");
    Ok(runs)
}

fn render_rotation(rotation: Rotation) -> PdfPageRenderRotation {
    match rotation {
        Rotation::Deg0 => PdfPageRenderRotation::None,
        Rotation::Deg90 => PdfPageRenderRotation::Degrees90,
        Rotation::Deg180 => PdfPageRenderRotation::Degrees180,
        Rotation::Deg270 => PdfPageRenderRotation::Degrees270,
    }
}

fn bind_pdfium_from_env() -> Option<Pdfium> {
    match std::env::var(LIBRARY_PATH_ENV) {
        Ok(path) if !path.is_empty() => match Pdfium::bind_to_library(&path) {
            Ok(bindings) => Some(Pdfium::new(bindings)),
            Err(err) => {
                warn!("failed to load Pdfium from {}={}: {}", LIBRARY_PATH_ENV, path, err);
                None
            }
        },
        _ => None,
    }
}

fn bind_pdfium_default() -> Result<Pdfium> {
    let mut errors = Vec::new();

    let cwd_path = Pdfium::pdfium_platform_library_name_at_path("./");

    match Pdfium::bind_to_library(&cwd_path) {
        Ok(bindings) => return Ok(Pdfium::new(bindings)),
        Err(err) => {
            errors.push(format!("{}: {}", cwd_path.display(), err));
        }
    }

    match Pdfium::bind_to_system_library() {
        Ok(bindings) => Ok(Pdfium::new(bindings)),
        Err(err) => {
            errors.push(format!("system: {err}"));
            Err(anyhow!(
                "failed to bind to a pdfium library; set {} or install it ({})",
                LIBRARY_PATH_ENV,
                errors.join(", ")
            ))
        }
    }
}
