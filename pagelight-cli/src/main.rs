use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{anyhow, Context, Result};
use clap::Parser;
use directories::ProjectDirs;
use pagelight_core::{
    crosshair_drift, validation_crosshairs_sized, HighlightStyle, MatchRect, MemoryOverlay,
    OverlayConfig, PageId, PageOutcome, PaintedHighlight, Rotation, ScreenRect, ScrollTarget,
    SearchController, SearchStats, Viewport,
};
use pagelight_render::{PdfiumLibrary, RenderedPage};
use serde::Serialize;
use tracing::{info, warn};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{prelude::*, EnvFilter};

const CROSSHAIR_COLOR: [u8; 3] = [220, 0, 0];

#[derive(Debug, Parser)]
#[command(
    name = "pagelight",
    version,
    about = "Search a PDF and report highlight rectangles that track zoom and rotation"
)]
struct Args {
    /// PDF file to search
    file: PathBuf,

    /// Text to search for
    query: String,

    /// Pages to search (0-based, repeatable). Defaults to every page.
    #[arg(short = 'p', long = "page")]
    pages: Vec<PageId>,

    /// Zoom factor, clamped to the configured range
    #[arg(short = 's', long, default_value_t = 1.0)]
    scale: f64,

    /// Clockwise page rotation in degrees (multiple of 90)
    #[arg(short = 'r', long, default_value = "0", value_parser = parse_rotation, allow_hyphen_values = true)]
    rotation: Rotation,

    /// Advance the active match this many times before reporting
    #[arg(long, default_value_t = 0)]
    select: usize,

    /// Print the report as JSON
    #[arg(long)]
    json: bool,

    /// Write a PNG of one page with the highlights composited
    #[arg(long)]
    png: Option<PathBuf>,

    /// Page to write with --png. Defaults to the active match's page.
    #[arg(long)]
    png_page: Option<PageId>,

    /// Draw the projector's corner crosshairs into the PNG
    #[arg(long)]
    crosshairs: bool,

    /// Config file; defaults to config.toml in the platform config directory
    #[arg(short = 'c', long)]
    config: Option<PathBuf>,
}

#[derive(Debug, Serialize)]
struct Report {
    stats: SearchStats,
    active: Option<ScrollTarget>,
    pages: Vec<PageReport>,
}

#[derive(Debug, Serialize)]
struct PageReport {
    page: PageId,
    outcome: &'static str,
    viewport: Viewport,
    matches: Vec<MatchRect>,
    highlights: Vec<PaintedHighlight>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let project_dirs = ProjectDirs::from("dev", "pagelight", "pagelight")
        .ok_or_else(|| anyhow!("unable to resolve platform data directories"))?;
    let _log_guard = init_logging(&project_dirs)?;
    let default_config = project_dirs.config_dir().join("config.toml");
    let config = load_config(args.config.as_deref(), &default_config)?;

    let library = PdfiumLibrary::bind()?;
    let source = Arc::new(
        library
            .open(&args.file)
            .with_context(|| format!("failed to open {:?}", args.file))?,
    );

    let pages = if args.pages.is_empty() {
        (0..source.page_count()).collect::<Vec<_>>()
    } else {
        args.pages.clone()
    };
    let scale = config.projector.clamp_scale(args.scale);
    if scale != args.scale {
        warn!(requested = args.scale, scale, "zoom clamped to configured range");
    }

    let controller = SearchController::with_config(source.clone(), &config);
    let layer = MemoryOverlay::new();
    controller.start_search(&args.query);

    let mut reports = Vec::with_capacity(pages.len());
    for &page in &pages {
        let viewport = source.viewport(page, scale, args.rotation)?;
        let outcome = controller
            .process_page(page, &args.query, viewport, &layer)
            .await;
        reports.push((page, outcome, viewport));
    }

    let mut active = None;
    for _ in 0..args.select {
        active = controller.next(&layer);
    }

    let report = Report {
        stats: controller.stats(),
        active,
        pages: reports
            .into_iter()
            .map(|(page, outcome, viewport)| PageReport {
                page,
                outcome: outcome_label(&outcome),
                viewport,
                matches: controller.matches(page),
                highlights: layer.highlights(page),
            })
            .collect(),
    };

    if args.json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        print!("{}", format_report(&report));
    }

    if let Some(path) = &args.png {
        let page = args
            .png_page
            .or_else(|| controller.active_match().map(|m| m.page))
            .or_else(|| pages.first().copied())
            .ok_or_else(|| anyhow!("document has no pages to render"))?;
        let viewport = source.viewport(page, scale, args.rotation)?;
        if !pages.contains(&page) {
            warn!(page, "page was not searched; rendering without highlights");
        }
        controller.on_viewport_change(&viewport, &[page], &layer);

        let mut image = source.render(page, &viewport)?;
        composite_highlights(&mut image, &layer.highlights(page), &config.highlight);
        if args.crosshairs {
            if !config.projector.crosshairs_hold(&viewport) {
                warn!(
                    page,
                    drift = crosshair_drift(&viewport, config.projector.crosshair_size),
                    tolerance = config.projector.round_trip_tolerance,
                    "crosshairs drift beyond round-trip tolerance"
                );
            }
            let crosshairs = validation_crosshairs_sized(&viewport, config.projector.crosshair_size);
            for rect in crosshairs {
                stroke_rect(&mut image, &rect, CROSSHAIR_COLOR);
            }
        }
        write_png(&image, path)?;
        info!(page, path = %path.display(), "wrote highlighted page");
    }

    Ok(())
}

fn parse_rotation(raw: &str) -> Result<Rotation, String> {
    let degrees: i32 = raw
        .trim()
        .parse()
        .map_err(|err| format!("invalid rotation {raw:?}: {err}"))?;
    Rotation::try_from(degrees).map_err(|err| err.to_string())
}

fn load_config(explicit: Option<&Path>, default_path: &Path) -> Result<OverlayConfig> {
    if let Some(path) = explicit {
        return OverlayConfig::load(path)
            .with_context(|| format!("failed to load config from {:?}", path));
    }
    if !default_path.exists() {
        return Ok(OverlayConfig::default());
    }
    OverlayConfig::load(default_path)
        .with_context(|| format!("failed to load config from {:?}", default_path))
}

fn init_logging(project_dirs: &ProjectDirs) -> Result<WorkerGuard> {
    let log_dir = project_dirs.data_local_dir().join("logs");
    fs::create_dir_all(&log_dir)?;

    let file_appender = tracing_appender::rolling::never(log_dir, "pagelight.log");
    let (file_writer, guard) = tracing_appender::non_blocking(file_appender);
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    let file_layer = tracing_subscriber::fmt::layer()
        .with_ansi(false)
        .with_writer(file_writer);
    // stdout carries the report.
    let console_layer = tracing_subscriber::fmt::layer().with_writer(io::stderr);

    tracing_subscriber::registry()
        .with(env_filter)
        .with(file_layer)
        .with(console_layer)
        .try_init()
        .map_err(|err| anyhow!(err))?;

    Ok(guard)
}

fn outcome_label(outcome: &PageOutcome) -> &'static str {
    match outcome {
        PageOutcome::Processed { .. } => "processed",
        PageOutcome::Cached { .. } => "cached",
        PageOutcome::Coalesced => "coalesced",
        PageOutcome::Abandoned => "abandoned",
    }
}

fn format_report(report: &Report) -> String {
    let mut out = format!(
        "/{}: {} match{}",
        report.stats.query,
        report.stats.total_matches,
        if report.stats.total_matches == 1 { "" } else { "es" }
    );
    if let Some(index) = report.stats.active_index {
        out.push_str(&format!(" (active {}/{})", index + 1, report.stats.total_matches));
    }
    out.push('\n');

    for page in &report.pages {
        if page.matches.is_empty() {
            continue;
        }
        out.push_str(&format!(
            "page {} ({}, {}x{} px, rotation {}):\n",
            page.page,
            page.outcome,
            page.viewport.width().round(),
            page.viewport.height().round(),
            page.viewport.rotation().degrees()
        ));
        for (stored, painted) in page.matches.iter().zip(&page.highlights) {
            let doc = stored.bbox_doc;
            let screen = painted.rect;
            out.push_str(&format!(
                "  {}#{} doc [{:.1}, {:.1}, {:.1}x{:.1}] screen [{:.1}, {:.1}, {:.1}x{:.1}]\n",
                if painted.active { "*" } else { " " },
                stored.order,
                doc.x,
                doc.y,
                doc.w,
                doc.h,
                screen.left,
                screen.top,
                screen.width,
                screen.height
            ));
        }
    }
    out
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct PixelRect {
    x0: u32,
    y0: u32,
    x1: u32,
    y1: u32,
}

/// Pixel span covering `rect`, clamped to the image. `None` when nothing of
/// the rect is on the image.
fn screen_to_pixel_rect(rect: &ScreenRect, width: u32, height: u32) -> Option<PixelRect> {
    if width == 0 || height == 0 || !rect.is_valid() {
        return None;
    }

    let max_x = f64::from(width);
    let max_y = f64::from(height);
    let x0 = rect.left.floor().clamp(0.0, max_x);
    let x1 = rect.right().ceil().clamp(0.0, max_x);
    let y0 = rect.top.floor().clamp(0.0, max_y);
    let y1 = rect.bottom().ceil().clamp(0.0, max_y);

    if x0 >= x1 || y0 >= y1 {
        return None;
    }

    Some(PixelRect {
        x0: x0 as u32,
        y0: y0 as u32,
        x1: x1 as u32,
        y1: y1 as u32,
    })
}

fn composite_highlights(
    image: &mut RenderedPage,
    highlights: &[PaintedHighlight],
    style: &HighlightStyle,
) {
    // Active last so it sits on top.
    let (active, others): (Vec<_>, Vec<_>) = highlights.iter().partition(|h| h.active);
    for highlight in others {
        if let Some(rect) = screen_to_pixel_rect(&highlight.rect, image.width, image.height) {
            fill_rect(image, rect, style.color, style.alpha);
        }
    }
    for highlight in active {
        if let Some(rect) = screen_to_pixel_rect(&highlight.rect, image.width, image.height) {
            fill_rect(image, rect, style.active_color, style.active_alpha);
        }
    }
}

/// One-pixel outline of `rect`.
fn stroke_rect(image: &mut RenderedPage, rect: &ScreenRect, color: [u8; 3]) {
    let Some(px) = screen_to_pixel_rect(rect, image.width, image.height) else {
        return;
    };
    let edges = [
        PixelRect { y1: px.y0 + 1, ..px },
        PixelRect { y0: px.y1 - 1, ..px },
        PixelRect { x1: px.x0 + 1, ..px },
        PixelRect { x0: px.x1 - 1, ..px },
    ];
    for edge in edges {
        fill_rect(image, edge, color, 1.0);
    }
}

fn fill_rect(image: &mut RenderedPage, rect: PixelRect, color: [u8; 3], alpha: f32) {
    if rect.x0 >= rect.x1 || rect.y0 >= rect.y1 {
        return;
    }
    let width = image.width as usize;
    let height = image.height as usize;
    if width == 0 || height == 0 || image.pixels.len() < width * height * 4 {
        return;
    }

    let x1 = rect.x1.min(image.width);
    let y1 = rect.y1.min(image.height);
    let x0 = rect.x0.min(x1);
    let y0 = rect.y0.min(y1);

    for y in y0..y1 {
        let row_start = (y as usize) * width * 4;
        for x in x0..x1 {
            let idx = row_start + (x as usize) * 4;
            blend_pixel(&mut image.pixels[idx..idx + 4], color, alpha);
        }
    }
}

fn blend_pixel(pixel: &mut [u8], color: [u8; 3], alpha: f32) {
    let alpha = alpha.clamp(0.0, 1.0);
    let inv = 1.0 - alpha;
    for (channel, target) in pixel.iter_mut().zip(color) {
        *channel = ((*channel as f32 * inv) + (target as f32 * alpha))
            .round()
            .clamp(0.0, 255.0) as u8;
    }
}

fn write_png(image: &RenderedPage, path: &Path) -> Result<()> {
    let buffer = image::RgbaImage::from_raw(image.width, image.height, image.pixels.clone())
        .ok_or_else(|| anyhow!("rendered page buffer does not match its dimensions"))?;
    buffer
        .save_with_format(path, image::ImageFormat::Png)
        .with_context(|| format!("failed to write {:?}", path))?;
    Ok(())
}
