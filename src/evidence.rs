//! Evidence locator: map citations back onto their source pages and render
//! highlighted page images.
//!
//! ## Algorithm
//!
//! 1. Citations are processed in input order. A citation whose
//!    `file_source` is not among [`LocateOptions::sources`] (when set) is
//!    rejected without touching the file. Otherwise it opens its
//!    `file_source` (documents are cached for the duration of the call) and
//!    reads page `page_no - 1`.
//! 2. Every text block on that page is compared with the citation text,
//!    both lowercased. Blocks scoring at or above the threshold are marked.
//! 3. Page buffers are keyed by `(file_source, page_no)`, so two documents
//!    that both cite "page 1" never share annotations.
//! 4. Each page with at least one mark is rendered, the marked boxes are
//!    outlined in red, and the PNG is written to the output directory.
//!
//! A citation whose document cannot be opened, or whose page is out of
//! range, is recorded as a [`CitationError`] and skipped; the remaining
//! citations are still processed.
//!
//! ## File naming
//!
//! The first source with marks on page *n* is written as
//! `output_page_<n>.png`. Any further source with marks on the same page
//! number gets `output_page_<n>_<k>.png`, `k = 2, 3, …` in first-touch
//! order. Names depend only on the citations, so reruns overwrite the same
//! files.

use crate::config::QaConfig;
use crate::error::{CitationError, QaError};
use crate::output::{Citation, EvidenceImage, EvidenceReport};
use crate::pipeline::render::PdfiumStore;
use crate::similarity::{LevenshteinRatio, Similarity};
use image::{DynamicImage, ImageFormat, Rgba, RgbaImage};
use indexmap::IndexMap;
use std::collections::HashMap;
use std::io::BufWriter;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Highlight colour.
const HIGHLIGHT: Rgba<u8> = Rgba([255, 0, 0, 255]);
/// Highlight outline width in pixels.
const HIGHLIGHT_WIDTH: u32 = 2;

// ── Document-store contract ─────────────────────────────────────────────────

/// Axis-aligned rectangle in PDF points, origin at the top-left of the page.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BoundingBox {
    pub left: f32,
    pub top: f32,
    pub right: f32,
    pub bottom: f32,
}

impl BoundingBox {
    pub fn union(&self, other: &BoundingBox) -> BoundingBox {
        BoundingBox {
            left: self.left.min(other.left),
            top: self.top.min(other.top),
            right: self.right.max(other.right),
            bottom: self.bottom.max(other.bottom),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct TextBlock {
    pub bbox: BoundingBox,
    pub text: String,
}

/// Text layout of one page.
#[derive(Debug, Clone, PartialEq)]
pub struct PageLayout {
    /// Page width in points.
    pub width: f32,
    /// Page height in points.
    pub height: f32,
    pub blocks: Vec<TextBlock>,
}

/// An opened document.
pub trait SourceDocument {
    fn page_count(&self) -> usize;

    /// Text blocks of page `index` (0-based).
    fn layout(&self, index: usize) -> Result<PageLayout, String>;

    /// Rasterise page `index` at the given pixel width.
    fn render(&self, index: usize, target_width: u32) -> Result<DynamicImage, String>;
}

/// Opens documents by path.
pub trait DocumentStore {
    fn open(&self, path: &str) -> Result<Box<dyn SourceDocument + '_>, String>;
}

// ── Locator ──────────────────────────────────────────────────────────────────

/// Knobs for [`locate`].
#[derive(Debug, Clone, PartialEq)]
pub struct LocateOptions {
    /// Inclusive similarity threshold, 0–100.
    pub threshold: u8,
    pub dpi: u32,
    /// Cap on the longest rendered edge.
    pub max_rendered_pixels: u32,
    /// Documents citations may name; `None` accepts any path.
    pub sources: Option<Vec<String>>,
}

impl LocateOptions {
    pub fn from_config(config: &QaConfig) -> Self {
        Self {
            threshold: config.similarity_threshold,
            dpi: config.evidence_dpi,
            max_rendered_pixels: config.max_rendered_pixels,
            sources: None,
        }
    }

    /// Restrict citations to `sources`.
    pub fn with_sources(mut self, sources: Vec<String>) -> Self {
        self.sources = Some(sources);
        self
    }
}

impl Default for LocateOptions {
    fn default() -> Self {
        Self::from_config(&QaConfig::default())
    }
}

/// Annotation buffer for one `(file_source, page_no)`.
struct PageMarks {
    layout: PageLayout,
    /// Block texts lowercased once, parallel to `layout.blocks`.
    lowered: Vec<String>,
    marks: Vec<BoundingBox>,
}

impl PageMarks {
    fn new(layout: PageLayout) -> Self {
        let lowered = layout.blocks.iter().map(|b| b.text.to_lowercase()).collect();
        Self {
            layout,
            lowered,
            marks: Vec::new(),
        }
    }
}

/// Locate every citation and write annotated page images to `output_dir`.
///
/// Only a failure to create `output_dir` is fatal. Per-citation and
/// per-page failures land in [`EvidenceReport::errors`].
pub fn locate(
    store: &dyn DocumentStore,
    citations: &[Citation],
    output_dir: &Path,
    options: &LocateOptions,
    similarity: &dyn Similarity,
) -> Result<EvidenceReport, QaError> {
    let mut report = EvidenceReport::default();
    let mut documents: HashMap<String, Result<Box<dyn SourceDocument + '_>, String>> =
        HashMap::new();
    let mut pages: IndexMap<(String, usize), PageMarks> = IndexMap::new();

    for (i, citation) in citations.iter().enumerate() {
        let source = citation.file_source.as_str();
        let not_found = |detail: String| CitationError::SourceNotFound {
            citation: i,
            file_source: source.to_string(),
            page_no: citation.page_no,
            detail,
        };

        if let Some(ref allowed) = options.sources {
            if !allowed.iter().any(|s| s == source) {
                warn!("citation {}: '{}' was not retrieved, skipping", i, source);
                report.errors.push(not_found("not a retrieved document".into()));
                continue;
            }
        }

        let document = match documents
            .entry(source.to_string())
            .or_insert_with(|| store.open(source))
        {
            Ok(doc) => doc,
            Err(e) => {
                warn!("citation {}: cannot open '{}': {}", i, source, e);
                report.errors.push(not_found(e.clone()));
                continue;
            }
        };

        let page_count = document.page_count();
        if citation.page_no == 0 || citation.page_no > page_count {
            warn!(
                "citation {}: page {} out of range for '{}' ({} pages)",
                i, citation.page_no, source, page_count
            );
            report.errors.push(not_found(format!(
                "page out of range (document has {} pages)",
                page_count
            )));
            continue;
        }

        let key = (source.to_string(), citation.page_no);
        if !pages.contains_key(&key) {
            match document.layout(citation.page_no - 1) {
                Ok(layout) => {
                    pages.insert(key.clone(), PageMarks::new(layout));
                }
                Err(e) => {
                    warn!("citation {}: cannot read page {}: {}", i, citation.page_no, e);
                    report.errors.push(not_found(e));
                    continue;
                }
            }
        }
        let Some(page) = pages.get_mut(&key) else {
            continue;
        };

        let needle = citation.text.to_lowercase();
        for (block, text) in page.layout.blocks.iter().zip(&page.lowered) {
            let score = similarity.ratio(&needle, text);
            if score >= options.threshold {
                debug!(
                    "citation {}: block {:?} on page {} scores {}",
                    i, block.bbox, citation.page_no, score
                );
                if !page.marks.contains(&block.bbox) {
                    page.marks.push(block.bbox);
                }
            }
        }
    }

    let marked: Vec<(&(String, usize), &PageMarks)> =
        pages.iter().filter(|(_, p)| !p.marks.is_empty()).collect();
    if marked.is_empty() {
        return Ok(report);
    }

    std::fs::create_dir_all(output_dir).map_err(|e| QaError::OutputWriteFailed {
        path: output_dir.to_path_buf(),
        source: e,
    })?;

    let names = image_names(marked.iter().map(|(k, _)| (k.0.as_str(), k.1)));
    for (((source, page_no), page), name) in marked.into_iter().zip(names) {
        let path = output_dir.join(name);
        let Some(Ok(document)) = documents.get(source) else {
            continue;
        };

        match render_annotated(&**document, *page_no, page, options, &path) {
            Ok(()) => {
                debug!("wrote {}", path.display());
                report.images.push(EvidenceImage {
                    page_no: *page_no,
                    file_source: source.clone(),
                    path,
                });
            }
            Err(detail) => {
                warn!("page {} of '{}': {}", page_no, source, detail);
                report.errors.push(CitationError::RenderFailed {
                    file_source: source.clone(),
                    page_no: *page_no,
                    detail,
                });
            }
        }
    }

    info!(
        "evidence: {} images, {} skipped",
        report.images.len(),
        report.errors.len()
    );
    Ok(report)
}

/// Deterministic file names for `(file_source, page_no)` pairs in order.
pub fn image_names<'a>(pages: impl IntoIterator<Item = (&'a str, usize)>) -> Vec<String> {
    let mut seen: HashMap<usize, usize> = HashMap::new();
    pages
        .into_iter()
        .map(|(_, page_no)| {
            let k = seen.entry(page_no).or_insert(0);
            *k += 1;
            if *k == 1 {
                format!("output_page_{}.png", page_no)
            } else {
                format!("output_page_{}_{}.png", page_no, k)
            }
        })
        .collect()
}

/// Pixel width for a page: `dpi / 72` scale, longest edge capped.
fn target_width(layout: &PageLayout, options: &LocateOptions) -> u32 {
    let scale = options.dpi as f32 / 72.0;
    let (w, h) = (layout.width * scale, layout.height * scale);
    let longest = w.max(h);
    let cap = options.max_rendered_pixels as f32;
    let w = if longest > cap { w * cap / longest } else { w };
    w.round().max(1.0) as u32
}

fn render_annotated(
    document: &dyn SourceDocument,
    page_no: usize,
    page: &PageMarks,
    options: &LocateOptions,
    path: &Path,
) -> Result<(), String> {
    let image = document.render(page_no - 1, target_width(&page.layout, options))?;
    let mut canvas = image.to_rgba8();

    let sx = canvas.width() as f32 / page.layout.width.max(1.0);
    let sy = canvas.height() as f32 / page.layout.height.max(1.0);
    for bbox in &page.marks {
        draw_rect(&mut canvas, bbox, sx, sy);
    }

    write_png(&canvas, path)
}

/// Outline `bbox` (in points) on `canvas`, scaled by `sx`/`sy`.
fn draw_rect(canvas: &mut RgbaImage, bbox: &BoundingBox, sx: f32, sy: f32) {
    let (w, h) = canvas.dimensions();
    if w == 0 || h == 0 {
        return;
    }
    let clamp_x = |v: f32| ((v * sx).round().max(0.0) as u32).min(w - 1);
    let clamp_y = |v: f32| ((v * sy).round().max(0.0) as u32).min(h - 1);
    let (x0, x1) = (clamp_x(bbox.left), clamp_x(bbox.right));
    let (y0, y1) = (clamp_y(bbox.top), clamp_y(bbox.bottom));

    for t in 0..HIGHLIGHT_WIDTH {
        for x in x0..=x1 {
            canvas.put_pixel(x, (y0 + t).min(h - 1), HIGHLIGHT);
            canvas.put_pixel(x, y1.saturating_sub(t), HIGHLIGHT);
        }
        for y in y0..=y1 {
            canvas.put_pixel((x0 + t).min(w - 1), y, HIGHLIGHT);
            canvas.put_pixel(x1.saturating_sub(t), y, HIGHLIGHT);
        }
    }
}

/// Write via a temp file in the same directory, then rename into place.
fn write_png(canvas: &RgbaImage, path: &Path) -> Result<(), String> {
    let dir = path.parent().unwrap_or_else(|| Path::new("."));
    let tmp = tempfile::Builder::new()
        .prefix(".output_page")
        .suffix(".png")
        .tempfile_in(dir)
        .map_err(|e| format!("create temp file: {e}"))?;
    {
        let mut writer = BufWriter::new(tmp.as_file());
        canvas
            .write_to(&mut writer, ImageFormat::Png)
            .map_err(|e| format!("encode png: {e}"))?;
    }
    tmp.persist(path)
        .map_err(|e| format!("write {}: {}", path.display(), e.error))?;
    Ok(())
}

/// Run [`locate`] against pdfium on a blocking thread.
pub async fn locate_evidence(
    citations: Vec<Citation>,
    options: LocateOptions,
    config: &QaConfig,
    similarity: Arc<dyn Similarity>,
) -> Result<EvidenceReport, QaError> {
    let output_dir: PathBuf = config.output_dir.clone();
    let password = config.password.clone();

    tokio::task::spawn_blocking(move || {
        let store = PdfiumStore::new(password)?;
        locate(&store, &citations, &output_dir, &options, similarity.as_ref())
    })
    .await
    .map_err(|e| QaError::Internal(format!("Evidence task panicked: {}", e)))?
}

/// Default similarity measure.
pub fn default_similarity() -> Arc<dyn Similarity> {
    Arc::new(LevenshteinRatio)
}
