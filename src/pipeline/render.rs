//! pdfium access: library binding, page text, text-block layout and page
//! rasterisation.
//!
//! ## Why spawn_blocking?
//!
//! The `pdfium-render` crate wraps the pdfium C++ library, which uses
//! thread-local state internally and is not safe to call from async contexts.
//! Every entry point here is synchronous; async callers (ingestion, the
//! evidence locator) move the work onto `tokio::task::spawn_blocking`.
//!
//! ## Coordinates
//!
//! pdfium reports rectangles in PDF user space (origin bottom-left). The
//! layout handed to the evidence locator is flipped to a top-left origin so
//! it maps directly onto raster pixels after scaling.

use crate::error::QaError;
use crate::evidence::{BoundingBox, DocumentStore, PageLayout, SourceDocument, TextBlock};
use image::DynamicImage;
use pdfium_render::prelude::*;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

#[cfg(target_os = "windows")]
const PLATFORM_LIB_NAME: &str = "pdfium.dll";
#[cfg(target_os = "macos")]
const PLATFORM_LIB_NAME: &str = "libpdfium.dylib";
#[cfg(not(any(target_os = "windows", target_os = "macos")))]
const PLATFORM_LIB_NAME: &str = "libpdfium.so";

/// Bind to the pdfium shared library.
///
/// Lookup order: `PDFIUM_LIB_PATH` (a library file or the directory holding
/// it), then the working directory, then the system library search path.
pub fn bind_pdfium() -> Result<Pdfium, QaError> {
    if let Ok(env_path) = std::env::var("PDFIUM_LIB_PATH") {
        let mut path = PathBuf::from(env_path);
        if path.is_dir() {
            path = path.join(PLATFORM_LIB_NAME);
        }
        return Pdfium::bind_to_library(&path)
            .map(Pdfium::new)
            .map_err(|e| {
                QaError::PdfiumBindingFailed(format!("{}: {}", path.display(), e))
            });
    }

    let local = PathBuf::from(".").join(PLATFORM_LIB_NAME);
    Pdfium::bind_to_library(&local)
        .or_else(|_| Pdfium::bind_to_system_library())
        .map(Pdfium::new)
        .map_err(|e| QaError::PdfiumBindingFailed(e.to_string()))
}

/// Map a pdfium load failure onto the matching [`QaError`].
fn load_error(path: &Path, password: Option<&str>, e: PdfiumError) -> QaError {
    let err_str = format!("{:?}", e);
    if err_str.contains("Password") || err_str.contains("password") {
        if password.is_some() {
            QaError::WrongPassword {
                path: path.to_path_buf(),
            }
        } else {
            QaError::PasswordRequired {
                path: path.to_path_buf(),
            }
        }
    } else {
        QaError::CorruptPdf {
            path: path.to_path_buf(),
            detail: err_str,
        }
    }
}

// ── Ingestion ────────────────────────────────────────────────────────────────

/// Plain text of every page of one PDF.
#[derive(Debug, Clone)]
pub struct ExtractedDocument {
    pub source: String,
    pub title: String,
    /// Page texts, 0-indexed.
    pub pages: Vec<String>,
}

/// Extract the text of every page. Runs pdfium on a blocking thread.
pub async fn extract_pages(
    pdf_path: &Path,
    password: Option<&str>,
) -> Result<ExtractedDocument, QaError> {
    let path = pdf_path.to_path_buf();
    let pwd = password.map(|s| s.to_string());

    tokio::task::spawn_blocking(move || extract_pages_blocking(&path, pwd.as_deref()))
        .await
        .map_err(|e| QaError::Internal(format!("Extraction task panicked: {}", e)))?
}

fn extract_pages_blocking(
    pdf_path: &Path,
    password: Option<&str>,
) -> Result<ExtractedDocument, QaError> {
    let pdfium = bind_pdfium()?;
    let document = pdfium
        .load_pdf_from_file(pdf_path, password)
        .map_err(|e| load_error(pdf_path, password, e))?;

    let title = document
        .metadata()
        .get(PdfDocumentMetadataTagType::Title)
        .map(|t| t.value().trim().to_string())
        .filter(|t| !t.is_empty())
        .unwrap_or_else(|| {
            pdf_path
                .file_stem()
                .map(|s| s.to_string_lossy().into_owned())
                .unwrap_or_default()
        });

    let mut pages = Vec::new();
    for (idx, page) in document.pages().iter().enumerate() {
        let text = page
            .text()
            .map(|t| t.all())
            .map_err(|e| QaError::CorruptPdf {
                path: pdf_path.to_path_buf(),
                detail: format!("page {}: {:?}", idx + 1, e),
            })?;
        pages.push(text);
    }

    info!("Extracted {} pages from {}", pages.len(), pdf_path.display());
    Ok(ExtractedDocument {
        source: pdf_path.to_string_lossy().into_owned(),
        title,
        pages,
    })
}

// ── Evidence document store ─────────────────────────────────────────────────

/// [`DocumentStore`] backed by pdfium.
pub struct PdfiumStore {
    pdfium: Pdfium,
    password: Option<String>,
}

impl PdfiumStore {
    pub fn new(password: Option<String>) -> Result<Self, QaError> {
        Ok(Self {
            pdfium: bind_pdfium()?,
            password,
        })
    }
}

impl DocumentStore for PdfiumStore {
    fn open(&self, path: &str) -> Result<Box<dyn SourceDocument + '_>, String> {
        let p = Path::new(path);
        if !p.is_file() {
            return Err("no such file".to_string());
        }
        let password = self.password.as_deref();
        let document = self
            .pdfium
            .load_pdf_from_file(p, password)
            .map_err(|e| load_error(p, password, e).to_string())?;
        Ok(Box::new(PdfiumDocument { document }))
    }
}

struct PdfiumDocument<'a> {
    document: PdfDocument<'a>,
}

impl<'a> PdfiumDocument<'a> {
    fn page(&self, index: usize) -> Result<PdfPage<'a>, String> {
        self.document
            .pages()
            .get(index as u16)
            .map_err(|e| format!("{:?}", e))
    }
}

impl SourceDocument for PdfiumDocument<'_> {
    fn page_count(&self) -> usize {
        self.document.pages().len() as usize
    }

    fn layout(&self, index: usize) -> Result<PageLayout, String> {
        let page = self.page(index)?;
        let width = page.width().value;
        let height = page.height().value;
        let text = page.text().map_err(|e| format!("{:?}", e))?;

        let segments: Vec<TextBlock> = text
            .segments()
            .iter()
            .map(|segment| {
                let rect = segment.bounds();
                TextBlock {
                    bbox: BoundingBox {
                        left: rect.left().value,
                        top: height - rect.top().value,
                        right: rect.right().value,
                        bottom: height - rect.bottom().value,
                    },
                    text: segment.text(),
                }
            })
            .collect();

        let blocks = group_into_blocks(&segments);
        debug!(
            "page {}: {} segments grouped into {} blocks",
            index + 1,
            segments.len(),
            blocks.len()
        );
        Ok(PageLayout {
            width,
            height,
            blocks,
        })
    }

    fn render(&self, index: usize, target_width: u32) -> Result<DynamicImage, String> {
        let page = self.page(index)?;
        let config = PdfRenderConfig::new().set_target_width(target_width.max(1) as i32);
        let bitmap = page
            .render_with_config(&config)
            .map_err(|e| format!("{:?}", e))?;
        Ok(bitmap.as_image())
    }
}

// ── Text-block grouping ──────────────────────────────────────────────────────

/// Merge pdfium text segments (single-style runs) into paragraph-like blocks.
///
/// Segments are taken in reading order. A segment joins the current block
/// when it sits on the block's last line or starts within 0.6 line-heights
/// below it and overlaps it horizontally.
pub fn group_into_blocks(segments: &[TextBlock]) -> Vec<TextBlock> {
    let mut blocks: Vec<TextBlock> = Vec::new();
    let mut last_line_top = f32::MIN;

    for seg in segments {
        if seg.text.trim().is_empty() {
            continue;
        }
        let line_height = (seg.bbox.bottom - seg.bbox.top).abs().max(1.0);

        if let Some(block) = blocks.last_mut() {
            let same_line = (seg.bbox.top - last_line_top).abs() < line_height * 0.5
                && seg.bbox.left >= block.bbox.left - line_height;
            let gap = seg.bbox.top - block.bbox.bottom;
            let overlaps = seg.bbox.left < block.bbox.right && seg.bbox.right > block.bbox.left;
            let next_line = gap >= -line_height * 0.5 && gap <= line_height * 0.6 && overlaps;

            if same_line || next_line {
                block.text.push(if same_line { ' ' } else { '\n' });
                block.text.push_str(seg.text.trim());
                block.bbox = block.bbox.union(&seg.bbox);
                if !same_line {
                    last_line_top = seg.bbox.top;
                }
                continue;
            }
        }

        last_line_top = seg.bbox.top;
        blocks.push(TextBlock {
            bbox: seg.bbox,
            text: seg.text.trim().to_string(),
        });
    }

    blocks
}

#[cfg(test)]
mod tests {
    use super::*;

    fn seg(left: f32, top: f32, right: f32, bottom: f32, text: &str) -> TextBlock {
        TextBlock {
            bbox: BoundingBox {
                left,
                top,
                right,
                bottom,
            },
            text: text.to_string(),
        }
    }

    #[test]
    fn same_line_segments_are_joined_with_space() {
        let blocks = group_into_blocks(&[
            seg(72.0, 100.0, 150.0, 112.0, "Attention is"),
            seg(152.0, 100.0, 220.0, 112.0, "all you need"),
        ]);
        assert_eq!(blocks.len(), 1);
        assert_eq!(blocks[0].text, "Attention is all you need");
        assert_eq!(blocks[0].bbox.right, 220.0);
    }

    #[test]
    fn consecutive_lines_form_one_block() {
        let blocks = group_into_blocks(&[
            seg(72.0, 100.0, 500.0, 112.0, "The dominant sequence transduction models"),
            seg(72.0, 114.0, 480.0, 126.0, "are based on recurrent networks."),
        ]);
        assert_eq!(blocks.len(), 1);
        assert_eq!(
            blocks[0].text,
            "The dominant sequence transduction models\nare based on recurrent networks."
        );
        assert_eq!(blocks[0].bbox.bottom, 126.0);
    }

    #[test]
    fn paragraph_gap_starts_new_block() {
        let blocks = group_into_blocks(&[
            seg(72.0, 100.0, 500.0, 112.0, "First paragraph."),
            seg(72.0, 150.0, 500.0, 162.0, "Second paragraph."),
        ]);
        assert_eq!(blocks.len(), 2);
        assert_eq!(blocks[1].text, "Second paragraph.");
    }

    #[test]
    fn blank_segments_are_skipped() {
        let blocks = group_into_blocks(&[seg(0.0, 0.0, 10.0, 10.0, "   ")]);
        assert!(blocks.is_empty());
    }
}
