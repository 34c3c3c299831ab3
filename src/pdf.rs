//! Page-addressable PDF access.
//!
//! The conversion core only needs four things from a PDF engine: how many
//! pages a document has, a way to copy a page range into a new standalone
//! document, the text layer of every page and, for the vision backend,
//! rasterised pages. [`PdfBackend`] captures the first three so the chunker
//! and the local converter can be exercised without a native library;
//! [`PdfiumBackend`] implements it on top of `pdfium-render`.
//!
//! Every method is blocking. pdfium keeps thread-local state and must not be
//! driven from an async worker, so callers wrap these in `spawn_blocking`.

use crate::error::ToolError;
use image::DynamicImage;
use pdfium_render::prelude::*;
use std::ops::Range;
use std::path::{Path, PathBuf};
use tracing::debug;

/// Minimal PDF operations used by the pipeline.
pub trait PdfBackend: Send + Sync {
    /// Number of pages in `path`.
    fn page_count(&self, path: &Path) -> Result<usize, ToolError>;

    /// Write pages `pages` (0-based, half-open) of `source` to a new document at `dest`.
    fn extract_pages(&self, source: &Path, pages: Range<usize>, dest: &Path)
        -> Result<(), ToolError>;

    /// Text layer of every page, in page order.
    fn page_texts(&self, path: &Path) -> Result<Vec<String>, ToolError>;
}

/// [`PdfBackend`] backed by the pdfium C++ library.
///
/// The library is located through `pdfium-auto` (explicit path, cache, or a
/// one-time download) unless an explicit path is supplied.
#[derive(Debug, Clone, Default)]
pub struct PdfiumBackend {
    library: Option<PathBuf>,
}

impl PdfiumBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Bind to the library at `path` instead of resolving one automatically.
    pub fn with_library(path: impl Into<PathBuf>) -> Self {
        Self {
            library: Some(path.into()),
        }
    }

    fn bind(&self) -> Result<Pdfium, ToolError> {
        match &self.library {
            Some(path) => pdfium_auto::bind_from_path(path),
            None => pdfium_auto::bind(),
        }
        .map_err(|e| ToolError::PdfiumBindingFailed(e.to_string()))
    }

    /// Rasterise every page, capping the longest edge at `max_pixels`.
    ///
    /// Returns `(page_index_0based, image)` pairs in page order.
    pub fn render_pages(
        &self,
        path: &Path,
        max_pixels: u32,
    ) -> Result<Vec<(usize, DynamicImage)>, ToolError> {
        let pdfium = self.bind()?;
        let document = open(&pdfium, path)?;

        let render_config = PdfRenderConfig::new()
            .set_target_width(max_pixels as i32)
            .set_maximum_height(max_pixels as i32);

        let mut images = Vec::new();
        for (idx, page) in document.pages().iter().enumerate() {
            let bitmap = page
                .render_with_config(&render_config)
                .map_err(|e| unreadable(path, format!("page {} render: {e:?}", idx + 1)))?;
            let image = bitmap.as_image();
            debug!(
                "Rendered page {} → {}x{} px",
                idx + 1,
                image.width(),
                image.height()
            );
            images.push((idx, image));
        }

        Ok(images)
    }
}

impl PdfBackend for PdfiumBackend {
    fn page_count(&self, path: &Path) -> Result<usize, ToolError> {
        let pdfium = self.bind()?;
        let document = open(&pdfium, path)?;
        Ok(document.pages().len() as usize)
    }

    fn extract_pages(
        &self,
        source: &Path,
        pages: Range<usize>,
        dest: &Path,
    ) -> Result<(), ToolError> {
        let pdfium = self.bind()?;
        let document = open(&pdfium, source)?;
        let total = document.pages().len() as usize;
        if pages.is_empty() || pages.end > total {
            return Err(unreadable(
                source,
                format!("page range {pages:?} outside document of {total} pages"),
            ));
        }

        let scratch_err = |detail: String| ToolError::ScratchWrite {
            path: dest.to_path_buf(),
            detail,
        };

        let mut chunk = pdfium
            .create_new_pdf()
            .map_err(|e| scratch_err(format!("create document: {e:?}")))?;
        chunk
            .pages_mut()
            .copy_page_range_from_document(
                &document,
                (pages.start as u16)..=((pages.end - 1) as u16),
                0,
            )
            .map_err(|e| scratch_err(format!("copy pages {pages:?}: {e:?}")))?;
        chunk
            .save_to_file(dest)
            .map_err(|e| scratch_err(format!("save: {e:?}")))?;

        debug!(
            "Wrote pages {}..{} of {} to {}",
            pages.start,
            pages.end,
            source.display(),
            dest.display()
        );
        Ok(())
    }

    fn page_texts(&self, path: &Path) -> Result<Vec<String>, ToolError> {
        let pdfium = self.bind()?;
        let document = open(&pdfium, path)?;

        document
            .pages()
            .iter()
            .enumerate()
            .map(|(idx, page)| {
                page.text()
                    .map(|text| text.all())
                    .map_err(|e| unreadable(path, format!("page {} text: {e:?}", idx + 1)))
            })
            .collect()
    }
}

fn open<'a>(pdfium: &'a Pdfium, path: &Path) -> Result<PdfDocument<'a>, ToolError> {
    if !path.is_file() {
        return Err(ToolError::FileNotFound {
            path: path.to_path_buf(),
        });
    }
    pdfium
        .load_pdf_from_file(path, None)
        .map_err(|e| unreadable(path, format!("{e:?}")))
}

fn unreadable(path: &Path, detail: String) -> ToolError {
    ToolError::UnreadablePdf {
        path: path.to_path_buf(),
        detail,
    }
}
