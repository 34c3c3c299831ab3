//! In-process fallback: the PDF text layer, tidied into Markdown paragraphs.

use super::LocalConverter;
use crate::error::{ConversionOutcome, ConverterError};
use crate::markdown::join_pages;
use crate::pdf::PdfBackend;
use std::path::Path;
use std::sync::Arc;
use tracing::debug;

/// Extracts each page's text through a [`PdfBackend`].
///
/// Scanned pages without a text layer contribute nothing; a fully scanned
/// document converts to an empty string rather than an error.
pub struct PdfTextConverter {
    pdf: Arc<dyn PdfBackend>,
}

impl PdfTextConverter {
    pub fn new(pdf: Arc<dyn PdfBackend>) -> Self {
        Self { pdf }
    }
}

impl LocalConverter for PdfTextConverter {
    fn name(&self) -> &'static str {
        "pdf-text"
    }

    fn convert(&self, document: &Path) -> ConversionOutcome<String> {
        let result = self
            .pdf
            .page_texts(document)
            .map(|pages| {
                debug!("Extracted text layer of {} pages", pages.len());
                join_pages(pages)
            })
            .map_err(|e| ConverterError::Document {
                path: document.to_path_buf(),
                detail: e.to_string(),
            });
        ConversionOutcome::fatal(result)
    }
}
