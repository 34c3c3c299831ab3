//! Split oversized documents into standalone page-range PDFs.
//!
//! Chunks are contiguous, non-overlapping and cover every page exactly once.
//! Each chunk is written to a private scratch directory owned by the
//! returned [`ChunkSet`]; dropping the set (or calling
//! [`ChunkSet::cleanup`]) removes the directory and everything in it.

use crate::config::MAX_CHUNK_PAGES;
use crate::error::ToolError;
use crate::pdf::PdfBackend;
use std::io;
use std::ops::Range;
use std::path::{Path, PathBuf};
use tempfile::TempDir;
use tracing::{debug, info};

/// One page range of the source document, materialised as its own PDF.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Chunk {
    /// Submission position; fragments are reassembled by this index.
    pub index: usize,
    /// First page covered, 0-based inclusive.
    pub start_page: usize,
    /// Last page covered, 0-based exclusive.
    pub end_page: usize,
    /// Location of the standalone chunk document.
    pub artifact: PathBuf,
}

impl Chunk {
    pub fn pages(&self) -> Range<usize> {
        self.start_page..self.end_page
    }

    pub fn page_count(&self) -> usize {
        self.end_page - self.start_page
    }
}

/// Chunks of one document plus the scratch area holding their artifacts.
#[derive(Debug)]
pub struct ChunkSet {
    chunks: Vec<Chunk>,
    total_pages: usize,
    scratch: Option<TempDir>,
}

impl ChunkSet {
    pub fn chunks(&self) -> &[Chunk] {
        &self.chunks
    }

    pub fn len(&self) -> usize {
        self.chunks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.chunks.is_empty()
    }

    pub fn total_pages(&self) -> usize {
        self.total_pages
    }

    /// Artifact paths in chunk order.
    pub fn artifacts(&self) -> Vec<PathBuf> {
        self.chunks.iter().map(|c| c.artifact.clone()).collect()
    }

    /// Scratch directory, or `None` once cleaned up.
    pub fn scratch_dir(&self) -> Option<&Path> {
        self.scratch.as_ref().map(TempDir::path)
    }

    /// Remove the scratch directory now, reporting any removal error.
    ///
    /// Dropping a `ChunkSet` also removes it but swallows errors.
    pub fn cleanup(mut self) -> io::Result<()> {
        match self.scratch.take() {
            Some(dir) => dir.close(),
            None => Ok(()),
        }
    }
}

/// Page ranges for `total_pages` split into pieces of at most `max_pages`.
///
/// `max_pages` is clamped to `1..=MAX_CHUNK_PAGES`.
pub fn plan_chunks(total_pages: usize, max_pages: usize) -> Vec<Range<usize>> {
    let size = max_pages.clamp(1, MAX_CHUNK_PAGES);
    (0..total_pages)
        .step_by(size)
        .map(|start| start..(start + size).min(total_pages))
        .collect()
}

/// Split `document` into chunks of at most `max_pages` pages.
///
/// Fails when the document cannot be read, has no pages, or a chunk cannot be
/// written. On failure any partially written scratch data has already been
/// removed.
pub fn split(
    pdf: &dyn PdfBackend,
    document: &Path,
    max_pages: usize,
) -> Result<ChunkSet, ToolError> {
    let total_pages = pdf.page_count(document)?;
    if total_pages == 0 {
        return Err(ToolError::EmptyDocument {
            path: document.to_path_buf(),
        });
    }

    let scratch = tempfile::Builder::new()
        .prefix("good-filings-chunks-")
        .tempdir()
        .map_err(|e| ToolError::ScratchWrite {
            path: std::env::temp_dir(),
            detail: e.to_string(),
        })?;

    let ranges = plan_chunks(total_pages, max_pages);
    let mut chunks = Vec::with_capacity(ranges.len());
    for (index, pages) in ranges.into_iter().enumerate() {
        let artifact = scratch
            .path()
            .join(format!("chunk_{}_{}.pdf", pages.start, pages.end));
        debug!(
            "Chunk {index}: pages {}-{} → {}",
            pages.start + 1,
            pages.end,
            artifact.display()
        );
        // `scratch` drops on the early return and takes written chunks with it.
        pdf.extract_pages(document, pages.clone(), &artifact)?;
        chunks.push(Chunk {
            index,
            start_page: pages.start,
            end_page: pages.end,
            artifact,
        });
    }

    info!(
        "Split {} ({} pages) into {} chunks",
        document.display(),
        total_pages,
        chunks.len()
    );

    Ok(ChunkSet {
        chunks,
        total_pages,
        scratch: Some(scratch),
    })
}
