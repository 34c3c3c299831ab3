//! Conversion strategies behind a uniform interface.
//!
//! ```text
//!   RemoteConverter ── convert_batch(&[doc]) ──▶ Vec<Fragment>  (any order)
//!        ├── LlamaCloudConverter   LlamaParse REST jobs
//!        └── VisionConverter       page images → vision LLM
//!
//!   LocalConverter ── convert(doc) ──▶ String                  (blocking)
//!        └── PdfTextConverter      pdfium text layer
//! ```
//!
//! Remote results come back keyed by submission index; the orchestrator
//! restores document order. Every service payload passes through
//! [`ServiceResult::decode`] so page-structured and opaque results are told
//! apart by tag rather than by attribute probing.

pub mod llama_cloud;
pub mod local;
pub mod vision;

pub use llama_cloud::LlamaCloudConverter;
pub use local::PdfTextConverter;
pub use vision::VisionConverter;

use crate::config::{ConversionConfig, RemoteBackend};
use crate::error::{ConversionOutcome, ToolError};
use crate::pdf::PdfiumBackend;
use async_trait::async_trait;
use serde_json::Value;
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Markdown for one submitted document, tagged with its submission position.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Fragment {
    pub index: usize,
    pub markdown: String,
}

/// Batch conversion through an external service.
///
/// Implementations may finish documents in any order but must report each
/// fragment with the index of the document it came from.
#[async_trait]
pub trait RemoteConverter: Send + Sync {
    fn name(&self) -> &'static str;

    /// Convert every document. A failure of any single document fails the
    /// whole batch; partial results are never returned.
    async fn convert_batch(&self, documents: &[PathBuf]) -> ConversionOutcome<Vec<Fragment>>;
}

/// In-process conversion used as the fallback and for `engine = "local"`.
///
/// Blocking; run it on a blocking thread.
pub trait LocalConverter: Send + Sync {
    fn name(&self) -> &'static str;

    /// Convert one document. Errors are always [`ConversionOutcome::Fatal`]
    /// because nothing runs after the local strategy.
    fn convert(&self, document: &Path) -> ConversionOutcome<String>;
}

/// One page of a page-structured service result.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PageText {
    /// 1-based page number as reported by the service.
    pub page: usize,
    pub markdown: String,
}

/// A service payload, classified once at the boundary.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ServiceResult {
    /// Per-page Markdown in page order.
    Paged(Vec<PageText>),
    /// Anything else, kept as its literal textual form.
    Opaque(String),
}

impl ServiceResult {
    /// Classify a JSON payload.
    ///
    /// A payload is `Paged` when it has a `pages` array whose every element
    /// carries a string `md` field; pages are ordered by their `page` number
    /// when present and by array position otherwise. A bare JSON string is
    /// `Opaque` with that string; every other value is `Opaque` with its JSON
    /// text.
    pub fn decode(value: Value) -> Self {
        if let Value::String(text) = value {
            return ServiceResult::Opaque(text);
        }

        let paged = value
            .get("pages")
            .and_then(Value::as_array)
            .and_then(|pages| {
                pages
                    .iter()
                    .enumerate()
                    .map(|(pos, page)| {
                        let markdown = page.get("md")?.as_str()?.to_string();
                        let number = page
                            .get("page")
                            .and_then(Value::as_u64)
                            .map(|n| n as usize)
                            .unwrap_or(pos + 1);
                        Some(PageText {
                            page: number,
                            markdown,
                        })
                    })
                    .collect::<Option<Vec<_>>>()
            });

        match paged {
            Some(mut pages) => {
                pages.sort_by_key(|p| p.page);
                ServiceResult::Paged(pages)
            }
            None => ServiceResult::Opaque(value.to_string()),
        }
    }

    /// Flatten to one Markdown string; pages are joined by a blank line.
    pub fn into_markdown(self) -> String {
        match self {
            ServiceResult::Paged(pages) => pages
                .into_iter()
                .map(|p| p.markdown)
                .collect::<Vec<_>>()
                .join("\n\n"),
            ServiceResult::Opaque(text) => text,
        }
    }
}

/// Construct the remote converter selected by `config.remote_backend`.
pub fn build_remote(
    config: &ConversionConfig,
    pdf: Arc<PdfiumBackend>,
) -> Result<Arc<dyn RemoteConverter>, ToolError> {
    let remote: Arc<dyn RemoteConverter> = match config.remote_backend {
        RemoteBackend::LlamaCloud => Arc::new(LlamaCloudConverter::new(config)?),
        RemoteBackend::Vision => Arc::new(VisionConverter::new(config.clone(), pdf)),
    };
    Ok(remote)
}
