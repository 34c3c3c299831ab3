//! Strategy selection, chunking and fallback for `read_as_markdown`.
//!
//! ```text
//!  START ──page count──▶ ≤ 40 ──▶ DIRECT_REMOTE ─────────────┐
//!    │                   > 40 ──▶ CHUNKING ─▶ BATCH_REMOTE ──┤
//!    │ (unreadable)                               │ cleanup  │
//!    ▼                                            ▼          ▼
//!  LOCAL_FALLBACK ◀────────── any remote failure           DONE
//!    │ (original document, never chunks)
//!    ├─ ok ──▶ DONE
//!    └─ err ─▶ FATAL (both causes reported)
//! ```
//!
//! `Engine::Local` skips straight to the local converter.

use crate::chunker;
use crate::config::{ConversionConfig, Engine, CHUNK_THRESHOLD_PAGES};
use crate::converter::{self, Fragment, LocalConverter, PdfTextConverter, RemoteConverter};
use crate::error::{ConversionOutcome, ConverterError, ToolError};
use crate::pdf::{PdfBackend, PdfiumBackend};
use std::fmt;
use std::path::Path;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

/// Which path produced a conversion.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Strategy {
    /// Whole document sent to the remote backend as a batch of one.
    DirectRemote,
    /// Document split into `chunks` pieces, converted as one batch.
    ChunkedRemote { chunks: usize },
    /// Local converter requested explicitly.
    Local,
    /// Local converter after the remote strategy failed.
    LocalFallback,
}

impl fmt::Display for Strategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Strategy::DirectRemote => f.write_str("direct-remote"),
            Strategy::ChunkedRemote { chunks } => write!(f, "chunked-remote({chunks})"),
            Strategy::Local => f.write_str("local"),
            Strategy::LocalFallback => f.write_str("local-fallback"),
        }
    }
}

/// A finished conversion.
#[derive(Debug, Clone)]
pub struct Conversion {
    pub markdown: String,
    pub strategy: Strategy,
    pub elapsed: Duration,
}

/// Drives one conversion request through the strategy state machine.
pub struct Orchestrator {
    pdf: Arc<dyn PdfBackend>,
    remote: Arc<dyn RemoteConverter>,
    local: Arc<dyn LocalConverter>,
    chunk_pages: usize,
}

impl Orchestrator {
    pub fn new(
        pdf: Arc<dyn PdfBackend>,
        remote: Arc<dyn RemoteConverter>,
        local: Arc<dyn LocalConverter>,
        chunk_pages: usize,
    ) -> Self {
        Self {
            pdf,
            remote,
            local,
            chunk_pages,
        }
    }

    /// Production wiring: pdfium for PDF access and local text, the configured
    /// remote backend for everything else.
    pub fn from_config(config: &ConversionConfig) -> Result<Self, ToolError> {
        let pdfium = Arc::new(PdfiumBackend::new());
        let remote = converter::build_remote(config, Arc::clone(&pdfium))?;
        let local = Arc::new(PdfTextConverter::new(pdfium.clone()));
        Ok(Self::new(
            pdfium,
            remote,
            local,
            config.effective_chunk_pages(),
        ))
    }

    /// Convert `document` with the requested engine.
    pub async fn convert(&self, document: &Path, engine: Engine) -> Result<Conversion, ToolError> {
        let start = Instant::now();
        if !document.is_file() {
            return Err(ToolError::FileNotFound {
                path: document.to_path_buf(),
            });
        }

        let (markdown, strategy) = match engine {
            Engine::Local => {
                info!("Converting {} locally", document.display());
                (self.run_local(document, None).await?, Strategy::Local)
            }
            Engine::Remote => match self.run_remote(document).await {
                ConversionOutcome::Converted(done) => done,
                // Local is still untried, so any remote failure falls back.
                ConversionOutcome::Recoverable(cause) | ConversionOutcome::Fatal(cause) => {
                    warn!(
                        "Remote conversion via {} failed ({cause}); falling back to {}",
                        self.remote.name(),
                        self.local.name()
                    );
                    let markdown = self.run_local(document, Some(cause)).await?;
                    (markdown, Strategy::LocalFallback)
                }
            },
        };

        let elapsed = start.elapsed();
        info!(
            "Converted {} via {strategy}: {} chars in {:?}",
            document.display(),
            markdown.chars().count(),
            elapsed
        );
        Ok(Conversion {
            markdown,
            strategy,
            elapsed,
        })
    }

    async fn run_remote(&self, document: &Path) -> ConversionOutcome<(String, Strategy)> {
        let pdf = Arc::clone(&self.pdf);
        let doc = document.to_path_buf();
        let pages = match blocking(move || pdf.page_count(&doc)).await {
            Ok(n) => n,
            Err(e) => return ConversionOutcome::Recoverable(ConverterError::Preparation(e.to_string())),
        };

        if pages <= CHUNK_THRESHOLD_PAGES {
            info!(
                "{} has {pages} pages; converting directly via {}",
                document.display(),
                self.remote.name()
            );
            let outcome = self.remote.convert_batch(&[document.to_path_buf()]).await;
            return assemble(outcome, 1).map(|md| (md, Strategy::DirectRemote));
        }

        let pdf = Arc::clone(&self.pdf);
        let doc = document.to_path_buf();
        let max = self.chunk_pages;
        let chunks = match blocking(move || chunker::split(pdf.as_ref(), &doc, max)).await {
            Ok(set) => set,
            Err(e) => return ConversionOutcome::Recoverable(ConverterError::Preparation(e.to_string())),
        };
        let count = chunks.len();
        info!(
            "{} has {pages} pages; converting {count} chunks via {}",
            document.display(),
            self.remote.name()
        );

        let outcome = assemble(self.remote.convert_batch(&chunks.artifacts()).await, count);

        let scratch = chunks.scratch_dir().map(Path::to_path_buf);
        match chunks.cleanup() {
            Ok(()) => debug!("Removed chunk scratch {scratch:?}"),
            Err(e) => warn!("Failed to remove chunk scratch {scratch:?}: {e}"),
        }

        outcome.map(|md| (md, Strategy::ChunkedRemote { chunks: count }))
    }

    async fn run_local(
        &self,
        document: &Path,
        remote_cause: Option<ConverterError>,
    ) -> Result<String, ToolError> {
        let local = Arc::clone(&self.local);
        let doc = document.to_path_buf();
        let outcome = tokio::task::spawn_blocking(move || local.convert(&doc))
            .await
            .map_err(|e| ToolError::Internal(format!("local conversion task failed: {e}")))?;

        match outcome {
            ConversionOutcome::Converted(markdown) => Ok(markdown),
            ConversionOutcome::Recoverable(e) | ConversionOutcome::Fatal(e) => {
                Err(ToolError::ConversionFailed {
                    path: document.to_path_buf(),
                    remote: remote_cause.map(|c| c.to_string()),
                    local: e.to_string(),
                })
            }
        }
    }
}

/// Restore submission order and concatenate fragments with no separator.
///
/// Every index in `0..expected` must appear exactly once.
pub fn reassemble(mut fragments: Vec<Fragment>, expected: usize) -> Result<String, ConverterError> {
    fragments.sort_by_key(|f| f.index);
    let complete = fragments.len() == expected
        && fragments.iter().enumerate().all(|(i, f)| f.index == i);
    if !complete {
        let indices: Vec<usize> = fragments.iter().map(|f| f.index).collect();
        return Err(ConverterError::MalformedResponse(format!(
            "expected fragments 0..{expected}, got indices {indices:?}"
        )));
    }
    Ok(fragments.into_iter().map(|f| f.markdown).collect())
}

fn assemble(outcome: ConversionOutcome<Vec<Fragment>>, expected: usize) -> ConversionOutcome<String> {
    match outcome {
        ConversionOutcome::Converted(fragments) => {
            ConversionOutcome::recoverable(reassemble(fragments, expected))
        }
        ConversionOutcome::Recoverable(e) => ConversionOutcome::Recoverable(e),
        ConversionOutcome::Fatal(e) => ConversionOutcome::Fatal(e),
    }
}

async fn blocking<T, F>(f: F) -> Result<T, ToolError>
where
    F: FnOnce() -> Result<T, ToolError> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(f)
        .await
        .map_err(|e| ToolError::Internal(format!("blocking task failed: {e}")))?
}

#[cfg(test)]
mod tests {
    use super::*;

    fn frag(index: usize, text: &str) -> Fragment {
        Fragment {
            index,
            markdown: text.to_string(),
        }
    }

    #[test]
    fn reassemble_orders_by_index_without_separator() {
        let out = reassemble(vec![frag(2, "C"), frag(0, "A"), frag(1, "B")], 3).unwrap();
        assert_eq!(out, "ABC");
    }

    #[test]
    fn reassemble_rejects_gaps_and_duplicates() {
        assert!(reassemble(vec![frag(0, "A"), frag(2, "C")], 3).is_err());
        assert!(reassemble(vec![frag(0, "A"), frag(0, "A"), frag(1, "B")], 3).is_err());
        assert!(reassemble(vec![frag(0, "A"), frag(1, "B")], 1).is_err());
    }

    #[test]
    fn strategy_labels() {
        assert_eq!(Strategy::DirectRemote.to_string(), "direct-remote");
        assert_eq!(
            Strategy::ChunkedRemote { chunks: 3 }.to_string(),
            "chunked-remote(3)"
        );
        assert_eq!(Strategy::LocalFallback.to_string(), "local-fallback");
    }

    #[test]
    fn malformed_batch_becomes_recoverable() {
        let outcome = assemble(ConversionOutcome::Converted(vec![frag(1, "B")]), 1);
        assert!(matches!(
            outcome,
            ConversionOutcome::Recoverable(ConverterError::MalformedResponse(_))
        ));
    }
}
