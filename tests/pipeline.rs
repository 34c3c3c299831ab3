//! Orchestrator behaviour against in-memory PDF, remote and local fakes.
//!
//! No native library or network is involved: the fake PDF backend writes
//! each extracted page range as a tiny text file, and the fake remote
//! converter reads those files back, so chunk boundaries and reassembly
//! order are observable from the final Markdown.

use async_trait::async_trait;
use good_filings::converter::Fragment;
use good_filings::error::{ConversionOutcome, ConverterError, ToolError};
use good_filings::{Engine, LocalConverter, Orchestrator, PdfBackend, RemoteConverter, Strategy};
use std::collections::HashMap;
use std::ops::Range;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

// ── Fakes ────────────────────────────────────────────────────────────────

/// Page counts keyed by file name; extracted ranges become `[a-b)` markers.
struct FakePdf {
    pages: HashMap<String, usize>,
}

impl FakePdf {
    fn with(name: &str, pages: usize) -> Arc<Self> {
        Arc::new(Self {
            pages: HashMap::from([(name.to_string(), pages)]),
        })
    }

    fn lookup(&self, path: &Path) -> Result<usize, ToolError> {
        let name = path.file_name().and_then(|n| n.to_str()).unwrap_or_default();
        self.pages.get(name).copied().ok_or_else(|| ToolError::UnreadablePdf {
            path: path.to_path_buf(),
            detail: "not a fake document".into(),
        })
    }
}

impl PdfBackend for FakePdf {
    fn page_count(&self, path: &Path) -> Result<usize, ToolError> {
        self.lookup(path)
    }

    fn extract_pages(&self, _source: &Path, pages: Range<usize>, dest: &Path) -> Result<(), ToolError> {
        std::fs::write(dest, format!("[{}-{})", pages.start, pages.end)).map_err(|e| {
            ToolError::ScratchWrite {
                path: dest.to_path_buf(),
                detail: e.to_string(),
            }
        })
    }

    fn page_texts(&self, path: &Path) -> Result<Vec<String>, ToolError> {
        Ok(vec![String::new(); self.lookup(path)?])
    }
}

/// Returns each document's file contents, finishing in reverse order.
#[derive(Default)]
struct FakeRemote {
    fail: bool,
    fatal: bool,
    drop_last: bool,
    seen: Mutex<Vec<PathBuf>>,
}

#[async_trait]
impl RemoteConverter for FakeRemote {
    fn name(&self) -> &'static str {
        "fake-remote"
    }

    async fn convert_batch(&self, documents: &[PathBuf]) -> ConversionOutcome<Vec<Fragment>> {
        self.seen.lock().unwrap().extend(documents.iter().cloned());
        if self.fail {
            return ConversionOutcome::Recoverable(ConverterError::Timeout {
                what: "job".into(),
                secs: 600,
            });
        }
        if self.fatal {
            return ConversionOutcome::Fatal(ConverterError::MalformedResponse("bad shape".into()));
        }

        let mut fragments = Vec::new();
        for (index, doc) in documents.iter().enumerate().rev() {
            // Later documents finish first.
            tokio::time::sleep(Duration::from_millis(2)).await;
            let markdown = match std::fs::read_to_string(doc) {
                Ok(text) if text.starts_with('[') => text,
                _ => "WHOLE".to_string(),
            };
            fragments.push(Fragment { index, markdown });
        }
        if self.drop_last {
            fragments.retain(|f| f.index + 1 != documents.len());
        }
        ConversionOutcome::Converted(fragments)
    }
}

struct FakeLocal {
    calls: AtomicUsize,
    seen: Mutex<Vec<PathBuf>>,
    fail: bool,
}

impl FakeLocal {
    fn new() -> Arc<Self> {
        Arc::new(Self {
            calls: AtomicUsize::new(0),
            seen: Mutex::new(Vec::new()),
            fail: false,
        })
    }

    fn failing() -> Arc<Self> {
        Arc::new(Self {
            calls: AtomicUsize::new(0),
            seen: Mutex::new(Vec::new()),
            fail: true,
        })
    }
}

impl LocalConverter for FakeLocal {
    fn name(&self) -> &'static str {
        "fake-local"
    }

    fn convert(&self, document: &Path) -> ConversionOutcome<String> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.seen.lock().unwrap().push(document.to_path_buf());
        if self.fail {
            return ConversionOutcome::Fatal(ConverterError::Document {
                path: document.to_path_buf(),
                detail: "corrupt xref table".into(),
            });
        }
        ConversionOutcome::Converted("LOCAL".to_string())
    }
}

fn document(dir: &tempfile::TempDir, name: &str) -> PathBuf {
    let path = dir.path().join(name);
    std::fs::write(&path, b"%PDF-1.7 fake").unwrap();
    path
}

fn orchestrator(
    pdf: Arc<FakePdf>,
    remote: Arc<FakeRemote>,
    local: Arc<FakeLocal>,
    chunk_pages: usize,
) -> Orchestrator {
    Orchestrator::new(pdf, remote, local, chunk_pages)
}

// ── Tests ────────────────────────────────────────────────────────────────

#[tokio::test]
async fn long_document_is_chunked_and_reassembled_in_page_order() {
    let dir = tempfile::tempdir().unwrap();
    let doc = document(&dir, "10k.pdf");
    let remote = Arc::new(FakeRemote::default());
    let local = FakeLocal::new();
    let orch = orchestrator(FakePdf::with("10k.pdf", 120), remote.clone(), local.clone(), 40);

    let conversion = orch.convert(&doc, Engine::Remote).await.unwrap();

    assert_eq!(conversion.strategy, Strategy::ChunkedRemote { chunks: 3 });
    assert_eq!(conversion.markdown, "[0-40)[40-80)[80-120)");
    assert_eq!(local.calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn uneven_tail_chunk_covers_remaining_pages() {
    let dir = tempfile::tempdir().unwrap();
    let doc = document(&dir, "q.pdf");
    let remote = Arc::new(FakeRemote::default());
    let orch = orchestrator(FakePdf::with("q.pdf", 41), remote, FakeLocal::new(), 40);

    let conversion = orch.convert(&doc, Engine::Remote).await.unwrap();
    assert_eq!(conversion.strategy, Strategy::ChunkedRemote { chunks: 2 });
    assert_eq!(conversion.markdown, "[0-40)[40-41)");
}

#[tokio::test]
async fn smaller_configured_chunks_are_honoured() {
    let dir = tempfile::tempdir().unwrap();
    let doc = document(&dir, "big.pdf");
    let remote = Arc::new(FakeRemote::default());
    let orch = orchestrator(FakePdf::with("big.pdf", 50), remote, FakeLocal::new(), 20);

    let conversion = orch.convert(&doc, Engine::Remote).await.unwrap();
    assert_eq!(conversion.strategy, Strategy::ChunkedRemote { chunks: 3 });
    assert_eq!(conversion.markdown, "[0-20)[20-40)[40-50)");
}

#[tokio::test]
async fn threshold_document_goes_direct() {
    let dir = tempfile::tempdir().unwrap();
    let doc = document(&dir, "8k.pdf");
    let remote = Arc::new(FakeRemote::default());
    let orch = orchestrator(FakePdf::with("8k.pdf", 40), remote.clone(), FakeLocal::new(), 40);

    let conversion = orch.convert(&doc, Engine::Remote).await.unwrap();

    assert_eq!(conversion.strategy, Strategy::DirectRemote);
    assert_eq!(conversion.markdown, "WHOLE");
    assert_eq!(*remote.seen.lock().unwrap(), vec![doc]);
}

#[tokio::test]
async fn scratch_is_removed_after_success() {
    let dir = tempfile::tempdir().unwrap();
    let doc = document(&dir, "10k.pdf");
    let remote = Arc::new(FakeRemote::default());
    let orch = orchestrator(FakePdf::with("10k.pdf", 90), remote.clone(), FakeLocal::new(), 40);

    orch.convert(&doc, Engine::Remote).await.unwrap();

    let seen = remote.seen.lock().unwrap().clone();
    assert_eq!(seen.len(), 3);
    for artifact in &seen {
        assert!(!artifact.exists(), "{} survived", artifact.display());
        assert!(!artifact.parent().unwrap().exists());
    }
    assert!(doc.exists(), "original document must be untouched");
}

#[tokio::test]
async fn remote_failure_falls_back_to_local_on_original_document() {
    let dir = tempfile::tempdir().unwrap();
    let doc = document(&dir, "10k.pdf");
    let remote = Arc::new(FakeRemote {
        fail: true,
        ..Default::default()
    });
    let local = FakeLocal::new();
    let orch = orchestrator(FakePdf::with("10k.pdf", 120), remote.clone(), local.clone(), 40);

    let conversion = orch.convert(&doc, Engine::Remote).await.unwrap();

    assert_eq!(conversion.strategy, Strategy::LocalFallback);
    assert_eq!(conversion.markdown, "LOCAL");
    assert_eq!(*local.seen.lock().unwrap(), vec![doc]);

    // Scratch is cleaned up on the failure path too.
    for artifact in remote.seen.lock().unwrap().iter() {
        assert!(!artifact.exists());
    }
}

#[tokio::test]
async fn fatal_remote_failure_still_falls_back() {
    let dir = tempfile::tempdir().unwrap();
    let doc = document(&dir, "a.pdf");
    let remote = Arc::new(FakeRemote {
        fatal: true,
        ..Default::default()
    });
    let local = FakeLocal::new();
    let orch = orchestrator(FakePdf::with("a.pdf", 12), remote.clone(), local.clone(), 40);

    let conversion = orch.convert(&doc, Engine::Remote).await.unwrap();

    assert_eq!(conversion.strategy, Strategy::LocalFallback);
    assert_eq!(conversion.markdown, "LOCAL");
    assert_eq!(local.calls.load(Ordering::SeqCst), 1);
    assert_eq!(remote.seen.lock().unwrap().len(), 1);
}

#[tokio::test]
async fn fatal_remote_and_failing_local_report_both_causes() {
    let dir = tempfile::tempdir().unwrap();
    let doc = document(&dir, "a.pdf");
    let remote = Arc::new(FakeRemote {
        fatal: true,
        ..Default::default()
    });
    let orch = orchestrator(FakePdf::with("a.pdf", 90), remote, FakeLocal::failing(), 40);

    let msg = orch.convert(&doc, Engine::Remote).await.unwrap_err().to_string();
    assert!(msg.contains("bad shape"), "got: {msg}");
    assert!(msg.contains("corrupt xref table"), "got: {msg}");
    assert!(!msg.contains("not attempted"), "got: {msg}");
}

#[tokio::test]
async fn missing_fragment_falls_back() {
    let dir = tempfile::tempdir().unwrap();
    let doc = document(&dir, "10k.pdf");
    let remote = Arc::new(FakeRemote {
        drop_last: true,
        ..Default::default()
    });
    let local = FakeLocal::new();
    let orch = orchestrator(FakePdf::with("10k.pdf", 100), remote, local.clone(), 40);

    let conversion = orch.convert(&doc, Engine::Remote).await.unwrap();
    assert_eq!(conversion.strategy, Strategy::LocalFallback);
    assert_eq!(local.calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn unreadable_page_count_falls_back() {
    let dir = tempfile::tempdir().unwrap();
    let doc = document(&dir, "mystery.pdf");
    let remote = Arc::new(FakeRemote::default());
    let local = FakeLocal::new();
    // The fake backend only knows "other.pdf".
    let orch = orchestrator(FakePdf::with("other.pdf", 3), remote.clone(), local, 40);

    let conversion = orch.convert(&doc, Engine::Remote).await.unwrap();
    assert_eq!(conversion.strategy, Strategy::LocalFallback);
    assert!(remote.seen.lock().unwrap().is_empty());
}

#[tokio::test]
async fn local_engine_never_touches_remote() {
    let dir = tempfile::tempdir().unwrap();
    let doc = document(&dir, "10k.pdf");
    let remote = Arc::new(FakeRemote::default());
    let local = FakeLocal::new();
    let orch = orchestrator(FakePdf::with("10k.pdf", 500), remote.clone(), local.clone(), 40);

    let conversion = orch.convert(&doc, Engine::Local).await.unwrap();

    assert_eq!(conversion.strategy, Strategy::Local);
    assert!(remote.seen.lock().unwrap().is_empty());
    assert_eq!(*local.seen.lock().unwrap(), vec![doc]);
}

#[tokio::test]
async fn both_strategies_failing_reports_both_causes() {
    let dir = tempfile::tempdir().unwrap();
    let doc = document(&dir, "10k.pdf");
    let remote = Arc::new(FakeRemote {
        fail: true,
        ..Default::default()
    });
    let orch = orchestrator(FakePdf::with("10k.pdf", 12), remote, FakeLocal::failing(), 40);

    let err = orch.convert(&doc, Engine::Remote).await.unwrap_err();
    let msg = err.to_string();
    assert!(matches!(err, ToolError::ConversionFailed { .. }));
    assert!(msg.contains("timed out after 600s"), "got: {msg}");
    assert!(msg.contains("corrupt xref table"), "got: {msg}");
}

#[tokio::test]
async fn missing_input_is_reported_without_conversion() {
    let dir = tempfile::tempdir().unwrap();
    let remote = Arc::new(FakeRemote::default());
    let local = FakeLocal::new();
    let orch = orchestrator(FakePdf::with("gone.pdf", 3), remote.clone(), local.clone(), 40);

    let err = orch
        .convert(&dir.path().join("gone.pdf"), Engine::Remote)
        .await
        .unwrap_err();
    assert!(matches!(err, ToolError::FileNotFound { .. }));
    assert!(remote.seen.lock().unwrap().is_empty());
    assert_eq!(local.calls.load(Ordering::SeqCst), 0);
}
