//! # good-filings
//!
//! An MCP tool server for working with company filings: fetch a filing from
//! SEC EDGAR, print it to PDF, convert the PDF to Markdown, and read the
//! (often multi-megabyte) result back in fixed-size segments.
//!
//! ## Conversion pipeline
//!
//! ```text
//! read_as_markdown(path, engine)
//!  │
//!  ├─ Orchestrator   page count → direct or chunked remote, else local
//!  │   ├─ Chunker    ≤ 40-page standalone PDFs in a private scratch dir
//!  │   ├─ Remote     LlamaParse jobs or vision-LLM page transcription,
//!  │   │             run in parallel, reassembled by submission index
//!  │   └─ Local      pdfium text layer (fallback, or engine = "local")
//!  │
//!  └─ SegmentCache   markdown_{n} → 100 000-character windows
//! ```
//!
//! ## Library use
//!
//! ```rust,no_run
//! use good_filings::{Engine, Orchestrator, ConversionConfig, SegmentCache};
//! use std::path::Path;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let orchestrator = Orchestrator::from_config(&ConversionConfig::default())?;
//!     let conversion = orchestrator.convert(Path::new("pdf/10k.pdf"), Engine::Remote).await?;
//!     eprintln!("converted via {}", conversion.strategy);
//!
//!     let cache = SegmentCache::new();
//!     let stored = cache.store(conversion.markdown);
//!     let first = cache.fetch(&stored.id, 0)?;
//!     println!("{}", first.segment);
//!     Ok(())
//! }
//! ```
//!
//! ## Feature Flags
//!
//! | Feature | Default | Description |
//! |---------|---------|-------------|
//! | `cli`   | on      | Enables the `good-filings` binary (clap + anyhow + tracing-subscriber) |

// ── Modules ──────────────────────────────────────────────────────────────

pub mod cache;
pub mod chunker;
pub mod config;
pub mod converter;
pub mod error;
pub mod filings;
pub mod html_pdf;
pub mod markdown;
pub mod orchestrator;
pub mod pdf;
pub mod prompts;
pub mod server;

// ── Re-exports ───────────────────────────────────────────────────────────

pub use cache::{Segment, SegmentCache, SegmentError, Stored};
pub use chunker::{plan_chunks, split, Chunk, ChunkSet};
pub use config::{
    ConversionConfig, ConversionConfigBuilder, Engine, FilingsConfig, RemoteBackend, ServerConfig,
};
pub use converter::{Fragment, LocalConverter, RemoteConverter, ServiceResult};
pub use error::{ConversionOutcome, ConverterError, ToolError};
pub use filings::{FilingRecord, FilingRequest, FilingType, FilingsClient};
pub use html_pdf::HtmlRenderer;
pub use orchestrator::{Conversion, Orchestrator, Strategy};
pub use pdf::{PdfBackend, PdfiumBackend};
pub use server::{serve_stdio, FilingsServer};
