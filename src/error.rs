//! Error types for the good-filings library.
//!
//! Two layers of failure exist, mirroring the two layers of the conversion
//! pipeline:
//!
//! * [`ConverterError`]: one conversion *strategy* failed (remote service
//!   timed out, local extraction hit a corrupt page). It is wrapped in a
//!   [`ConversionOutcome`] whose variant says whether the failure is
//!   transient or final for that strategy. The orchestrator falls back to the
//!   local converter after either kind of remote failure.
//!
//! * [`ToolError`]: the tool invocation as a whole cannot produce a result
//!   (bad input, both strategies failed, filing not found). The server turns
//!   these into structured error payloads; nothing here ever terminates the
//!   process.

use std::path::PathBuf;
use thiserror::Error;

/// All caller-facing errors returned by the library.
#[derive(Debug, Error)]
pub enum ToolError {
    // ── Input errors ──────────────────────────────────────────────────────
    /// Input file was not found at the given path.
    #[error("File not found: {path}. Please check the file path.")]
    FileNotFound { path: PathBuf },

    /// Unknown conversion engine name.
    #[error("Unknown engine '{engine}': expected \"remote\" or \"local\"")]
    InvalidEngine { engine: String },

    /// Filing year outside the supported window.
    #[error("year must be between {min} and {max}.")]
    YearOutOfRange { year: i64, min: i32, max: i32 },

    /// Output directory is not inside the designated subtree.
    #[error("output_dir_path must be \"{root}\" or \"{root}/...\" format.")]
    OutputDirNotAllowed { path: String, root: String },

    /// CIK could not be interpreted as a number.
    #[error("CIK must be a numeric string or integer.")]
    InvalidCik { cik: String },

    // ── PDF errors ────────────────────────────────────────────────────────
    /// The document could not be opened or parsed.
    #[error("Cannot read PDF '{path}': {detail}")]
    UnreadablePdf { path: PathBuf, detail: String },

    /// The document opened but contains no pages.
    #[error("PDF '{path}' has no pages")]
    EmptyDocument { path: PathBuf },

    /// A chunk scratch area or chunk artifact could not be written.
    #[error("Failed to write chunk scratch data at '{path}': {detail}")]
    ScratchWrite { path: PathBuf, detail: String },

    // ── Conversion errors ─────────────────────────────────────────────────
    /// Every applicable strategy failed.
    #[error("Conversion of '{path}' failed: {}", describe_failures(.remote.as_deref(), .local))]
    ConversionFailed {
        path: PathBuf,
        remote: Option<String>,
        local: String,
    },

    // ── HTML rendering ────────────────────────────────────────────────────
    /// The headless browser could not be launched or failed to print.
    #[error("Browser rendering failed: {0}")]
    Browser(String),

    // ── Filing retrieval ──────────────────────────────────────────────────
    /// The submissions index could not be fetched.
    #[error("Failed to fetch data from SEC server. {0}")]
    FilingIndexFetch(String),

    /// The submissions index was fetched but had an unexpected shape.
    #[error("Unexpected SEC submissions format: {0}")]
    FilingIndexFormat(String),

    /// No filing matched the requested type and year.
    #[error("No filing found for CIK={cik}, year={year}, filing_type={filing_type}.")]
    NoFilingFound {
        cik: u64,
        year: i32,
        filing_type: String,
    },

    /// The primary document download failed.
    #[error("Failed to download file. {0}")]
    FilingDownload(String),

    // ── I/O errors ────────────────────────────────────────────────────────
    /// Could not create or write an output file.
    #[error("Failed to write output file '{path}': {source}")]
    OutputWriteFailed {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    // ── Config errors ─────────────────────────────────────────────────────
    /// Builder validation failed.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    // ── Pdfium binding errors ─────────────────────────────────────────────
    /// Could not bind to a pdfium library.
    #[error(
        "Failed to bind to pdfium library: {0}\n\
Set PDFIUM_LIB_PATH=/path/to/libpdfium to use an existing copy."
    )]
    PdfiumBindingFailed(String),

    // ── Catch-all ─────────────────────────────────────────────────────────
    /// Unexpected internal error.
    #[error("Internal error: {0}")]
    Internal(String),
}

fn describe_failures(remote: Option<&str>, local: &str) -> String {
    match remote {
        Some(remote) => format!("remote: {remote}; local fallback: {local}"),
        None => format!("local: {local}"),
    }
}

/// Failure of a single conversion strategy.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ConverterError {
    /// The service could not be reached or the connection broke.
    #[error("transport error: {0}")]
    Transport(String),

    /// A request or job exceeded its deadline.
    #[error("timed out after {secs}s: {what}")]
    Timeout { what: String, secs: u64 },

    /// The service answered with a non-success status.
    #[error("service returned HTTP {status}: {detail}")]
    Status { status: u16, detail: String },

    /// The service reported that the job failed.
    #[error("job {job_id} ended with status {status}")]
    JobFailed { job_id: String, status: String },

    /// The response could not be interpreted.
    #[error("malformed service response: {0}")]
    MalformedResponse(String),

    /// Credentials or provider setup are missing.
    #[error("converter not configured: {0}")]
    NotConfigured(String),

    /// The document itself could not be processed.
    #[error("document '{path}' could not be converted: {detail}")]
    Document { path: PathBuf, detail: String },

    /// Preparing the input (page count, chunking) failed.
    #[error("preparation failed: {0}")]
    Preparation(String),
}

/// Result of running one conversion strategy.
///
/// Distinguishes "try something else" from "nothing else will help" without
/// unwinding through a broad error catch.
#[derive(Debug)]
#[must_use]
pub enum ConversionOutcome<T> {
    /// The strategy produced output.
    Converted(T),
    /// The strategy failed, but an alternate strategy may still succeed.
    Recoverable(ConverterError),
    /// The strategy failed and retrying it will not help.
    Fatal(ConverterError),
}

impl<T> ConversionOutcome<T> {
    /// Lift a plain result, classifying every error as recoverable.
    pub fn recoverable(result: Result<T, ConverterError>) -> Self {
        match result {
            Ok(v) => ConversionOutcome::Converted(v),
            Err(e) => ConversionOutcome::Recoverable(e),
        }
    }

    /// Lift a plain result, classifying every error as fatal.
    pub fn fatal(result: Result<T, ConverterError>) -> Self {
        match result {
            Ok(v) => ConversionOutcome::Converted(v),
            Err(e) => ConversionOutcome::Fatal(e),
        }
    }

    pub fn map<U>(self, f: impl FnOnce(T) -> U) -> ConversionOutcome<U> {
        match self {
            ConversionOutcome::Converted(v) => ConversionOutcome::Converted(f(v)),
            ConversionOutcome::Recoverable(e) => ConversionOutcome::Recoverable(e),
            ConversionOutcome::Fatal(e) => ConversionOutcome::Fatal(e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn conversion_failed_mentions_both_causes() {
        let e = ToolError::ConversionFailed {
            path: "pdf/a.pdf".into(),
            remote: Some("timed out".into()),
            local: "corrupt xref".into(),
        };
        let msg = e.to_string();
        assert!(msg.contains("remote: timed out"), "got: {msg}");
        assert!(msg.contains("local fallback: corrupt xref"), "got: {msg}");
    }

    #[test]
    fn conversion_failed_local_only() {
        let e = ToolError::ConversionFailed {
            path: "pdf/a.pdf".into(),
            remote: None,
            local: "boom".into(),
        };
        assert!(e.to_string().ends_with("local: boom"));
    }

    #[test]
    fn filing_messages_carry_parameters() {
        let e = ToolError::NoFilingFound {
            cik: 1018724,
            year: 2024,
            filing_type: "10-K".into(),
        };
        assert_eq!(
            e.to_string(),
            "No filing found for CIK=1018724, year=2024, filing_type=10-K."
        );
        let e = ToolError::YearOutOfRange {
            year: 2019,
            min: 2021,
            max: 2025,
        };
        assert_eq!(e.to_string(), "year must be between 2021 and 2025.");
    }

    #[test]
    fn outcome_classification() {
        let ok: ConversionOutcome<u8> = ConversionOutcome::fatal(Ok(1));
        assert!(matches!(ok, ConversionOutcome::Converted(1)));

        let soft = ConversionOutcome::<u8>::recoverable(Err(ConverterError::Transport("reset".into())));
        assert!(matches!(soft, ConversionOutcome::Recoverable(_)));

        let hard = ConversionOutcome::<u8>::fatal(Err(ConverterError::Preparation("x".into())));
        assert!(matches!(hard.map(|v| v + 1), ConversionOutcome::Fatal(_)));
    }
}
