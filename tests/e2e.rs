//! End-to-end tests against the real collaborators: pdfium, headless
//! Chromium, SEC EDGAR and (optionally) LlamaParse.
//!
//! Gated behind `E2E_ENABLED` so they never run in CI by accident.
//!
//! Run with:
//!   E2E_ENABLED=1 SEC_USER_AGENT="Jane Doe jane@example.com" \
//!     cargo test --test e2e -- --nocapture --test-threads=1
//!
//! The LlamaParse test additionally needs `LLAMA_CLOUD_API_KEY`.

use good_filings::filings::CikInput;
use good_filings::{
    ConversionConfig, Engine, FilingRequest, FilingType, FilingsClient, FilingsConfig,
    HtmlRenderer, Orchestrator, SegmentCache, Strategy,
};
use std::path::Path;

// ── Test helpers ─────────────────────────────────────────────────────────────

/// Skip this test unless E2E_ENABLED is set (and every listed variable too).
macro_rules! e2e_skip_unless_ready {
    ($($var:literal),*) => {{
        if std::env::var("E2E_ENABLED").is_err() {
            println!("SKIP — set E2E_ENABLED=1 to run e2e tests");
            return;
        }
        $(
            if std::env::var($var).map(|v| v.trim().is_empty()).unwrap_or(true) {
                println!("SKIP — {} is not set", $var);
                return;
            }
        )*
    }};
}

fn sandbox() -> bool {
    std::env::var("E2E_NO_SANDBOX").is_err()
}

const SAMPLE_HTML: &str = r#"<!DOCTYPE html>
<html><head><title>Sample</title>
<style>@media print { .screen-only { display: none; } }</style></head>
<body>
<h1>Quarterly Report</h1>
<p class="screen-only">Net revenue increased 12 percent.</p>
<table><tr><th>Segment</th><th>Revenue</th></tr><tr><td>Cloud</td><td>4,210</td></tr></table>
</body></html>"#;

async fn print_sample(workspace: &Path) -> std::path::PathBuf {
    let html = workspace.join("html/sample.htm");
    std::fs::create_dir_all(html.parent().unwrap()).unwrap();
    std::fs::write(&html, SAMPLE_HTML).unwrap();

    HtmlRenderer::new(sandbox())
        .render(&html, &workspace.join("pdf/sample.pdf"))
        .await
        .expect("html_to_pdf should succeed")
}

// ── HTML → PDF → Markdown (Chromium + pdfium, no network) ────────────────────

#[tokio::test(flavor = "multi_thread")]
async fn test_print_then_convert_locally() {
    e2e_skip_unless_ready!();
    let workspace = tempfile::tempdir().unwrap();

    let pdf = print_sample(workspace.path()).await;
    assert!(pdf.is_file());
    assert!(std::fs::read(&pdf).unwrap().starts_with(b"%PDF"));

    let orchestrator = Orchestrator::from_config(&ConversionConfig::default()).unwrap();
    let conversion = orchestrator.convert(&pdf, Engine::Local).await.unwrap();

    assert_eq!(conversion.strategy, Strategy::Local);
    assert!(conversion.markdown.contains("Quarterly Report"));
    // Screen media emulation keeps content hidden by the print stylesheet.
    assert!(
        conversion.markdown.contains("Net revenue increased"),
        "got: {}",
        conversion.markdown
    );
    println!("{}", conversion.markdown);
}

#[tokio::test(flavor = "multi_thread")]
async fn test_converted_markdown_pages_through_cache() {
    e2e_skip_unless_ready!();
    let workspace = tempfile::tempdir().unwrap();
    let pdf = print_sample(workspace.path()).await;

    let orchestrator = Orchestrator::from_config(&ConversionConfig::default()).unwrap();
    let markdown = orchestrator.convert(&pdf, Engine::Local).await.unwrap().markdown;

    let cache = SegmentCache::with_segment_length(16);
    let stored = cache.store(markdown.clone());
    let mut offset = 0;
    let mut rebuilt = String::new();
    loop {
        let segment = cache.fetch(&stored.id, offset).unwrap();
        rebuilt.push_str(&segment.segment);
        match segment.next_offset {
            Some(next) => offset = next,
            None => break,
        }
    }
    assert_eq!(rebuilt, markdown);
}

// ── LlamaParse ───────────────────────────────────────────────────────────────

#[tokio::test(flavor = "multi_thread")]
async fn test_remote_conversion_via_llama_cloud() {
    e2e_skip_unless_ready!("LLAMA_CLOUD_API_KEY");
    let workspace = tempfile::tempdir().unwrap();
    let pdf = print_sample(workspace.path()).await;

    let orchestrator = Orchestrator::from_config(&ConversionConfig::default()).unwrap();
    let conversion = orchestrator.convert(&pdf, Engine::Remote).await.unwrap();

    assert_eq!(conversion.strategy, Strategy::DirectRemote);
    assert!(conversion.markdown.contains("Cloud"));
    println!(
        "remote: {} chars in {:?}",
        conversion.markdown.len(),
        conversion.elapsed
    );
}

// ── SEC EDGAR ────────────────────────────────────────────────────────────────

#[tokio::test(flavor = "multi_thread")]
async fn test_download_latest_10k() {
    e2e_skip_unless_ready!("SEC_USER_AGENT");
    let workspace = tempfile::tempdir().unwrap();
    let config = FilingsConfig::from_env();

    let request = FilingRequest::validate(
        &CikInput::Text("0001018724".into()),
        2024,
        FilingType::Form10K,
        "html/amzn",
        &config,
    )
    .unwrap();
    let client = FilingsClient::new(config, workspace.path()).unwrap();
    let downloaded = client.download(&request).await.expect("download should succeed");

    assert!(downloaded.primary_document.starts_with("html/amzn/"));
    let saved = workspace.path().join(&downloaded.primary_document);
    let body = std::fs::read_to_string(&saved).unwrap();
    assert!(body.to_ascii_lowercase().contains("<html"), "not HTML: {}", saved.display());
}

#[tokio::test(flavor = "multi_thread")]
async fn test_download_print_and_convert_filing() {
    e2e_skip_unless_ready!("SEC_USER_AGENT");
    let workspace = tempfile::tempdir().unwrap();
    let config = FilingsConfig::from_env();

    let request =
        FilingRequest::validate(&CikInput::Number(320193), 2024, FilingType::Form8K, "html", &config)
            .unwrap();
    let client = FilingsClient::new(config, workspace.path()).unwrap();
    let downloaded = client.download(&request).await.unwrap();

    let html = workspace.path().join(&downloaded.primary_document);
    let pdf = HtmlRenderer::new(sandbox())
        .render(&html, &workspace.path().join("pdf/8k.pdf"))
        .await
        .unwrap();

    let orchestrator = Orchestrator::from_config(&ConversionConfig::default()).unwrap();
    let conversion = orchestrator.convert(&pdf, Engine::Local).await.unwrap();
    assert!(!conversion.markdown.trim().is_empty());
    assert!(conversion.markdown.to_ascii_uppercase().contains("8-K"));
}
