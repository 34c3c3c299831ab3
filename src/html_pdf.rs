//! HTML → PDF through headless Chromium.
//!
//! The page is loaded from a `file://` URL and printed with `screen` media
//! emulation so the PDF matches what a browser window shows rather than the
//! site's print stylesheet. headless_chrome is synchronous; the whole
//! browser session runs on a blocking thread.

use crate::error::ToolError;
use headless_chrome::protocol::cdp::Emulation;
use headless_chrome::{Browser, LaunchOptions};
use reqwest::Url;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, info};

/// Per-step browser deadline (launch, navigation, print).
const BROWSER_TIMEOUT: Duration = Duration::from_secs(60);

/// Prints local HTML files to PDF.
#[derive(Debug, Clone)]
pub struct HtmlRenderer {
    sandbox: bool,
}

impl Default for HtmlRenderer {
    fn default() -> Self {
        Self::new(true)
    }
}

impl HtmlRenderer {
    /// `sandbox = false` passes `--no-sandbox`, needed when running as root
    /// in a container.
    pub fn new(sandbox: bool) -> Self {
        Self { sandbox }
    }

    /// Print `source` to `dest`, creating `dest`'s parent directories.
    pub async fn render(&self, source: &Path, dest: &Path) -> Result<PathBuf, ToolError> {
        if !source.is_file() {
            return Err(ToolError::FileNotFound {
                path: source.to_path_buf(),
            });
        }
        let absolute = tokio::fs::canonicalize(source)
            .await
            .map_err(|e| ToolError::Internal(format!("resolve {}: {e}", source.display())))?;
        let url = Url::from_file_path(&absolute)
            .map_err(|_| ToolError::Browser(format!("cannot build file URL for {}", absolute.display())))?;

        if let Some(parent) = dest.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|source| ToolError::OutputWriteFailed {
                    path: parent.to_path_buf(),
                    source,
                })?;
        }

        let sandbox = self.sandbox;
        let pdf = tokio::task::spawn_blocking(move || print_to_pdf(&url, sandbox))
            .await
            .map_err(|e| ToolError::Internal(format!("browser task failed: {e}")))??;

        tokio::fs::write(dest, &pdf)
            .await
            .map_err(|source| ToolError::OutputWriteFailed {
                path: dest.to_path_buf(),
                source,
            })?;
        info!(
            "Rendered {} → {} ({} bytes)",
            source.display(),
            dest.display(),
            pdf.len()
        );
        Ok(dest.to_path_buf())
    }
}

fn print_to_pdf(url: &Url, sandbox: bool) -> Result<Vec<u8>, ToolError> {
    let options = LaunchOptions::default_builder()
        .headless(true)
        .sandbox(sandbox)
        .idle_browser_timeout(BROWSER_TIMEOUT)
        .build()
        .map_err(|e| browser_err("launch options", e))?;
    let browser = Browser::new(options).map_err(|e| browser_err("failed to start Chrome", e))?;
    let tab = browser
        .new_tab()
        .map_err(|e| browser_err("failed to open tab", e))?;
    tab.set_default_timeout(BROWSER_TIMEOUT);

    debug!("Navigating to {url}");
    tab.navigate_to(url.as_str())
        .map_err(|e| browser_err("navigation", e))?
        .wait_until_navigated()
        .map_err(|e| browser_err("page load", e))?;

    tab.call_method(Emulation::SetEmulatedMedia {
        media: Some("screen".to_string()),
        features: None,
    })
    .map_err(|e| browser_err("media emulation", e))?;

    tab.print_to_pdf(None)
        .map_err(|e| browser_err("print", e))
}

fn browser_err(stage: &str, e: impl std::fmt::Display) -> ToolError {
    ToolError::Browser(format!("{stage}: {e}"))
}
