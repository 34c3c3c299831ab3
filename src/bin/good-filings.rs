//! MCP server binary for good-filings.
//!
//! Maps CLI flags (each with an environment fallback) to `ServerConfig`,
//! makes sure pdfium is available, then serves the tools over stdio.
//! stdout carries MCP frames only; every log line goes to stderr.

use anyhow::{Context, Result};
use clap::Parser;
use good_filings::{
    serve_stdio, ConversionConfig, FilingsConfig, FilingsServer, RemoteBackend, ServerConfig,
};
use std::io;
use std::path::PathBuf;
use tracing::info;
use tracing_subscriber::EnvFilter;

const AFTER_HELP: &str = r#"TOOLS:
  read_as_markdown       PDF → Markdown (chunked remote conversion, local fallback)
  get_markdown_segment   read cached Markdown 100000 characters at a time
  html_to_pdf            local HTML → PDF through headless Chromium
  download_sec_filing    latest 8-K / 10-Q / 10-K / DEF 14A primary document from EDGAR

CLIENT CONFIGURATION (e.g. claude_desktop_config.json):
  {
    "mcpServers": {
      "good-filings": {
        "command": "good-filings",
        "args": ["--workspace", "/path/to/project"],
        "env": { "LLAMA_CLOUD_API_KEY": "llx-...", "SEC_USER_AGENT": "Jane Doe jane@example.com" }
      }
    }
  }

ENVIRONMENT VARIABLES:
  LLAMA_CLOUD_API_KEY     LlamaParse key for the default remote backend
  OPENAI_API_KEY          Vision backend provider key (also ANTHROPIC_API_KEY, GEMINI_API_KEY)
  EDGEQUAKE_LLM_PROVIDER  Vision backend provider override
  EDGEQUAKE_MODEL         Vision backend model override
  SEC_USER_AGENT          User-Agent for EDGAR requests (SEC asks for a contact address)
  PDFIUM_LIB_PATH         Path to an existing libpdfium; skips auto-download
  PDFIUM_AUTO_CACHE_DIR   Override the pdfium cache directory
  RUST_LOG                Log filter; overrides --verbose / --quiet
"#;

/// MCP server: filing retrieval, HTML→PDF and chunked PDF→Markdown conversion.
#[derive(Parser, Debug)]
#[command(
    name = "good-filings",
    version,
    about = "MCP tool server for SEC filings: download, print to PDF, convert to Markdown",
    color = clap::ColorChoice::Auto,
    after_long_help = AFTER_HELP
)]
struct Cli {
    /// Directory every tool path is resolved against. Default: current directory.
    #[arg(short, long, env = "GOOD_FILINGS_WORKSPACE")]
    workspace: Option<PathBuf>,

    /// Remote conversion backend: llama-cloud or vision.
    #[arg(long, env = "GOOD_FILINGS_REMOTE_BACKEND", default_value = "llama-cloud")]
    remote_backend: RemoteBackend,

    /// Pages per chunk for documents over 40 pages (1–40).
    #[arg(long, env = "GOOD_FILINGS_CHUNK_PAGES", default_value_t = 40)]
    chunk_pages: usize,

    /// Documents (chunks) converted concurrently by the remote backend.
    #[arg(long, env = "GOOD_FILINGS_BATCH_CONCURRENCY", default_value_t = 8)]
    batch_concurrency: usize,

    /// LlamaParse API key.
    #[arg(long, env = "LLAMA_CLOUD_API_KEY", hide_env_values = true)]
    llama_api_key: Option<String>,

    /// LlamaParse base URL.
    #[arg(long, env = "LLAMA_CLOUD_BASE_URL", default_value = "https://api.cloud.llamaindex.ai")]
    llama_base_url: String,

    /// Per-request timeout for remote calls, in seconds.
    #[arg(long, env = "GOOD_FILINGS_API_TIMEOUT", default_value_t = 60)]
    api_timeout: u64,

    /// Upper bound for one remote conversion job, in seconds.
    #[arg(long, env = "GOOD_FILINGS_JOB_TIMEOUT", default_value_t = 600)]
    job_timeout: u64,

    /// Vision backend: model ID (e.g. gpt-4.1-nano, gpt-4.1).
    #[arg(long, env = "EDGEQUAKE_MODEL")]
    model: Option<String>,

    /// Vision backend: provider (openai, anthropic, gemini, ollama, azure).
    #[arg(long, env = "EDGEQUAKE_LLM_PROVIDER")]
    provider: Option<String>,

    /// Vision backend: concurrent page calls per document.
    #[arg(long, env = "GOOD_FILINGS_PAGE_CONCURRENCY", default_value_t = 10)]
    page_concurrency: usize,

    /// Vision backend: retries per page.
    #[arg(long, env = "GOOD_FILINGS_MAX_RETRIES", default_value_t = 3)]
    max_retries: u32,

    /// Run Chromium without its sandbox (needed as root in containers).
    #[arg(long, env = "GOOD_FILINGS_NO_SANDBOX")]
    no_sandbox: bool,

    /// Enable DEBUG-level tracing logs.
    #[arg(short, long, env = "GOOD_FILINGS_VERBOSE")]
    verbose: bool,

    /// Log errors only.
    #[arg(short, long, env = "GOOD_FILINGS_QUIET")]
    quiet: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let filter = if cli.verbose {
        "debug"
    } else if cli.quiet {
        "error"
    } else {
        "info"
    };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter)),
        )
        .with_writer(io::stderr)
        .with_ansi(false)
        .init();

    // First run downloads ~30 MB; do it before the client starts calling tools.
    let pdfium = tokio::task::block_in_place(pdfium_auto::ensure_library)
        .context("Failed to locate or download the PDFium library")?;
    info!("PDFium: {}", pdfium.path().display());

    let config = build_config(&cli)?;
    let server = FilingsServer::new(config).context("Failed to initialise tool server")?;
    serve_stdio(server).await.context("MCP server failed")?;
    Ok(())
}

/// Map CLI args to `ServerConfig`.
fn build_config(cli: &Cli) -> Result<ServerConfig> {
    let workspace = match cli.workspace {
        Some(ref dir) => dir.clone(),
        None => std::env::current_dir().context("Cannot determine current directory")?,
    };
    let workspace = workspace
        .canonicalize()
        .with_context(|| format!("Workspace {} is not accessible", workspace.display()))?;

    let mut builder = ConversionConfig::builder()
        .remote_backend(cli.remote_backend)
        .chunk_pages(cli.chunk_pages)
        .batch_concurrency(cli.batch_concurrency)
        .llama_base_url(&cli.llama_base_url)
        .api_timeout_secs(cli.api_timeout)
        .job_timeout_secs(cli.job_timeout)
        .page_concurrency(cli.page_concurrency)
        .max_retries(cli.max_retries);
    if let Some(ref key) = cli.llama_api_key {
        builder = builder.llama_api_key(key);
    }
    if let Some(ref model) = cli.model {
        builder = builder.model(model);
    }
    if let Some(ref provider) = cli.provider {
        builder = builder.provider_name(provider);
    }
    let conversion = builder.build().context("Invalid conversion settings")?;

    Ok(ServerConfig {
        workspace_root: workspace,
        conversion,
        filings: FilingsConfig::from_env(),
        browser_sandbox: !cli.no_sandbox,
    })
}
