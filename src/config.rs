//! Configuration types for the tool server.
//!
//! [`ServerConfig`] aggregates three independent parts:
//!
//! * [`ConversionConfig`]: chunking, remote backend and fallback knobs for
//!   `read_as_markdown`, built through [`ConversionConfigBuilder`].
//! * [`FilingsConfig`]: EDGAR endpoints, validation bounds and pacing for
//!   `download_sec_filing`.
//! * the workspace root that every tool path is resolved against, plus the
//!   browser sandbox switch for `html_to_pdf`.

use crate::error::ToolError;
use edgequake_llm::LLMProvider;
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::Arc;

/// Hard ceiling on pages per chunk; larger requests are clamped to it.
pub const MAX_CHUNK_PAGES: usize = 40;

/// Documents with more pages than this are chunked before remote submission.
pub const CHUNK_THRESHOLD_PAGES: usize = 40;

/// Characters returned per `get_markdown_segment` call.
pub const SEGMENT_LENGTH: usize = 100_000;

/// Which conversion strategy the caller asked for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Engine {
    /// Remote batch service with local fallback. (default)
    #[default]
    Remote,
    /// Local in-process conversion only; no chunking, no threshold.
    Local,
}

impl FromStr for Engine {
    type Err = ToolError;

    /// Accepts `remote` / `local` and the older names `llama-cloud` / `docling`.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "" | "remote" | "llama-cloud" | "llamacloud" => Ok(Engine::Remote),
            "local" | "docling" => Ok(Engine::Local),
            other => Err(ToolError::InvalidEngine {
                engine: other.to_string(),
            }),
        }
    }
}

impl fmt::Display for Engine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Engine::Remote => "remote",
            Engine::Local => "local",
        })
    }
}

/// Which service backs the remote strategy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RemoteBackend {
    /// LlamaParse REST API. (default)
    #[default]
    LlamaCloud,
    /// Page images transcribed by a vision LLM.
    Vision,
}

impl FromStr for RemoteBackend {
    type Err = ToolError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "llama-cloud" | "llamacloud" | "llamaparse" => Ok(RemoteBackend::LlamaCloud),
            "vision" | "vlm" => Ok(RemoteBackend::Vision),
            other => Err(ToolError::InvalidConfig(format!(
                "unknown remote backend '{other}' (expected llama-cloud or vision)"
            ))),
        }
    }
}

/// Configuration for the conversion pipeline.
///
/// Built via [`ConversionConfig::builder()`] or using
/// [`ConversionConfig::default()`].
///
/// # Example
/// ```rust
/// use good_filings::ConversionConfig;
///
/// let config = ConversionConfig::builder()
///     .chunk_pages(25)
///     .batch_concurrency(4)
///     .build()
///     .unwrap();
/// assert_eq!(config.chunk_pages, 25);
/// ```
#[derive(Clone)]
pub struct ConversionConfig {
    /// Pages per chunk for oversized documents. Range 1–40. Default: 40.
    pub chunk_pages: usize,

    /// Service behind the remote strategy. Default: [`RemoteBackend::LlamaCloud`].
    pub remote_backend: RemoteBackend,

    /// Maximum documents (chunks) the remote backend processes at once. Default: 8.
    pub batch_concurrency: usize,

    /// LlamaParse API key. Falls back to `LLAMA_CLOUD_API_KEY` when `None`.
    pub llama_api_key: Option<String>,

    /// LlamaParse base URL. Default: `https://api.cloud.llamaindex.ai`.
    pub llama_base_url: String,

    /// Per-HTTP-request timeout in seconds. Default: 60.
    pub api_timeout_secs: u64,

    /// Upper bound on how long one remote job may take, in seconds. Default: 600.
    ///
    /// A chunk of 40 dense pages typically finishes in under two minutes; the
    /// generous bound only exists so a stuck job cannot hang the tool call.
    pub job_timeout_secs: u64,

    /// Delay between job status polls in milliseconds. Default: 1000.
    pub poll_interval_ms: u64,

    /// Vision backend: model identifier. `None` uses the provider default.
    pub model: Option<String>,

    /// Vision backend: provider name (`openai`, `anthropic`, `gemini`, ...).
    pub provider_name: Option<String>,

    /// Vision backend: pre-constructed provider; takes precedence over `provider_name`.
    pub provider: Option<Arc<dyn LLMProvider>>,

    /// Vision backend: longest rendered page edge in pixels. Default: 2000.
    pub max_rendered_pixels: u32,

    /// Vision backend: concurrent page transcriptions per document. Default: 10.
    pub page_concurrency: usize,

    /// Vision backend: sampling temperature. Default: 0.1.
    pub temperature: f32,

    /// Vision backend: output token cap per page. Default: 4096.
    pub max_tokens: usize,

    /// Vision backend: retries per page on a failed call. Default: 3.
    pub max_retries: u32,

    /// Vision backend: initial backoff, doubled each retry. Default: 500.
    pub retry_backoff_ms: u64,
}

impl Default for ConversionConfig {
    fn default() -> Self {
        Self {
            chunk_pages: MAX_CHUNK_PAGES,
            remote_backend: RemoteBackend::default(),
            batch_concurrency: 8,
            llama_api_key: None,
            llama_base_url: "https://api.cloud.llamaindex.ai".to_string(),
            api_timeout_secs: 60,
            job_timeout_secs: 600,
            poll_interval_ms: 1000,
            model: None,
            provider_name: None,
            provider: None,
            max_rendered_pixels: 2000,
            page_concurrency: 10,
            temperature: 0.1,
            max_tokens: 4096,
            max_retries: 3,
            retry_backoff_ms: 500,
        }
    }
}

impl fmt::Debug for ConversionConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConversionConfig")
            .field("chunk_pages", &self.chunk_pages)
            .field("remote_backend", &self.remote_backend)
            .field("batch_concurrency", &self.batch_concurrency)
            .field("llama_api_key", &self.llama_api_key.as_ref().map(|_| "<redacted>"))
            .field("llama_base_url", &self.llama_base_url)
            .field("api_timeout_secs", &self.api_timeout_secs)
            .field("job_timeout_secs", &self.job_timeout_secs)
            .field("model", &self.model)
            .field("provider_name", &self.provider_name)
            .field("provider", &self.provider.as_ref().map(|_| "<dyn LLMProvider>"))
            .field("page_concurrency", &self.page_concurrency)
            .field("max_retries", &self.max_retries)
            .finish()
    }
}

impl ConversionConfig {
    /// Create a new builder for `ConversionConfig`.
    pub fn builder() -> ConversionConfigBuilder {
        ConversionConfigBuilder {
            config: Self::default(),
        }
    }

    /// Chunk size actually used by the chunker.
    pub fn effective_chunk_pages(&self) -> usize {
        self.chunk_pages.clamp(1, MAX_CHUNK_PAGES)
    }
}

/// Builder for [`ConversionConfig`].
#[derive(Debug)]
pub struct ConversionConfigBuilder {
    config: ConversionConfig,
}

impl ConversionConfigBuilder {
    pub fn chunk_pages(mut self, pages: usize) -> Self {
        self.config.chunk_pages = pages.clamp(1, MAX_CHUNK_PAGES);
        self
    }

    pub fn remote_backend(mut self, backend: RemoteBackend) -> Self {
        self.config.remote_backend = backend;
        self
    }

    pub fn batch_concurrency(mut self, n: usize) -> Self {
        self.config.batch_concurrency = n.max(1);
        self
    }

    pub fn llama_api_key(mut self, key: impl Into<String>) -> Self {
        self.config.llama_api_key = Some(key.into());
        self
    }

    pub fn llama_base_url(mut self, url: impl Into<String>) -> Self {
        self.config.llama_base_url = url.into().trim_end_matches('/').to_string();
        self
    }

    pub fn api_timeout_secs(mut self, secs: u64) -> Self {
        self.config.api_timeout_secs = secs;
        self
    }

    pub fn job_timeout_secs(mut self, secs: u64) -> Self {
        self.config.job_timeout_secs = secs;
        self
    }

    pub fn poll_interval_ms(mut self, ms: u64) -> Self {
        self.config.poll_interval_ms = ms;
        self
    }

    pub fn model(mut self, model: impl Into<String>) -> Self {
        self.config.model = Some(model.into());
        self
    }

    pub fn provider_name(mut self, name: impl Into<String>) -> Self {
        self.config.provider_name = Some(name.into());
        self
    }

    pub fn provider(mut self, provider: Arc<dyn LLMProvider>) -> Self {
        self.config.provider = Some(provider);
        self
    }

    pub fn max_rendered_pixels(mut self, px: u32) -> Self {
        self.config.max_rendered_pixels = px.max(100);
        self
    }

    pub fn page_concurrency(mut self, n: usize) -> Self {
        self.config.page_concurrency = n.max(1);
        self
    }

    pub fn temperature(mut self, t: f32) -> Self {
        self.config.temperature = t.clamp(0.0, 2.0);
        self
    }

    pub fn max_tokens(mut self, n: usize) -> Self {
        self.config.max_tokens = n;
        self
    }

    pub fn max_retries(mut self, n: u32) -> Self {
        self.config.max_retries = n;
        self
    }

    pub fn retry_backoff_ms(mut self, ms: u64) -> Self {
        self.config.retry_backoff_ms = ms;
        self
    }

    /// Build the configuration, validating constraints.
    pub fn build(self) -> Result<ConversionConfig, ToolError> {
        let c = &self.config;
        if c.api_timeout_secs == 0 {
            return Err(ToolError::InvalidConfig(
                "API timeout must be at least 1 second".into(),
            ));
        }
        if c.job_timeout_secs < c.api_timeout_secs {
            return Err(ToolError::InvalidConfig(format!(
                "job timeout ({}s) must not be shorter than the API timeout ({}s)",
                c.job_timeout_secs, c.api_timeout_secs
            )));
        }
        if !c.llama_base_url.starts_with("http://") && !c.llama_base_url.starts_with("https://") {
            return Err(ToolError::InvalidConfig(format!(
                "LlamaParse base URL must be http(s), got '{}'",
                c.llama_base_url
            )));
        }
        Ok(self.config)
    }
}

/// Configuration for SEC EDGAR retrieval.
#[derive(Debug, Clone)]
pub struct FilingsConfig {
    /// Earliest accepted filing year. Default: 2021.
    pub min_year: i32,
    /// Latest accepted filing year. Default: 2025.
    pub max_year: i32,
    /// Subtree (relative to the workspace root) downloads must land in. Default: `html`.
    pub output_root: String,
    /// `User-Agent` sent to EDGAR. SEC asks for a contact address here.
    pub user_agent: String,
    /// Minimum spacing between consecutive SEC requests. Default: 500 ms.
    pub min_request_interval_ms: u64,
    /// Timeout for the submissions index request. Default: 15 s.
    pub index_timeout_secs: u64,
    /// Timeout for the primary document download. Default: 30 s.
    pub document_timeout_secs: u64,
    /// Submissions API base URL.
    pub submissions_base_url: String,
    /// Archives base URL.
    pub archives_base_url: String,
}

impl Default for FilingsConfig {
    fn default() -> Self {
        Self {
            min_year: 2021,
            max_year: 2025,
            output_root: "html".to_string(),
            user_agent: "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/537.36"
                .to_string(),
            min_request_interval_ms: 500,
            index_timeout_secs: 15,
            document_timeout_secs: 30,
            submissions_base_url: "https://data.sec.gov/submissions".to_string(),
            archives_base_url: "https://www.sec.gov/Archives/edgar/data".to_string(),
        }
    }
}

impl FilingsConfig {
    /// Defaults, with `SEC_USER_AGENT` applied when set.
    pub fn from_env() -> Self {
        let mut config = Self::default();
        if let Ok(agent) = std::env::var("SEC_USER_AGENT") {
            if !agent.trim().is_empty() {
                config.user_agent = agent;
            }
        }
        config
    }
}

/// Everything the tool server needs.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Directory all tool paths are resolved against.
    pub workspace_root: PathBuf,
    pub conversion: ConversionConfig,
    pub filings: FilingsConfig,
    /// Run Chromium with its sandbox. Disable when running as root in a container.
    pub browser_sandbox: bool,
}

impl ServerConfig {
    pub fn new(workspace_root: impl Into<PathBuf>) -> Self {
        Self {
            workspace_root: workspace_root.into(),
            conversion: ConversionConfig::default(),
            filings: FilingsConfig::from_env(),
            browser_sandbox: true,
        }
    }

    /// Resolve a caller-supplied path against the workspace root.
    ///
    /// Absolute paths are taken as-is, matching `Path::join`.
    pub fn resolve(&self, relative: impl AsRef<Path>) -> PathBuf {
        self.workspace_root.join(relative)
    }
}
