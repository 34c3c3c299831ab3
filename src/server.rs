//! MCP tool server.
//!
//! Exposes four tools over stdio:
//!
//! | tool                   | does                                             |
//! |------------------------|--------------------------------------------------|
//! | `read_as_markdown`     | PDF → Markdown, stored in the segment cache      |
//! | `get_markdown_segment` | one 100 000-character window of a cached result  |
//! | `html_to_pdf`          | local HTML file → PDF via headless Chromium      |
//! | `download_sec_filing`  | latest matching EDGAR primary document → disk    |
//!
//! Every tool answers with a JSON string. Failures are reported inside that
//! string; a tool call never fails at the protocol level because of bad input
//! or an unavailable backend. stdout belongs to the protocol, so all
//! diagnostics go through `tracing`.

use crate::cache::{SegmentCache, SegmentError};
use crate::config::{Engine, ServerConfig};
use crate::error::ToolError;
use crate::filings::{CikInput, FilingRequest, FilingType, FilingsClient};
use crate::html_pdf::HtmlRenderer;
use crate::orchestrator::Orchestrator;
use rmcp::{
    handler::server::tool::ToolRouter, handler::server::wrapper::Parameters, model::*,
    tool, tool_handler, tool_router, ServerHandler, ServiceExt,
};
use schemars::JsonSchema;
use serde::Deserialize;
use serde_json::{json, Value};
use std::sync::Arc;
use tracing::{info, warn};

#[derive(Debug, Deserialize, JsonSchema)]
pub struct ReadAsMarkdownParams {
    /// PDF path relative to the workspace root, e.g. "pdf/amzn_2024_10k.pdf"
    pub input_file_path: String,
    /// "remote" (default; alias "llama-cloud") or "local" (alias "docling")
    #[serde(default)]
    pub engine: Option<String>,
}

#[derive(Debug, Deserialize, JsonSchema)]
pub struct GetMarkdownSegmentParams {
    /// Id returned by read_as_markdown, e.g. "markdown_0"
    pub cache_id: String,
    /// Character offset to start from (default 0); use next_offset from the previous call
    #[serde(default)]
    pub offset: usize,
}

#[derive(Debug, Deserialize, JsonSchema)]
pub struct HtmlToPdfParams {
    /// HTML path relative to the workspace root, e.g. "html/amzn/amzn-20241231.htm"
    pub input_file_path: String,
    /// Destination PDF path relative to the workspace root, e.g. "pdf/amzn_2024_10k.pdf"
    pub output_file_path: String,
}

#[derive(Debug, Deserialize, JsonSchema)]
pub struct DownloadSecFilingParams {
    /// Company CIK, with or without leading zeros, as a string or integer
    pub cik: CikInput,
    /// Calendar year of the filing's report date (2021-2025)
    pub year: i64,
    /// "8-K", "10-Q", "10-K" or "DEF 14A"
    pub filing_type: FilingType,
    /// Output directory under html, e.g. "html/amzn_2024_10k"
    pub output_dir_path: String,
}

/// The MCP server and the state shared by its tools.
#[derive(Clone)]
pub struct FilingsServer {
    config: Arc<ServerConfig>,
    cache: Arc<SegmentCache>,
    orchestrator: Arc<Orchestrator>,
    renderer: HtmlRenderer,
    filings: Arc<FilingsClient>,
    tool_router: ToolRouter<Self>,
}

#[tool_router]
impl FilingsServer {
    /// Wire production components from `config`.
    pub fn new(config: ServerConfig) -> Result<Self, ToolError> {
        let orchestrator = Arc::new(Orchestrator::from_config(&config.conversion)?);
        Self::with_components(config, Arc::new(SegmentCache::new()), orchestrator)
    }

    /// Use a caller-supplied cache and orchestrator.
    pub fn with_components(
        config: ServerConfig,
        cache: Arc<SegmentCache>,
        orchestrator: Arc<Orchestrator>,
    ) -> Result<Self, ToolError> {
        let filings = Arc::new(FilingsClient::new(
            config.filings.clone(),
            config.workspace_root.clone(),
        )?);
        Ok(Self {
            renderer: HtmlRenderer::new(config.browser_sandbox),
            config: Arc::new(config),
            cache,
            orchestrator,
            filings,
            tool_router: Self::tool_router(),
        })
    }

    pub fn cache(&self) -> &Arc<SegmentCache> {
        &self.cache
    }

    #[tool(
        description = "Convert a PDF to Markdown and cache the result. Returns a cache_id; read the content with get_markdown_segment. Documents over 40 pages are split into 40-page chunks and converted in parallel; if the remote engine fails, a local converter is used instead."
    )]
    async fn read_as_markdown(&self, Parameters(params): Parameters<ReadAsMarkdownParams>) -> String {
        let result = self.convert_and_cache(&params).await;
        match result {
            Ok(value) => value.to_string(),
            Err(e) => {
                warn!(error = %e, "read_as_markdown failed");
                json!({"status": "error", "error": e.to_string()}).to_string()
            }
        }
    }

    #[tool(
        description = "Read cached Markdown in 100000-character segments. Start at offset 0 and repeat with next_offset while has_more is true."
    )]
    async fn get_markdown_segment(
        &self,
        Parameters(params): Parameters<GetMarkdownSegmentParams>,
    ) -> String {
        match self.cache.fetch(&params.cache_id, params.offset) {
            Ok(segment) => {
                let mut value = serde_json::to_value(&segment).unwrap_or_else(|_| json!({}));
                if let Value::Object(ref mut map) = value {
                    map.insert("status".into(), json!("success"));
                }
                value.to_string()
            }
            Err(e) => {
                let mut body = json!({"error": e.to_string()});
                if let SegmentError::NotFound { available, .. } = e {
                    body["available_caches"] = json!(available);
                }
                body.to_string()
            }
        }
    }

    #[tool(
        description = "Render a local HTML file to PDF with headless Chromium using screen media. Paths are relative to the workspace root."
    )]
    async fn html_to_pdf(&self, Parameters(params): Parameters<HtmlToPdfParams>) -> String {
        let source = self.config.resolve(&params.input_file_path);
        let dest = self.config.resolve(&params.output_file_path);
        match self.renderer.render(&source, &dest).await {
            Ok(path) => json!({"output_file_path": path.display().to_string()}).to_string(),
            Err(e) => {
                warn!(error = %e, "html_to_pdf failed");
                json!({"error": e.to_string()}).to_string()
            }
        }
    }

    #[tool(
        description = "Download the primary document of a company's SEC EDGAR filing. Picks the latest filing of the given type whose report date falls in the given year and saves it under output_dir_path (which must be \"html\" or under \"html/\")."
    )]
    async fn download_sec_filing(
        &self,
        Parameters(params): Parameters<DownloadSecFilingParams>,
    ) -> String {
        let request = match FilingRequest::validate(
            &params.cik,
            params.year,
            params.filing_type,
            &params.output_dir_path,
            self.filings.config(),
        ) {
            Ok(r) => r,
            Err(e) => return format!("Error: {e}"),
        };

        match self.filings.download(&request).await {
            Ok(saved) => serde_json::to_string(&saved)
                .unwrap_or_else(|e| format!("Error: Unexpected error occurred. {e}")),
            Err(e) => {
                warn!(error = %e, cik = request.cik, "download_sec_filing failed");
                format!("Error: {e}")
            }
        }
    }

    async fn convert_and_cache(&self, params: &ReadAsMarkdownParams) -> Result<Value, ToolError> {
        let engine: Engine = params.engine.as_deref().unwrap_or_default().parse()?;
        let document = self.config.resolve(&params.input_file_path);
        if !document.is_file() {
            return Err(ToolError::FileNotFound {
                path: params.input_file_path.clone().into(),
            });
        }

        let conversion = self.orchestrator.convert(&document, engine).await?;
        let stored = self.cache.store(conversion.markdown);
        let total_kb = stored.total_kb();
        info!(
            cache_id = %stored.id,
            chars = stored.total_chars,
            strategy = %conversion.strategy,
            "Conversion cached"
        );

        Ok(json!({
            "status": "success",
            "cache_id": stored.id,
            "total_chars": stored.total_chars,
            "total_kb": total_kb,
            "strategy": conversion.strategy.to_string(),
            "message": format!(
                "Markdown content cached. Use 'get_markdown_segment' tool to retrieve content in chunks. Total size: {total_kb} KB"
            ),
        }))
    }
}

#[tool_handler]
impl ServerHandler for FilingsServer {
    fn get_info(&self) -> ServerInfo {
        ServerInfo {
            protocol_version: ProtocolVersion::V_2024_11_05,
            capabilities: ServerCapabilities::builder().enable_tools().build(),
            server_info: Implementation::from_build_env(),
            instructions: Some(
                "Financial filing tools. Typical flow: download_sec_filing → html_to_pdf → \
                 read_as_markdown → get_markdown_segment (repeat with next_offset until has_more \
                 is false). All paths are relative to the server workspace."
                    .into(),
            ),
        }
    }
}

/// Serve `server` over stdin/stdout until the client disconnects.
pub async fn serve_stdio(server: FilingsServer) -> Result<(), ToolError> {
    info!(
        "good-filings MCP server ready (workspace: {})",
        server.config.workspace_root.display()
    );
    let service = server
        .serve(rmcp::transport::io::stdio())
        .await
        .map_err(|e| ToolError::Internal(format!("MCP initialisation failed: {e}")))?;
    service
        .waiting()
        .await
        .map_err(|e| ToolError::Internal(format!("MCP service stopped: {e}")))?;
    Ok(())
}
