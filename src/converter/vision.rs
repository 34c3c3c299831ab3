//! Vision-LLM backend: rasterise each page and have a vision model
//! transcribe it.
//!
//! Per document: render (blocking, pdfium) → PNG/base64 → concurrent page
//! calls with retry → cleanup → page-ordered join. Documents of a batch run
//! `batch_concurrency` at a time; pages within a document run
//! `page_concurrency` at a time.
//!
//! ## Retry Strategy
//!
//! Vision APIs answer 429/503 under concurrent load. Each page call is
//! bounded by `api_timeout_secs` and retried with exponential backoff
//! (`retry_backoff_ms * 2^attempt`, capped at one minute); a page that still
//! fails after `max_retries` fails the document, and with it the batch, so
//! the orchestrator can fall back to the local converter. A whole document is
//! bounded by `job_timeout_secs`.

use super::{Fragment, PageText, RemoteConverter, ServiceResult};
use crate::config::ConversionConfig;
use crate::error::{ConversionOutcome, ConverterError};
use crate::markdown::clean_model_output;
use crate::pdf::PdfiumBackend;
use crate::prompts::{page_instruction, PAGE_TRANSCRIPTION_PROMPT};
use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD, Engine as _};
use edgequake_llm::{ChatMessage, CompletionOptions, ImageData, LLMProvider, ProviderFactory};
use futures::stream::{self, StreamExt, TryStreamExt};
use image::DynamicImage;
use std::future::Future;
use std::io::Cursor;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;
use tokio::time::{sleep, Duration};
use tracing::{debug, info, warn};

const DEFAULT_VISION_MODEL: &str = "gpt-4.1-nano";

/// Remote converter backed by a vision-capable LLM.
pub struct VisionConverter {
    config: ConversionConfig,
    pdf: Arc<PdfiumBackend>,
}

impl VisionConverter {
    pub fn new(config: ConversionConfig, pdf: Arc<PdfiumBackend>) -> Self {
        Self { config, pdf }
    }

    async fn transcribe_document(
        &self,
        provider: &Arc<dyn LLMProvider>,
        index: usize,
        document: &Path,
    ) -> Result<Fragment, ConverterError> {
        let start = Instant::now();
        let pdf = Arc::clone(&self.pdf);
        let path = document.to_path_buf();
        let max_pixels = self.config.max_rendered_pixels;
        let rendered = tokio::task::spawn_blocking(move || pdf.render_pages(&path, max_pixels))
            .await
            .map_err(|e| ConverterError::Preparation(format!("render task failed: {e}")))?
            .map_err(|e| ConverterError::Document {
                path: document.to_path_buf(),
                detail: e.to_string(),
            })?;

        let encoded = rendered
            .iter()
            .map(|(idx, img)| {
                encode_page(img).map(|data| (*idx, data)).map_err(|e| {
                    ConverterError::Document {
                        path: document.to_path_buf(),
                        detail: format!("page {} encoding: {e}", idx + 1),
                    }
                })
            })
            .collect::<Result<Vec<_>, _>>()?;

        let mut pages: Vec<PageText> = stream::iter(encoded.into_iter().map(|(idx, image)| {
            let provider = Arc::clone(provider);
            async move {
                let page = idx + 1;
                transcribe_page(&provider, page, image, &self.config)
                    .await
                    .map(|raw| PageText {
                        page,
                        markdown: clean_model_output(&raw),
                    })
            }
        }))
        .buffer_unordered(self.config.page_concurrency.max(1))
        .try_collect()
        .await?;
        pages.sort_by_key(|p| p.page);

        debug!(
            "Document {index} ({}): {} pages transcribed in {:?}",
            document.display(),
            pages.len(),
            start.elapsed()
        );
        Ok(Fragment {
            index,
            markdown: ServiceResult::Paged(pages).into_markdown(),
        })
    }
}

#[async_trait]
impl RemoteConverter for VisionConverter {
    fn name(&self) -> &'static str {
        "vision"
    }

    async fn convert_batch(&self, documents: &[PathBuf]) -> ConversionOutcome<Vec<Fragment>> {
        let provider = match resolve_provider(&self.config) {
            Ok(p) => p,
            Err(e) => return ConversionOutcome::Recoverable(e),
        };
        info!(
            "Transcribing {} document(s) with vision model {}",
            documents.len(),
            self.config.model.as_deref().unwrap_or("<provider default>")
        );

        let job_timeout = Duration::from_secs(self.config.job_timeout_secs);
        let result = stream::iter(
            documents
                .iter()
                .enumerate()
                .map(|(index, doc)| {
                    let what = format!("vision transcription of {}", doc.display());
                    let provider = &provider;
                    async move {
                        with_deadline(
                            job_timeout,
                            &what,
                            self.transcribe_document(provider, index, doc),
                        )
                        .await
                    }
                })
                .collect::<Vec<_>>(),
        )
        .buffer_unordered(self.config.batch_concurrency.max(1))
        .try_collect::<Vec<Fragment>>()
        .await;

        ConversionOutcome::recoverable(result)
    }
}

/// Resolve the vision provider, most specific first.
///
/// 1. a pre-built `config.provider`
/// 2. `config.provider_name` with `config.model`
/// 3. `EDGEQUAKE_LLM_PROVIDER` + `EDGEQUAKE_MODEL`
/// 4. `OPENAI_API_KEY` present → OpenAI
/// 5. whatever `ProviderFactory::from_env` detects
pub fn resolve_provider(config: &ConversionConfig) -> Result<Arc<dyn LLMProvider>, ConverterError> {
    if let Some(ref provider) = config.provider {
        return Ok(Arc::clone(provider));
    }

    let model = config.model.as_deref().unwrap_or(DEFAULT_VISION_MODEL);
    if let Some(ref name) = config.provider_name {
        return create_provider(name, model);
    }

    if let (Ok(prov), Ok(env_model)) = (
        std::env::var("EDGEQUAKE_LLM_PROVIDER"),
        std::env::var("EDGEQUAKE_MODEL"),
    ) {
        if !prov.is_empty() && !env_model.is_empty() {
            return create_provider(&prov, &env_model);
        }
    }

    if std::env::var("OPENAI_API_KEY").is_ok_and(|k| !k.is_empty()) {
        return create_provider("openai", model);
    }

    let (llm, _embedding) = ProviderFactory::from_env().map_err(|e| {
        ConverterError::NotConfigured(format!(
            "no vision provider detected; set OPENAI_API_KEY or EDGEQUAKE_LLM_PROVIDER ({e})"
        ))
    })?;
    Ok(llm)
}

fn create_provider(name: &str, model: &str) -> Result<Arc<dyn LLMProvider>, ConverterError> {
    ProviderFactory::create_llm_provider(name, model)
        .map_err(|e| ConverterError::NotConfigured(format!("provider '{name}': {e}")))
}

/// Encode a rendered page as a lossless PNG attachment.
fn encode_page(img: &DynamicImage) -> Result<ImageData, image::ImageError> {
    let mut buf = Vec::new();
    img.write_to(&mut Cursor::new(&mut buf), image::ImageFormat::Png)?;
    Ok(ImageData::new(STANDARD.encode(&buf), "image/png").with_detail("high"))
}

fn completion_options(config: &ConversionConfig) -> CompletionOptions {
    CompletionOptions {
        temperature: Some(config.temperature),
        max_tokens: Some(config.max_tokens),
        ..Default::default()
    }
}

/// Longest wait between two attempts at the same page.
const MAX_BACKOFF: Duration = Duration::from_secs(60);

async fn transcribe_page(
    provider: &Arc<dyn LLMProvider>,
    page: usize,
    image: ImageData,
    config: &ConversionConfig,
) -> Result<String, ConverterError> {
    let messages = vec![
        ChatMessage::system(PAGE_TRANSCRIPTION_PROMPT),
        ChatMessage::user_with_images(page_instruction(page).as_str(), vec![image]),
    ];
    let options = completion_options(config);
    let call_timeout = Duration::from_secs(config.api_timeout_secs);
    let what = format!("vision call for page {page}");
    let (messages, options, what) = (&messages, &options, what.as_str());

    with_retries(config, page, || async move {
        let response = with_deadline(call_timeout, what, async {
            provider
                .chat(messages, Some(options))
                .await
                .map_err(|e| ConverterError::Transport(e.to_string()))
        })
        .await?;
        debug!(
            "Page {page}: {} input tokens, {} output tokens",
            response.prompt_tokens, response.completion_tokens
        );
        Ok(response.content)
    })
    .await
}

/// Run `call` up to `max_retries + 1` times with exponential backoff.
///
/// The error of the final attempt is returned unchanged so a timeout stays a
/// timeout.
async fn with_retries<T, F, Fut>(
    config: &ConversionConfig,
    page: usize,
    mut call: F,
) -> Result<T, ConverterError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, ConverterError>>,
{
    let mut attempt = 0;
    loop {
        match call().await {
            Ok(value) => return Ok(value),
            Err(e) if attempt >= config.max_retries => {
                warn!("Page {page}: giving up after {} attempt(s): {e}", attempt + 1);
                return Err(e);
            }
            Err(e) => {
                attempt += 1;
                let backoff = backoff_delay(config.retry_backoff_ms, attempt);
                warn!(
                    "Page {page}: {e}; retry {attempt}/{} after {backoff:?}",
                    config.max_retries
                );
                sleep(backoff).await;
            }
        }
    }
}

/// `base_ms * 2^(attempt - 1)`, saturating and capped at [`MAX_BACKOFF`].
fn backoff_delay(base_ms: u64, attempt: u32) -> Duration {
    let factor = 2u64.saturating_pow(attempt.saturating_sub(1));
    Duration::from_millis(base_ms.saturating_mul(factor)).min(MAX_BACKOFF)
}

/// Bound `fut` by `limit`; elapsing becomes [`ConverterError::Timeout`].
async fn with_deadline<T>(
    limit: Duration,
    what: &str,
    fut: impl Future<Output = Result<T, ConverterError>>,
) -> Result<T, ConverterError> {
    tokio::time::timeout(limit, fut)
        .await
        .map_err(|_| ConverterError::Timeout {
            what: what.to_string(),
            secs: limit.as_secs(),
        })?
}
