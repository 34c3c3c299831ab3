//! LlamaParse REST backend.
//!
//! Each document becomes one parse job:
//!
//! 1. `POST /api/parsing/upload` (multipart: file + parser options) → job id
//! 2. `GET  /api/parsing/job/{id}` until the status leaves `PENDING`
//! 3. `GET  /api/parsing/job/{id}/result/json` → page-structured payload
//!
//! Up to `batch_concurrency` jobs run at once. The first failing job fails
//! the batch; its siblings are dropped (and their in-flight requests
//! cancelled) as soon as `try_collect` returns.

use super::{Fragment, RemoteConverter, ServiceResult};
use crate::config::ConversionConfig;
use crate::error::{ConversionOutcome, ConverterError, ToolError};
use async_trait::async_trait;
use futures::stream::{self, StreamExt, TryStreamExt};
use reqwest::multipart::{Form, Part};
use reqwest::{Client, RequestBuilder, Response};
use serde::Deserialize;
use serde_json::Value;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

/// Environment variable consulted when no key is configured.
pub const API_KEY_ENV: &str = "LLAMA_CLOUD_API_KEY";

/// Parser options sent with every upload. Filings are text-based PDFs with
/// long multi-page financial tables.
const PARSER_OPTIONS: &[(&str, &str)] = &[
    ("result_type", "markdown"),
    ("split_by_page", "true"),
    ("language", "en"),
    ("disable_ocr", "true"),
    ("hide_headers", "true"),
    ("hide_footers", "true"),
    ("skip_diagonal_text", "true"),
    ("do_not_unroll_columns", "false"),
    ("merge_tables_across_pages_in_markdown", "true"),
    ("preserve_layout_alignment_across_pages", "true"),
];

#[derive(Debug, Deserialize)]
struct Job {
    id: String,
    #[serde(default)]
    status: String,
}

/// What a job status string means for the poll loop.
#[derive(Debug, PartialEq, Eq)]
enum JobState {
    Running,
    Done,
    Failed,
}

fn classify_status(status: &str) -> JobState {
    match status.to_ascii_uppercase().as_str() {
        "SUCCESS" => JobState::Done,
        "PENDING" | "RUNNING" | "" => JobState::Running,
        _ => JobState::Failed,
    }
}

/// LlamaParse client.
pub struct LlamaCloudConverter {
    client: Client,
    base_url: String,
    api_key: Option<String>,
    concurrency: usize,
    api_timeout_secs: u64,
    job_timeout: Duration,
    poll_interval: Duration,
}

impl LlamaCloudConverter {
    pub fn new(config: &ConversionConfig) -> Result<Self, ToolError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.api_timeout_secs))
            .build()
            .map_err(|e| ToolError::InvalidConfig(format!("HTTP client: {e}")))?;

        let api_key = config
            .llama_api_key
            .clone()
            .or_else(|| std::env::var(API_KEY_ENV).ok())
            .filter(|k| !k.trim().is_empty());

        Ok(Self {
            client,
            base_url: config.llama_base_url.trim_end_matches('/').to_string(),
            api_key,
            concurrency: config.batch_concurrency.max(1),
            api_timeout_secs: config.api_timeout_secs,
            job_timeout: Duration::from_secs(config.job_timeout_secs),
            poll_interval: Duration::from_millis(config.poll_interval_ms),
        })
    }

    fn authorized(&self, request: RequestBuilder, api_key: &str) -> RequestBuilder {
        request.bearer_auth(api_key).header("accept", "application/json")
    }

    async fn parse_one(
        &self,
        api_key: &str,
        index: usize,
        document: &Path,
    ) -> Result<Fragment, ConverterError> {
        let start = Instant::now();
        let job = tokio::time::timeout(self.job_timeout, async {
            let job_id = self.upload(api_key, document).await?;
            self.wait_for(api_key, &job_id).await?;
            self.fetch_result(api_key, &job_id).await
        })
        .await
        .map_err(|_| ConverterError::Timeout {
            what: format!("LlamaParse job for {}", document.display()),
            secs: self.job_timeout.as_secs(),
        })??;

        let markdown = ServiceResult::decode(job).into_markdown();
        debug!(
            "Document {index} ({}) parsed: {} chars in {:?}",
            document.display(),
            markdown.len(),
            start.elapsed()
        );
        Ok(Fragment { index, markdown })
    }

    async fn upload(&self, api_key: &str, document: &Path) -> Result<String, ConverterError> {
        let bytes = tokio::fs::read(document)
            .await
            .map_err(|e| ConverterError::Document {
                path: document.to_path_buf(),
                detail: e.to_string(),
            })?;
        let file_name = document
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "document.pdf".to_string());

        let part = Part::bytes(bytes)
            .file_name(file_name)
            .mime_str("application/pdf")
            .map_err(|e| ConverterError::Transport(e.to_string()))?;
        let form = PARSER_OPTIONS
            .iter()
            .fold(Form::new().part("file", part), |form, (k, v)| form.text(*k, *v));

        let url = format!("{}/api/parsing/upload", self.base_url);
        let response = self
            .authorized(self.client.post(&url), api_key)
            .multipart(form)
            .send()
            .await
            .map_err(|e| self.request_error(&url, e))?;
        let job: Job = read_json(response).await?;
        debug!("Uploaded {} as job {}", document.display(), job.id);
        Ok(job.id)
    }

    async fn wait_for(&self, api_key: &str, job_id: &str) -> Result<(), ConverterError> {
        let url = format!("{}/api/parsing/job/{job_id}", self.base_url);
        loop {
            let response = self
                .authorized(self.client.get(&url), api_key)
                .send()
                .await
                .map_err(|e| self.request_error(&url, e))?;
            let job: Job = read_json(response).await?;
            match classify_status(&job.status) {
                JobState::Done => return Ok(()),
                JobState::Running => tokio::time::sleep(self.poll_interval).await,
                JobState::Failed => {
                    return Err(ConverterError::JobFailed {
                        job_id: job_id.to_string(),
                        status: job.status,
                    })
                }
            }
        }
    }

    async fn fetch_result(&self, api_key: &str, job_id: &str) -> Result<Value, ConverterError> {
        let url = format!("{}/api/parsing/job/{job_id}/result/json", self.base_url);
        let response = self
            .authorized(self.client.get(&url), api_key)
            .send()
            .await
            .map_err(|e| self.request_error(&url, e))?;
        read_json(response).await
    }

    fn request_error(&self, url: &str, e: reqwest::Error) -> ConverterError {
        if e.is_timeout() {
            ConverterError::Timeout {
                what: url.to_string(),
                secs: self.api_timeout_secs,
            }
        } else {
            ConverterError::Transport(e.to_string())
        }
    }
}

async fn read_json<T: serde::de::DeserializeOwned>(
    response: Response,
) -> Result<T, ConverterError> {
    let status = response.status();
    if !status.is_success() {
        let body = response.text().await.unwrap_or_default();
        return Err(ConverterError::Status {
            status: status.as_u16(),
            detail: body.chars().take(300).collect(),
        });
    }
    response
        .json::<T>()
        .await
        .map_err(|e| ConverterError::MalformedResponse(e.to_string()))
}

#[async_trait]
impl RemoteConverter for LlamaCloudConverter {
    fn name(&self) -> &'static str {
        "llama-cloud"
    }

    async fn convert_batch(&self, documents: &[PathBuf]) -> ConversionOutcome<Vec<Fragment>> {
        let Some(api_key) = self.api_key.as_deref() else {
            return ConversionOutcome::Recoverable(ConverterError::NotConfigured(format!(
                "{API_KEY_ENV} is not set"
            )));
        };

        info!(
            "Submitting {} document(s) to LlamaParse ({} at a time)",
            documents.len(),
            self.concurrency
        );

        let result = stream::iter(
            documents
                .iter()
                .enumerate()
                .map(|(index, doc)| self.parse_one(api_key, index, doc))
                .collect::<Vec<_>>(),
        )
        .buffer_unordered(self.concurrency)
        .try_collect::<Vec<Fragment>>()
        .await;

        if let Err(ref e) = result {
            warn!("LlamaParse batch failed: {e}");
        }
        ConversionOutcome::recoverable(result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn converter_without_key() -> LlamaCloudConverter {
        let mut c = LlamaCloudConverter::new(&ConversionConfig::default()).unwrap();
        c.api_key = None;
        c
    }

    #[test]
    fn status_classification() {
        assert_eq!(classify_status("SUCCESS"), JobState::Done);
        assert_eq!(classify_status("pending"), JobState::Running);
        assert_eq!(classify_status("ERROR"), JobState::Failed);
        assert_eq!(classify_status("CANCELED"), JobState::Failed);
        assert_eq!(classify_status("PARTIAL_SUCCESS"), JobState::Failed);
    }

    #[test]
    fn parser_options_request_paged_markdown() {
        let option = |key: &str| {
            PARSER_OPTIONS
                .iter()
                .find(|(k, _)| *k == key)
                .map(|(_, v)| *v)
        };
        assert_eq!(option("result_type"), Some("markdown"));
        assert_eq!(option("split_by_page"), Some("true"));
        assert_eq!(option("disable_ocr"), Some("true"));
        assert_eq!(option("do_not_unroll_columns"), Some("false"));
    }

    #[test]
    fn job_status_defaults_when_absent() {
        let job: Job = serde_json::from_str(r#"{"id":"abc"}"#).unwrap();
        assert_eq!(job.id, "abc");
        assert_eq!(classify_status(&job.status), JobState::Running);
    }

    #[test]
    fn explicit_key_used() {
        let cfg = ConversionConfig::builder().llama_api_key("llx-1").build().unwrap();
        let c = LlamaCloudConverter::new(&cfg).unwrap();
        assert_eq!(c.api_key.as_deref(), Some("llx-1"));
        assert_eq!(c.base_url, "https://api.cloud.llamaindex.ai");
    }

    #[tokio::test]
    async fn missing_key_is_recoverable() {
        let c = converter_without_key();
        let outcome = c.convert_batch(&[PathBuf::from("a.pdf")]).await;
        assert!(matches!(
            outcome,
            ConversionOutcome::Recoverable(ConverterError::NotConfigured(_))
        ));
    }

    #[tokio::test]
    async fn unreachable_service_is_recoverable() {
        let dir = tempfile::tempdir().unwrap();
        let doc = dir.path().join("a.pdf");
        std::fs::write(&doc, b"%PDF-1.4").unwrap();

        let cfg = ConversionConfig::builder()
            .llama_api_key("llx-test")
            .llama_base_url("http://127.0.0.1:9")
            .api_timeout_secs(2)
            .job_timeout_secs(5)
            .build()
            .unwrap();
        let c = LlamaCloudConverter::new(&cfg).unwrap();
        let outcome = c.convert_batch(&[doc]).await;
        assert!(matches!(outcome, ConversionOutcome::Recoverable(_)));
    }
}
