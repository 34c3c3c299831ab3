//! SEC EDGAR primary-document retrieval.
//!
//! ```text
//!  validate (year, output dir, CIK)           no I/O before this passes
//!      │
//!  GET data.sec.gov/submissions/CIK##########.json
//!      │  filings.recent: columnar arrays → Vec<FilingRecord>
//!  select_filing(form, year)                  latest date, first wins ties
//!      │
//!  GET www.sec.gov/Archives/edgar/data/{cik}/{accession}/{primaryDocument}
//!      │
//!  write {output_dir}/{primaryDocument}
//! ```
//!
//! SEC throttles aggressive clients, so every request goes through one
//! [`RateLimiter`] shared by all invocations.

use crate::config::FilingsConfig;
use crate::error::ToolError;
use chrono::{Datelike, NaiveDate};
use reqwest::Client;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Component, Path, PathBuf};
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::{debug, info};

/// Filing forms the tool can retrieve.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub enum FilingType {
    #[serde(rename = "8-K")]
    Form8K,
    #[serde(rename = "10-Q")]
    Form10Q,
    #[serde(rename = "10-K")]
    Form10K,
    #[serde(rename = "DEF 14A")]
    Def14A,
}

impl FilingType {
    /// Form name exactly as EDGAR spells it.
    pub fn form(self) -> &'static str {
        match self {
            FilingType::Form8K => "8-K",
            FilingType::Form10Q => "10-Q",
            FilingType::Form10K => "10-K",
            FilingType::Def14A => "DEF 14A",
        }
    }
}

impl fmt::Display for FilingType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.form())
    }
}

/// A CIK as callers send it: a JSON number or a string with optional
/// leading zeros.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, JsonSchema)]
#[serde(untagged)]
pub enum CikInput {
    Number(u64),
    Text(String),
}

impl fmt::Display for CikInput {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CikInput::Number(n) => write!(f, "{n}"),
            CikInput::Text(s) => f.write_str(s),
        }
    }
}

/// Numeric CIK with leading zeros removed.
pub fn parse_cik(cik: &CikInput) -> Result<u64, ToolError> {
    match cik {
        CikInput::Number(n) => Ok(*n),
        CikInput::Text(raw) => {
            let digits = raw.trim().trim_start_matches('0');
            if digits.is_empty() {
                return if raw.trim().is_empty() {
                    Err(ToolError::InvalidCik { cik: raw.clone() })
                } else {
                    Ok(0)
                };
            }
            if !digits.bytes().all(|b| b.is_ascii_digit()) {
                return Err(ToolError::InvalidCik { cik: raw.clone() });
            }
            digits
                .parse()
                .map_err(|_| ToolError::InvalidCik { cik: raw.clone() })
        }
    }
}

pub fn validate_year(year: i64, config: &FilingsConfig) -> Result<i32, ToolError> {
    if year < i64::from(config.min_year) || year > i64::from(config.max_year) {
        return Err(ToolError::YearOutOfRange {
            year,
            min: config.min_year,
            max: config.max_year,
        });
    }
    Ok(year as i32)
}

/// Normalise separators and require `root` or `root/...` with no `..`.
pub fn validate_output_dir(raw: &str, root: &str) -> Result<String, ToolError> {
    let normalized = raw.replace('\\', "/");
    let rejected = || ToolError::OutputDirNotAllowed {
        path: raw.to_string(),
        root: root.to_string(),
    };

    let under_root = normalized == root || normalized.starts_with(&format!("{root}/"));
    if !under_root {
        return Err(rejected());
    }
    if Path::new(&normalized)
        .components()
        .any(|c| matches!(c, Component::ParentDir))
    {
        return Err(rejected());
    }
    Ok(normalized)
}

/// One row of the submissions index.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FilingRecord {
    pub accession_number: String,
    pub primary_document: String,
    pub form: String,
    /// `reportDate` when non-empty, else `filingDate`; `None` if unparseable.
    pub date: Option<NaiveDate>,
}

impl FilingRecord {
    pub fn archive_path(&self, cik: u64) -> String {
        format!(
            "{cik}/{}/{}",
            self.accession_number.replace('-', ""),
            self.primary_document
        )
    }
}

#[derive(Debug, Deserialize)]
struct Submissions {
    filings: SubmissionFilings,
}

#[derive(Debug, Deserialize)]
struct SubmissionFilings {
    recent: RecentFilings,
}

/// `filings.recent`: parallel arrays, one element per filing.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RecentFilings {
    accession_number: Vec<String>,
    filing_date: Vec<String>,
    #[serde(default)]
    report_date: Vec<Option<String>>,
    form: Vec<String>,
    primary_document: Vec<String>,
}

impl RecentFilings {
    /// Zip the columns into records.
    pub fn into_records(self) -> Result<Vec<FilingRecord>, ToolError> {
        let n = self.accession_number.len();
        if [self.filing_date.len(), self.form.len(), self.primary_document.len()]
            .iter()
            .any(|&len| len != n)
        {
            return Err(ToolError::FilingIndexFormat(
                "filings.recent columns have different lengths".into(),
            ));
        }

        let mut report_dates = self.report_date.into_iter();
        Ok(self
            .accession_number
            .into_iter()
            .zip(self.filing_date)
            .zip(self.form)
            .zip(self.primary_document)
            .map(|(((accession_number, filing_date), form), primary_document)| {
                let report_date = report_dates.next().flatten().filter(|d| !d.trim().is_empty());
                let date = parse_date(report_date.as_deref().unwrap_or(&filing_date));
                FilingRecord {
                    accession_number,
                    primary_document,
                    form,
                    date,
                }
            })
            .collect())
    }
}

fn parse_date(raw: &str) -> Option<NaiveDate> {
    NaiveDate::parse_from_str(raw.trim(), "%Y-%m-%d").ok()
}

/// Latest record of `form` dated in `year`; the earliest index wins ties.
pub fn select_filing<'a>(
    records: &'a [FilingRecord],
    form: &str,
    year: i32,
) -> Option<&'a FilingRecord> {
    let mut best: Option<(&FilingRecord, NaiveDate)> = None;
    for record in records.iter().filter(|r| r.form == form) {
        let Some(date) = record.date.filter(|d| d.year() == year) else {
            continue;
        };
        if best.is_none_or(|(_, best_date)| date > best_date) {
            best = Some((record, date));
        }
    }
    best.map(|(record, _)| record)
}

/// Enforces a minimum gap between consecutive requests.
#[derive(Debug)]
pub struct RateLimiter {
    interval: Duration,
    last: Mutex<Option<Instant>>,
}

impl RateLimiter {
    pub fn new(interval: Duration) -> Self {
        Self {
            interval,
            last: Mutex::new(None),
        }
    }

    /// Wait until a request may be sent, then claim the slot.
    pub async fn acquire(&self) {
        let mut last = self.last.lock().await;
        if let Some(previous) = *last {
            tokio::time::sleep_until(previous + self.interval).await;
        }
        *last = Some(Instant::now());
    }
}

/// A validated retrieval request.
#[derive(Debug, Clone)]
pub struct FilingRequest {
    pub cik: u64,
    pub year: i32,
    pub filing_type: FilingType,
    /// Workspace-relative output directory, separators normalised.
    pub output_dir: String,
}

impl FilingRequest {
    /// Validate raw tool arguments. Performs no I/O.
    pub fn validate(
        cik: &CikInput,
        year: i64,
        filing_type: FilingType,
        output_dir: &str,
        config: &FilingsConfig,
    ) -> Result<Self, ToolError> {
        let year = validate_year(year, config)?;
        let output_dir = validate_output_dir(output_dir, &config.output_root)?;
        let cik = parse_cik(cik)?;
        Ok(Self {
            cik,
            year,
            filing_type,
            output_dir,
        })
    }
}

/// Where a downloaded filing landed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DownloadedFiling {
    /// Workspace-relative path of the saved document.
    #[serde(rename = "primaryDocument")]
    pub primary_document: String,
}

/// EDGAR client.
pub struct FilingsClient {
    client: Client,
    config: FilingsConfig,
    workspace_root: PathBuf,
    limiter: RateLimiter,
}

impl FilingsClient {
    pub fn new(config: FilingsConfig, workspace_root: impl Into<PathBuf>) -> Result<Self, ToolError> {
        let client = Client::builder()
            .user_agent(config.user_agent.clone())
            .gzip(true)
            .build()
            .map_err(|e| ToolError::InvalidConfig(format!("HTTP client: {e}")))?;
        let limiter = RateLimiter::new(Duration::from_millis(config.min_request_interval_ms));
        Ok(Self {
            client,
            config,
            workspace_root: workspace_root.into(),
            limiter,
        })
    }

    pub fn config(&self) -> &FilingsConfig {
        &self.config
    }

    /// Fetch the filing index for `request.cik` and download the selected
    /// primary document.
    pub async fn download(&self, request: &FilingRequest) -> Result<DownloadedFiling, ToolError> {
        let records = self.recent_filings(request.cik).await?;
        let form = request.filing_type.form();
        let filing = select_filing(&records, form, request.year).ok_or_else(|| {
            ToolError::NoFilingFound {
                cik: request.cik,
                year: request.year,
                filing_type: form.to_string(),
            }
        })?;
        info!(
            "Selected {} {} dated {:?} for CIK {}",
            filing.form, filing.accession_number, filing.date, request.cik
        );

        let file_name = Path::new(&filing.primary_document);
        if file_name.components().count() != 1
            || !matches!(file_name.components().next(), Some(Component::Normal(_)))
        {
            return Err(ToolError::FilingIndexFormat(format!(
                "unexpected primary document name '{}'",
                filing.primary_document
            )));
        }

        let url = format!(
            "{}/{}",
            self.config.archives_base_url.trim_end_matches('/'),
            filing.archive_path(request.cik)
        );
        self.limiter.acquire().await;
        debug!("GET {url}");
        let body = self
            .client
            .get(&url)
            .timeout(Duration::from_secs(self.config.document_timeout_secs))
            .send()
            .await
            .and_then(|r| r.error_for_status())
            .map_err(|e| ToolError::FilingDownload(e.to_string()))?
            .bytes()
            .await
            .map_err(|e| ToolError::FilingDownload(e.to_string()))?;

        let dir = self.workspace_root.join(&request.output_dir);
        tokio::fs::create_dir_all(&dir)
            .await
            .map_err(|source| ToolError::OutputWriteFailed {
                path: dir.clone(),
                source,
            })?;
        let target = dir.join(file_name);
        tokio::fs::write(&target, &body)
            .await
            .map_err(|source| ToolError::OutputWriteFailed {
                path: target.clone(),
                source,
            })?;
        info!("Saved {} bytes to {}", body.len(), target.display());

        Ok(DownloadedFiling {
            primary_document: format!(
                "{}/{}",
                request.output_dir.trim_end_matches('/'),
                filing.primary_document
            ),
        })
    }

    async fn recent_filings(&self, cik: u64) -> Result<Vec<FilingRecord>, ToolError> {
        let url = format!(
            "{}/CIK{cik:010}.json",
            self.config.submissions_base_url.trim_end_matches('/')
        );
        self.limiter.acquire().await;
        debug!("GET {url}");
        let submissions: Submissions = self
            .client
            .get(&url)
            .header(reqwest::header::ACCEPT, "application/json")
            .timeout(Duration::from_secs(self.config.index_timeout_secs))
            .send()
            .await
            .and_then(|r| r.error_for_status())
            .map_err(|e| ToolError::FilingIndexFetch(e.to_string()))?
            .json()
            .await
            .map_err(|e| ToolError::FilingIndexFormat(e.to_string()))?;
        submissions.filings.recent.into_records()
    }
}
