//! 3D model provider trait and job lifecycle types

use chrono::{DateTime, Utc};
use kiln_core::{KilnError, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::spec::ResolvedJobSpec;

/// Identifies a submitted job. Created by `submit`, never mutated.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobHandle {
    pub job_id: String,
    pub submitted_at: DateTime<Utc>,
}

impl JobHandle {
    pub fn new(job_id: impl Into<String>) -> Self {
        Self {
            job_id: job_id.into(),
            submitted_at: Utc::now(),
        }
    }
}

/// Remote job state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobState {
    Pending,
    Running,
    Succeeded,
    Failed,
}

impl JobState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, JobState::Succeeded | JobState::Failed)
    }
}

impl fmt::Display for JobState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            JobState::Pending => write!(f, "pending"),
            JobState::Running => write!(f, "running"),
            JobState::Succeeded => write!(f, "succeeded"),
            JobState::Failed => write!(f, "failed"),
        }
    }
}

/// One downloadable result reported by the service
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResultFile {
    /// Format label reported by the service (e.g. "OBJ", "GLB")
    pub file_type: String,
    pub url: String,
    #[serde(default)]
    pub preview_url: Option<String>,
}

/// Result of one poll
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobStatus {
    pub job_id: String,
    pub state: JobState,
    /// Non-empty only when `state == Succeeded`
    pub result_files: Vec<ResultFile>,
    pub error_code: Option<String>,
    /// Set only when `state == Failed`
    pub error_message: Option<String>,
}

impl JobStatus {
    pub fn in_progress(job_id: &str, state: JobState) -> Self {
        Self {
            job_id: job_id.to_string(),
            state,
            result_files: Vec::new(),
            error_code: None,
            error_message: None,
        }
    }

    pub fn succeeded(job_id: &str, result_files: Vec<ResultFile>) -> Self {
        Self {
            job_id: job_id.to_string(),
            state: JobState::Succeeded,
            result_files,
            error_code: None,
            error_message: None,
        }
    }

    pub fn failed(job_id: &str, code: Option<String>, message: impl Into<String>) -> Self {
        Self {
            job_id: job_id.to_string(),
            state: JobState::Failed,
            result_files: Vec::new(),
            error_code: code,
            error_message: Some(message.into()),
        }
    }

    pub fn result_urls(&self) -> Vec<&str> {
        self.result_files.iter().map(|f| f.url.as_str()).collect()
    }

    /// `download_result` is only defined for succeeded jobs
    pub fn require_succeeded(&self) -> Result<()> {
        if self.state != JobState::Succeeded {
            return Err(KilnError::Download(format!(
                "Job {} is {}, results are only available once it succeeds",
                self.job_id, self.state
            )));
        }
        if self.result_files.is_empty() {
            return Err(KilnError::Download(format!(
                "Job {} succeeded but reported no result files",
                self.job_id
            )));
        }
        Ok(())
    }
}

/// What kind of payload a result URL produced
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ArchiveFormat {
    Zip,
    /// A bare model file, saved as `model.<extension>`
    Raw { extension: String },
}

const ZIP_MAGIC: &[u8] = b"PK\x03\x04";

/// Downloaded result bytes. Owned by the orchestrator, dropped after extraction.
#[derive(Clone)]
pub struct DownloadedArchive {
    pub source_url: String,
    pub format: ArchiveFormat,
    pub bytes: Vec<u8>,
    pub preview: Option<Vec<u8>>,
}

impl DownloadedArchive {
    /// Decide zip vs raw from the URL and the leading bytes
    pub fn detect(source_url: &str, file_type: &str, bytes: Vec<u8>) -> Self {
        let path = source_url.split(['?', '#']).next().unwrap_or(source_url);
        let format = if path.to_ascii_lowercase().ends_with(".zip") || bytes.starts_with(ZIP_MAGIC)
        {
            ArchiveFormat::Zip
        } else {
            let from_url = path
                .rsplit('/')
                .next()
                .and_then(|name| name.rsplit_once('.'))
                .map(|(_, ext)| safe_extension(ext))
                .filter(|ext| !ext.is_empty());
            let extension = Some(safe_extension(file_type))
                .filter(|ext| !ext.is_empty())
                .or(from_url)
                .unwrap_or_else(|| "bin".to_string());
            ArchiveFormat::Raw { extension }
        };

        Self {
            source_url: source_url.to_string(),
            format,
            bytes,
            preview: None,
        }
    }

    pub fn with_preview(mut self, preview: Option<Vec<u8>>) -> Self {
        self.preview = preview;
        self
    }
}

/// Lowercased ASCII alphanumerics only, so the name stays inside the output directory
fn safe_extension(raw: &str) -> String {
    raw.chars()
        .filter(|c| c.is_ascii_alphanumeric())
        .map(|c| c.to_ascii_lowercase())
        .collect()
}

impl fmt::Debug for DownloadedArchive {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DownloadedArchive")
            .field("source_url", &self.source_url)
            .field("format", &self.format)
            .field("bytes", &self.bytes.len())
            .field("preview", &self.preview.as_ref().map(|p| p.len()))
            .finish()
    }
}

/// Which provider implementation to construct
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProviderKind {
    #[default]
    Sdk,
    Http,
    Mock,
}

impl ProviderKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProviderKind::Sdk => "sdk",
            ProviderKind::Http => "http",
            ProviderKind::Mock => "mock",
        }
    }
}

impl fmt::Display for ProviderKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ProviderKind {
    type Err = KilnError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "sdk" => Ok(ProviderKind::Sdk),
            "http" => Ok(ProviderKind::Http),
            "mock" => Ok(ProviderKind::Mock),
            _ => Err(KilnError::Config(format!(
                "Unknown provider '{}'. Available: sdk, http, mock",
                s
            ))),
        }
    }
}

/// Capability interface implemented by each 3D service client.
///
/// Providers hold no per-job state; the orchestrator owns the handle and
/// the polling loop. Errors are already classified (`Authentication`,
/// `Validation`, `TransientNetwork`, `JobNotFound`, `Download`, ...).
pub trait ModelProvider: Send + Sync {
    /// Provider name (e.g. "sdk", "http", "mock")
    fn name(&self) -> &str;

    /// Submit a job. Images are already URLs; providers never upload.
    fn submit(&self, spec: &ResolvedJobSpec) -> Result<JobHandle>;

    /// Query the current state of a job
    fn poll(&self, handle: &JobHandle) -> Result<JobStatus>;

    /// Fetch the first retrievable result of a succeeded job
    fn download_result(&self, status: &JobStatus) -> Result<DownloadedArchive>;
}
