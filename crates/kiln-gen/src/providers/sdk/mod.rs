//! SDK-backed provider
//!
//! Wraps the typed [`Ai3dClient`]; only request construction and error
//! mapping live here.

pub mod client;
pub mod models;

pub use client::{Ai3dClient, ClientProfile, Credential, HttpProfile, SdkError};

use kiln_core::{KilnError, Result};
use tracing::debug;

use super::http::{self, build_agent};
use super::{classify_api_error, endpoint_host, endpoint_region, map_job_state};
use crate::config::KilnConfig;
use crate::provider::*;
use crate::spec::ResolvedJobSpec;
use models::*;

pub struct SdkProvider {
    client: Ai3dClient,
    download_agent: ureq::Agent,
}

impl SdkProvider {
    pub fn new(client: Ai3dClient) -> Self {
        Self {
            client,
            download_agent: build_agent(http::DOWNLOAD_TIMEOUT_SECS),
        }
    }

    pub fn from_config(config: &KilnConfig) -> Result<Self> {
        let profile = ClientProfile {
            http_profile: HttpProfile {
                endpoint: endpoint_host(config),
                ..HttpProfile::default()
            },
        };
        let client = Ai3dClient::new(config.credentials()?, endpoint_region(config), profile);
        Ok(Self::new(client))
    }
}

pub fn submit_request(spec: &ResolvedJobSpec) -> SubmitHunyuanTo3DProJobRequest {
    SubmitHunyuanTo3DProJobRequest {
        prompt: spec.prompt.clone(),
        image_url: spec.front_image_url.clone(),
        multi_view_images: spec
            .multi_view
            .iter()
            .map(|v| ViewImage {
                view: v.view.as_str().to_string(),
                image_url: v.image_url.clone(),
            })
            .collect(),
        enable_pbr: Some(spec.options.enable_pbr),
        face_count: Some(spec.options.face_count),
        generate_type: Some(spec.options.generate_type.as_str().to_string()),
        polygon_type: spec.options.polygon_type.map(|p| p.as_str().to_string()),
    }
}

pub fn job_status(job_id: &str, response: QueryHunyuanTo3DProJobResponse) -> JobStatus {
    let status = response.status.unwrap_or_default();
    let error_code = response.error_code.filter(|c| !c.is_empty());

    match map_job_state(&status) {
        Some(JobState::Succeeded) => {
            let files = response
                .result_file_3ds
                .unwrap_or_default()
                .into_iter()
                .filter_map(|f| {
                    let url = f.url.filter(|u| !u.is_empty())?;
                    Some(ResultFile {
                        file_type: f.file_type.unwrap_or_else(|| "UNKNOWN".to_string()),
                        url,
                        preview_url: f.preview_image_url.filter(|p| !p.is_empty()),
                    })
                })
                .collect();
            JobStatus::succeeded(job_id, files)
        }
        Some(JobState::Failed) => JobStatus::failed(
            job_id,
            error_code,
            response
                .error_message
                .filter(|m| !m.is_empty())
                .unwrap_or_else(|| "Job failed without an error message".to_string()),
        ),
        Some(state) => JobStatus::in_progress(job_id, state),
        None => JobStatus::failed(
            job_id,
            error_code,
            format!("Unrecognised job status '{}'", status),
        ),
    }
}

/// Map client errors onto the crate's error taxonomy
pub fn classify_sdk_error(error: SdkError) -> KilnError {
    match error {
        SdkError::Api {
            code,
            message,
            request_id,
        } => classify_api_error(&code, &message, request_id),
        SdkError::Http { status, message } => match status {
            401 | 403 => KilnError::Authentication(message),
            429 | 500..=599 => KilnError::TransientNetwork(message),
            _ => KilnError::Provider {
                code: format!("HTTP{}", status),
                message,
                request_id: None,
            },
        },
        SdkError::Network(message) => KilnError::TransientNetwork(message),
        SdkError::Parse(message) => KilnError::Serialization(message),
        SdkError::Signing(message) => KilnError::Authentication(message),
    }
}

impl ModelProvider for SdkProvider {
    fn name(&self) -> &str {
        "sdk"
    }

    fn submit(&self, spec: &ResolvedJobSpec) -> Result<JobHandle> {
        let response = self
            .client
            .submit_hunyuan_to_3d_pro_job(&submit_request(spec))
            .map_err(classify_sdk_error)?;

        let job_id = response
            .job_id
            .filter(|j| !j.is_empty())
            .ok_or_else(|| KilnError::Provider {
                code: "MissingJobId".to_string(),
                message: "No JobId in submit response".to_string(),
                request_id: response.request_id.clone(),
            })?;
        debug!(job_id = %job_id, region = %self.client.region(), "submitted via sdk");
        Ok(JobHandle::new(job_id))
    }

    fn poll(&self, handle: &JobHandle) -> Result<JobStatus> {
        let request = QueryHunyuanTo3DProJobRequest {
            job_id: handle.job_id.clone(),
        };
        let response = self
            .client
            .query_hunyuan_to_3d_pro_job(&request)
            .map_err(classify_sdk_error)?;
        Ok(job_status(&handle.job_id, response))
    }

    fn download_result(&self, status: &JobStatus) -> Result<DownloadedArchive> {
        status.require_succeeded()?;
        http::download_first_available(&self.download_agent, &status.result_files)
    }
}
