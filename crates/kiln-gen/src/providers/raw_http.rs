//! Raw HTTP provider for the Hunyuan 3D service
//!
//! Builds request bodies and reads responses as plain `serde_json::Value`,
//! signing every call with TC3-HMAC-SHA256.

use chrono::Utc;
use kiln_core::{KilnError, Result};
use serde_json::{json, Value};
use tracing::debug;

use super::http::{self, build_agent, classify_api_transport_error};
use super::{
    classify_api_error, endpoint_host, endpoint_region, map_job_state, API_SERVICE, API_VERSION,
    QUERY_ACTION, SUBMIT_ACTION,
};
use crate::config::KilnConfig;
use crate::provider::*;
use crate::signing::{tc3_headers, ApiTarget, Credentials};
use crate::spec::ResolvedJobSpec;

/// Provider that talks to the API with hand-signed HTTP requests
pub struct RawHttpProvider {
    credentials: Credentials,
    host: String,
    region: String,
    agent: ureq::Agent,
    download_agent: ureq::Agent,
}

impl RawHttpProvider {
    pub fn new(credentials: Credentials, host: impl Into<String>, region: impl Into<String>) -> Self {
        Self {
            credentials,
            host: host.into(),
            region: region.into(),
            agent: build_agent(http::REQUEST_TIMEOUT_SECS),
            download_agent: build_agent(http::DOWNLOAD_TIMEOUT_SECS),
        }
    }

    pub fn from_config(config: &KilnConfig) -> Result<Self> {
        Ok(Self::new(
            config.credentials()?,
            endpoint_host(config),
            endpoint_region(config),
        ))
    }

    fn target(&self) -> ApiTarget<'_> {
        ApiTarget {
            host: &self.host,
            service: API_SERVICE,
            region: &self.region,
            version: API_VERSION,
        }
    }

    /// Sign and POST one action, returning the `Response` object
    fn call_api(&self, action: &str, params: &Value) -> Result<Value> {
        let payload = serde_json::to_string(params)?;
        let headers = tc3_headers(
            &self.credentials,
            self.target(),
            action,
            &payload,
            Utc::now().timestamp(),
        )?;

        let url = format!("https://{}", self.host);
        let mut request = self.agent.post(url.as_str());
        for (name, value) in &headers {
            request = request.header(*name, value.as_str());
        }

        let mut response = request
            .send(payload.as_str())
            .map_err(|e| classify_api_transport_error(action, &e))?;
        let body = response.body_mut().read_to_string().map_err(|e| {
            KilnError::TransientNetwork(format!("{}: failed to read response: {}", action, e))
        })?;

        let data: Value = serde_json::from_str(&body).map_err(|e| {
            KilnError::Serialization(format!("{}: invalid JSON response: {}", action, e))
        })?;
        unwrap_response(data)
    }
}

/// JSON body for `SubmitHunyuanTo3DProJob`
pub fn build_submit_params(spec: &ResolvedJobSpec) -> Value {
    let mut params = json!({
        "EnablePBR": spec.options.enable_pbr,
        "FaceCount": spec.options.face_count,
        "GenerateType": spec.options.generate_type.as_str(),
    });

    if let Some(prompt) = &spec.prompt {
        params["Prompt"] = json!(prompt);
    }
    if let Some(url) = &spec.front_image_url {
        params["ImageUrl"] = json!(url);
    }
    if !spec.multi_view.is_empty() {
        params["MultiViewImages"] = Value::Array(
            spec.multi_view
                .iter()
                .map(|v| json!({ "View": v.view.as_str(), "ImageUrl": v.image_url }))
                .collect(),
        );
    }
    if let Some(polygon_type) = spec.options.polygon_type {
        params["PolygonType"] = json!(polygon_type.as_str());
    }
    params
}

/// Strip the `{"Response": ...}` envelope, turning `Response.Error` into a
/// classified error
pub fn unwrap_response(data: Value) -> Result<Value> {
    let response = match data {
        Value::Object(mut map) => match map.remove("Response") {
            Some(inner) => inner,
            None => Value::Object(map),
        },
        other => other,
    };

    if let Some(error) = response.get("Error") {
        let code = error
            .get("Code")
            .and_then(|c| c.as_str())
            .unwrap_or("Unknown");
        let message = error
            .get("Message")
            .and_then(|m| m.as_str())
            .unwrap_or("Unknown error");
        let request_id = response
            .get("RequestId")
            .and_then(|r| r.as_str())
            .map(|s| s.to_string());
        return Err(classify_api_error(code, message, request_id));
    }
    Ok(response)
}

/// Job id from a submit response
pub fn parse_submit_response(response: &Value) -> Result<String> {
    response
        .get("JobId")
        .and_then(|j| j.as_str())
        .filter(|j| !j.is_empty())
        .map(|s| s.to_string())
        .ok_or_else(|| KilnError::Provider {
            code: "MissingJobId".to_string(),
            message: "No JobId in submit response".to_string(),
            request_id: response
                .get("RequestId")
                .and_then(|r| r.as_str())
                .map(|s| s.to_string()),
        })
}

/// Status from a query response
pub fn parse_query_response(job_id: &str, response: &Value) -> JobStatus {
    let status = response
        .get("Status")
        .and_then(|s| s.as_str())
        .unwrap_or("");
    let error_code = response
        .get("ErrorCode")
        .and_then(|c| c.as_str())
        .filter(|c| !c.is_empty())
        .map(|s| s.to_string());
    let error_message = response
        .get("ErrorMessage")
        .and_then(|m| m.as_str())
        .filter(|m| !m.is_empty())
        .map(|s| s.to_string());

    match map_job_state(status) {
        Some(JobState::Succeeded) => {
            let files = response
                .get("ResultFile3Ds")
                .and_then(|f| f.as_array())
                .map(|files| {
                    files
                        .iter()
                        .filter_map(|f| {
                            let url = f.get("Url").and_then(|u| u.as_str())?;
                            Some(ResultFile {
                                file_type: f
                                    .get("Type")
                                    .and_then(|t| t.as_str())
                                    .unwrap_or("UNKNOWN")
                                    .to_string(),
                                url: url.to_string(),
                                preview_url: f
                                    .get("PreviewImageUrl")
                                    .and_then(|p| p.as_str())
                                    .filter(|p| !p.is_empty())
                                    .map(|s| s.to_string()),
                            })
                        })
                        .filter(|f| !f.url.is_empty())
                        .collect()
                })
                .unwrap_or_default();
            JobStatus::succeeded(job_id, files)
        }
        Some(JobState::Failed) => JobStatus::failed(
            job_id,
            error_code,
            error_message.unwrap_or_else(|| "Job failed without an error message".to_string()),
        ),
        Some(state) => JobStatus::in_progress(job_id, state),
        None => JobStatus::failed(
            job_id,
            error_code,
            format!("Unrecognised job status '{}'", status),
        ),
    }
}

impl ModelProvider for RawHttpProvider {
    fn name(&self) -> &str {
        "http"
    }

    fn submit(&self, spec: &ResolvedJobSpec) -> Result<JobHandle> {
        let params = build_submit_params(spec);
        let response = self.call_api(SUBMIT_ACTION, &params)?;
        let job_id = parse_submit_response(&response)?;
        debug!(job_id = %job_id, "submitted via raw http");
        Ok(JobHandle::new(job_id))
    }

    fn poll(&self, handle: &JobHandle) -> Result<JobStatus> {
        let response = self.call_api(QUERY_ACTION, &json!({ "JobId": handle.job_id }))?;
        Ok(parse_query_response(&handle.job_id, &response))
    }

    fn download_result(&self, status: &JobStatus) -> Result<DownloadedArchive> {
        status.require_succeeded()?;
        http::download_first_available(&self.download_agent, &status.result_files)
    }
}
