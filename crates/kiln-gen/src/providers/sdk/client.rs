//! Typed `ai3d` API client
//!
//! Request/response models are plain serde structs; every call is signed
//! with TC3-HMAC-SHA256 and unwrapped from the `{"Response": ...}` envelope.

use std::time::Duration;

use chrono::Utc;
use serde::de::DeserializeOwned;
use serde::Serialize;
use thiserror::Error;

use super::models::*;
use crate::providers::{http, API_HOST, API_SERVICE, API_VERSION, QUERY_ACTION, SUBMIT_ACTION};
use crate::signing::{tc3_headers, ApiTarget};

pub use crate::signing::Credentials as Credential;

/// Errors surfaced by the client, before classification
#[derive(Debug, Error)]
pub enum SdkError {
    #[error("[{code}] {message} (request_id={request_id:?})")]
    Api {
        code: String,
        message: String,
        request_id: Option<String>,
    },

    #[error("HTTP {status}: {message}")]
    Http { status: u16, message: String },

    #[error("Network error: {0}")]
    Network(String),

    #[error("Failed to parse response: {0}")]
    Parse(String),

    #[error("Failed to sign request: {0}")]
    Signing(String),
}

/// Endpoint and timeout settings
#[derive(Debug, Clone)]
pub struct HttpProfile {
    pub endpoint: String,
    pub req_timeout: Duration,
}

impl Default for HttpProfile {
    fn default() -> Self {
        Self {
            endpoint: API_HOST.to_string(),
            req_timeout: Duration::from_secs(http::REQUEST_TIMEOUT_SECS),
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct ClientProfile {
    pub http_profile: HttpProfile,
}

pub struct Ai3dClient {
    credential: Credential,
    region: String,
    profile: ClientProfile,
    agent: ureq::Agent,
}

impl Ai3dClient {
    pub fn new(credential: Credential, region: impl Into<String>, profile: ClientProfile) -> Self {
        let agent = http::build_agent(profile.http_profile.req_timeout.as_secs().max(1));
        Self {
            credential,
            region: region.into(),
            profile,
            agent,
        }
    }

    pub fn region(&self) -> &str {
        &self.region
    }

    pub fn submit_hunyuan_to_3d_pro_job(
        &self,
        request: &SubmitHunyuanTo3DProJobRequest,
    ) -> std::result::Result<SubmitHunyuanTo3DProJobResponse, SdkError> {
        self.call(SUBMIT_ACTION, request)
    }

    pub fn query_hunyuan_to_3d_pro_job(
        &self,
        request: &QueryHunyuanTo3DProJobRequest,
    ) -> std::result::Result<QueryHunyuanTo3DProJobResponse, SdkError> {
        self.call(QUERY_ACTION, request)
    }

    fn call<Req, Resp>(&self, action: &str, request: &Req) -> std::result::Result<Resp, SdkError>
    where
        Req: Serialize,
        Resp: DeserializeOwned,
    {
        let payload =
            serde_json::to_string(request).map_err(|e| SdkError::Parse(e.to_string()))?;
        let endpoint = &self.profile.http_profile.endpoint;
        let target = ApiTarget {
            host: endpoint,
            service: API_SERVICE,
            region: &self.region,
            version: API_VERSION,
        };
        let headers = tc3_headers(
            &self.credential,
            target,
            action,
            &payload,
            Utc::now().timestamp(),
        )
        .map_err(|e| SdkError::Signing(e.to_string()))?;

        let url = format!("https://{}", endpoint);
        let mut builder = self.agent.post(url.as_str());
        for (name, value) in &headers {
            builder = builder.header(*name, value.as_str());
        }

        let mut response = builder.send(payload.as_str()).map_err(transport_error)?;
        let body = response
            .body_mut()
            .read_to_string()
            .map_err(|e| SdkError::Network(e.to_string()))?;
        parse_envelope(&body)
    }
}

fn transport_error(e: ureq::Error) -> SdkError {
    match e {
        ureq::Error::StatusCode(status) => SdkError::Http {
            status,
            message: e.to_string(),
        },
        other if http::is_retryable_error(&other) => SdkError::Network(other.to_string()),
        other => SdkError::Http {
            status: 0,
            message: other.to_string(),
        },
    }
}

/// Decode `{"Response": {...}}`, surfacing `Response.Error` as `SdkError::Api`
pub fn parse_envelope<Resp: DeserializeOwned>(body: &str) -> std::result::Result<Resp, SdkError> {
    let mut value: serde_json::Value =
        serde_json::from_str(body).map_err(|e| SdkError::Parse(e.to_string()))?;
    let response = value
        .get_mut("Response")
        .map(serde_json::Value::take)
        .ok_or_else(|| SdkError::Parse("missing Response object".to_string()))?;

    if let Some(error) = response.get("Error") {
        let error: ApiErrorBody =
            serde_json::from_value(error.clone()).map_err(|e| SdkError::Parse(e.to_string()))?;
        return Err(SdkError::Api {
            code: error.code,
            message: error.message,
            request_id: response
                .get("RequestId")
                .and_then(|r| r.as_str())
                .map(|s| s.to_string()),
        });
    }

    serde_json::from_value(response).map_err(|e| SdkError::Parse(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_envelope_success() {
        let response: SubmitHunyuanTo3DProJobResponse =
            parse_envelope(r#"{"Response":{"JobId":"job-77","RequestId":"r-1"}}"#).unwrap();
        assert_eq!(response.job_id.as_deref(), Some("job-77"));
    }

    #[test]
    fn test_parse_envelope_api_error() {
        let err = parse_envelope::<QueryHunyuanTo3DProJobResponse>(
            r#"{"Response":{"Error":{"Code":"ResourceNotFound.JobNotExist","Message":"no job"},"RequestId":"r-2"}}"#,
        )
        .unwrap_err();
        match err {
            SdkError::Api {
                code, request_id, ..
            } => {
                assert_eq!(code, "ResourceNotFound.JobNotExist");
                assert_eq!(request_id.as_deref(), Some("r-2"));
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_parse_envelope_rejects_garbage() {
        assert!(matches!(
            parse_envelope::<SubmitHunyuanTo3DProJobResponse>("<html>"),
            Err(SdkError::Parse(_))
        ));
        assert!(matches!(
            parse_envelope::<SubmitHunyuanTo3DProJobResponse>(r#"{"JobId":"x"}"#),
            Err(SdkError::Parse(_))
        ));
    }

    #[test]
    fn test_default_profile_targets_public_endpoint() {
        let client = Ai3dClient::new(
            Credential::new("AKIDEXAMPLE", "secret"),
            "ap-guangzhou",
            ClientProfile::default(),
        );
        assert_eq!(client.region(), "ap-guangzhou");
        assert_eq!(client.profile.http_profile.endpoint, API_HOST);
    }
}
