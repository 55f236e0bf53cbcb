//! Provider registry
//!
//! Maps the configured provider kind to a concrete implementation, and holds
//! the service constants and error classification shared by the network
//! providers.

pub mod http;
pub mod mock;
pub mod raw_http;
pub mod sdk;

use std::sync::Arc;

use kiln_core::{KilnError, Result};

use crate::config::KilnConfig;
use crate::provider::{JobState, ModelProvider, ProviderKind};

pub const API_HOST: &str = "ai3d.tencentcloudapi.com";
pub const API_REGION: &str = "ap-guangzhou";
pub const API_VERSION: &str = "2025-05-13";
pub const API_SERVICE: &str = "ai3d";

pub const SUBMIT_ACTION: &str = "SubmitHunyuanTo3DProJob";
pub const QUERY_ACTION: &str = "QueryHunyuanTo3DProJob";

/// Create the provider selected in the config
pub fn create_provider(config: &KilnConfig) -> Result<Arc<dyn ModelProvider>> {
    match config.provider_kind() {
        ProviderKind::Mock => Ok(Arc::new(mock::ScriptedProvider::new())),
        ProviderKind::Http => Ok(Arc::new(raw_http::RawHttpProvider::from_config(config)?)),
        ProviderKind::Sdk => Ok(Arc::new(sdk::SdkProvider::from_config(config)?)),
    }
}

/// List all available provider names
pub fn available_providers() -> Vec<&'static str> {
    vec!["sdk", "http", "mock"]
}

/// API host from the config, without any scheme or trailing slash
pub(crate) fn endpoint_host(config: &KilnConfig) -> String {
    config
        .provider
        .endpoint
        .as_deref()
        .map(|e| {
            e.trim()
                .trim_start_matches("https://")
                .trim_start_matches("http://")
                .trim_end_matches('/')
                .to_string()
        })
        .filter(|e| !e.is_empty())
        .unwrap_or_else(|| API_HOST.to_string())
}

pub(crate) fn endpoint_region(config: &KilnConfig) -> String {
    config
        .provider
        .region
        .clone()
        .unwrap_or_else(|| API_REGION.to_string())
}

/// Classify an error returned in a service response body
pub fn classify_api_error(code: &str, message: &str, request_id: Option<String>) -> KilnError {
    let detail = match &request_id {
        Some(id) => format!("{}: {} (request_id={})", code, message, id),
        None => format!("{}: {}", code, message),
    };

    if code.starts_with("AuthFailure") {
        KilnError::Authentication(detail)
    } else if code.starts_with("InvalidParameter")
        || code.starts_with("MissingParameter")
        || code.starts_with("UnknownParameter")
        || code.starts_with("UnsupportedOperation")
    {
        KilnError::Validation(detail)
    } else if code.starts_with("ResourceNotFound") {
        KilnError::JobNotFound(detail)
    } else if code.starts_with("RequestLimitExceeded")
        || code.starts_with("InternalError")
        || code.starts_with("ResourceUnavailable")
    {
        KilnError::TransientNetwork(detail)
    } else {
        KilnError::Provider {
            code: code.to_string(),
            message: message.to_string(),
            request_id,
        }
    }
}

/// WAIT / RUN / DONE / FAIL
pub fn map_job_state(status: &str) -> Option<JobState> {
    match status {
        "WAIT" => Some(JobState::Pending),
        "RUN" => Some(JobState::Running),
        "DONE" => Some(JobState::Succeeded),
        "FAIL" => Some(JobState::Failed),
        _ => None,
    }
}
