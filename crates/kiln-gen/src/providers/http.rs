//! Shared HTTP plumbing for the network-backed providers
//!
//! Blocking `ureq` agents, transport error classification, and the
//! result-download loop used by both the raw and SDK providers.

use std::io::Read;
use std::time::Duration;

use kiln_core::{KilnError, Result};
use tracing::{debug, warn};

use crate::provider::{DownloadedArchive, ResultFile};

pub const REQUEST_TIMEOUT_SECS: u64 = 60;
pub const DOWNLOAD_TIMEOUT_SECS: u64 = 300;

pub fn build_agent(timeout_secs: u64) -> ureq::Agent {
    let config = ureq::Agent::config_builder()
        .timeout_global(Some(Duration::from_secs(timeout_secs)))
        .build();
    config.into()
}

/// Connection-level failures and overload responses are worth retrying
pub fn is_retryable_error(e: &ureq::Error) -> bool {
    match e {
        ureq::Error::Timeout(_)
        | ureq::Error::Io(_)
        | ureq::Error::ConnectionFailed
        | ureq::Error::HostNotFound => true,
        ureq::Error::StatusCode(code) => *code == 429 || (500..=599).contains(code),
        _ => false,
    }
}

/// Map a transport error from an API call onto the error taxonomy
pub fn classify_api_transport_error(context: &str, e: &ureq::Error) -> KilnError {
    match e {
        ureq::Error::StatusCode(401) | ureq::Error::StatusCode(403) => {
            KilnError::Authentication(format!("{}: {}", context, e))
        }
        _ if is_retryable_error(e) => KilnError::TransientNetwork(format!("{}: {}", context, e)),
        ureq::Error::StatusCode(code) => KilnError::Provider {
            code: format!("HTTP{}", code),
            message: format!("{}: {}", context, e),
            request_id: None,
        },
        _ => KilnError::Provider {
            code: "Transport".to_string(),
            message: format!("{}: {}", context, e),
            request_id: None,
        },
    }
}

/// GET a URL into memory. Retryable failures come back as `TransientNetwork`,
/// everything else as `Download`.
pub fn fetch_bytes(agent: &ureq::Agent, url: &str) -> Result<Vec<u8>> {
    match agent.get(url).call() {
        Ok(response) => {
            let mut reader = response.into_body().into_reader();
            let mut bytes = Vec::new();
            reader.read_to_end(&mut bytes).map_err(|e| {
                KilnError::TransientNetwork(format!("Failed to read {}: {}", url, e))
            })?;
            Ok(bytes)
        }
        Err(e) if is_retryable_error(&e) => Err(KilnError::TransientNetwork(format!(
            "Failed to fetch {}: {}",
            url, e
        ))),
        Err(e) => Err(KilnError::Download(format!("Failed to fetch {}: {}", url, e))),
    }
}

/// Try each result file in order; the first retrievable payload wins.
///
/// The preview image of the winning file is fetched best-effort. If every
/// URL failed and all failures were transient the error is `TransientNetwork`
/// so the caller may retry; otherwise it is `Download`.
pub fn download_first_available(
    agent: &ureq::Agent,
    files: &[ResultFile],
) -> Result<DownloadedArchive> {
    let mut failures = Vec::new();
    let mut all_transient = true;

    for file in files {
        debug!(url = %file.url, file_type = %file.file_type, "downloading result");
        match fetch_bytes(agent, &file.url) {
            Ok(bytes) => {
                let preview = file.preview_url.as_deref().and_then(|preview_url| {
                    match fetch_bytes(agent, preview_url) {
                        Ok(data) => Some(data),
                        Err(e) => {
                            warn!(url = %preview_url, error = %e, "skipping preview image");
                            None
                        }
                    }
                });
                return Ok(DownloadedArchive::detect(&file.url, &file.file_type, bytes)
                    .with_preview(preview));
            }
            Err(e) => {
                warn!(url = %file.url, error = %e, "result file not retrievable");
                all_transient &= e.is_transient();
                failures.push(e.to_string());
            }
        }
    }

    if failures.is_empty() {
        return Err(KilnError::Download("No result files to download".to_string()));
    }
    let summary = failures.join("; ");
    if all_transient {
        Err(KilnError::TransientNetwork(summary))
    } else {
        Err(KilnError::Download(summary))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retryable_status_codes() {
        assert!(is_retryable_error(&ureq::Error::StatusCode(429)));
        assert!(is_retryable_error(&ureq::Error::StatusCode(503)));
        assert!(is_retryable_error(&ureq::Error::ConnectionFailed));
        assert!(!is_retryable_error(&ureq::Error::StatusCode(404)));
        assert!(!is_retryable_error(&ureq::Error::StatusCode(401)));
    }

    #[test]
    fn test_api_transport_classification() {
        assert!(matches!(
            classify_api_transport_error("submit", &ureq::Error::StatusCode(403)),
            KilnError::Authentication(_)
        ));
        assert!(matches!(
            classify_api_transport_error("submit", &ureq::Error::HostNotFound),
            KilnError::TransientNetwork(_)
        ));
        assert!(matches!(
            classify_api_transport_error("submit", &ureq::Error::StatusCode(400)),
            KilnError::Provider { .. }
        ));
    }

    #[test]
    fn test_empty_result_list_is_download_error() {
        let agent = build_agent(1);
        let err = download_first_available(&agent, &[]).unwrap_err();
        assert!(matches!(err, KilnError::Download(_)));
    }
}
