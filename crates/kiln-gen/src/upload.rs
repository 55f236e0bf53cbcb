//! Object-storage upload for local reference images
//!
//! The 3D service fetches input images itself, unauthenticated, so local
//! images are PUT to a bucket with public-read visibility first.

use std::path::Path;
use std::sync::Mutex;
use std::time::Instant;

use chrono::Utc;
use kiln_core::{KilnError, Result};

use crate::config::KilnConfig;
use crate::providers::http::{self, build_agent};
use crate::signing::{
    amz_date_now, canonical_uri, sha256_hex, CanonicalRequest, Credentials, SigV4Signer,
};

/// Uploads bytes and returns a publicly retrievable URL
pub trait ObjectUploader: Send + Sync {
    fn upload(&self, data: &[u8], content_type: &str, file_name: &str) -> Result<String>;
}

/// Tencent COS uploader using the bucket's S3-compatible endpoint
pub struct CosUploader {
    credentials: Credentials,
    bucket: String,
    region: String,
    prefix: String,
    agent: ureq::Agent,
}

impl CosUploader {
    pub fn new(
        credentials: Credentials,
        bucket: impl Into<String>,
        region: impl Into<String>,
        prefix: impl Into<String>,
    ) -> Result<Self> {
        let bucket = bucket.into();
        let region = region.into();
        if bucket.trim().is_empty() || region.trim().is_empty() {
            return Err(KilnError::Config(
                "COS bucket and region are required to upload local images. Set TENCENT_COS_BUCKET and TENCENT_COS_REGION".to_string(),
            ));
        }
        if !credentials.is_complete() {
            return Err(KilnError::Config(
                "COS uploads need TENCENT_SECRET_ID and TENCENT_SECRET_KEY".to_string(),
            ));
        }
        Ok(Self {
            credentials,
            bucket,
            region,
            prefix: prefix.into().trim_matches('/').to_string(),
            agent: build_agent(http::REQUEST_TIMEOUT_SECS),
        })
    }

    pub fn from_config(config: &KilnConfig) -> Result<Self> {
        let missing = config.missing_required(true);
        if !missing.is_empty() {
            return Err(KilnError::Config(format!(
                "Cannot upload local images, missing: {}",
                missing.join(", ")
            )));
        }
        Self::new(
            config.credentials()?,
            config.storage.bucket.clone().unwrap_or_default(),
            config.storage.region.clone().unwrap_or_default(),
            config.upload_prefix(),
        )
    }

    pub fn host(&self) -> String {
        format!("{}.cos.{}.myqcloud.com", self.bucket, self.region)
    }

    /// `<prefix>/<unix>_<8 hex>_<file name>`
    pub fn object_key(&self, file_name: &str, unix_secs: i64, nonce: &str) -> String {
        let name = format!("{}_{}_{}", unix_secs, nonce, sanitize_file_name(file_name));
        if self.prefix.is_empty() {
            name
        } else {
            format!("{}/{}", self.prefix, name)
        }
    }

    pub fn public_url(&self, key: &str) -> String {
        format!("https://{}{}", self.host(), canonical_uri(&format!("/{}", key)))
    }
}

impl ObjectUploader for CosUploader {
    fn upload(&self, data: &[u8], content_type: &str, file_name: &str) -> Result<String> {
        let nonce = uuid::Uuid::new_v4().simple().to_string();
        let key = self.object_key(file_name, Utc::now().timestamp(), &nonce[..8]);
        let host = self.host();
        let uri = canonical_uri(&format!("/{}", key));
        let amz_date = amz_date_now();
        let start = Instant::now();

        let payload_hash = sha256_hex(data);
        let request = CanonicalRequest::new("PUT", &uri, "", data)
            .header("content-type", content_type)
            .header("host", &host)
            .header("x-amz-acl", "public-read")
            .header("x-amz-content-sha256", &payload_hash)
            .header("x-amz-date", &amz_date);
        let signature = SigV4Signer::new(&self.credentials, &self.region, "s3")
            .sign(&request, &amz_date)
            .map_err(|e| KilnError::Upload(format!("Failed to sign upload: {}", e)))?;

        let url = self.public_url(&key);
        let result = self
            .agent
            .put(url.as_str())
            .header("Authorization", signature.authorization.as_str())
            .header("Content-Type", content_type)
            .header("x-amz-acl", "public-read")
            .header("x-amz-content-sha256", payload_hash.as_str())
            .header("x-amz-date", amz_date.as_str())
            .send(data);

        match result {
            Ok(_) => {
                tracing::info!(
                    bucket = %self.bucket,
                    key = %key,
                    size_bytes = data.len(),
                    duration_ms = start.elapsed().as_secs_f64() * 1000.0,
                    "COS upload successful"
                );
                Ok(url)
            }
            Err(e) => {
                tracing::error!(
                    error = %e,
                    bucket = %self.bucket,
                    key = %key,
                    size_bytes = data.len(),
                    "COS upload failed"
                );
                Err(KilnError::Upload(format!("PUT {} failed: {}", key, e)))
            }
        }
    }
}

/// Keep only the base name, replacing characters that need escaping in URLs
pub fn sanitize_file_name(file_name: &str) -> String {
    let base = Path::new(file_name)
        .file_name()
        .and_then(|n| n.to_str())
        .filter(|s| !s.is_empty() && *s != "." && *s != "..")
        .unwrap_or("image");
    base.chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '.' | '-' | '_') {
                c
            } else {
                '_'
            }
        })
        .collect()
}

/// Keeps uploads in memory and hands back `mock://` URLs. Used for dry runs.
#[derive(Default)]
pub struct MemoryUploader {
    uploads: Mutex<Vec<(String, String, usize)>>,
}

impl MemoryUploader {
    pub fn new() -> Self {
        Self::default()
    }

    /// `(file name, content type, size)` of every upload, in order
    pub fn uploads(&self) -> Vec<(String, String, usize)> {
        self.uploads.lock().map(|u| u.clone()).unwrap_or_default()
    }
}

impl ObjectUploader for MemoryUploader {
    fn upload(&self, data: &[u8], content_type: &str, file_name: &str) -> Result<String> {
        let mut uploads = self
            .uploads
            .lock()
            .map_err(|_| KilnError::Upload("upload log poisoned".to_string()))?;
        uploads.push((file_name.to_string(), content_type.to_string(), data.len()));
        Ok(format!(
            "mock://uploads/{}_{}",
            uploads.len(),
            sanitize_file_name(file_name)
        ))
    }
}
