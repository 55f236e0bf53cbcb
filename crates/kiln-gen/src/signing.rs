//! Request signing for the 3D service API and the object store
//!
//! Both schemes share one canonical request format:
//!
//! ```text
//! METHOD\nURI\nQUERY\n<name:value\n per header>\nSIGNED_HEADERS\nHEX(SHA256(payload))
//! ```
//!
//! and differ only in how the date-scoped signing key is derived:
//! - TC3-HMAC-SHA256 (3D service): `"TC3"+key → date → service → "tc3_request"`
//! - AWS4-HMAC-SHA256 (S3-compatible object store): `"AWS4"+key → date → region → service → "aws4_request"`
//!
//! Headers are lower-cased and sorted by name, so insertion order never
//! changes the signature.

use chrono::{DateTime, Utc};
use hmac::{Hmac, Mac};
use kiln_core::{KilnError, Result};
use percent_encoding::{utf8_percent_encode, AsciiSet, NON_ALPHANUMERIC};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use std::fmt;

type HmacSha256 = Hmac<Sha256>;

pub const TC3_ALGORITHM: &str = "TC3-HMAC-SHA256";
pub const SIGV4_ALGORITHM: &str = "AWS4-HMAC-SHA256";
pub const JSON_CONTENT_TYPE: &str = "application/json; charset=utf-8";

/// RFC 3986 unreserved characters stay literal in canonical URIs
const URI_SEGMENT: &AsciiSet = &NON_ALPHANUMERIC
    .remove(b'-')
    .remove(b'.')
    .remove(b'_')
    .remove(b'~');

/// Long-lived cloud credentials (ID + key)
#[derive(Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Credentials {
    pub secret_id: String,
    pub secret_key: String,
}

impl Credentials {
    pub fn new(secret_id: impl Into<String>, secret_key: impl Into<String>) -> Self {
        Self {
            secret_id: secret_id.into(),
            secret_key: secret_key.into(),
        }
    }

    pub fn is_complete(&self) -> bool {
        !self.secret_id.is_empty() && !self.secret_key.is_empty()
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("secret_id", &self.secret_id)
            .field("secret_key", &"<redacted>")
            .finish()
    }
}

/// Hex-encoded SHA-256 of a payload
pub fn sha256_hex(data: &[u8]) -> String {
    hex::encode(Sha256::digest(data))
}

fn hmac_sha256(key: &[u8], msg: &str) -> Result<Vec<u8>> {
    let mut mac = HmacSha256::new_from_slice(key)
        .map_err(|e| KilnError::Authentication(format!("Invalid signing key: {}", e)))?;
    mac.update(msg.as_bytes());
    Ok(mac.finalize().into_bytes().to_vec())
}

/// Percent-encode each segment of a URI path, keeping the `/` separators
pub fn canonical_uri(path: &str) -> String {
    if path.is_empty() {
        return "/".to_string();
    }
    path.split('/')
        .map(|segment| utf8_percent_encode(segment, URI_SEGMENT).to_string())
        .collect::<Vec<_>>()
        .join("/")
}

/// Deterministic serialization of an HTTP request for signing
#[derive(Debug, Clone)]
pub struct CanonicalRequest {
    method: String,
    uri: String,
    query: String,
    headers: BTreeMap<String, String>,
    payload_hash: String,
}

impl CanonicalRequest {
    /// `uri` must already be canonical (see [`canonical_uri`]); `query` is
    /// the already-sorted, encoded query string (empty for none).
    pub fn new(method: &str, uri: &str, query: &str, payload: &[u8]) -> Self {
        Self {
            method: method.to_ascii_uppercase(),
            uri: uri.to_string(),
            query: query.to_string(),
            headers: BTreeMap::new(),
            payload_hash: sha256_hex(payload),
        }
    }

    /// Add a signed header. Names are lower-cased and values trimmed.
    pub fn header(mut self, name: &str, value: &str) -> Self {
        self.headers
            .insert(name.trim().to_ascii_lowercase(), value.trim().to_string());
        self
    }

    pub fn payload_hash(&self) -> &str {
        &self.payload_hash
    }

    /// `name;name;...` in sorted order
    pub fn signed_headers(&self) -> String {
        self.headers.keys().cloned().collect::<Vec<_>>().join(";")
    }

    pub fn canonical_headers(&self) -> String {
        self.headers
            .iter()
            .map(|(name, value)| format!("{}:{}\n", name, value))
            .collect()
    }

    pub fn to_canonical_string(&self) -> String {
        format!(
            "{}\n{}\n{}\n{}\n{}\n{}",
            self.method,
            self.uri,
            self.query,
            self.canonical_headers(),
            self.signed_headers(),
            self.payload_hash
        )
    }
}

/// A computed `Authorization` header plus its parts
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Signature {
    pub authorization: String,
    pub signature: String,
    pub credential_scope: String,
}

/// TC3-HMAC-SHA256 signer for Tencent Cloud API 3.0 requests
pub struct Tc3Signer<'a> {
    credentials: &'a Credentials,
    service: &'a str,
}

impl<'a> Tc3Signer<'a> {
    pub fn new(credentials: &'a Credentials, service: &'a str) -> Self {
        Self {
            credentials,
            service,
        }
    }

    /// Sign a request made at `timestamp` (Unix seconds)
    pub fn sign(&self, request: &CanonicalRequest, timestamp: i64) -> Result<Signature> {
        let date = utc_date(timestamp)?;
        let credential_scope = format!("{}/{}/tc3_request", date, self.service);
        let string_to_sign = format!(
            "{}\n{}\n{}\n{}",
            TC3_ALGORITHM,
            timestamp,
            credential_scope,
            sha256_hex(request.to_canonical_string().as_bytes())
        );

        let secret_date = hmac_sha256(
            format!("TC3{}", self.credentials.secret_key).as_bytes(),
            &date,
        )?;
        let secret_service = hmac_sha256(&secret_date, self.service)?;
        let secret_signing = hmac_sha256(&secret_service, "tc3_request")?;
        let signature = hex::encode(hmac_sha256(&secret_signing, &string_to_sign)?);

        let authorization = format!(
            "{} Credential={}/{}, SignedHeaders={}, Signature={}",
            TC3_ALGORITHM,
            self.credentials.secret_id,
            credential_scope,
            request.signed_headers(),
            signature
        );

        Ok(Signature {
            authorization,
            signature,
            credential_scope,
        })
    }
}

/// Fixed API coordinates for a TC3-signed call
#[derive(Debug, Clone, Copy)]
pub struct ApiTarget<'a> {
    pub host: &'a str,
    pub service: &'a str,
    pub region: &'a str,
    pub version: &'a str,
}

/// Build every header a TC3-signed JSON `POST /` call needs.
pub fn tc3_headers(
    credentials: &Credentials,
    target: ApiTarget<'_>,
    action: &str,
    payload: &str,
    timestamp: i64,
) -> Result<Vec<(&'static str, String)>> {
    let request = CanonicalRequest::new("POST", "/", "", payload.as_bytes())
        .header("content-type", JSON_CONTENT_TYPE)
        .header("host", target.host)
        .header("x-tc-action", &action.to_ascii_lowercase());
    let signature = Tc3Signer::new(credentials, target.service).sign(&request, timestamp)?;

    Ok(vec![
        ("Authorization", signature.authorization),
        ("Content-Type", JSON_CONTENT_TYPE.to_string()),
        ("X-TC-Action", action.to_string()),
        ("X-TC-Timestamp", timestamp.to_string()),
        ("X-TC-Version", target.version.to_string()),
        ("X-TC-Region", target.region.to_string()),
    ])
}

/// AWS Signature Version 4 signer (used against S3-compatible buckets)
pub struct SigV4Signer<'a> {
    credentials: &'a Credentials,
    region: &'a str,
    service: &'a str,
}

impl<'a> SigV4Signer<'a> {
    pub fn new(credentials: &'a Credentials, region: &'a str, service: &'a str) -> Self {
        Self {
            credentials,
            region,
            service,
        }
    }

    /// Sign a request; `amz_date` is `YYYYMMDD'T'HHMMSS'Z'`
    pub fn sign(&self, request: &CanonicalRequest, amz_date: &str) -> Result<Signature> {
        let date = amz_date.get(..8).ok_or_else(|| {
            KilnError::Validation(format!("Malformed x-amz-date '{}'", amz_date))
        })?;
        let credential_scope = format!(
            "{}/{}/{}/aws4_request",
            date, self.region, self.service
        );
        let string_to_sign = format!(
            "{}\n{}\n{}\n{}",
            SIGV4_ALGORITHM,
            amz_date,
            credential_scope,
            sha256_hex(request.to_canonical_string().as_bytes())
        );

        let k_date = hmac_sha256(
            format!("AWS4{}", self.credentials.secret_key).as_bytes(),
            date,
        )?;
        let k_region = hmac_sha256(&k_date, self.region)?;
        let k_service = hmac_sha256(&k_region, self.service)?;
        let k_signing = hmac_sha256(&k_service, "aws4_request")?;
        let signature = hex::encode(hmac_sha256(&k_signing, &string_to_sign)?);

        let authorization = format!(
            "{} Credential={}/{}, SignedHeaders={}, Signature={}",
            SIGV4_ALGORITHM,
            self.credentials.secret_id,
            credential_scope,
            request.signed_headers(),
            signature
        );

        Ok(Signature {
            authorization,
            signature,
            credential_scope,
        })
    }
}

/// `YYYY-MM-DD` in UTC for a Unix timestamp
fn utc_date(timestamp: i64) -> Result<String> {
    DateTime::<Utc>::from_timestamp(timestamp, 0)
        .map(|dt| dt.format("%Y-%m-%d").to_string())
        .ok_or_else(|| KilnError::Validation(format!("Timestamp out of range: {}", timestamp)))
}

/// `YYYYMMDD'T'HHMMSS'Z'` for the current instant
pub fn amz_date_now() -> String {
    Utc::now().format("%Y%m%dT%H%M%SZ").to_string()
}
