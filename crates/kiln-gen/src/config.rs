//! Layered configuration system
//!
//! Config is loaded with three layers of precedence (highest wins):
//! 1. Environment variables (`TENCENT_*`, `HUNYUAN3D_*`, `KILN_3D_PROVIDER`)
//! 2. Project-local: `.kiln/config.toml`
//! 3. Global: `~/.kiln/config.toml`
//!
//! The loaded config is turned into explicit constructor arguments; nothing
//! downstream reads the environment.

use kiln_core::{KilnError, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::warn;

use crate::backoff::{DEFAULT_POLL_INTERVAL_SECS, DEFAULT_TIMEOUT_SECS};
use crate::orchestrator::OrchestratorConfig;
use crate::provider::ProviderKind;
use crate::signing::Credentials;
use crate::spec::{GenerateType, GenerationOptions, PolygonType};

pub const DEFAULT_UPLOAD_PREFIX: &str = "hunyuan3d";

/// `[credentials]`
#[derive(Clone, Default, Serialize, Deserialize)]
pub struct CredentialsConfig {
    #[serde(default)]
    pub secret_id: Option<String>,
    #[serde(default)]
    pub secret_key: Option<String>,
}

impl fmt::Debug for CredentialsConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CredentialsConfig")
            .field("secret_id", &self.secret_id)
            .field("secret_key", &self.secret_key.as_ref().map(|_| "<redacted>"))
            .finish()
    }
}

/// `[provider]`
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ProviderConfig {
    #[serde(default)]
    pub kind: Option<ProviderKind>,
    /// Override for the API host, e.g. a regional endpoint
    #[serde(default)]
    pub endpoint: Option<String>,
    #[serde(default)]
    pub region: Option<String>,
}

/// `[storage]` - the bucket local reference images are uploaded to
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StorageConfig {
    #[serde(default)]
    pub bucket: Option<String>,
    #[serde(default)]
    pub region: Option<String>,
    #[serde(default)]
    pub prefix: Option<String>,
}

/// `[generation]`
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GenerationConfig {
    #[serde(default)]
    pub enable_pbr: Option<bool>,
    #[serde(default)]
    pub face_count: Option<u32>,
    #[serde(default)]
    pub generate_type: Option<GenerateType>,
    #[serde(default)]
    pub polygon_type: Option<PolygonType>,
    #[serde(default)]
    pub poll_interval_secs: Option<u64>,
    #[serde(default)]
    pub timeout_secs: Option<u64>,
}

/// Resolved configuration with environment variable overrides applied
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct KilnConfig {
    #[serde(default)]
    pub credentials: CredentialsConfig,
    #[serde(default)]
    pub provider: ProviderConfig,
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub generation: GenerationConfig,
}

impl KilnConfig {
    /// Load config with layered precedence: global < project < env vars
    pub fn load() -> Result<Self> {
        let mut config = KilnConfig::default();

        if let Some(global_path) = Self::global_config_path() {
            if global_path.exists() {
                config.merge(Self::load_file(&global_path)?);
            }
        }

        let local_path = PathBuf::from(".kiln/config.toml");
        if local_path.exists() {
            config.merge(Self::load_file(&local_path)?);
        }

        config.apply_env_overrides(|key| std::env::var(key).ok());
        Ok(config)
    }

    /// Load config from a specific file path only, plus env overrides
    pub fn load_from_file(path: &Path) -> Result<Self> {
        let mut config = Self::load_file(path)?;
        config.apply_env_overrides(|key| std::env::var(key).ok());
        Ok(config)
    }

    /// Parse a TOML document without consulting the environment
    pub fn from_toml_str(content: &str) -> Result<Self> {
        Ok(toml::from_str(content)?)
    }

    fn global_config_path() -> Option<PathBuf> {
        dirs::home_dir().map(|h| h.join(".kiln").join("config.toml"))
    }

    fn load_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        toml::from_str(&content).map_err(|e| {
            KilnError::Config(format!("Failed to parse config {}: {}", path.display(), e))
        })
    }

    /// Overlay every value set in `other` on top of `self`
    pub fn merge(&mut self, other: KilnConfig) {
        fn take<T>(base: &mut Option<T>, overlay: Option<T>) {
            if overlay.is_some() {
                *base = overlay;
            }
        }

        take(&mut self.credentials.secret_id, other.credentials.secret_id);
        take(&mut self.credentials.secret_key, other.credentials.secret_key);

        take(&mut self.provider.kind, other.provider.kind);
        take(&mut self.provider.endpoint, other.provider.endpoint);
        take(&mut self.provider.region, other.provider.region);

        take(&mut self.storage.bucket, other.storage.bucket);
        take(&mut self.storage.region, other.storage.region);
        take(&mut self.storage.prefix, other.storage.prefix);

        let generation = other.generation;
        take(&mut self.generation.enable_pbr, generation.enable_pbr);
        take(&mut self.generation.face_count, generation.face_count);
        take(&mut self.generation.generate_type, generation.generate_type);
        take(&mut self.generation.polygon_type, generation.polygon_type);
        take(
            &mut self.generation.poll_interval_secs,
            generation.poll_interval_secs,
        );
        take(&mut self.generation.timeout_secs, generation.timeout_secs);
    }

    /// Apply environment overrides read through `lookup`.
    ///
    /// Values that fail to parse are ignored with a warning.
    pub fn apply_env_overrides<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        if let Some(v) = get("TENCENT_SECRET_ID") {
            self.credentials.secret_id = Some(v);
        }
        if let Some(v) = get("TENCENT_SECRET_KEY") {
            self.credentials.secret_key = Some(v);
        }
        if let Some(v) = get("TENCENT_COS_BUCKET") {
            self.storage.bucket = Some(v);
        }
        if let Some(v) = get("TENCENT_COS_REGION") {
            self.storage.region = Some(v);
        }

        if let Some(v) = get("KILN_3D_PROVIDER") {
            match v.parse::<ProviderKind>() {
                Ok(kind) => self.provider.kind = Some(kind),
                Err(_) => warn!(value = %v, "ignoring invalid KILN_3D_PROVIDER"),
            }
        }

        if let Some(v) = get("HUNYUAN3D_ENABLE_PBR") {
            match parse_bool(&v) {
                Some(b) => self.generation.enable_pbr = Some(b),
                None => warn!(value = %v, "ignoring invalid HUNYUAN3D_ENABLE_PBR"),
            }
        }
        if let Some(v) = get("HUNYUAN3D_FACE_COUNT") {
            match v.trim().parse::<u32>() {
                Ok(n) => self.generation.face_count = Some(n),
                Err(_) => warn!(value = %v, "ignoring invalid HUNYUAN3D_FACE_COUNT"),
            }
        }
        if let Some(v) = get("HUNYUAN3D_GENERATE_TYPE") {
            match v.trim().parse::<GenerateType>() {
                Ok(t) => self.generation.generate_type = Some(t),
                Err(_) => warn!(value = %v, "ignoring invalid HUNYUAN3D_GENERATE_TYPE"),
            }
        }
        if let Some(v) = get("HUNYUAN3D_POLYGON_TYPE") {
            match v.trim().parse::<PolygonType>() {
                Ok(t) => self.generation.polygon_type = Some(t),
                Err(_) => warn!(value = %v, "ignoring invalid HUNYUAN3D_POLYGON_TYPE"),
            }
        }
    }

    /// Both API credentials, or a `Config` error naming what is missing
    pub fn credentials(&self) -> Result<Credentials> {
        match (&self.credentials.secret_id, &self.credentials.secret_key) {
            (Some(id), Some(key)) => Ok(Credentials::new(id.clone(), key.clone())),
            _ => Err(KilnError::Config(format!(
                "Missing credentials: {}. Set TENCENT_SECRET_ID and TENCENT_SECRET_KEY or add [credentials] to .kiln/config.toml",
                self.missing_required(false).join(", ")
            ))),
        }
    }

    pub fn provider_kind(&self) -> ProviderKind {
        self.provider.kind.unwrap_or_default()
    }

    /// Generation options with unset fields at their defaults (not validated)
    pub fn generation_options(&self) -> GenerationOptions {
        let defaults = GenerationOptions::default();
        GenerationOptions {
            enable_pbr: self.generation.enable_pbr.unwrap_or(defaults.enable_pbr),
            face_count: self.generation.face_count.unwrap_or(defaults.face_count),
            generate_type: self
                .generation
                .generate_type
                .unwrap_or(defaults.generate_type),
            polygon_type: self.generation.polygon_type.or(defaults.polygon_type),
        }
    }

    pub fn orchestrator_config(&self) -> OrchestratorConfig {
        OrchestratorConfig {
            poll_interval: Duration::from_secs(
                self.generation
                    .poll_interval_secs
                    .unwrap_or(DEFAULT_POLL_INTERVAL_SECS),
            ),
            timeout: Duration::from_secs(
                self.generation.timeout_secs.unwrap_or(DEFAULT_TIMEOUT_SECS),
            ),
        }
    }

    pub fn upload_prefix(&self) -> &str {
        self.storage
            .prefix
            .as_deref()
            .unwrap_or(DEFAULT_UPLOAD_PREFIX)
    }

    /// Names of required settings that are not configured
    pub fn missing_required(&self, include_storage: bool) -> Vec<&'static str> {
        let mut missing = Vec::new();
        if self.credentials.secret_id.is_none() {
            missing.push("TENCENT_SECRET_ID");
        }
        if self.credentials.secret_key.is_none() {
            missing.push("TENCENT_SECRET_KEY");
        }
        if include_storage {
            if self.storage.bucket.is_none() {
                missing.push("TENCENT_COS_BUCKET");
            }
            if self.storage.region.is_none() {
                missing.push("TENCENT_COS_REGION");
            }
        }
        missing
    }

    pub fn setup_help() -> &'static str {
        r#"Kiln needs Tencent Cloud credentials to generate 3D models.

Environment variables:
  TENCENT_SECRET_ID        API SecretId
  TENCENT_SECRET_KEY       API SecretKey
  TENCENT_COS_BUCKET       bucket for local reference images (e.g. mybucket-1250000000)
  TENCENT_COS_REGION       bucket region (e.g. ap-guangzhou)

Or add them to ~/.kiln/config.toml or .kiln/config.toml:

  [credentials]
  secret_id = "AKID..."
  secret_key = "..."

  [storage]
  bucket = "mybucket-1250000000"
  region = "ap-guangzhou"

The bucket is only needed when generating from local image files."#
    }
}

fn parse_bool(value: &str) -> Option<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "true" | "1" | "yes" => Some(true),
        "false" | "0" | "no" => Some(false),
        _ => None,
    }
}
