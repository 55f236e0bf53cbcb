//! Job manifest written next to the extracted artifacts
//!
//! Records the job's provenance (provider, inputs, options, timings) and a
//! content-hashed list of every file the job produced.

use chrono::{DateTime, Utc};
use kiln_core::{ContentHash, KilnError, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::extract::{ArtifactKind, ExtractedArtifactSet};
use crate::spec::{GenerationOptions, InputSummary, ResolvedJobSpec};

pub const METADATA_FILE_NAME: &str = "metadata.json";

/// One produced file
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ManifestEntry {
    /// Relative to the output directory
    pub path: String,
    pub kind: ArtifactKind,
    pub size_bytes: u64,
    /// `sha256:<hex>`
    pub content_hash: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobMetadata {
    pub job_id: String,
    pub provider: String,
    pub input: InputSummary,
    pub options: GenerationOptions,
    pub primary_model_file: String,
    pub files: Vec<ManifestEntry>,
    pub created_at: DateTime<Utc>,
    pub completed_at: DateTime<Utc>,
    pub elapsed_secs: f64,
}

impl JobMetadata {
    /// Describe a finished job, hashing every extracted file
    pub fn from_artifacts(
        job_id: &str,
        provider: &str,
        spec: &ResolvedJobSpec,
        artifacts: &ExtractedArtifactSet,
        created_at: DateTime<Utc>,
        completed_at: DateTime<Utc>,
    ) -> Result<Self> {
        let root = &artifacts.destination;
        let files = artifacts
            .files
            .iter()
            .map(|f| {
                Ok(ManifestEntry {
                    path: relative_path(root, &f.path),
                    kind: f.kind,
                    size_bytes: f.size_bytes,
                    content_hash: ContentHash::from_file(&f.path)?.to_prefixed_hex(),
                })
            })
            .collect::<Result<Vec<_>>>()?;

        let elapsed = completed_at.signed_duration_since(created_at);
        Ok(Self {
            job_id: job_id.to_string(),
            provider: provider.to_string(),
            input: spec.summary(),
            options: spec.options.clone(),
            primary_model_file: relative_path(root, &artifacts.primary_model_file),
            files,
            created_at,
            completed_at,
            elapsed_secs: elapsed.num_milliseconds().max(0) as f64 / 1000.0,
        })
    }

    /// Write `metadata.json` into `destination`, replacing any existing one
    pub fn write(&self, destination: &Path) -> Result<PathBuf> {
        std::fs::create_dir_all(destination)?;
        let path = destination.join(METADATA_FILE_NAME);
        let content = serde_json::to_string_pretty(self)?;
        std::fs::write(&path, content)?;
        Ok(path)
    }

    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        serde_json::from_str(&content).map_err(|e| {
            KilnError::Serialization(format!("Failed to parse {}: {}", path.display(), e))
        })
    }
}

fn relative_path(root: &Path, path: &Path) -> String {
    path.strip_prefix(root)
        .unwrap_or(path)
        .to_string_lossy()
        .replace('\\', "/")
}
