//! Kiln Gen - AI 3D model generation pipeline
//!
//! Submits text or image prompts to a hosted 3D generation service, polls the
//! job with backoff until it finishes, then downloads and unpacks the result
//! into a directory with a `metadata.json` manifest.
//!
//! Providers are pluggable (`ModelProvider`): a typed SDK-style client, a raw
//! signed-HTTP client, and a scripted mock for offline runs and tests.

pub mod backoff;
pub mod config;
pub mod extract;
pub mod job;
pub mod metadata;
pub mod orchestrator;
pub mod provider;
pub mod providers;
pub mod signing;
pub mod spec;
pub mod upload;

pub use backoff::{BackoffPolicy, Clock, ManualClock, SystemClock};
pub use config::KilnConfig;
pub use extract::{extract, ArtifactFile, ArtifactKind, ExtractedArtifactSet};
pub use job::{JobRecord, JobStore, RecordStatus};
pub use metadata::{JobMetadata, ManifestEntry, METADATA_FILE_NAME};
pub use orchestrator::{GenerationOutcome, JobError, JobPhase, Orchestrator, OrchestratorConfig};
pub use provider::{
    DownloadedArchive, JobHandle, JobState, JobStatus, ModelProvider, ProviderKind, ResultFile,
};
pub use spec::{
    GenerateType, GenerationJobSpec, GenerationOptions, ImageSource, PolygonType,
    ResolvedJobSpec, ViewImage, ViewTag,
};
pub use upload::{CosUploader, MemoryUploader, ObjectUploader};
