//! Job orchestrator: one generation job from spec to artifacts on disk
//!
//! ```text
//! validate -> upload local images -> submit -> poll until terminal
//!          -> download -> extract -> write metadata.json
//! ```
//!
//! The orchestrator is provider-agnostic and blocks the calling thread.
//! Run several instances on separate threads for concurrent jobs; they
//! share nothing but the provider and uploader, which are stateless.
//!
//! Stopping early (timeout or the cancel flag) only stops waiting. The
//! remote job is never cancelled and may keep running and incurring cost.

use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use kiln_core::{KilnError, Result};
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::backoff::{
    BackoffPolicy, Clock, SystemClock, DEFAULT_POLL_INTERVAL_SECS, DEFAULT_TIMEOUT_SECS,
    DOWNLOAD_ATTEMPTS, SUBMIT_ATTEMPTS,
};
use crate::extract::{extract, ExtractedArtifactSet};
use crate::job::{JobRecord, JobStore, RecordStatus};
use crate::metadata::JobMetadata;
use crate::provider::{DownloadedArchive, JobHandle, JobState, JobStatus, ModelProvider};
use crate::spec::{GenerationJobSpec, ImageSource, ResolvedJobSpec, ResolvedView, ViewTag};
use crate::upload::ObjectUploader;

/// Timing knobs exposed to callers
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OrchestratorConfig {
    /// First backoff delay between polls
    pub poll_interval: Duration,
    /// Bounds the poll phase only
    pub timeout: Duration,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(DEFAULT_POLL_INTERVAL_SECS),
            timeout: Duration::from_secs(DEFAULT_TIMEOUT_SECS),
        }
    }
}

/// Step of the pipeline a failure happened in
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobPhase {
    Validate,
    Upload,
    Submit,
    Poll,
    Download,
    Extract,
    Metadata,
}

impl fmt::Display for JobPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            JobPhase::Validate => "validate",
            JobPhase::Upload => "upload",
            JobPhase::Submit => "submit",
            JobPhase::Poll => "poll",
            JobPhase::Download => "download",
            JobPhase::Extract => "extract",
            JobPhase::Metadata => "metadata",
        };
        f.write_str(s)
    }
}

/// A classified failure and the phase it happened in
#[derive(Debug, Error)]
#[error("{phase} phase failed: {error}")]
pub struct JobError {
    pub phase: JobPhase,
    /// Set once the job was submitted
    pub job_id: Option<String>,
    #[source]
    pub error: KilnError,
}

impl JobError {
    fn new(phase: JobPhase, job_id: Option<&str>, error: KilnError) -> Self {
        Self {
            phase,
            job_id: job_id.map(|s| s.to_string()),
            error,
        }
    }
}

/// Everything a successful run produced
#[derive(Debug, Clone)]
pub struct GenerationOutcome {
    pub handle: JobHandle,
    pub artifacts: ExtractedArtifactSet,
    pub metadata: JobMetadata,
    pub metadata_path: PathBuf,
    pub poll_count: u32,
}

impl GenerationOutcome {
    pub fn job_id(&self) -> &str {
        &self.handle.job_id
    }
}

pub struct Orchestrator {
    provider: Arc<dyn ModelProvider>,
    uploader: Option<Arc<dyn ObjectUploader>>,
    clock: Arc<dyn Clock>,
    config: OrchestratorConfig,
    job_store: Option<JobStore>,
    cancel: Option<Arc<AtomicBool>>,
}

impl Orchestrator {
    pub fn new(provider: Arc<dyn ModelProvider>, config: OrchestratorConfig) -> Self {
        Self {
            provider,
            uploader: None,
            clock: Arc::new(SystemClock),
            config,
            job_store: None,
            cancel: None,
        }
    }

    /// Needed only for specs with local image content
    pub fn with_uploader(mut self, uploader: Arc<dyn ObjectUploader>) -> Self {
        self.uploader = Some(uploader);
        self
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Record submitted jobs and their outcomes
    pub fn with_job_store(mut self, store: JobStore) -> Self {
        self.job_store = Some(store);
        self
    }

    /// Checked before every poll and every sleep
    pub fn with_cancel(mut self, flag: Arc<AtomicBool>) -> Self {
        self.cancel = Some(flag);
        self
    }

    pub fn config(&self) -> &OrchestratorConfig {
        &self.config
    }

    /// Drive one job to completion, writing artifacts into `destination`.
    ///
    /// Every invocation submits a new job. Files written before a failure are
    /// left in place; `metadata.json` is only written on success.
    pub fn run(
        &self,
        spec: &GenerationJobSpec,
        destination: &Path,
    ) -> std::result::Result<GenerationOutcome, JobError> {
        let created_at = Utc::now();

        spec.validate()
            .map_err(|e| JobError::new(JobPhase::Validate, None, e))?;

        let resolved = self
            .resolve_images(spec)
            .map_err(|e| JobError::new(JobPhase::Upload, None, e))?;
        self.log_request(&resolved);

        let handle = self
            .submit_with_retry(&resolved)
            .map_err(|e| JobError::new(JobPhase::Submit, None, e))?;
        let job_id = handle.job_id.clone();
        info!(job_id = %job_id, provider = %self.provider.name(), "job submitted");
        self.record_submitted(&handle, &resolved, destination);

        let result = self.complete(&handle, &resolved, destination, created_at);
        match &result {
            Ok(outcome) => self.record_outcome(&job_id, RecordStatus::Succeeded, |r| {
                r.primary_model_file = Some(outcome.metadata.primary_model_file.clone());
            }),
            Err(err) => {
                let status = match err.error {
                    KilnError::Timeout { .. } => RecordStatus::TimedOut,
                    KilnError::Cancelled(_) => RecordStatus::Cancelled,
                    _ => RecordStatus::Failed,
                };
                let message = err.to_string();
                self.record_outcome(&job_id, status, |r| r.error = Some(message));
            }
        }
        result
    }

    fn complete(
        &self,
        handle: &JobHandle,
        resolved: &ResolvedJobSpec,
        destination: &Path,
        created_at: chrono::DateTime<Utc>,
    ) -> std::result::Result<GenerationOutcome, JobError> {
        let job_id = Some(handle.job_id.as_str());

        let (status, poll_count) = self
            .wait_for_completion(handle)
            .map_err(|e| JobError::new(JobPhase::Poll, job_id, e))?;

        let archive = self
            .download_with_retry(&status)
            .map_err(|e| JobError::new(JobPhase::Download, job_id, e))?;
        debug!(?archive, "downloaded result");

        let artifacts = extract(&archive, destination)
            .map_err(|e| JobError::new(JobPhase::Extract, job_id, e))?;

        let metadata = JobMetadata::from_artifacts(
            &handle.job_id,
            self.provider.name(),
            resolved,
            &artifacts,
            created_at,
            Utc::now(),
        )
        .map_err(|e| JobError::new(JobPhase::Metadata, job_id, e))?;
        let metadata_path = metadata
            .write(destination)
            .map_err(|e| JobError::new(JobPhase::Metadata, job_id, e))?;

        info!(
            job_id = %handle.job_id,
            primary = %artifacts.primary_model_file.display(),
            "job complete"
        );

        Ok(GenerationOutcome {
            handle: handle.clone(),
            artifacts,
            metadata,
            metadata_path,
            poll_count,
        })
    }

    /// Replace every local image with an uploaded URL, preserving order
    pub fn resolve_images(&self, spec: &GenerationJobSpec) -> Result<ResolvedJobSpec> {
        let mut front_image_url = None;
        let mut multi_view = Vec::new();

        for image in &spec.images {
            let url = match &image.source {
                ImageSource::Url(url) => url.clone(),
                ImageSource::Bytes {
                    data,
                    content_type,
                    file_name,
                } => {
                    let uploader = self.uploader.as_ref().ok_or_else(|| {
                        KilnError::Config(format!(
                            "{} view is a local file but no uploader is configured",
                            image.view
                        ))
                    })?;
                    let url = uploader.upload(data, content_type, file_name)?;
                    info!(view = %image.view, url = %url, "uploaded reference image");
                    url
                }
            };

            if image.view == ViewTag::Front {
                front_image_url = Some(url);
            } else {
                multi_view.push(ResolvedView {
                    view: image.view,
                    image_url: url,
                });
            }
        }

        Ok(ResolvedJobSpec {
            prompt: spec.prompt.clone(),
            front_image_url,
            multi_view,
            options: spec.options.clone(),
        })
    }

    /// Submit, retrying transient failures with a short fixed delay
    pub fn submit_with_retry(&self, spec: &ResolvedJobSpec) -> Result<JobHandle> {
        let policy = BackoffPolicy::submit();
        let mut attempt = 0;
        loop {
            match self.provider.submit(spec) {
                Ok(handle) => return Ok(handle),
                Err(e) if e.is_transient() && attempt + 1 < SUBMIT_ATTEMPTS => {
                    let delay = policy.next_delay(attempt);
                    warn!(attempt = attempt + 1, error = %e, ?delay, "submit failed, retrying");
                    self.clock.sleep(delay);
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }

    /// Poll until the job is terminal, the timeout passes or the cancel flag
    /// is raised. Transient poll errors are logged and polling continues.
    ///
    /// Returns the succeeded status and the number of polls made.
    pub fn wait_for_completion(&self, handle: &JobHandle) -> Result<(JobStatus, u32)> {
        let policy = BackoffPolicy::polling(self.config.poll_interval);
        let start = self.clock.now();
        // A timeout too large to represent means no deadline
        let deadline = start.checked_add(self.config.timeout);
        let mut polls = 0u32;
        let mut attempt = 0u32;

        loop {
            self.check_cancelled(&handle.job_id)?;
            polls += 1;
            match self.provider.poll(handle) {
                Ok(status) => {
                    debug!(job_id = %handle.job_id, state = %status.state, poll = polls, "polled");
                    match status.state {
                        JobState::Succeeded => return Ok((status, polls)),
                        JobState::Failed => {
                            let message = match (&status.error_code, &status.error_message) {
                                (Some(code), Some(msg)) => format!("[{}] {}", code, msg),
                                (None, Some(msg)) => msg.clone(),
                                (Some(code), None) => code.clone(),
                                (None, None) => "no error message".to_string(),
                            };
                            return Err(KilnError::JobFailed {
                                job_id: handle.job_id.clone(),
                                message,
                            });
                        }
                        JobState::Pending | JobState::Running => {}
                    }
                }
                Err(e) if e.is_transient() => {
                    warn!(job_id = %handle.job_id, error = %e, "poll failed, will retry");
                }
                Err(e) => return Err(e),
            }

            let now = self.clock.now();
            let mut delay = policy.next_delay(attempt);
            if let Some(deadline) = deadline {
                if now >= deadline {
                    return Err(KilnError::Timeout {
                        job_id: handle.job_id.clone(),
                        waited_secs: now.duration_since(start).as_secs(),
                    });
                }
                delay = delay.min(deadline - now);
            }
            attempt += 1;

            self.check_cancelled(&handle.job_id)?;
            debug!(job_id = %handle.job_id, ?delay, "waiting before next poll");
            self.clock.sleep(delay);
        }
    }

    /// Download, retrying transient failures; exhausted retries become `Download`
    pub fn download_with_retry(&self, status: &JobStatus) -> Result<DownloadedArchive> {
        let policy = BackoffPolicy::download();
        let mut attempt = 0;
        loop {
            match self.provider.download_result(status) {
                Ok(archive) => return Ok(archive),
                Err(e) if e.is_transient() => {
                    if attempt + 1 >= DOWNLOAD_ATTEMPTS {
                        return Err(KilnError::Download(format!(
                            "gave up after {} attempts: {}",
                            DOWNLOAD_ATTEMPTS, e
                        )));
                    }
                    let delay = policy.next_delay(attempt);
                    warn!(attempt = attempt + 1, error = %e, ?delay, "download failed, retrying");
                    self.clock.sleep(delay);
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }

    fn check_cancelled(&self, job_id: &str) -> Result<()> {
        match &self.cancel {
            Some(flag) if flag.load(Ordering::SeqCst) => {
                warn!(job_id = %job_id, "stopped waiting; the remote job keeps running");
                Err(KilnError::Cancelled(job_id.to_string()))
            }
            _ => Ok(()),
        }
    }

    fn log_request(&self, spec: &ResolvedJobSpec) {
        let prompt = spec.prompt.as_deref().map(|p| {
            if p.chars().count() > 80 {
                format!("{}...", p.chars().take(80).collect::<String>())
            } else {
                p.to_string()
            }
        });
        let views: Vec<String> = spec
            .multi_view
            .iter()
            .map(|v| format!("{}={}", v.view, v.image_url))
            .collect();
        debug!(
            provider = %self.provider.name(),
            prompt = ?prompt,
            image_url = ?spec.front_image_url,
            views = ?views,
            enable_pbr = spec.options.enable_pbr,
            face_count = spec.options.face_count,
            generate_type = %spec.options.generate_type,
            polygon_type = ?spec.options.polygon_type,
            "resolved generation request"
        );
    }

    fn record_submitted(&self, handle: &JobHandle, spec: &ResolvedJobSpec, destination: &Path) {
        let Some(store) = &self.job_store else {
            return;
        };
        let mut record = JobRecord::new(
            &handle.job_id,
            self.provider.name(),
            &spec.summary().input_type,
            handle.submitted_at,
        );
        record.prompt = spec.prompt.clone();
        record.output_dir = Some(destination.display().to_string());
        if let Err(e) = store.save(&record) {
            warn!(job_id = %handle.job_id, error = %e, "could not record job");
        }
    }

    fn record_outcome<F>(&self, job_id: &str, status: RecordStatus, change: F)
    where
        F: FnOnce(&mut JobRecord),
    {
        let Some(store) = &self.job_store else {
            return;
        };
        let result = store.update(job_id, |r| {
            r.status = status;
            change(r);
        });
        if let Err(e) = result {
            warn!(job_id = %job_id, error = %e, "could not update job record");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backoff::ManualClock;
    use crate::metadata::METADATA_FILE_NAME;
    use crate::providers::mock::{build_zip, ScriptedFault, ScriptedPoll, ScriptedProvider};
    use crate::spec::ViewImage;
    use crate::upload::MemoryUploader;
    use std::sync::Mutex;

    fn temp_dir() -> PathBuf {
        let dir = std::env::temp_dir().join(format!("kiln_orchestrator_test_{}", uuid::Uuid::new_v4()));
        std::fs::create_dir_all(&dir).unwrap();
        dir
    }

    fn secs(values: &[u64]) -> Vec<Duration> {
        values.iter().map(|s| Duration::from_secs(*s)).collect()
    }

    fn orchestrator(provider: &Arc<ScriptedProvider>, clock: &Arc<ManualClock>) -> Orchestrator {
        Orchestrator::new(provider.clone(), OrchestratorConfig::default()).with_clock(clock.clone())
    }

    fn prompt_spec() -> GenerationJobSpec {
        GenerationJobSpec::from_prompt("a weathered stone golem")
    }

    fn local_image(view: ViewTag, name: &str) -> ViewImage {
        ViewImage::new(
            view,
            ImageSource::Bytes {
                data: b"\x89PNG fake".to_vec(),
                content_type: "image/png".into(),
                file_name: name.into(),
            },
        )
    }

    /// Fails the test if anything was submitted before an upload
    struct OrderCheckingUploader {
        provider: Arc<ScriptedProvider>,
        inner: MemoryUploader,
        submitted_before_upload: Mutex<bool>,
    }

    impl ObjectUploader for OrderCheckingUploader {
        fn upload(&self, data: &[u8], content_type: &str, file_name: &str) -> Result<String> {
            if !self.provider.submitted().is_empty() {
                *self.submitted_before_upload.lock().unwrap() = true;
            }
            self.inner.upload(data, content_type, file_name)
        }
    }

    #[test]
    fn test_polls_until_succeeded_with_growing_delays() {
        let provider = Arc::new(ScriptedProvider::new().with_states(&[
            JobState::Pending,
            JobState::Pending,
            JobState::Running,
            JobState::Succeeded,
        ]));
        let clock = Arc::new(ManualClock::new());
        let dir = temp_dir();

        let outcome = orchestrator(&provider, &clock).run(&prompt_spec(), &dir).unwrap();

        assert_eq!(provider.poll_calls(), 4);
        assert_eq!(outcome.poll_count, 4);
        assert_eq!(clock.sleeps(), secs(&[10, 20, 40]));
        assert_eq!(outcome.artifacts.primary_model_file, dir.join("model.obj"));
        assert_eq!(outcome.metadata.primary_model_file, "model.obj");
        assert_eq!(outcome.metadata_path, dir.join(METADATA_FILE_NAME));
        assert!(outcome.metadata_path.exists());

        std::fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn test_timeout_when_never_terminal() {
        let provider = Arc::new(ScriptedProvider::new().with_fallback(JobState::Running));
        let clock = Arc::new(ManualClock::new());
        let dir = temp_dir();
        let store = JobStore::new(dir.join("jobs"));

        let err = orchestrator(&provider, &clock)
            .with_job_store(store.clone())
            .run(&prompt_spec(), &dir.join("out"))
            .unwrap_err();

        assert_eq!(err.phase, JobPhase::Poll);
        match &err.error {
            KilnError::Timeout { waited_secs, .. } => assert_eq!(*waited_secs, 600),
            other => panic!("expected timeout, got {:?}", other),
        }
        let slept: Duration = clock.sleeps().iter().sum();
        assert_eq!(slept, Duration::from_secs(600));
        assert_eq!(clock.sleeps().last(), Some(&Duration::from_secs(50)));
        assert_eq!(provider.download_calls(), 0);
        assert!(!dir.join("out").join(METADATA_FILE_NAME).exists());

        let job_id = err.job_id.clone().unwrap();
        assert_eq!(store.load(&job_id).unwrap().status, RecordStatus::TimedOut);

        std::fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn test_local_images_uploaded_before_submit() {
        let provider = Arc::new(ScriptedProvider::new());
        let clock = Arc::new(ManualClock::new());
        let uploader = Arc::new(OrderCheckingUploader {
            provider: provider.clone(),
            inner: MemoryUploader::new(),
            submitted_before_upload: Mutex::new(false),
        });
        let dir = temp_dir();
        let spec = GenerationJobSpec::from_images(vec![
            local_image(ViewTag::Front, "front.png"),
            local_image(ViewTag::Left, "left.png"),
        ]);

        orchestrator(&provider, &clock)
            .with_uploader(uploader.clone())
            .run(&spec, &dir)
            .unwrap();

        assert_eq!(uploader.inner.uploads().len(), 2);
        assert!(!*uploader.submitted_before_upload.lock().unwrap());

        let submitted = provider.submitted();
        assert_eq!(submitted.len(), 1);
        assert_eq!(
            submitted[0].front_image_url.as_deref(),
            Some("mock://uploads/1_front.png")
        );
        assert_eq!(submitted[0].multi_view.len(), 1);
        assert_eq!(submitted[0].multi_view[0].view, ViewTag::Left);
        assert_eq!(submitted[0].multi_view[0].image_url, "mock://uploads/2_left.png");

        std::fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn test_same_spec_twice_gives_distinct_jobs() {
        let provider = Arc::new(ScriptedProvider::new());
        let clock = Arc::new(ManualClock::new());
        let dir = temp_dir();
        let runner = orchestrator(&provider, &clock);

        let first = runner.run(&prompt_spec(), &dir.join("a")).unwrap();
        let second = runner.run(&prompt_spec(), &dir.join("b")).unwrap();

        assert_ne!(first.job_id(), second.job_id());
        assert!(!first.job_id().is_empty());
        assert_eq!(provider.submitted().len(), 2);

        std::fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn test_transient_poll_errors_are_swallowed() {
        let provider = Arc::new(ScriptedProvider::new().with_polls(vec![
            ScriptedPoll::Fault(ScriptedFault::Transient),
            ScriptedPoll::Fault(ScriptedFault::Transient),
            ScriptedPoll::State(JobState::Succeeded),
        ]));
        let clock = Arc::new(ManualClock::new());
        let dir = temp_dir();

        let outcome = orchestrator(&provider, &clock).run(&prompt_spec(), &dir).unwrap();

        assert_eq!(outcome.poll_count, 3);
        assert_eq!(clock.sleeps(), secs(&[10, 20]));

        std::fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn test_invalid_spec_fails_before_any_call() {
        let provider = Arc::new(ScriptedProvider::new());
        let clock = Arc::new(ManualClock::new());
        let uploader = Arc::new(MemoryUploader::new());
        let dir = temp_dir();
        let empty = GenerationJobSpec::from_images(vec![]);

        let err = orchestrator(&provider, &clock)
            .with_uploader(uploader.clone())
            .run(&empty, &dir)
            .unwrap_err();

        assert_eq!(err.phase, JobPhase::Validate);
        assert!(matches!(err.error, KilnError::Validation(_)));
        assert!(err.job_id.is_none());
        assert!(provider.submitted().is_empty());
        assert_eq!(provider.poll_calls(), 0);
        assert!(uploader.uploads().is_empty());

        std::fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn test_submit_retries_transient_failures() {
        let provider = Arc::new(
            ScriptedProvider::new()
                .with_submit_faults(vec![ScriptedFault::Transient, ScriptedFault::Transient]),
        );
        let clock = Arc::new(ManualClock::new());
        let dir = temp_dir();

        orchestrator(&provider, &clock).run(&prompt_spec(), &dir).unwrap();

        assert_eq!(provider.submitted().len(), 1);
        assert_eq!(clock.sleeps(), secs(&[2, 2]));

        std::fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn test_submit_gives_up_after_three_transient_failures() {
        let provider = Arc::new(ScriptedProvider::new().with_submit_faults(vec![
            ScriptedFault::Transient,
            ScriptedFault::Transient,
            ScriptedFault::Transient,
        ]));
        let clock = Arc::new(ManualClock::new());
        let dir = temp_dir();

        let err = orchestrator(&provider, &clock)
            .run(&prompt_spec(), &dir)
            .unwrap_err();

        assert_eq!(err.phase, JobPhase::Submit);
        assert!(err.error.is_transient());
        assert_eq!(clock.sleeps(), secs(&[2, 2]));

        std::fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn test_validation_failure_on_submit_is_not_retried() {
        let provider =
            Arc::new(ScriptedProvider::new().with_submit_faults(vec![ScriptedFault::Validation]));
        let clock = Arc::new(ManualClock::new());
        let dir = temp_dir();

        let err = orchestrator(&provider, &clock)
            .run(&prompt_spec(), &dir)
            .unwrap_err();

        assert_eq!(err.phase, JobPhase::Submit);
        assert!(matches!(err.error, KilnError::Validation(_)));
        assert!(err.job_id.is_none());
        assert!(clock.sleeps().is_empty());
        assert!(provider.submitted().is_empty());
        assert_eq!(provider.poll_calls(), 0);

        std::fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn test_unrepresentable_timeout_waits_without_deadline() {
        let provider = Arc::new(
            ScriptedProvider::new().with_states(&[JobState::Pending, JobState::Succeeded]),
        );
        let clock = Arc::new(ManualClock::new());
        let dir = temp_dir();
        let config = OrchestratorConfig {
            timeout: Duration::from_secs(u64::MAX),
            ..OrchestratorConfig::default()
        };

        let outcome = Orchestrator::new(provider.clone(), config)
            .with_clock(clock.clone())
            .run(&prompt_spec(), &dir)
            .unwrap();

        assert_eq!(outcome.poll_count, 2);
        assert_eq!(clock.sleeps(), secs(&[10]));

        std::fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn test_zero_poll_interval_still_backs_off() {
        let provider = Arc::new(ScriptedProvider::new().with_states(&[
            JobState::Pending,
            JobState::Pending,
            JobState::Running,
            JobState::Succeeded,
        ]));
        let clock = Arc::new(ManualClock::new());
        let dir = temp_dir();
        let config = OrchestratorConfig {
            poll_interval: Duration::ZERO,
            ..OrchestratorConfig::default()
        };

        Orchestrator::new(provider.clone(), config)
            .with_clock(clock.clone())
            .run(&prompt_spec(), &dir)
            .unwrap();

        assert_eq!(clock.sleeps(), secs(&[1, 2, 4]));

        std::fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn test_auth_failure_on_submit_is_not_retried() {
        let provider = Arc::new(
            ScriptedProvider::new().with_submit_faults(vec![ScriptedFault::Authentication]),
        );
        let clock = Arc::new(ManualClock::new());
        let dir = temp_dir();

        let err = orchestrator(&provider, &clock)
            .run(&prompt_spec(), &dir)
            .unwrap_err();

        assert_eq!(err.phase, JobPhase::Submit);
        assert!(matches!(err.error, KilnError::Authentication(_)));
        assert!(clock.sleeps().is_empty());
        assert_eq!(provider.poll_calls(), 0);
        assert!(err.to_string().starts_with("submit phase failed: "));

        std::fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn test_remote_failure_is_reported() {
        let provider = Arc::new(ScriptedProvider::new().with_polls(vec![
            ScriptedPoll::State(JobState::Running),
            ScriptedPoll::Failed("content policy".into()),
        ]));
        let clock = Arc::new(ManualClock::new());
        let dir = temp_dir();

        let err = orchestrator(&provider, &clock)
            .run(&prompt_spec(), &dir)
            .unwrap_err();

        assert_eq!(err.phase, JobPhase::Poll);
        match &err.error {
            KilnError::JobFailed { message, .. } => {
                assert_eq!(message, "[ScriptedFailure] content policy")
            }
            other => panic!("expected job failure, got {:?}", other),
        }
        assert_eq!(provider.download_calls(), 0);

        std::fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn test_unknown_job_is_fatal() {
        let provider = Arc::new(
            ScriptedProvider::new().with_polls(vec![ScriptedPoll::Fault(ScriptedFault::NotFound)]),
        );
        let clock = Arc::new(ManualClock::new());
        let dir = temp_dir();

        let err = orchestrator(&provider, &clock)
            .run(&prompt_spec(), &dir)
            .unwrap_err();

        assert_eq!(err.phase, JobPhase::Poll);
        assert!(matches!(err.error, KilnError::JobNotFound(_)));
        assert_eq!(provider.poll_calls(), 1);

        std::fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn test_download_retries_then_reclassifies() {
        let provider = Arc::new(ScriptedProvider::new().with_download_faults(vec![
            ScriptedFault::Transient,
            ScriptedFault::Transient,
            ScriptedFault::Transient,
        ]));
        let clock = Arc::new(ManualClock::new());
        let dir = temp_dir();

        let err = orchestrator(&provider, &clock)
            .run(&prompt_spec(), &dir)
            .unwrap_err();

        assert_eq!(err.phase, JobPhase::Download);
        assert!(matches!(err.error, KilnError::Download(_)));
        assert_eq!(provider.download_calls(), 3);
        assert_eq!(clock.sleeps(), secs(&[2, 4]));

        std::fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn test_download_recovers_after_one_transient_failure() {
        let provider =
            Arc::new(ScriptedProvider::new().with_download_faults(vec![ScriptedFault::Transient]));
        let clock = Arc::new(ManualClock::new());
        let dir = temp_dir();

        let outcome = orchestrator(&provider, &clock).run(&prompt_spec(), &dir).unwrap();

        assert_eq!(provider.download_calls(), 2);
        assert_eq!(outcome.metadata.files.len(), 2);

        std::fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn test_archive_without_geometry() {
        let archive = build_zip(&[("model.mtl", b"newmtl a\n"), ("albedo.png", b"png")]).unwrap();
        let provider = Arc::new(ScriptedProvider::new().with_archive(archive));
        let clock = Arc::new(ManualClock::new());
        let dir = temp_dir();

        let err = orchestrator(&provider, &clock)
            .run(&prompt_spec(), &dir)
            .unwrap_err();

        assert_eq!(err.phase, JobPhase::Extract);
        assert!(matches!(err.error, KilnError::NoGeometryFound(_)));
        assert!(dir.join("model.mtl").exists());
        assert!(!dir.join(METADATA_FILE_NAME).exists());

        std::fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn test_cancel_stops_waiting() {
        let provider = Arc::new(ScriptedProvider::new().with_fallback(JobState::Running));
        let clock = Arc::new(ManualClock::new());
        let cancel = Arc::new(AtomicBool::new(true));
        let dir = temp_dir();
        let store = JobStore::new(dir.join("jobs"));

        let err = orchestrator(&provider, &clock)
            .with_cancel(cancel)
            .with_job_store(store.clone())
            .run(&prompt_spec(), &dir.join("out"))
            .unwrap_err();

        assert_eq!(err.phase, JobPhase::Poll);
        assert!(matches!(err.error, KilnError::Cancelled(_)));
        assert_eq!(provider.poll_calls(), 0);
        let job_id = err.job_id.unwrap();
        assert_eq!(store.load(&job_id).unwrap().status, RecordStatus::Cancelled);

        std::fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn test_local_image_without_uploader() {
        let provider = Arc::new(ScriptedProvider::new());
        let clock = Arc::new(ManualClock::new());
        let dir = temp_dir();
        let spec = GenerationJobSpec::from_images(vec![local_image(ViewTag::Front, "front.png")]);

        let err = orchestrator(&provider, &clock).run(&spec, &dir).unwrap_err();

        assert_eq!(err.phase, JobPhase::Upload);
        assert!(matches!(err.error, KilnError::Config(_)));
        assert!(provider.submitted().is_empty());

        std::fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn test_success_is_recorded() {
        let provider = Arc::new(ScriptedProvider::new());
        let clock = Arc::new(ManualClock::new());
        let dir = temp_dir();
        let store = JobStore::new(dir.join("jobs"));

        let outcome = orchestrator(&provider, &clock)
            .with_job_store(store.clone())
            .run(&prompt_spec(), &dir.join("out"))
            .unwrap();

        let record = store.load(outcome.job_id()).unwrap();
        assert_eq!(record.status, RecordStatus::Succeeded);
        assert_eq!(record.primary_model_file.as_deref(), Some("model.obj"));
        assert_eq!(record.input_type, "prompt");

        std::fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn test_concurrent_orchestrators_are_independent() {
        let provider = Arc::new(ScriptedProvider::new());
        let dir = temp_dir();

        let handles: Vec<_> = (0..2)
            .map(|i| {
                let provider = provider.clone();
                let out = dir.join(format!("run{}", i));
                std::thread::spawn(move || {
                    let clock = Arc::new(ManualClock::new());
                    orchestrator(&provider, &clock)
                        .run(&prompt_spec(), &out)
                        .map(|o| o.job_id().to_string())
                })
            })
            .collect();

        let ids: Vec<String> = handles
            .into_iter()
            .map(|h| h.join().unwrap().unwrap())
            .collect();
        assert_ne!(ids[0], ids[1]);

        std::fs::remove_dir_all(&dir).ok();
    }
}
