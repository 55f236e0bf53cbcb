//! Scripted provider for tests and dry runs
//!
//! Replays a scripted sequence of poll outcomes and serves an in-memory ZIP
//! (a small OBJ + MTL) without any network calls. Every call is recorded so
//! tests can assert on what the orchestrator did.

use std::collections::VecDeque;
use std::io::Write;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

use kiln_core::{KilnError, Result};
use zip::write::{FileOptions, ZipWriter};
use zip::CompressionMethod;

use crate::provider::*;
use crate::spec::ResolvedJobSpec;

/// A classified failure the script can inject
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScriptedFault {
    Transient,
    Authentication,
    Validation,
    NotFound,
}

impl ScriptedFault {
    fn to_error(self, context: &str) -> KilnError {
        match self {
            ScriptedFault::Transient => {
                KilnError::TransientNetwork(format!("{}: connection reset", context))
            }
            ScriptedFault::Authentication => {
                KilnError::Authentication(format!("{}: signature rejected", context))
            }
            ScriptedFault::Validation => {
                KilnError::Validation(format!("{}: parameter rejected", context))
            }
            ScriptedFault::NotFound => KilnError::JobNotFound(context.to_string()),
        }
    }
}

/// One scripted poll outcome
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ScriptedPoll {
    State(JobState),
    Failed(String),
    Fault(ScriptedFault),
}

const SAMPLE_OBJ: &str = "mtllib model.mtl\n\
o kiln_sample\n\
v -0.5 -0.5 0.5\nv 0.5 -0.5 0.5\nv 0.5 0.5 0.5\nv -0.5 0.5 0.5\n\
v -0.5 -0.5 -0.5\nv 0.5 -0.5 -0.5\nv 0.5 0.5 -0.5\nv -0.5 0.5 -0.5\n\
usemtl clay\n\
f 1 2 3 4\nf 5 8 7 6\nf 1 5 6 2\nf 2 6 7 3\nf 3 7 8 4\nf 5 1 4 8\n";

const SAMPLE_MTL: &str = "newmtl clay\nKd 0.72 0.45 0.32\nKs 0.0 0.0 0.0\nNs 10.0\n";

/// Build a ZIP archive in memory from `(name, bytes)` entries, in order
pub fn build_zip(entries: &[(&str, &[u8])]) -> Result<Vec<u8>> {
    let mut buffer = Vec::new();
    {
        let mut zip = ZipWriter::new(std::io::Cursor::new(&mut buffer));
        let options = FileOptions::default().compression_method(CompressionMethod::Deflated);
        for (name, data) in entries {
            zip.start_file(*name, options)
                .map_err(|e| KilnError::Serialization(format!("zip entry {}: {}", name, e)))?;
            zip.write_all(data)?;
        }
        zip.finish()
            .map_err(|e| KilnError::Serialization(format!("zip finalize: {}", e)))?;
    }
    Ok(buffer)
}

/// The archive served by default: one OBJ with its material
pub fn sample_archive() -> Result<Vec<u8>> {
    build_zip(&[
        ("model.obj", SAMPLE_OBJ.as_bytes()),
        ("model.mtl", SAMPLE_MTL.as_bytes()),
    ])
}

/// A provider that plays back a script instead of calling a service
pub struct ScriptedProvider {
    polls: Mutex<VecDeque<ScriptedPoll>>,
    /// Returned once the poll script is exhausted
    fallback: JobState,
    submit_faults: Mutex<VecDeque<ScriptedFault>>,
    download_faults: Mutex<VecDeque<ScriptedFault>>,
    archive: Option<Vec<u8>>,
    submitted: Mutex<Vec<ResolvedJobSpec>>,
    poll_calls: AtomicUsize,
    download_calls: AtomicUsize,
}

impl ScriptedProvider {
    /// Jobs succeed on the first poll
    pub fn new() -> Self {
        Self {
            polls: Mutex::new(VecDeque::new()),
            fallback: JobState::Succeeded,
            submit_faults: Mutex::new(VecDeque::new()),
            download_faults: Mutex::new(VecDeque::new()),
            archive: None,
            submitted: Mutex::new(Vec::new()),
            poll_calls: AtomicUsize::new(0),
            download_calls: AtomicUsize::new(0),
        }
    }

    pub fn with_polls(mut self, polls: Vec<ScriptedPoll>) -> Self {
        self.polls = Mutex::new(polls.into());
        self
    }

    /// Convenience for a plain state sequence
    pub fn with_states(self, states: &[JobState]) -> Self {
        self.with_polls(states.iter().copied().map(ScriptedPoll::State).collect())
    }

    pub fn with_fallback(mut self, state: JobState) -> Self {
        self.fallback = state;
        self
    }

    pub fn with_submit_faults(mut self, faults: Vec<ScriptedFault>) -> Self {
        self.submit_faults = Mutex::new(faults.into());
        self
    }

    pub fn with_download_faults(mut self, faults: Vec<ScriptedFault>) -> Self {
        self.download_faults = Mutex::new(faults.into());
        self
    }

    /// Serve these bytes instead of the sample archive
    pub fn with_archive(mut self, bytes: Vec<u8>) -> Self {
        self.archive = Some(bytes);
        self
    }

    /// Every spec successfully submitted, in order
    pub fn submitted(&self) -> Vec<ResolvedJobSpec> {
        self.submitted.lock().map(|s| s.clone()).unwrap_or_default()
    }

    pub fn poll_calls(&self) -> usize {
        self.poll_calls.load(Ordering::SeqCst)
    }

    pub fn download_calls(&self) -> usize {
        self.download_calls.load(Ordering::SeqCst)
    }

    fn next_fault(queue: &Mutex<VecDeque<ScriptedFault>>) -> Option<ScriptedFault> {
        queue.lock().ok().and_then(|mut q| q.pop_front())
    }
}

impl Default for ScriptedProvider {
    fn default() -> Self {
        Self::new()
    }
}

impl ModelProvider for ScriptedProvider {
    fn name(&self) -> &str {
        "mock"
    }

    fn submit(&self, spec: &ResolvedJobSpec) -> Result<JobHandle> {
        if let Some(fault) = Self::next_fault(&self.submit_faults) {
            return Err(fault.to_error("submit"));
        }
        if let Ok(mut submitted) = self.submitted.lock() {
            submitted.push(spec.clone());
        }
        Ok(JobHandle::new(format!("mock-{}", uuid::Uuid::new_v4())))
    }

    fn poll(&self, handle: &JobHandle) -> Result<JobStatus> {
        self.poll_calls.fetch_add(1, Ordering::SeqCst);
        let step = self
            .polls
            .lock()
            .ok()
            .and_then(|mut q| q.pop_front())
            .unwrap_or(ScriptedPoll::State(self.fallback));

        match step {
            ScriptedPoll::State(JobState::Succeeded) => Ok(JobStatus::succeeded(
                &handle.job_id,
                vec![ResultFile {
                    file_type: "OBJ".to_string(),
                    url: format!("mock://kiln/{}/model.zip", handle.job_id),
                    preview_url: None,
                }],
            )),
            ScriptedPoll::State(JobState::Failed) => Ok(JobStatus::failed(
                &handle.job_id,
                None,
                "scripted failure",
            )),
            ScriptedPoll::State(state) => Ok(JobStatus::in_progress(&handle.job_id, state)),
            ScriptedPoll::Failed(message) => Ok(JobStatus::failed(
                &handle.job_id,
                Some("ScriptedFailure".to_string()),
                message,
            )),
            ScriptedPoll::Fault(fault) => Err(fault.to_error(&handle.job_id)),
        }
    }

    fn download_result(&self, status: &JobStatus) -> Result<DownloadedArchive> {
        status.require_succeeded()?;
        self.download_calls.fetch_add(1, Ordering::SeqCst);
        if let Some(fault) = Self::next_fault(&self.download_faults) {
            return Err(fault.to_error("download"));
        }

        let bytes = match &self.archive {
            Some(bytes) => bytes.clone(),
            None => sample_archive()?,
        };
        let url = status
            .result_files
            .first()
            .map(|f| f.url.clone())
            .unwrap_or_default();
        Ok(DownloadedArchive::detect(&url, "OBJ", bytes))
    }
}
