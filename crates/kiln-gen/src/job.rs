//! Job tracking for submitted generation jobs
//!
//! Every job the orchestrator submits is persisted as a `.job.toml` file in
//! `.kiln/jobs/`, so jobs abandoned by a timeout or cancellation (which keep
//! running remotely) remain visible after the process exits.

use chrono::{DateTime, Utc};
use kiln_core::{KilnError, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};

/// Local view of a job's outcome
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecordStatus {
    Submitted,
    Succeeded,
    Failed,
    /// Stopped waiting; the remote job may still finish
    TimedOut,
    Cancelled,
}

impl fmt::Display for RecordStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            RecordStatus::Submitted => "submitted",
            RecordStatus::Succeeded => "succeeded",
            RecordStatus::Failed => "failed",
            RecordStatus::TimedOut => "timed_out",
            RecordStatus::Cancelled => "cancelled",
        };
        f.write_str(s)
    }
}

/// A tracked generation job
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobRecord {
    /// Provider-assigned job ID
    pub job_id: String,
    pub provider: String,
    pub status: RecordStatus,
    pub submitted_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    /// prompt / image_url / multi_view / sketch
    pub input_type: String,
    #[serde(default)]
    pub prompt: Option<String>,
    #[serde(default)]
    pub output_dir: Option<String>,
    #[serde(default)]
    pub primary_model_file: Option<String>,
    #[serde(default)]
    pub error: Option<String>,
}

impl JobRecord {
    pub fn new(job_id: &str, provider: &str, input_type: &str, submitted_at: DateTime<Utc>) -> Self {
        Self {
            job_id: job_id.to_string(),
            provider: provider.to_string(),
            status: RecordStatus::Submitted,
            submitted_at,
            updated_at: submitted_at,
            input_type: input_type.to_string(),
            prompt: None,
            output_dir: None,
            primary_model_file: None,
            error: None,
        }
    }
}

/// File-based job store in `.kiln/jobs/`
#[derive(Debug, Clone)]
pub struct JobStore {
    root: PathBuf,
}

impl JobStore {
    pub fn new<P: AsRef<Path>>(root: P) -> Self {
        Self {
            root: root.as_ref().to_path_buf(),
        }
    }

    /// Default job store location
    pub fn default_store() -> Self {
        Self::new(".kiln/jobs")
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn path_for(&self, job_id: &str) -> PathBuf {
        let safe: String = job_id
            .chars()
            .map(|c| {
                if c.is_ascii_alphanumeric() || c == '-' || c == '_' {
                    c
                } else {
                    '_'
                }
            })
            .collect();
        self.root.join(format!("{}.job.toml", safe))
    }

    pub fn save(&self, record: &JobRecord) -> Result<()> {
        std::fs::create_dir_all(&self.root)?;
        let wrapper = JobFile {
            job: record.clone(),
        };
        let content = toml::to_string_pretty(&wrapper)?;
        std::fs::write(self.path_for(&record.job_id), content)?;
        Ok(())
    }

    pub fn load(&self, job_id: &str) -> Result<JobRecord> {
        let path = self.path_for(job_id);
        if !path.exists() {
            return Err(KilnError::JobNotFound(format!(
                "{} (no record in {})",
                job_id,
                self.root.display()
            )));
        }
        let content = std::fs::read_to_string(&path)?;
        let file: JobFile = toml::from_str(&content)?;
        Ok(file.job)
    }

    /// All tracked jobs, oldest first. Unreadable files are skipped.
    pub fn list(&self) -> Result<Vec<JobRecord>> {
        let mut jobs = Vec::new();
        if !self.root.exists() {
            return Ok(jobs);
        }

        for entry in std::fs::read_dir(&self.root)? {
            let path = entry?.path();
            let is_job = path
                .file_name()
                .and_then(|n| n.to_str())
                .map(|n| n.ends_with(".job.toml"))
                .unwrap_or(false);
            if !is_job {
                continue;
            }
            let content = std::fs::read_to_string(&path)?;
            match toml::from_str::<JobFile>(&content) {
                Ok(file) => jobs.push(file.job),
                Err(e) => tracing::warn!(path = %path.display(), error = %e, "skipping unreadable job file"),
            }
        }

        jobs.sort_by(|a, b| a.submitted_at.cmp(&b.submitted_at));
        Ok(jobs)
    }

    /// Load, modify and save a record
    pub fn update<F>(&self, job_id: &str, change: F) -> Result<JobRecord>
    where
        F: FnOnce(&mut JobRecord),
    {
        let mut record = self.load(job_id)?;
        change(&mut record);
        record.updated_at = Utc::now();
        self.save(&record)?;
        Ok(record)
    }
}

#[derive(Serialize, Deserialize)]
struct JobFile {
    job: JobRecord,
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn temp_dir() -> PathBuf {
        let dir = std::env::temp_dir().join(format!("kiln_job_test_{}", uuid::Uuid::new_v4()));
        std::fs::create_dir_all(&dir).unwrap();
        dir
    }

    fn record(job_id: &str, minute: u32) -> JobRecord {
        let at = Utc.with_ymd_and_hms(2025, 3, 1, 9, minute, 0).unwrap();
        JobRecord::new(job_id, "sdk", "prompt", at)
    }

    #[test]
    fn test_job_store_save_load() {
        let dir = temp_dir();
        let store = JobStore::new(&dir);

        let mut job = record("1357924680", 0);
        job.prompt = Some("a bronze automaton".into());
        store.save(&job).unwrap();

        let loaded = store.load("1357924680").unwrap();
        assert_eq!(loaded.job_id, "1357924680");
        assert_eq!(loaded.status, RecordStatus::Submitted);
        assert_eq!(loaded.prompt.as_deref(), Some("a bronze automaton"));
        assert_eq!(loaded.submitted_at, job.submitted_at);

        std::fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn test_job_store_list_sorted() {
        let dir = temp_dir();
        let store = JobStore::new(&dir);

        store.save(&record("later", 30)).unwrap();
        store.save(&record("earlier", 5)).unwrap();
        std::fs::write(dir.join("broken.job.toml"), "not toml = [").unwrap();
        std::fs::write(dir.join("notes.txt"), "ignored").unwrap();

        let ids: Vec<String> = store.list().unwrap().into_iter().map(|j| j.job_id).collect();
        assert_eq!(ids, vec!["earlier", "later"]);

        std::fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn test_job_store_update() {
        let dir = temp_dir();
        let store = JobStore::new(&dir);
        store.save(&record("job-7", 0)).unwrap();

        let updated = store
            .update("job-7", |r| {
                r.status = RecordStatus::TimedOut;
                r.error = Some("waited 600s".into());
            })
            .unwrap();
        assert_eq!(updated.status, RecordStatus::TimedOut);
        assert!(updated.updated_at > updated.submitted_at);

        let reloaded = store.load("job-7").unwrap();
        assert_eq!(reloaded.status, RecordStatus::TimedOut);
        assert_eq!(reloaded.error.as_deref(), Some("waited 600s"));

        std::fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn test_job_not_found() {
        let dir = temp_dir();
        let store = JobStore::new(&dir);
        assert!(matches!(
            store.load("nonexistent-id"),
            Err(KilnError::JobNotFound(_))
        ));
        assert!(store.list().unwrap().is_empty());
        std::fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn test_unsafe_ids_stay_inside_root() {
        let dir = temp_dir();
        let store = JobStore::new(&dir);
        store.save(&record("../escape", 0)).unwrap();
        assert!(dir.join("___escape.job.toml").exists());
        assert_eq!(store.load("../escape").unwrap().job_id, "../escape");
        std::fs::remove_dir_all(&dir).ok();
    }
}
