use crate::models::{JobStatus, ScanJob};
use chrono::Utc;
use dashmap::DashMap;
use std::time::Duration;
use uuid::Uuid;

/// In-memory store of scan jobs, shared by the HTTP layer and the workers.
///
/// Each job is driven by exactly one worker, so writes to the same id are
/// sequential; reads may happen concurrently from any number of handlers.
#[derive(Debug, Default)]
pub struct JobRegistry {
    jobs: DashMap<String, ScanJob>,
}

impl JobRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts a fresh `queued` job and returns its id.
    pub fn create_job(&self, file_name: &str, file_size: u64) -> String {
        let job_id = Uuid::new_v4().to_string();
        let job = ScanJob::new(job_id.clone(), file_name.to_string(), file_size);
        self.jobs.insert(job_id.clone(), job);

        tracing::info!(
            job_id = %job_id,
            file_name = %file_name,
            file_size,
            "Created scan job"
        );
        job_id
    }

    pub fn get_job(&self, job_id: &str) -> Option<ScanJob> {
        self.jobs.get(job_id).map(|entry| entry.value().clone())
    }

    /// Moves a job to `status`. Unknown ids and completed jobs are left untouched.
    /// Returns whether the update was applied.
    pub fn update_status(
        &self,
        job_id: &str,
        status: JobStatus,
        malware: Option<&str>,
        error: Option<&str>,
    ) -> bool {
        let Some(mut job) = self.jobs.get_mut(job_id) else {
            return false;
        };

        if job.completed_at.is_some() {
            tracing::debug!(
                job_id = %job_id,
                status = %status,
                "Ignoring status update for completed job"
            );
            return false;
        }

        job.status = status;
        if let Some(malware) = malware {
            job.malware.get_or_insert_with(|| malware.to_string());
        }
        if let Some(error) = error {
            job.error.get_or_insert_with(|| error.to_string());
        }

        tracing::info!(job_id = %job_id, status = %status, "Updated scan job");
        true
    }

    /// Records the real size once it is known (URL downloads).
    pub fn set_size(&self, job_id: &str, file_size: u64) {
        if let Some(mut job) = self.jobs.get_mut(job_id) {
            if job.completed_at.is_none() {
                job.file_size = file_size;
            }
        }
    }

    /// Stamps `completed_at`. Idempotent.
    pub fn complete_job(&self, job_id: &str) {
        if let Some(mut job) = self.jobs.get_mut(job_id) {
            if job.completed_at.is_some() {
                return;
            }
            job.completed_at = Some(Utc::now().max(job.created_at));
            tracing::info!(
                job_id = %job_id,
                duration_ms = job.duration_ms().unwrap_or(0.0),
                "Completed scan job"
            );
        }
    }

    /// All jobs, newest first.
    pub fn get_all_jobs(&self) -> Vec<ScanJob> {
        let mut jobs: Vec<ScanJob> = self.jobs.iter().map(|e| e.value().clone()).collect();
        jobs.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        jobs
    }

    /// Removes every job created at or before `now - max_age`, whatever its status.
    /// Returns how many were removed.
    pub fn cleanup_older_than(&self, max_age: Duration) -> usize {
        let max_age = chrono::Duration::from_std(max_age).unwrap_or(chrono::Duration::MAX);
        let cutoff = Utc::now()
            .checked_sub_signed(max_age)
            .unwrap_or(chrono::DateTime::<Utc>::MIN_UTC);

        let before = self.jobs.len();
        self.jobs.retain(|job_id, job| {
            let keep = job.created_at > cutoff;
            if !keep {
                tracing::debug!(job_id = %job_id, "Cleaned up old scan job");
            }
            keep
        });
        let removed = before.saturating_sub(self.jobs.len());

        if removed > 0 {
            tracing::info!(removed, "Cleaned up old scan jobs");
        }
        removed
    }

    pub fn len(&self) -> usize {
        self.jobs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.jobs.is_empty()
    }
}
