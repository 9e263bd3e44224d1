pub mod dto;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

/// Lifecycle state of an asynchronous scan job
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    Queued,
    Downloading,
    Scanning,
    Clean,
    Infected,
    Error,
}

impl JobStatus {
    /// Terminal states never transition again
    pub fn is_terminal(self) -> bool {
        matches!(self, JobStatus::Clean | JobStatus::Infected | JobStatus::Error)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            JobStatus::Queued => "queued",
            JobStatus::Downloading => "downloading",
            JobStatus::Scanning => "scanning",
            JobStatus::Clean => "clean",
            JobStatus::Infected => "infected",
            JobStatus::Error => "error",
        }
    }
}

impl std::fmt::Display for JobStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct ScanJob {
    pub job_id: String,
    pub file_name: String,
    pub file_size: u64,
    pub status: JobStatus,
    pub malware: Option<String>,
    pub error: Option<String>,
    pub engine: String,
    pub created_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl ScanJob {
    pub fn new(job_id: String, file_name: String, file_size: u64) -> Self {
        Self {
            job_id,
            file_name,
            file_size,
            status: JobStatus::Queued,
            malware: None,
            error: None,
            engine: "clamav".to_string(),
            created_at: Utc::now(),
            completed_at: None,
        }
    }

    /// Milliseconds between creation and completion, once completed
    pub fn duration_ms(&self) -> Option<f64> {
        self.completed_at
            .map(|done| (done - self.created_at).num_microseconds().unwrap_or(0) as f64 / 1000.0)
    }
}
