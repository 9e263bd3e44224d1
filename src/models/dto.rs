use super::{JobStatus, ScanJob};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct ErrorResponse {
    pub error: String,
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct ScanResponse {
    pub status: String,
    pub engine: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub malware: Option<String>,
    pub file_name: String,
    pub size: u64,
    pub scan_duration_ms: f64,
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct AsyncScanResponse {
    pub job_id: String,
    pub status: JobStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub file_name: Option<String>,
    pub message: String,
    pub status_url: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub source_url: Option<String>,
}

#[derive(Debug, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct ScanUrlRequest {
    pub url: String,
    #[serde(default)]
    pub is_base64: bool,
}

/// Status read model for a single job
#[derive(Debug, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct ScanStatusResponse {
    pub job_id: String,
    pub status: JobStatus,
    pub file_name: String,
    pub file_size: u64,
    pub engine: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub malware: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    pub scan_duration_ms: Option<f64>,
}

impl From<ScanJob> for ScanStatusResponse {
    fn from(job: ScanJob) -> Self {
        let scan_duration_ms = job.duration_ms();
        Self {
            job_id: job.job_id,
            status: job.status,
            file_name: job.file_name,
            file_size: job.file_size,
            engine: job.engine,
            malware: job.malware,
            error: job.error,
            created_at: job.created_at,
            completed_at: job.completed_at,
            scan_duration_ms,
        }
    }
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct JobSummary {
    pub job_id: String,
    pub status: JobStatus,
    pub file_name: String,
    pub file_size: u64,
    pub created_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    pub scan_duration_ms: Option<f64>,
}

impl From<ScanJob> for JobSummary {
    fn from(job: ScanJob) -> Self {
        let scan_duration_ms = job.duration_ms();
        Self {
            job_id: job.job_id,
            status: job.status,
            file_name: job.file_name,
            file_size: job.file_size,
            created_at: job.created_at,
            completed_at: job.completed_at,
            scan_duration_ms,
        }
    }
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct JobsListResponse {
    pub jobs: Vec<JobSummary>,
    pub count: usize,
}

/// Request for scanning a JSON payload that may embed base64 content
#[derive(Debug, Deserialize, ToSchema)]
pub struct JsonScanRequest {
    #[schema(value_type = Object)]
    pub payload: serde_json::Value,
}

/// Outcome of a JSON payload scan
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct JsonScanResult {
    /// "clean", "infected" or "error"
    pub status: String,
    /// Items sent to the engine (decoded base64 items + the full JSON text)
    pub items_scanned: usize,
    pub base64_items_found: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub malware: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub infected_item: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub scan_duration_ms: f64,
    pub details: Vec<ScannedItemDetail>,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct ScannedItemDetail {
    /// Structural path, or "json_payload" for the full text
    pub name: String,
    /// "base64_decoded" or "json_text"
    #[serde(rename = "type")]
    pub item_type: String,
    pub size: u64,
    pub status: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub malware: Option<String>,
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct HealthResponse {
    pub status: String,
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct VersionResponse {
    pub clam_av_version: String,
}
