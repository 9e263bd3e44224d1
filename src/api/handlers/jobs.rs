use crate::AppState;
use crate::api::error::AppError;
use crate::models::dto::{ErrorResponse, JobSummary, JobsListResponse, ScanStatusResponse};
use axum::{
    Json,
    extract::{Path, State},
};

/// Upper bound on jobs returned by the listing endpoint
pub const MAX_LISTED_JOBS: usize = 100;

#[utoipa::path(
    get,
    path = "/scan/async/{job_id}",
    params(
        ("job_id" = String, Path, description = "Job identifier returned at submission")
    ),
    responses(
        (status = 200, description = "Current job state", body = ScanStatusResponse),
        (status = 404, description = "Unknown or expired job", body = ErrorResponse)
    ),
    tag = "jobs"
)]
pub async fn get_job_status(
    State(state): State<AppState>,
    Path(job_id): Path<String>,
) -> Result<Json<ScanStatusResponse>, AppError> {
    let job = state
        .jobs
        .get_job(&job_id)
        .ok_or_else(|| AppError::NotFound("Job not found".to_string()))?;

    Ok(Json(job.into()))
}

#[utoipa::path(
    get,
    path = "/scan/jobs",
    responses(
        (status = 200, description = "Most recent jobs, newest first", body = JobsListResponse)
    ),
    tag = "jobs"
)]
pub async fn list_jobs(State(state): State<AppState>) -> Json<JobsListResponse> {
    let jobs: Vec<JobSummary> = state
        .jobs
        .get_all_jobs()
        .into_iter()
        .take(MAX_LISTED_JOBS)
        .map(JobSummary::from)
        .collect();

    Json(JobsListResponse {
        count: jobs.len(),
        jobs,
    })
}
