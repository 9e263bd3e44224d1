use crate::AppState;
use crate::api::error::AppError;
use crate::models::dto::{HealthResponse, VersionResponse};
use axum::{Json, extract::State};

#[utoipa::path(
    get,
    path = "/healthz",
    responses(
        (status = 200, description = "Service is up", body = HealthResponse)
    ),
    tag = "system"
)]
pub async fn healthz() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
    })
}

#[utoipa::path(
    get,
    path = "/version",
    responses(
        (status = 200, description = "Scan engine version", body = VersionResponse),
        (status = 500, description = "Scan engine unreachable", body = crate::models::dto::ErrorResponse)
    ),
    tag = "system"
)]
pub async fn version(State(state): State<AppState>) -> Result<Json<VersionResponse>, AppError> {
    let version = state
        .scanner
        .version()
        .await
        .map_err(|e| AppError::Internal(format!("Failed to get scanner version: {}", e)))?;

    Ok(Json(VersionResponse {
        clam_av_version: version,
    }))
}
