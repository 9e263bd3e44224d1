pub mod api;
pub mod config;
pub mod infrastructure;
pub mod models;
pub mod services;
pub mod utils;

use crate::api::handlers;
use crate::config::ScanConfig;
use crate::services::job_registry::JobRegistry;
use crate::services::scan_processing::ScanOrchestrator;
use crate::services::scanner::VirusScanner;
use axum::{
    Router,
    extract::DefaultBodyLimit,
    routing::{get, post},
};
use std::sync::Arc;
use tower_http::cors::CorsLayer;
use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;

/// Allowance for multipart framing on top of the file size ceiling
pub const MULTIPART_OVERHEAD: u64 = 10 * 1024 * 1024;

#[derive(OpenApi)]
#[openapi(
    paths(
        handlers::health::healthz,
        handlers::health::version,
        handlers::scan::scan_file,
        handlers::scan::scan_file_async,
        handlers::scan::scan_url_async,
        handlers::scan::scan_json,
        handlers::jobs::get_job_status,
        handlers::jobs::list_jobs,
    ),
    components(
        schemas(
            models::JobStatus,
            models::dto::ErrorResponse,
            models::dto::HealthResponse,
            models::dto::VersionResponse,
            models::dto::ScanResponse,
            models::dto::AsyncScanResponse,
            models::dto::ScanUrlRequest,
            models::dto::ScanStatusResponse,
            models::dto::JobSummary,
            models::dto::JobsListResponse,
            models::dto::JsonScanRequest,
            models::dto::JsonScanResult,
            models::dto::ScannedItemDetail,
        )
    ),
    tags(
        (name = "scan", description = "Synchronous and queued malware scans"),
        (name = "jobs", description = "Scan job status"),
        (name = "system", description = "Health and engine version")
    )
)]
pub struct ApiDoc;

#[derive(Clone)]
pub struct AppState {
    pub jobs: Arc<JobRegistry>,
    pub scanner: Arc<dyn VirusScanner>,
    pub orchestrator: Arc<ScanOrchestrator>,
    pub config: ScanConfig,
}

pub fn create_app(state: AppState) -> Router {
    let body_limit = usize::try_from(state.config.max_file_size.saturating_add(MULTIPART_OVERHEAD))
        .unwrap_or(usize::MAX);

    Router::new()
        .merge(SwaggerUi::new("/swagger-ui").url("/api-docs/openapi.json", ApiDoc::openapi()))
        .route("/healthz", get(handlers::health::healthz))
        .route("/version", get(handlers::health::version))
        .route("/scan", post(handlers::scan::scan_file))
        .route("/scan/async", post(handlers::scan::scan_file_async))
        .route("/scan/async/url", post(handlers::scan::scan_url_async))
        .route("/scan/async/:job_id", get(handlers::jobs::get_job_status))
        .route("/scan/json", post(handlers::scan::scan_json))
        .route("/scan/jobs", get(handlers::jobs::list_jobs))
        .layer(DefaultBodyLimit::max(body_limit))
        .layer(CorsLayer::permissive())
        .with_state(state)
}
