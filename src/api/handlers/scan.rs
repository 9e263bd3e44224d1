use crate::AppState;
use crate::api::error::AppError;
use crate::models::JobStatus;
use crate::models::dto::{
    AsyncScanResponse, ErrorResponse, JsonScanRequest, JsonScanResult, ScanResponse,
    ScanUrlRequest,
};
use crate::services::scanner::ScanResult;
use crate::services::telemetry::{self, ScanType};
use crate::utils::fs::{remove_temp_file, temp_file_path};
use crate::utils::validation::{
    file_name_from_url, sanitize_filename, validate_file_size, validate_scan_url,
};
use axum::{
    Json,
    extract::{Multipart, State, multipart::Field},
    http::StatusCode,
    response::{IntoResponse, Response},
};
use futures::TryStreamExt;
use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;
use tokio::io::{AsyncBufReadExt, AsyncReadExt, AsyncWriteExt};
use tokio_util::io::StreamReader;

const UPLOAD_BUFFER_SIZE: usize = 64 * 1024;

fn status_url(job_id: &str) -> String {
    format!("/scan/async/{}", job_id)
}

/// Streams a multipart field to `dest`, enforcing the size ceiling while writing.
async fn write_field_to_file(
    field: Field<'_>,
    dest: &Path,
    max_size: u64,
) -> Result<u64, AppError> {
    let reader = StreamReader::new(field.map_err(std::io::Error::other));
    tokio::pin!(reader);

    let mut file = tokio::fs::File::create(dest)
        .await
        .map_err(|e| AppError::Internal(format!("Failed to create temp file: {}", e)))?;

    let mut buffer = vec![0u8; UPLOAD_BUFFER_SIZE];
    let mut total: u64 = 0;
    loop {
        let n = reader
            .read(&mut buffer)
            .await
            .map_err(|e| AppError::BadRequest(format!("Read error: {}", e)))?;
        if n == 0 {
            break;
        }
        total += n as u64;
        validate_file_size(total, max_size).map_err(AppError::from_validation)?;
        file.write_all(&buffer[..n])
            .await
            .map_err(|e| AppError::Internal(format!("Failed to write temp file: {}", e)))?;
    }

    file.flush()
        .await
        .map_err(|e| AppError::Internal(format!("Failed to write temp file: {}", e)))?;
    Ok(total)
}

#[utoipa::path(
    post,
    path = "/scan",
    request_body(content = Multipart, description = "File to scan in the `file` field"),
    responses(
        (status = 200, description = "File is clean", body = ScanResponse),
        (status = 406, description = "Malware detected", body = ScanResponse),
        (status = 400, description = "Missing or empty file", body = ErrorResponse),
        (status = 413, description = "File too large", body = ErrorResponse),
        (status = 500, description = "Scan engine error", body = ErrorResponse)
    ),
    tag = "scan"
)]
pub async fn scan_file(
    State(state): State<AppState>,
    mut multipart: Multipart,
) -> Result<Response, AppError> {
    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| AppError::BadRequest(e.to_string()))?
    {
        if field.name() == Some("file") {
            return scan_field(&state, field).await;
        }
    }

    Err(AppError::BadRequest("Missing or empty file".to_string()))
}

/// Streams one multipart field straight into the engine. Nothing is buffered
/// beyond the chunk in flight; the size ceiling is enforced as bytes arrive.
async fn scan_field(state: &AppState, field: Field<'_>) -> Result<Response, AppError> {
    let file_name = sanitize_filename(field.file_name().unwrap_or("unnamed"))
        .map_err(AppError::from_validation)?;
    let max_size = state.config.max_file_size;

    let received = Arc::new(AtomicU64::new(0));
    let counter = received.clone();
    let chunks = field
        .map_err(std::io::Error::other)
        .and_then(move |chunk| {
            let total = counter.fetch_add(chunk.len() as u64, Ordering::SeqCst) + chunk.len() as u64;
            let checked = if total > max_size {
                Err(std::io::Error::other("upload exceeds the size limit"))
            } else {
                Ok(chunk)
            };
            futures::future::ready(checked)
        });
    let mut reader = Box::pin(StreamReader::new(chunks));

    let too_large = || {
        let total = received.load(Ordering::SeqCst);
        validate_file_size(total, max_size)
            .err()
            .filter(|_| total > max_size)
            .map(AppError::from_validation)
    };

    let empty = reader.fill_buf().await.map(|buf| buf.is_empty());
    if let Some(e) = too_large() {
        return Err(e);
    }
    if empty.map_err(|e| AppError::BadRequest(format!("Read error: {}", e)))? {
        return Err(AppError::BadRequest("Missing or empty file".to_string()));
    }

    tracing::info!(file_name = %file_name, "Scanning uploaded file");
    let started = Instant::now();
    let verdict = state.orchestrator.scan_stream(reader, max_size).await;
    let scan_duration_ms = started.elapsed().as_secs_f64() * 1000.0;

    if let Some(e) = too_large() {
        return Err(e);
    }
    let size = received.load(Ordering::SeqCst);
    telemetry::record_verdict(ScanType::File, &file_name, size, scan_duration_ms, &verdict);
    let verdict = verdict.map_err(|e| AppError::Internal(format!("Scan failed: {}", e)))?;

    let response = |status: &str, malware: Option<String>| ScanResponse {
        status: status.to_string(),
        engine: "clamav".to_string(),
        malware,
        file_name: file_name.clone(),
        size,
        scan_duration_ms,
    };

    match verdict {
        ScanResult::Clean => Ok((StatusCode::OK, Json(response("clean", None))).into_response()),
        ScanResult::Infected { threat_name } => {
            tracing::warn!(file_name = %file_name, malware = %threat_name, "Malware detected");
            Ok((
                StatusCode::NOT_ACCEPTABLE,
                Json(response("infected", Some(threat_name))),
            )
                .into_response())
        }
        ScanResult::Error { reason } => Err(AppError::Internal(format!("Scan failed: {}", reason))),
    }
}

#[utoipa::path(
    post,
    path = "/scan/async",
    request_body(content = Multipart, description = "File to scan in the `file` field"),
    responses(
        (status = 202, description = "Scan job queued", body = AsyncScanResponse),
        (status = 400, description = "Missing or empty file", body = ErrorResponse),
        (status = 413, description = "File too large", body = ErrorResponse)
    ),
    tag = "scan"
)]
pub async fn scan_file_async(
    State(state): State<AppState>,
    mut multipart: Multipart,
) -> Result<(StatusCode, Json<AsyncScanResponse>), AppError> {
    let max_size = state.config.max_file_size;

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| AppError::BadRequest(e.to_string()))?
    {
        if field.name() != Some("file") {
            continue;
        }

        let file_name = sanitize_filename(field.file_name().unwrap_or("unnamed"))
            .map_err(AppError::from_validation)?;
        let temp_path = temp_file_path(state.orchestrator.temp_dir(), "upload", &file_name);

        let size = match write_field_to_file(field, &temp_path, max_size).await {
            Ok(0) => {
                remove_temp_file(&temp_path).await;
                return Err(AppError::BadRequest("Missing or empty file".to_string()));
            }
            Ok(size) => size,
            Err(e) => {
                remove_temp_file(&temp_path).await;
                return Err(e);
            }
        };

        let job_id = state
            .orchestrator
            .submit_file_scan(&file_name, temp_path, size)
            .await?;
        tracing::info!(job_id = %job_id, file_name = %file_name, size, "Queued file scan");

        return Ok((
            StatusCode::ACCEPTED,
            Json(AsyncScanResponse {
                status_url: status_url(&job_id),
                job_id,
                status: JobStatus::Queued,
                file_name: Some(file_name),
                message: "File uploaded successfully. Scan queued.".to_string(),
                source_url: None,
            }),
        ));
    }

    Err(AppError::BadRequest("Missing or empty file".to_string()))
}

#[utoipa::path(
    post,
    path = "/scan/async/url",
    request_body = ScanUrlRequest,
    responses(
        (status = 202, description = "Download and scan queued", body = AsyncScanResponse),
        (status = 400, description = "Invalid URL", body = ErrorResponse)
    ),
    tag = "scan"
)]
pub async fn scan_url_async(
    State(state): State<AppState>,
    Json(req): Json<ScanUrlRequest>,
) -> Result<(StatusCode, Json<AsyncScanResponse>), AppError> {
    let url = validate_scan_url(&req.url, req.is_base64).map_err(AppError::from_validation)?;
    let file_name = file_name_from_url(&url);

    let job_id = state.orchestrator.submit_url_scan(&url, &file_name).await?;
    tracing::info!(job_id = %job_id, url = %url, "Queued URL scan");

    Ok((
        StatusCode::ACCEPTED,
        Json(AsyncScanResponse {
            status_url: status_url(&job_id),
            job_id,
            status: JobStatus::Queued,
            file_name: Some(file_name),
            message: "URL scan queued. File will be downloaded and scanned.".to_string(),
            source_url: Some(url.to_string()),
        }),
    ))
}

#[utoipa::path(
    post,
    path = "/scan/json",
    request_body = JsonScanRequest,
    responses(
        (status = 200, description = "Payload is clean", body = JsonScanResult),
        (status = 406, description = "Malware detected in payload", body = JsonScanResult),
        (status = 500, description = "Scan engine error", body = JsonScanResult)
    ),
    tag = "scan"
)]
pub async fn scan_json(
    State(state): State<AppState>,
    Json(req): Json<JsonScanRequest>,
) -> (StatusCode, Json<JsonScanResult>) {
    let result = state.orchestrator.scan_json(&req.payload).await;

    let status = match result.status.as_str() {
        "clean" => StatusCode::OK,
        "infected" => StatusCode::NOT_ACCEPTABLE,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    };

    tracing::info!(
        status = %result.status,
        items_scanned = result.items_scanned,
        "JSON scan finished"
    );
    (status, Json(result))
}
