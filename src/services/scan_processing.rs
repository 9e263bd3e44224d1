use crate::config::ScanConfig;
use crate::models::JobStatus;
use crate::models::dto::{JsonScanResult, ScannedItemDetail};
use crate::services::base64_extractor::Base64Extractor;
use crate::services::downloader::DownloadGuard;
use crate::services::job_registry::JobRegistry;
use crate::services::queue::{QueueError, WorkQueue};
use crate::services::scanner::{ScanResult, ScanStream, VirusScanner};
use crate::services::telemetry::{self, ScanType};
use crate::utils::fs::{remove_temp_file, temp_file_path};
use anyhow::Result;
use bytes::Bytes;
use futures::FutureExt;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;
use tokio_util::sync::CancellationToken;
use url::Url;

/// Drives scan jobs through their lifecycle:
/// `queued -> (downloading) -> scanning -> clean | infected | error`.
pub struct ScanOrchestrator {
    jobs: Arc<JobRegistry>,
    scanner: Arc<dyn VirusScanner>,
    queue: Arc<WorkQueue>,
    downloader: DownloadGuard,
    extractor: Base64Extractor,
    temp_dir: PathBuf,
}

impl ScanOrchestrator {
    pub fn new(
        jobs: Arc<JobRegistry>,
        scanner: Arc<dyn VirusScanner>,
        queue: Arc<WorkQueue>,
        downloader: DownloadGuard,
        config: &ScanConfig,
    ) -> Self {
        Self {
            jobs,
            scanner,
            queue,
            downloader,
            extractor: Base64Extractor::new(config.min_base64_length, config.min_decoded_size),
            temp_dir: config.temp_dir.clone(),
        }
    }

    pub fn jobs(&self) -> &Arc<JobRegistry> {
        &self.jobs
    }

    pub fn temp_dir(&self) -> &Path {
        &self.temp_dir
    }

    /// Synchronous scan of an in-memory buffer.
    pub async fn scan_bytes(&self, data: Bytes) -> Result<ScanResult> {
        let size = data.len() as u64;
        self.scan_stream(Box::pin(std::io::Cursor::new(data)), size).await
    }

    /// Synchronous scan of a stream the caller has already bounded to `max_size`.
    pub async fn scan_stream<'a>(
        &self,
        reader: ScanStream<'a>,
        max_size: u64,
    ) -> Result<ScanResult> {
        self.scanner.scan(reader, max_size).await
    }

    /// Registers a job for a file already written to `temp_path` and queues its scan.
    /// The worker that runs the job owns and deletes the temp file.
    pub async fn submit_file_scan(
        self: &Arc<Self>,
        file_name: &str,
        temp_path: PathBuf,
        size: u64,
    ) -> Result<String, QueueError> {
        let job_id = self.jobs.create_job(file_name, size);

        let this = self.clone();
        let id = job_id.clone();
        let path = temp_path.clone();
        let enqueued = self
            .queue
            .enqueue_fn(move |cancel| async move {
                let work = this.process_file_scan(&id, &path, &cancel);
                this.guarded(&id, &path, work).await
            })
            .await;

        if let Err(e) = enqueued {
            self.abandon(&job_id, &temp_path, &e).await;
            return Err(e);
        }
        Ok(job_id)
    }

    /// Registers a job for `url` and queues its download and scan.
    pub async fn submit_url_scan(
        self: &Arc<Self>,
        url: &Url,
        file_name: &str,
    ) -> Result<String, QueueError> {
        let job_id = self.jobs.create_job(file_name, 0);
        let temp_path = temp_file_path(&self.temp_dir, &job_id, file_name);

        let this = self.clone();
        let id = job_id.clone();
        let path = temp_path.clone();
        let source = url.to_string();
        let enqueued = self
            .queue
            .enqueue_fn(move |cancel| async move {
                let work = this.process_url_scan(&id, &source, &path, &cancel);
                this.guarded(&id, &path, work).await
            })
            .await;

        if let Err(e) = enqueued {
            self.abandon(&job_id, &temp_path, &e).await;
            return Err(e);
        }
        Ok(job_id)
    }

    /// Scans a local file for `job_id`. The file is deleted before the job completes,
    /// whatever the outcome. A job picked up after shutdown began fails without scanning.
    pub async fn process_file_scan(
        &self,
        job_id: &str,
        temp_path: &Path,
        cancel: &CancellationToken,
    ) -> bool {
        if cancel.is_cancelled() {
            return self.shut_out(job_id, temp_path).await;
        }
        self.scan_local_file(job_id, temp_path, ScanType::File).await
    }

    /// Downloads `url` under the size ceiling and scans it.
    pub async fn process_url_scan(
        &self,
        job_id: &str,
        url: &str,
        temp_path: &Path,
        cancel: &CancellationToken,
    ) -> bool {
        if cancel.is_cancelled() {
            return self.shut_out(job_id, temp_path).await;
        }

        self.jobs
            .update_status(job_id, JobStatus::Downloading, None, None);
        tracing::info!(job_id = %job_id, url = %url, "Started downloading file");

        match self.downloader.download(url, temp_path, cancel).await {
            Ok(outcome) => {
                self.jobs.set_size(
                    job_id,
                    outcome.declared_length.unwrap_or(outcome.bytes_written),
                );
                tracing::info!(job_id = %job_id, "Download complete, starting scan");
                self.scan_local_file(job_id, temp_path, ScanType::Url).await
            }
            Err(e) => {
                tracing::warn!(job_id = %job_id, url = %url, "Download failed: {}", e);
                remove_temp_file(temp_path).await;
                let message = format!("Failed to download file: {}", e);
                telemetry::scan_failed(ScanType::Url, &message);
                self.jobs
                    .update_status(job_id, JobStatus::Error, None, Some(&message));
                self.jobs.complete_job(job_id);
                false
            }
        }
    }

    /// Scans a JSON document synchronously.
    ///
    /// Decoded base64 items are scanned in document order and the first
    /// detection returns immediately; when all of them are clean the full JSON
    /// text is scanned as one more item.
    pub async fn scan_json(&self, payload: &serde_json::Value) -> JsonScanResult {
        let started = Instant::now();
        let extracts = self.extractor.extract(payload);

        let mut result = JsonScanResult {
            status: "clean".to_string(),
            items_scanned: 0,
            base64_items_found: extracts.len(),
            malware: None,
            infected_item: None,
            error: None,
            scan_duration_ms: 0.0,
            details: Vec::new(),
        };

        tracing::info!(base64_items = extracts.len(), "Scanning JSON payload");

        for extract in extracts {
            let data = Bytes::from(extract.decoded_content);
            if !self
                .scan_json_item(&mut result, extract.path, "base64_decoded", data)
                .await
            {
                result.scan_duration_ms = elapsed_ms(started);
                record_json_verdict(&result);
                return result;
            }
        }

        match serde_json::to_vec(payload) {
            Ok(text) => {
                self.scan_json_item(&mut result, "json_payload".to_string(), "json_text", Bytes::from(text))
                    .await;
            }
            Err(e) => {
                result.status = "error".to_string();
                result.error = Some(format!("Failed to serialize payload: {}", e));
            }
        }

        result.scan_duration_ms = elapsed_ms(started);
        record_json_verdict(&result);
        result
    }

    /// Scans one JSON item and records it. Returns false when scanning must stop.
    async fn scan_json_item(
        &self,
        result: &mut JsonScanResult,
        name: String,
        item_type: &str,
        data: Bytes,
    ) -> bool {
        let size = data.len() as u64;
        let verdict = self.scan_bytes(data).await;
        result.items_scanned += 1;

        let mut detail = ScannedItemDetail {
            name: name.clone(),
            item_type: item_type.to_string(),
            size,
            status: "clean".to_string(),
            malware: None,
        };

        let keep_going = match verdict {
            Ok(ScanResult::Clean) => true,
            Ok(ScanResult::Infected { threat_name }) => {
                tracing::warn!(item = %name, malware = %threat_name, "Malware detected in JSON payload");
                detail.status = "infected".to_string();
                detail.malware = Some(threat_name.clone());
                result.status = "infected".to_string();
                result.malware = Some(threat_name);
                result.infected_item = Some(name);
                false
            }
            Ok(ScanResult::Error { reason }) => {
                tracing::error!(item = %name, "JSON item scan error: {}", reason);
                detail.status = "error".to_string();
                result.status = "error".to_string();
                result.error = Some(reason);
                false
            }
            Err(e) => {
                tracing::error!(item = %name, "JSON item scan failed: {}", e);
                detail.status = "error".to_string();
                result.status = "error".to_string();
                result.error = Some(e.to_string());
                false
            }
        };

        result.details.push(detail);
        keep_going
    }

    async fn scan_local_file(&self, job_id: &str, temp_path: &Path, scan_type: ScanType) -> bool {
        self.jobs.update_status(job_id, JobStatus::Scanning, None, None);
        tracing::info!(job_id = %job_id, "Started scanning job");

        let started = Instant::now();
        let verdict = self.scan_file(temp_path).await;
        remove_temp_file(temp_path).await;

        self.finish(job_id, scan_type, started, verdict)
    }

    /// Fails a job that reached a worker after shutdown began.
    async fn shut_out(&self, job_id: &str, temp_path: &Path) -> bool {
        tracing::warn!(job_id = %job_id, "Dropping scan job during shutdown");
        remove_temp_file(temp_path).await;
        self.jobs.update_status(
            job_id,
            JobStatus::Error,
            None,
            Some("Service shutting down"),
        );
        self.jobs.complete_job(job_id);
        false
    }

    async fn scan_file(&self, path: &Path) -> Result<ScanResult> {
        let file = tokio::fs::File::open(path).await?;
        let size = file.metadata().await?.len();
        self.scanner.scan(Box::pin(file), size).await
    }

    /// Records the terminal state for a verdict and completes the job.
    fn finish(
        &self,
        job_id: &str,
        scan_type: ScanType,
        started: Instant,
        verdict: Result<ScanResult>,
    ) -> bool {
        if let Some(job) = self.jobs.get_job(job_id) {
            telemetry::record_verdict(
                scan_type,
                &job.file_name,
                job.file_size,
                elapsed_ms(started),
                &verdict,
            );
        }

        let success = match verdict {
            Ok(ScanResult::Clean) => {
                self.jobs.update_status(job_id, JobStatus::Clean, None, None);
                tracing::info!(job_id = %job_id, "Job scan complete: clean");
                true
            }
            Ok(ScanResult::Infected { threat_name }) => {
                self.jobs
                    .update_status(job_id, JobStatus::Infected, Some(&threat_name), None);
                tracing::warn!(job_id = %job_id, malware = %threat_name, "Job scan complete: infected");
                true
            }
            Ok(ScanResult::Error { reason }) => {
                self.jobs
                    .update_status(job_id, JobStatus::Error, None, Some(&reason));
                tracing::error!(job_id = %job_id, "Job scan error: {}", reason);
                false
            }
            Err(e) => {
                let message = e.to_string();
                self.jobs
                    .update_status(job_id, JobStatus::Error, None, Some(&message));
                tracing::error!(job_id = %job_id, "Error processing scan job: {}", message);
                false
            }
        };

        self.jobs.complete_job(job_id);
        success
    }

    /// Runs a job future, turning a panic into a terminal `error` state.
    async fn guarded<F>(&self, job_id: &str, temp_path: &Path, work: F) -> bool
    where
        F: Future<Output = bool>,
    {
        match AssertUnwindSafe(work).catch_unwind().await {
            Ok(success) => success,
            Err(_) => {
                tracing::error!(job_id = %job_id, "Scan job panicked");
                remove_temp_file(temp_path).await;
                self.jobs.update_status(
                    job_id,
                    JobStatus::Error,
                    None,
                    Some("Internal error while processing scan"),
                );
                self.jobs.complete_job(job_id);
                false
            }
        }
    }

    async fn abandon(&self, job_id: &str, temp_path: &Path, e: &QueueError) {
        tracing::error!(job_id = %job_id, "Failed to enqueue scan job: {}", e);
        remove_temp_file(temp_path).await;
        self.jobs
            .update_status(job_id, JobStatus::Error, None, Some(&e.to_string()));
        self.jobs.complete_job(job_id);
    }
}

fn elapsed_ms(started: Instant) -> f64 {
    started.elapsed().as_secs_f64() * 1000.0
}

/// Emits telemetry for a whole JSON scan rather than for each item.
fn record_json_verdict(result: &JsonScanResult) {
    let size = result.details.iter().map(|d| d.size).sum();
    let name = result.infected_item.as_deref().unwrap_or("json_payload");
    let verdict = match result.status.as_str() {
        "clean" => Ok(ScanResult::Clean),
        "infected" => Ok(ScanResult::Infected {
            threat_name: result.malware.clone().unwrap_or_default(),
        }),
        _ => Ok(ScanResult::Error {
            reason: result.error.clone().unwrap_or_default(),
        }),
    };
    telemetry::record_verdict(ScanType::Json, name, size, result.scan_duration_ms, &verdict);
}
