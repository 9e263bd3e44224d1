//! Size-guarded streaming downloads for URL scans.
//!
//! The ceiling is enforced twice: against any declared `Content-Length`
//! before the body is requested, and against the running byte count while
//! the body streams in, for origins that omit or misreport the length.

use crate::utils::fs::remove_temp_file;
use futures::TryStreamExt;
use reqwest::header::CONTENT_LENGTH;
use reqwest::{StatusCode, redirect};
use std::path::Path;
use std::time::Duration;
use thiserror::Error;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio_util::io::StreamReader;
use tokio_util::sync::CancellationToken;

pub const DOWNLOAD_CHUNK_SIZE: usize = 8 * 1024;

#[derive(Error, Debug)]
pub enum DownloadError {
    #[error("File size exceeds maximum allowed size ({limit} bytes). Download cancelled.")]
    ExceedsLimit { limit: u64 },

    #[error("Origin returned HTTP status {0}")]
    HttpStatus(StatusCode),

    #[error("Network error: {0}")]
    Network(#[from] reqwest::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Download cancelled by shutdown")]
    Cancelled,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DownloadOutcome {
    /// Bytes written to the destination
    pub bytes_written: u64,
    /// Length announced by the origin, if any
    pub declared_length: Option<u64>,
}

pub struct DownloadGuard {
    client: reqwest::Client,
    max_bytes: u64,
}

impl DownloadGuard {
    pub fn new(max_bytes: u64, timeout: Duration, max_redirects: usize) -> Result<Self, DownloadError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .redirect(redirect::Policy::limited(max_redirects))
            .build()?;
        Ok(Self { client, max_bytes })
    }

    pub fn max_bytes(&self) -> u64 {
        self.max_bytes
    }

    /// Streams `url` into `dest`. On any failure the partial file is removed.
    pub async fn download(
        &self,
        url: &str,
        dest: &Path,
        cancel: &CancellationToken,
    ) -> Result<DownloadOutcome, DownloadError> {
        let result = self.fetch(url, dest, cancel).await;
        if result.is_err() {
            remove_temp_file(dest).await;
        }
        result
    }

    async fn fetch(
        &self,
        url: &str,
        dest: &Path,
        cancel: &CancellationToken,
    ) -> Result<DownloadOutcome, DownloadError> {
        let head = tokio::select! {
            _ = cancel.cancelled() => return Err(DownloadError::Cancelled),
            res = self.client.head(url).send() => res?,
        };

        let declared_length = if head.status().is_success() {
            content_length_header(head.headers())
        } else {
            tracing::debug!(url = %url, status = %head.status(), "HEAD request not supported");
            None
        };

        match declared_length {
            Some(size) => {
                tracing::info!(url = %url, size, "Origin declared Content-Length");
                self.check_declared(size)?;
            }
            None => tracing::warn!(
                url = %url,
                "No Content-Length header, will monitor size during download"
            ),
        }

        let response = tokio::select! {
            _ = cancel.cancelled() => return Err(DownloadError::Cancelled),
            res = self.client.get(url).send() => res?,
        };

        if !response.status().is_success() {
            return Err(DownloadError::HttpStatus(response.status()));
        }

        // The GET may announce a different length than the HEAD did
        let declared_length = match content_length_header(response.headers()) {
            Some(size) => {
                self.check_declared(size)?;
                Some(size)
            }
            None => declared_length,
        };

        let mut file = tokio::fs::File::create(dest).await?;
        let reader = StreamReader::new(response.bytes_stream().map_err(std::io::Error::other));
        tokio::pin!(reader);

        let mut buffer = vec![0u8; DOWNLOAD_CHUNK_SIZE];
        let mut total: u64 = 0;

        loop {
            let n = tokio::select! {
                _ = cancel.cancelled() => return Err(DownloadError::Cancelled),
                n = reader.read(&mut buffer) => n?,
            };
            if n == 0 {
                break;
            }

            total += n as u64;
            if total > self.max_bytes {
                tracing::warn!(
                    url = %url,
                    limit = self.max_bytes,
                    "Download exceeded size limit, aborting"
                );
                return Err(DownloadError::ExceedsLimit {
                    limit: self.max_bytes,
                });
            }

            file.write_all(&buffer[..n]).await?;
        }

        file.flush().await?;
        tracing::info!(url = %url, bytes = total, path = %dest.display(), "Download complete");

        Ok(DownloadOutcome {
            bytes_written: total,
            declared_length,
        })
    }

    fn check_declared(&self, size: u64) -> Result<(), DownloadError> {
        if size > self.max_bytes {
            tracing::warn!(size, limit = self.max_bytes, "Declared size exceeds limit");
            return Err(DownloadError::ExceedsLimit {
                limit: self.max_bytes,
            });
        }
        Ok(())
    }
}

fn content_length_header(headers: &reqwest::header::HeaderMap) -> Option<u64> {
    headers
        .get(CONTENT_LENGTH)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.trim().parse().ok())
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::{
        Router,
        body::Body,
        extract::State,
        http::{Method, StatusCode as AxumStatus},
        routing::get,
    };
    use bytes::Bytes;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Local origin server. The counter tracks GET requests for `/declared-large`.
    async fn spawn_origin() -> (String, Arc<AtomicUsize>) {
        let large_gets = Arc::new(AtomicUsize::new(0));
        let app = Router::new()
            .route("/small", get(|| async { vec![1u8; 1000] }))
            .route("/exact", get(|| async { vec![2u8; 10 * 1024] }))
            .route(
                "/declared-large",
                get(
                    |State(gets): State<Arc<AtomicUsize>>, method: Method| async move {
                        if method == Method::GET {
                            gets.fetch_add(1, Ordering::SeqCst);
                        }
                        vec![3u8; 100 * 1024]
                    },
                ),
            )
            .route(
                "/chunked-small",
                get(|| async {
                    let chunks = (0..5).map(|_| Ok::<_, std::io::Error>(Bytes::from(vec![4u8; 1000])));
                    Body::from_stream(futures::stream::iter(chunks))
                }),
            )
            .route(
                "/chunked-large",
                get(|| async {
                    let chunks = (0..100).map(|_| Ok::<_, std::io::Error>(Bytes::from(vec![5u8; 1024])));
                    Body::from_stream(futures::stream::iter(chunks))
                }),
            )
            .route(
                "/stalled",
                get(|| async {
                    let first = futures::stream::once(async {
                        Ok::<_, std::io::Error>(Bytes::from(vec![6u8; 1024]))
                    });
                    let rest = futures::stream::pending::<Result<Bytes, std::io::Error>>();
                    Body::from_stream(futures::StreamExt::chain(first, rest))
                }),
            )
            .route("/missing", get(|| async { AxumStatus::NOT_FOUND }))
            .with_state(large_gets.clone());

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        (format!("http://{}", addr), large_gets)
    }

    fn guard(limit: u64) -> DownloadGuard {
        DownloadGuard::new(limit, Duration::from_secs(30), 5).unwrap()
    }

    #[tokio::test]
    async fn test_download_with_declared_length() {
        let (origin, _) = spawn_origin().await;
        let dir = tempfile::tempdir().unwrap();
        let dest = dir.path().join("small.bin");

        let outcome = guard(10 * 1024)
            .download(&format!("{}/small", origin), &dest, &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(outcome.bytes_written, 1000);
        assert_eq!(outcome.declared_length, Some(1000));
        assert_eq!(tokio::fs::read(&dest).await.unwrap(), vec![1u8; 1000]);
    }

    #[tokio::test]
    async fn test_download_exactly_at_limit() {
        let (origin, _) = spawn_origin().await;
        let dir = tempfile::tempdir().unwrap();
        let dest = dir.path().join("exact.bin");

        let outcome = guard(10 * 1024)
            .download(&format!("{}/exact", origin), &dest, &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(outcome.bytes_written, 10 * 1024);
    }

    #[tokio::test]
    async fn test_declared_length_over_limit_rejected_before_transfer() {
        let (origin, large_gets) = spawn_origin().await;
        let dir = tempfile::tempdir().unwrap();
        let dest = dir.path().join("large.bin");

        let err = guard(10 * 1024)
            .download(&format!("{}/declared-large", origin), &dest, &CancellationToken::new())
            .await
            .unwrap_err();

        assert!(matches!(err, DownloadError::ExceedsLimit { limit } if limit == 10 * 1024));
        assert!(!dest.exists());
        assert_eq!(
            large_gets.load(Ordering::SeqCst),
            0,
            "HEAD alone must reject the download"
        );
    }

    #[tokio::test]
    async fn test_undeclared_length_within_limit() {
        let (origin, _) = spawn_origin().await;
        let dir = tempfile::tempdir().unwrap();
        let dest = dir.path().join("chunked.bin");

        let outcome = guard(10 * 1024)
            .download(&format!("{}/chunked-small", origin), &dest, &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(outcome.bytes_written, 5000);
        assert_eq!(outcome.declared_length, None);
    }

    #[tokio::test]
    async fn test_undeclared_length_over_limit_aborts_and_removes_partial_file() {
        let (origin, _) = spawn_origin().await;
        let dir = tempfile::tempdir().unwrap();
        let dest = dir.path().join("chunked-large.bin");

        let err = guard(10 * 1024)
            .download(&format!("{}/chunked-large", origin), &dest, &CancellationToken::new())
            .await
            .unwrap_err();

        assert!(matches!(err, DownloadError::ExceedsLimit { .. }));
        assert!(!dest.exists(), "partial download must be deleted");
    }

    #[tokio::test]
    async fn test_non_success_status() {
        let (origin, _) = spawn_origin().await;
        let dir = tempfile::tempdir().unwrap();
        let dest = dir.path().join("missing.bin");

        let err = guard(1024)
            .download(&format!("{}/missing", origin), &dest, &CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(err, DownloadError::HttpStatus(s) if s == StatusCode::NOT_FOUND));
        assert!(!dest.exists());
    }

    #[tokio::test]
    async fn test_unreachable_origin_is_network_error() {
        let dir = tempfile::tempdir().unwrap();
        let dest = dir.path().join("x.bin");
        let err = guard(1024)
            .download("http://127.0.0.1:1/file", &dest, &CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(err, DownloadError::Network(_)));
    }

    #[tokio::test]
    async fn test_cancellation_aborts_stalled_transfer() {
        let (origin, _) = spawn_origin().await;
        let dir = tempfile::tempdir().unwrap();
        let dest = dir.path().join("stalled.bin");
        let cancel = CancellationToken::new();

        let canceller = {
            let cancel = cancel.clone();
            tokio::spawn(async move {
                tokio::time::sleep(Duration::from_millis(100)).await;
                cancel.cancel();
            })
        };

        let err = tokio::time::timeout(
            Duration::from_secs(5),
            guard(1024 * 1024).download(&format!("{}/stalled", origin), &dest, &cancel),
        )
        .await
        .expect("cancellation is prompt")
        .unwrap_err();

        canceller.await.unwrap();
        assert!(matches!(err, DownloadError::Cancelled));
        assert!(!dest.exists());
    }
}
