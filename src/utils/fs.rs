use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use uuid::Uuid;

/// Deletes a temp file, treating "already gone" as success.
/// Failures are logged and swallowed.
pub async fn remove_temp_file(path: &Path) {
    match tokio::fs::remove_file(path).await {
        Ok(()) => tracing::debug!("Deleted temp file {}", path.display()),
        Err(e) if e.kind() == ErrorKind::NotFound => {}
        Err(e) => tracing::warn!("Failed to delete temp file {}: {}", path.display(), e),
    }
}

const MAX_EXTENSION_LEN: usize = 16;

/// Unique temp path for a job artifact: `clamav_<job>_<uuid>[.<ext>]`.
/// Only a short alphanumeric extension of `file_name` is kept, so client names
/// never push the path past the filesystem's name limit.
pub fn temp_file_path(dir: &Path, job_id: &str, file_name: &str) -> PathBuf {
    let stem = format!("clamav_{}_{}", job_id, Uuid::new_v4().simple());
    match temp_extension(file_name) {
        Some(ext) => dir.join(format!("{}.{}", stem, ext)),
        None => dir.join(stem),
    }
}

fn temp_extension(file_name: &str) -> Option<&str> {
    let (_, ext) = file_name.rsplit_once('.')?;
    let valid = !ext.is_empty()
        && ext.len() <= MAX_EXTENSION_LEN
        && ext.bytes().all(|b| b.is_ascii_alphanumeric());
    valid.then_some(ext)
}
