use std::env;
use std::path::PathBuf;
use std::time::Duration;

/// Runtime configuration for the scan service
#[derive(Debug, Clone)]
pub struct ScanConfig {
    /// Maximum accepted file size in bytes, for uploads and URL downloads (default: 200 MB)
    pub max_file_size: u64,

    /// Virus scanner type: "clamav" or "noop" (default: "clamav")
    pub virus_scanner_type: String,

    /// clamd host (default: "127.0.0.1")
    pub clamav_host: String,

    /// clamd port (default: 3310)
    pub clamav_port: u16,

    /// Number of background scan workers (default: 4)
    pub worker_count: usize,

    /// Capacity of the background work queue (default: 100)
    pub queue_capacity: usize,

    /// How long job records are kept, measured from creation (default: 24h)
    pub job_retention: Duration,

    /// Interval between job cleanup sweeps (default: 10 minutes)
    pub cleanup_interval: Duration,

    /// Delay before the first cleanup sweep (default: 1 minute)
    pub cleanup_initial_delay: Duration,

    /// Minimum string length before a JSON value is considered base64 (default: 20)
    pub min_base64_length: usize,

    /// Minimum decoded size for a base64 value to be scanned (default: 10 bytes)
    pub min_decoded_size: usize,

    /// Overall timeout for URL downloads (default: 10 minutes)
    pub download_timeout: Duration,

    /// Maximum number of redirects followed by URL downloads (default: 5)
    pub max_redirects: usize,

    /// Directory for uploaded and downloaded temp files (default: OS temp dir)
    pub temp_dir: PathBuf,
}

impl Default for ScanConfig {
    fn default() -> Self {
        Self {
            max_file_size: 200 * 1024 * 1024, // 200 MB
            virus_scanner_type: "clamav".to_string(),
            clamav_host: "127.0.0.1".to_string(),
            clamav_port: 3310,
            worker_count: 4,
            queue_capacity: 100,
            job_retention: Duration::from_secs(24 * 60 * 60),
            cleanup_interval: Duration::from_secs(10 * 60),
            cleanup_initial_delay: Duration::from_secs(60),
            min_base64_length: 20,
            min_decoded_size: 10,
            download_timeout: Duration::from_secs(10 * 60),
            max_redirects: 5,
            temp_dir: env::temp_dir(),
        }
    }
}

impl ScanConfig {
    /// Load configuration from environment variables
    pub fn from_env() -> Self {
        let default = Self::default();

        Self {
            max_file_size: env::var("MAX_FILE_SIZE_MB")
                .ok()
                .and_then(|v| v.parse::<u64>().ok())
                .map(|mb| mb * 1024 * 1024)
                .unwrap_or(default.max_file_size),

            virus_scanner_type: env::var("VIRUS_SCANNER_TYPE")
                .unwrap_or(default.virus_scanner_type),

            clamav_host: env::var("CLAMD_HOST").unwrap_or(default.clamav_host),

            clamav_port: env::var("CLAMD_PORT")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(default.clamav_port),

            worker_count: env::var("WORKER_COUNT")
                .ok()
                .and_then(|v| v.parse::<usize>().ok())
                .map(|n| n.max(1))
                .unwrap_or(default.worker_count),

            queue_capacity: env::var("QUEUE_CAPACITY")
                .ok()
                .and_then(|v| v.parse::<usize>().ok())
                .map(|n| n.max(1))
                .unwrap_or(default.queue_capacity),

            job_retention: env::var("JOB_RETENTION_HOURS")
                .ok()
                .and_then(|v| v.parse::<u64>().ok())
                .map(|h| Duration::from_secs(h * 60 * 60))
                .unwrap_or(default.job_retention),

            cleanup_interval: env::var("CLEANUP_INTERVAL_MINUTES")
                .ok()
                .and_then(|v| v.parse::<u64>().ok())
                .map(|m| Duration::from_secs(m.max(1) * 60))
                .unwrap_or(default.cleanup_interval),

            cleanup_initial_delay: default.cleanup_initial_delay,

            min_base64_length: env::var("MIN_BASE64_LENGTH")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(default.min_base64_length),

            min_decoded_size: env::var("MIN_DECODED_SIZE")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(default.min_decoded_size),

            download_timeout: env::var("DOWNLOAD_TIMEOUT_SECS")
                .ok()
                .and_then(|v| v.parse::<u64>().ok())
                .map(Duration::from_secs)
                .unwrap_or(default.download_timeout),

            max_redirects: env::var("MAX_REDIRECTS")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(default.max_redirects),

            temp_dir: env::var("SCAN_TEMP_DIR")
                .map(PathBuf::from)
                .unwrap_or(default.temp_dir),
        }
    }

    /// Create config for development (no clamd required)
    pub fn development() -> Self {
        Self {
            virus_scanner_type: "noop".to_string(),
            ..Self::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = ScanConfig::default();
        assert_eq!(config.max_file_size, 200 * 1024 * 1024);
        assert_eq!(config.worker_count, 4);
        assert_eq!(config.queue_capacity, 100);
        assert_eq!(config.job_retention, Duration::from_secs(86_400));
        assert_eq!(config.min_base64_length, 20);
        assert_eq!(config.min_decoded_size, 10);
        assert_eq!(config.virus_scanner_type, "clamav");
    }

    #[test]
    fn test_development_config() {
        let config = ScanConfig::development();
        assert_eq!(config.virus_scanner_type, "noop");
        assert_eq!(config.worker_count, 4);
    }
}
