//! Scan telemetry, emitted as structured `tracing` events on the `metrics` target.
//!
//! Event names: `scan_completed`, `malware_detected`, `scan_failed`,
//! `queue_depth`, `worker_utilization`.

use crate::services::scanner::ScanResult;
use tracing::{info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScanType {
    File,
    Url,
    Json,
}

impl ScanType {
    pub fn as_str(self) -> &'static str {
        match self {
            ScanType::File => "file",
            ScanType::Url => "url",
            ScanType::Json => "json",
        }
    }
}

pub fn scan_completed(scan_type: ScanType, duration_ms: f64, is_clean: bool, size: u64) {
    info!(
        target: "metrics",
        scan_type = scan_type.as_str(),
        duration_ms,
        is_clean,
        size_bytes = size,
        size_category = file_size_category(size),
        "scan_completed"
    );
}

pub fn malware_detected(scan_type: ScanType, threat_name: &str, file_name: &str) {
    warn!(
        target: "metrics",
        scan_type = scan_type.as_str(),
        threat_name = %threat_name,
        threat_category = threat_category(threat_name),
        file_name = %file_name.escape_debug(),
        "malware_detected"
    );
}

pub fn scan_failed(scan_type: ScanType, error: &str) {
    warn!(
        target: "metrics",
        scan_type = scan_type.as_str(),
        error = %error,
        error_category = error_category(error),
        "scan_failed"
    );
}

pub fn queue_depth(queue_length: usize, capacity: usize) {
    info!(target: "metrics", queue_length, capacity, "queue_depth");
}

pub fn worker_utilization(active_workers: usize, total_workers: usize) {
    let utilization_percent = if total_workers > 0 {
        active_workers as f64 * 100.0 / total_workers as f64
    } else {
        0.0
    };
    info!(
        target: "metrics",
        active_workers,
        total_workers,
        utilization_percent,
        "worker_utilization"
    );
}

/// Emits the events matching one scan verdict.
pub fn record_verdict(
    scan_type: ScanType,
    file_name: &str,
    size: u64,
    duration_ms: f64,
    verdict: &anyhow::Result<ScanResult>,
) {
    match verdict {
        Ok(ScanResult::Clean) => scan_completed(scan_type, duration_ms, true, size),
        Ok(ScanResult::Infected { threat_name }) => {
            scan_completed(scan_type, duration_ms, false, size);
            malware_detected(scan_type, threat_name, file_name);
        }
        Ok(ScanResult::Error { reason }) => scan_failed(scan_type, reason),
        Err(e) => scan_failed(scan_type, &e.to_string()),
    }
}

pub fn file_size_category(size: u64) -> &'static str {
    const MB: u64 = 1024 * 1024;
    match size {
        s if s < MB => "small",
        s if s < 10 * MB => "medium",
        s if s < 50 * MB => "large",
        s if s < 100 * MB => "very_large",
        _ => "huge",
    }
}

pub fn threat_category(threat_name: &str) -> &'static str {
    let threat = threat_name.to_lowercase();
    if threat.contains("eicar") {
        "test"
    } else if threat.contains("trojan") {
        "trojan"
    } else if threat.contains("virus") {
        "virus"
    } else if threat.contains("worm") {
        "worm"
    } else if threat.contains("ransomware") {
        "ransomware"
    } else if threat.contains("adware") || threat.contains("spyware") {
        "spyware"
    } else if threat.contains("rootkit") {
        "rootkit"
    } else {
        "other"
    }
}

pub fn error_category(error: &str) -> &'static str {
    let error = error.to_lowercase();
    if error.contains("timeout") || error.contains("timed out") {
        "timeout"
    } else if error.contains("connection") || error.contains("network") {
        "network"
    } else if error.contains("file") || error.contains("path") {
        "filesystem"
    } else if error.contains("permission") || error.contains("access denied") {
        "permission"
    } else if error.contains("parse") || error.contains("format") {
        "format"
    } else {
        "other"
    }
}
