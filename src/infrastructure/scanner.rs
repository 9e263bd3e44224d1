use crate::config::ScanConfig;
use crate::services::scanner::VirusScanner;
use std::sync::Arc;
use tracing::info;

pub async fn setup_scanner(config: &ScanConfig) -> Arc<dyn VirusScanner> {
    let scanner_service = crate::services::scanner::create_scanner(
        &config.virus_scanner_type,
        &config.clamav_host,
        config.clamav_port,
    );

    // Warm up scanner connection; the service still starts when clamd is down
    if scanner_service.health_check().await {
        match scanner_service.version().await {
            Ok(version) => info!("🦠 Virus scanner connected: {}", version),
            Err(_) => info!("🦠 Virus scanner connected successfully"),
        }
    } else {
        tracing::warn!(
            "⚠️  Virus scanner unreachable at {}:{}! Scans will report errors until it is available.",
            config.clamav_host,
            config.clamav_port
        );
    }

    scanner_service.into()
}
