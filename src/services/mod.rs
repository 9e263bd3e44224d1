pub mod base64_extractor;
pub mod cleanup;
pub mod downloader;
pub mod job_registry;
pub mod queue;
pub mod scan_processing;
pub mod scanner;
pub mod telemetry;
pub mod worker;
