use anyhow::{Result, anyhow};
use std::pin::Pin;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;

/// Result of a virus scan
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ScanResult {
    /// File is clean (no threats detected)
    Clean,
    /// File is infected with malware
    Infected { threat_name: String },
    /// Engine answered, but not with a verdict
    Error { reason: String },
}

/// Content handed to a scanner. It may borrow from the request it came from.
pub type ScanStream<'a> = Pin<Box<dyn AsyncRead + Send + 'a>>;

/// Trait for virus scanning implementations
#[async_trait::async_trait]
pub trait VirusScanner: Send + Sync {
    /// Scan content for malware using a stream.
    /// `max_size` bounds how many bytes the engine will accept.
    async fn scan<'a>(
        &self,
        reader: ScanStream<'a>,
        max_size: u64,
    ) -> Result<ScanResult>;

    /// Check if the scanner is available/healthy
    async fn health_check(&self) -> bool;

    /// Engine version string
    async fn version(&self) -> Result<String> {
        Err(anyhow!("version is not supported by this scanner"))
    }
}

/// ClamAV scanner using TCP socket (clamd)
///
/// Docker command to run ClamAV:
/// ```bash
/// docker run -d --name clamav -p 3310:3310 clamav/clamav:latest
/// ```
pub struct ClamAvScanner {
    host: String,
    port: u16,
}

impl ClamAvScanner {
    pub fn new(host: String, port: u16) -> Self {
        Self { host, port }
    }

    async fn connect(&self) -> Result<TcpStream> {
        let addr = format!("{}:{}", self.host, self.port);
        TcpStream::connect(&addr)
            .await
            .map_err(|e| anyhow!("Failed to connect to ClamAV at {}: {}", addr, e))
    }

    async fn command(&self, cmd: &[u8]) -> Result<String> {
        let mut stream = self.connect().await?;
        stream.write_all(cmd).await?;
        stream.flush().await?;

        let mut response = Vec::new();
        tokio::time::timeout(
            std::time::Duration::from_secs(10),
            stream.read_to_end(&mut response),
        )
        .await
        .map_err(|_| anyhow!("ClamAV did not answer within 10 seconds"))??;

        Ok(String::from_utf8_lossy(&response)
            .trim_end_matches('\0')
            .trim()
            .to_string())
    }
}

/// Parses a clamd INSTREAM reply such as `stream: OK` or `stream: Eicar-Signature FOUND`.
pub fn parse_clamd_response(response: &str) -> ScanResult {
    let response = response.trim_end_matches('\0').trim();

    if response.ends_with("OK") {
        ScanResult::Clean
    } else if response.ends_with("FOUND") {
        let threat = response
            .split_once(':')
            .map(|(_, rest)| rest)
            .unwrap_or(response)
            .trim()
            .trim_end_matches("FOUND")
            .trim();
        let threat_name = if threat.is_empty() {
            "unknown".to_string()
        } else {
            threat.to_string()
        };
        ScanResult::Infected { threat_name }
    } else if response.contains("ERROR") {
        ScanResult::Error {
            reason: response.to_string(),
        }
    } else {
        ScanResult::Error {
            reason: format!("Unexpected ClamAV response: {}", response),
        }
    }
}

#[async_trait::async_trait]
impl VirusScanner for ClamAvScanner {
    async fn scan<'a>(
        &self,
        mut reader: ScanStream<'a>,
        max_size: u64,
    ) -> Result<ScanResult> {
        let mut stream = self.connect().await?;

        // Format: zINSTREAM\0 <length:u32 big-endian> <data> ... <0:u32>
        stream.write_all(b"zINSTREAM\0").await?;

        const CHUNK_SIZE: usize = 64 * 1024;
        let mut buffer = vec![0u8; CHUNK_SIZE];
        let mut total_sent: u64 = 0;

        loop {
            let n = reader.read(&mut buffer).await?;
            if n == 0 {
                break;
            }

            total_sent += n as u64;
            if total_sent > max_size {
                return Err(anyhow!(
                    "Stream exceeds maximum scan size of {} bytes",
                    max_size
                ));
            }

            let len = (n as u32).to_be_bytes();
            stream.write_all(&len).await?;
            stream.write_all(&buffer[..n]).await?;
        }

        stream.write_all(&0u32.to_be_bytes()).await?;
        stream.flush().await?;

        let mut response = Vec::new();
        tokio::time::timeout(
            std::time::Duration::from_secs(300),
            stream.read_to_end(&mut response),
        )
        .await
        .map_err(|_| anyhow!("ClamAV scan timed out after 5 minutes"))??;

        if response.is_empty() {
            return Err(anyhow!(
                "ClamAV returned no response (total sent: {} bytes)",
                total_sent
            ));
        }

        let response_str = String::from_utf8_lossy(&response);
        tracing::debug!("ClamAV response: {}", response_str.trim());

        Ok(parse_clamd_response(&response_str))
    }

    async fn health_check(&self) -> bool {
        matches!(self.command(b"zPING\0").await, Ok(resp) if resp.contains("PONG"))
    }

    async fn version(&self) -> Result<String> {
        self.command(b"zVERSION\0").await
    }
}

/// No-op scanner for development/testing
pub struct NoOpScanner;

#[async_trait::async_trait]
impl VirusScanner for NoOpScanner {
    async fn scan<'a>(
        &self,
        _reader: ScanStream<'a>,
        _max_size: u64,
    ) -> Result<ScanResult> {
        tracing::warn!("NoOpScanner: Skipping virus scan (development mode)");
        Ok(ScanResult::Clean)
    }

    async fn health_check(&self) -> bool {
        true
    }

    async fn version(&self) -> Result<String> {
        Ok("noop".to_string())
    }
}

/// Factory function to create appropriate scanner based on config
pub fn create_scanner(scanner_type: &str, host: &str, port: u16) -> Box<dyn VirusScanner> {
    match scanner_type.to_lowercase().as_str() {
        "clamav" => Box::new(ClamAvScanner::new(host.to_string(), port)),
        "noop" | "none" | "disabled" => Box::new(NoOpScanner),
        _ => {
            tracing::warn!("Unknown scanner type '{}', using NoOpScanner", scanner_type);
            Box::new(NoOpScanner)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_noop_scanner() {
        let scanner = NoOpScanner;
        let reader = Box::pin(std::io::Cursor::new(b"test content".to_vec()));
        let result = scanner.scan(reader, 1024).await.unwrap();
        assert_eq!(result, ScanResult::Clean);
        assert!(scanner.health_check().await);
    }

    #[tokio::test]
    async fn test_create_scanner() {
        let scanner = create_scanner("noop", "127.0.0.1", 3310);
        assert!(scanner.health_check().await);

        let scanner = create_scanner("something-else", "127.0.0.1", 3310);
        assert_eq!(scanner.version().await.unwrap(), "noop");
    }

    #[test]
    fn test_parse_clamd_response() {
        assert_eq!(parse_clamd_response("stream: OK\0"), ScanResult::Clean);
        assert_eq!(
            parse_clamd_response("stream: Win.Test.EICAR_HDB-1 FOUND\0"),
            ScanResult::Infected {
                threat_name: "Win.Test.EICAR_HDB-1".to_string()
            }
        );
        assert!(matches!(
            parse_clamd_response("INSTREAM size limit exceeded. ERROR"),
            ScanResult::Error { .. }
        ));
        assert!(matches!(
            parse_clamd_response("garbage"),
            ScanResult::Error { reason } if reason.contains("Unexpected")
        ));
    }

    #[tokio::test]
    async fn test_clamav_unreachable_is_error() {
        // Port 1 is reserved; nothing listens there in CI
        let scanner = ClamAvScanner::new("127.0.0.1".to_string(), 1);
        assert!(!scanner.health_check().await);
        let reader = Box::pin(std::io::Cursor::new(b"data".to_vec()));
        assert!(scanner.scan(reader, 1024).await.is_err());
    }
}
