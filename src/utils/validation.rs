use anyhow::{Result, anyhow};
use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use percent_encoding::percent_decode_str;
use std::path::Path;
use url::Url;

#[derive(Debug, Clone)]
pub struct ValidationError {
    pub code: &'static str,
    pub message: String,
}

impl std::fmt::Display for ValidationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.code, self.message)
    }
}

impl std::error::Error for ValidationError {}

/// Validates file size against maximum limit
pub fn validate_file_size(size: u64, max_size: u64) -> Result<()> {
    if size == 0 {
        return Err(anyhow!(ValidationError {
            code: "EMPTY_FILE",
            message: "Missing or empty file".to_string(),
        }));
    }
    if size > max_size {
        return Err(anyhow!(ValidationError {
            code: "FILE_TOO_LARGE",
            message: format!(
                "File size {} bytes exceeds maximum allowed {} bytes ({} MB)",
                size,
                max_size,
                max_size / 1024 / 1024
            ),
        }));
    }
    Ok(())
}

/// Sanitizes a client supplied filename so it can be embedded in a temp path.
/// Executables are expected here, so no extension is rejected.
pub fn sanitize_filename(filename: &str) -> Result<String> {
    // Only the last component; "..\\..\\x" is treated like "../../x"
    let normalized = filename.replace('\\', "/");
    let name = Path::new(&normalized)
        .file_name()
        .and_then(|n| n.to_str())
        .unwrap_or("");

    if filename.contains("..") || filename.contains('/') || filename.contains('\\') {
        tracing::warn!("Path traversal attempt detected: {}", filename);
    }

    let sanitized: String = name
        .chars()
        .map(|c| {
            if c.is_control()
                || c == '/'
                || c == '\\'
                || c == ':'
                || c == '*'
                || c == '?'
                || c == '"'
                || c == '<'
                || c == '>'
                || c == '|'
                || c == ';'
            {
                '_'
            } else {
                c
            }
        })
        .collect();
    let sanitized = sanitized.trim_start_matches('.').trim().to_string();

    if sanitized.is_empty() {
        return Err(anyhow!(ValidationError {
            code: "INVALID_FILENAME",
            message: "Filename cannot be empty".to_string(),
        }));
    }

    // Limit length safely for UTF-8
    let sanitized = if sanitized.len() > 255 {
        let mut end = 255;
        while !sanitized.is_char_boundary(end) {
            end -= 1;
        }
        sanitized[..end].to_string()
    } else {
        sanitized
    };

    Ok(sanitized)
}

/// Validates a URL submitted for scanning, decoding it from base64 first when asked.
/// Only absolute http/https URLs are accepted.
pub fn validate_scan_url(raw: &str, is_base64: bool) -> Result<Url> {
    let raw = raw.trim();
    if raw.is_empty() {
        return Err(anyhow!(ValidationError {
            code: "URL_REQUIRED",
            message: "URL is required".to_string(),
        }));
    }

    let decoded;
    let candidate = if is_base64 {
        let bytes = STANDARD.decode(raw).map_err(|_| {
            anyhow!(ValidationError {
                code: "INVALID_BASE64_URL",
                message: "Invalid Base64 encoded URL".to_string(),
            })
        })?;
        decoded = String::from_utf8(bytes).map_err(|_| {
            anyhow!(ValidationError {
                code: "INVALID_BASE64_URL",
                message: "Invalid Base64 encoded URL".to_string(),
            })
        })?;
        decoded.trim()
    } else {
        raw
    };

    let invalid = || {
        anyhow!(ValidationError {
            code: "INVALID_URL",
            message: "Invalid URL. Must be a valid HTTP or HTTPS URL.".to_string(),
        })
    };

    let url = Url::parse(candidate).map_err(|_| invalid())?;
    if !matches!(url.scheme(), "http" | "https") || url.host_str().is_none() {
        return Err(invalid());
    }
    Ok(url)
}

/// Name shown for a URL job: last path segment (percent-decoded, then sanitized),
/// else `<host_with_underscores>.bin`.
pub fn file_name_from_url(url: &Url) -> String {
    let from_path = url
        .path_segments()
        .and_then(|mut segments| segments.next_back())
        .filter(|name| !name.is_empty())
        .and_then(|name| sanitize_filename(&percent_decode_str(name).decode_utf8_lossy()).ok());

    from_path.unwrap_or_else(|| {
        format!(
            "{}.bin",
            url.host_str().unwrap_or("download").replace('.', "_")
        )
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate_file_size() {
        assert!(validate_file_size(1024, 2048).is_ok());
        assert!(validate_file_size(2048, 2048).is_ok());
        assert!(validate_file_size(2049, 2048).is_err());
        assert!(validate_file_size(0, 2048).is_err());
    }

    #[test]
    fn test_sanitize_filename() {
        assert_eq!(sanitize_filename("test.pdf").unwrap(), "test.pdf");
        assert_eq!(sanitize_filename("virus.exe").unwrap(), "virus.exe");
        assert_eq!(sanitize_filename("my file.doc").unwrap(), "my file.doc");
        assert_eq!(
            sanitize_filename("test<script>.pdf").unwrap(),
            "test_script_.pdf"
        );
        assert_eq!(sanitize_filename("测试.txt").unwrap(), "测试.txt");

        // Path traversal
        assert_eq!(sanitize_filename("../../../etc/passwd").unwrap(), "passwd");
        assert_eq!(
            sanitize_filename("..\\..\\windows\\system32").unwrap(),
            "system32"
        );

        assert!(sanitize_filename("").is_err());
        assert!(sanitize_filename("...").is_err());
    }

    #[test]
    fn test_validate_scan_url() {
        let url = validate_scan_url("https://example.com/files/report.pdf", false).unwrap();
        assert_eq!(url.host_str(), Some("example.com"));

        assert!(validate_scan_url("", false).is_err());
        assert!(validate_scan_url("   ", false).is_err());
        assert!(validate_scan_url("ftp://example.com/a", false).is_err());
        assert!(validate_scan_url("not a url", false).is_err());
        assert!(validate_scan_url("/relative/path", false).is_err());
    }

    #[test]
    fn test_validate_base64_url() {
        let encoded = STANDARD.encode("https://example.com/a.zip");
        let url = validate_scan_url(&encoded, true).unwrap();
        assert_eq!(url.as_str(), "https://example.com/a.zip");

        let err = validate_scan_url("%%%not-base64%%%", true).unwrap_err();
        assert!(err.to_string().contains("Invalid Base64"));
    }

    #[test]
    fn test_file_name_from_url() {
        let url = Url::parse("https://example.com/files/report.pdf").unwrap();
        assert_eq!(file_name_from_url(&url), "report.pdf");

        let url = Url::parse("https://downloads.example.com/").unwrap();
        assert_eq!(file_name_from_url(&url), "downloads_example_com.bin");

        let url = Url::parse("http://example.com").unwrap();
        assert_eq!(file_name_from_url(&url), "example_com.bin");
    }

    #[test]
    fn test_file_name_from_url_is_percent_decoded() {
        let url = Url::parse("https://example.com/docs/report%20final.pdf").unwrap();
        assert_eq!(file_name_from_url(&url), "report final.pdf");

        let url = Url::parse("https://example.com/%E6%B5%8B%E8%AF%95.txt").unwrap();
        assert_eq!(file_name_from_url(&url), "测试.txt");

        // An encoded separator must not smuggle a path back in
        let url = Url::parse("https://example.com/..%2F..%2Fetc%2Fpasswd").unwrap();
        assert_eq!(file_name_from_url(&url), "passwd");
    }
}
