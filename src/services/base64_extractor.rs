//! Finds base64-encoded payloads embedded anywhere in a JSON document.
//!
//! Paths use `.` for object members and `[i]` for array elements, relative to
//! the root: `attachments[0].data`.

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use serde_json::Value;

/// A decoded base64 payload and where it was found
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Base64Extract {
    pub path: String,
    pub decoded_content: Vec<u8>,
}

#[derive(Debug, Clone, Copy)]
pub struct Base64Extractor {
    /// Minimum trimmed string length to be considered at all
    min_base64_length: usize,
    /// Minimum decoded size to be reported
    min_decoded_size: usize,
}

impl Default for Base64Extractor {
    fn default() -> Self {
        Self::new(20, 10)
    }
}

impl Base64Extractor {
    pub fn new(min_base64_length: usize, min_decoded_size: usize) -> Self {
        Self {
            min_base64_length,
            min_decoded_size,
        }
    }

    /// Walks `value` depth-first and returns every qualifying extract in traversal order.
    pub fn extract(&self, value: &Value) -> Vec<Base64Extract> {
        let mut extracts = Vec::new();
        self.walk(value, String::new(), &mut extracts);
        extracts
    }

    fn walk(&self, value: &Value, path: String, extracts: &mut Vec<Base64Extract>) {
        match value {
            Value::Object(members) => {
                for (name, member) in members {
                    let member_path = if path.is_empty() {
                        name.clone()
                    } else {
                        format!("{}.{}", path, name)
                    };
                    self.walk(member, member_path, extracts);
                }
            }
            Value::Array(items) => {
                for (index, item) in items.iter().enumerate() {
                    self.walk(item, format!("{}[{}]", path, index), extracts);
                }
            }
            Value::String(text) => {
                if let Some(decoded) = self.decode_candidate(text) {
                    tracing::info!(
                        path = %path,
                        original_size = text.len(),
                        decoded_size = decoded.len(),
                        "Found base64 content"
                    );
                    extracts.push(Base64Extract {
                        path,
                        decoded_content: decoded,
                    });
                }
            }
            Value::Number(_) | Value::Bool(_) | Value::Null => {}
        }
    }

    fn decode_candidate(&self, text: &str) -> Option<Vec<u8>> {
        if text.trim().len() < self.min_base64_length {
            return None;
        }

        let cleaned: String = text.chars().filter(|c| !c.is_whitespace()).collect();
        if cleaned.len() % 4 != 0 || !is_base64_alphabet(&cleaned) {
            return None;
        }

        match STANDARD.decode(cleaned.as_bytes()) {
            Ok(decoded) if decoded.len() >= self.min_decoded_size => Some(decoded),
            Ok(_) => None,
            Err(e) => {
                tracing::debug!("Value looked like base64 but failed to decode: {}", e);
                None
            }
        }
    }
}

/// `A-Z a-z 0-9 + /` followed by at most two `=`.
fn is_base64_alphabet(s: &str) -> bool {
    let body = s.trim_end_matches('=');
    if s.len() - body.len() > 2 {
        return false;
    }
    body.bytes()
        .all(|b| b.is_ascii_alphanumeric() || b == b'+' || b == b'/')
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn encoded(len: usize, fill: u8) -> String {
        STANDARD.encode(vec![fill; len])
    }

    #[test]
    fn test_single_property() {
        let content = encoded(200, 7);
        let extracts = Base64Extractor::default().extract(&json!({ "content": content }));
        assert_eq!(extracts.len(), 1);
        assert_eq!(extracts[0].path, "content");
        assert_eq!(extracts[0].decoded_content, vec![7u8; 200]);
    }

    #[test]
    fn test_nested_path() {
        let doc = json!({
            "envelope": { "body": { "attachment": encoded(200, 1) } }
        });
        let extracts = Base64Extractor::default().extract(&doc);
        assert_eq!(extracts.len(), 1);
        assert_eq!(extracts[0].path, "envelope.body.attachment");
    }

    #[test]
    fn test_array_paths_and_order() {
        let doc = json!({
            "title": "quarterly report",
            "attachments": [
                { "name": "a.pdf", "data": encoded(64, 1) },
                { "name": "b.pdf", "data": encoded(64, 2) }
            ],
            "matrix": [[1, encoded(32, 3)]],
            "zlast": encoded(32, 4)
        });
        let extracts = Base64Extractor::default().extract(&doc);
        let paths: Vec<&str> = extracts.iter().map(|e| e.path.as_str()).collect();
        assert_eq!(
            paths,
            vec![
                "attachments[0].data",
                "attachments[1].data",
                "matrix[0][1]",
                "zlast"
            ]
        );
        assert_eq!(extracts[1].decoded_content, vec![2u8; 64]);
    }

    #[test]
    fn test_root_array() {
        let doc = json!([encoded(20, 9), 42, null]);
        let extracts = Base64Extractor::default().extract(&doc);
        assert_eq!(extracts.len(), 1);
        assert_eq!(extracts[0].path, "[0]");
    }

    #[test]
    fn test_short_base64_is_ignored() {
        // "Hello"
        let extracts = Base64Extractor::default().extract(&json!({ "content": "SGVsbG8=" }));
        assert!(extracts.is_empty());
    }

    #[test]
    fn test_configurable_threshold() {
        // 60 chars of base64, above 20 but below 100
        let doc = json!({ "content": encoded(45, 5) });
        assert_eq!(Base64Extractor::new(20, 10).extract(&doc).len(), 1);
        assert!(Base64Extractor::new(100, 10).extract(&doc).is_empty());
    }

    #[test]
    fn test_decoded_size_threshold() {
        // 24 chars decode to 18 bytes
        let doc = json!({ "content": encoded(18, 5) });
        assert_eq!(Base64Extractor::new(20, 18).extract(&doc).len(), 1);
        assert!(Base64Extractor::new(20, 19).extract(&doc).is_empty());
    }

    #[test]
    fn test_plain_text_is_ignored() {
        let doc = json!({
            "message": "This is a normal sentence, not base64 at all!",
            "count": 12,
            "flag": true,
            "nothing": null
        });
        assert!(Base64Extractor::default().extract(&doc).is_empty());
    }

    #[test]
    fn test_invalid_base64_is_skipped() {
        let bad = format!("{}!!!", "A".repeat(200));
        assert!(Base64Extractor::default().extract(&json!({ "data": bad })).is_empty());

        // Right alphabet and length, but non-zero trailing bits make decoding fail
        let undecodable = format!("{}B==", "A".repeat(21));
        assert!(
            Base64Extractor::default()
                .extract(&json!({ "data": undecodable }))
                .is_empty()
        );
    }

    #[test]
    fn test_whitespace_is_stripped() {
        let raw = encoded(60, 3);
        let wrapped = format!("{}\n{}\r\n", &raw[..40], &raw[40..]);
        let extracts = Base64Extractor::default().extract(&json!({ "pem": wrapped }));
        assert_eq!(extracts.len(), 1);
        assert_eq!(extracts[0].decoded_content, vec![3u8; 60]);
    }

    #[test]
    fn test_empty_document() {
        assert!(Base64Extractor::default().extract(&json!({})).is_empty());
        assert!(Base64Extractor::default().extract(&json!([])).is_empty());
    }

    #[test]
    fn test_alphabet_check() {
        assert!(is_base64_alphabet("QUJD"));
        assert!(is_base64_alphabet("QUI="));
        assert!(is_base64_alphabet("QQ=="));
        assert!(!is_base64_alphabet("Q==="));
        assert!(!is_base64_alphabet("QU=D"));
        assert!(!is_base64_alphabet("QU-_"));
    }
}
