//! Error types for image variation.

use std::path::PathBuf;
use std::time::Duration;

/// Errors that can occur while generating image variations.
#[derive(Debug, thiserror::Error)]
pub enum VaryError {
    /// API key missing or rejected.
    #[error("authentication failed: {0}")]
    Auth(String),

    /// API returned an error response.
    #[error("API error: {status} - {message}")]
    Api {
        /// HTTP status code.
        status: u16,
        /// Sanitized error message from the response body.
        message: String,
    },

    /// Rate limit exceeded.
    #[error("rate limited, retry after {retry_after:?}")]
    RateLimited {
        /// Server-suggested delay, from the `Retry-After` header.
        retry_after: Option<Duration>,
    },

    /// Account is out of quota or has a billing problem.
    #[error("billing error: {0}")]
    Billing(String),

    /// Request timed out.
    #[error("operation timed out after {0:?}")]
    Timeout(Duration),

    /// Content was blocked by safety filters.
    #[error("content blocked: {0}")]
    ContentBlocked(String),

    /// Invalid request parameters.
    #[error("invalid request: {0}")]
    InvalidRequest(String),

    /// The source image does not exist.
    #[error("source image not found: {}", .0.display())]
    SourceNotFound(PathBuf),

    /// Network or HTTP error.
    #[error("network error: {0}")]
    Network(#[from] reqwest::Error),

    /// Failed to decode base64 data.
    #[error("failed to decode: {0}")]
    Decode(String),

    /// I/O error (e.g., saving file).
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization/deserialization error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// The API answered with a payload we could not use.
    #[error("unexpected response: {0}")]
    UnexpectedResponse(String),
}

impl VaryError {
    /// Returns true if this error is likely transient and worth retrying.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::RateLimited { .. } | Self::Timeout(_) | Self::Network(_)
        )
    }

    /// Returns the suggested retry delay, if available.
    pub fn retry_after(&self) -> Option<Duration> {
        match self {
            Self::RateLimited { retry_after } => *retry_after,
            Self::Timeout(_) => Some(Duration::from_secs(1)),
            Self::Network(_) => Some(Duration::from_secs(2)),
            _ => None,
        }
    }
}

/// Result type alias for variation operations.
pub type Result<T> = std::result::Result<T, VaryError>;

const MAX_ERROR_MESSAGE_LEN: usize = 500;

/// Parses a `Retry-After` header given in seconds.
///
/// HTTP-date values are ignored.
pub(crate) fn parse_retry_after(headers: &reqwest::header::HeaderMap) -> Option<u64> {
    headers
        .get(reqwest::header::RETRY_AFTER)?
        .to_str()
        .ok()?
        .trim()
        .parse()
        .ok()
}

/// Reduces an API error body to something safe to show a user.
///
/// Pulls `error.message` out of OpenAI-style JSON bodies, masks anything
/// that looks like a secret key and truncates long bodies.
pub(crate) fn sanitize_error_message(text: &str) -> String {
    let message = serde_json::from_str::<serde_json::Value>(text)
        .ok()
        .and_then(|v| {
            v.get("error")
                .and_then(|e| e.get("message"))
                .and_then(|m| m.as_str())
                .map(str::to_string)
        })
        .unwrap_or_else(|| text.trim().to_string());

    let redacted = redact_keys(&message);

    if redacted.chars().count() > MAX_ERROR_MESSAGE_LEN {
        let truncated: String = redacted.chars().take(MAX_ERROR_MESSAGE_LEN).collect();
        format!("{truncated}...")
    } else {
        redacted
    }
}

/// Masks every `sk-` token wherever it appears, up to the first character
/// that cannot be part of a key.
fn redact_keys(text: &str) -> String {
    let is_key_char = |c: char| c.is_ascii_alphanumeric() || c == '_' || c == '-';
    let mut out = String::with_capacity(text.len());
    let mut rest = text;
    while let Some(pos) = rest.find("sk-") {
        // "task-list" is not a key
        let glued = rest[..pos].chars().next_back().is_some_and(is_key_char);
        out.push_str(&rest[..pos]);
        let tail = &rest[pos + 3..];
        let key_len = tail.find(|c: char| !is_key_char(c)).unwrap_or(tail.len());
        if glued || key_len == 0 {
            out.push_str("sk-");
            rest = tail;
        } else {
            out.push_str("sk-***");
            rest = &tail[key_len..];
        }
    }
    out.push_str(rest);
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use reqwest::header::{HeaderMap, HeaderValue, RETRY_AFTER};

    #[test]
    fn test_is_retryable() {
        assert!(VaryError::RateLimited { retry_after: None }.is_retryable());
        assert!(VaryError::Timeout(Duration::from_secs(30)).is_retryable());

        assert!(!VaryError::Auth("bad key".into()).is_retryable());
        assert!(!VaryError::Billing("quota".into()).is_retryable());
        assert!(!VaryError::ContentBlocked("nsfw".into()).is_retryable());
        assert!(!VaryError::SourceNotFound("a.png".into()).is_retryable());
    }

    #[test]
    fn test_retry_after() {
        let rate_limited = VaryError::RateLimited {
            retry_after: Some(Duration::from_secs(60)),
        };
        assert_eq!(rate_limited.retry_after(), Some(Duration::from_secs(60)));

        let no_hint = VaryError::RateLimited { retry_after: None };
        assert_eq!(no_hint.retry_after(), None);

        assert_eq!(VaryError::Auth("bad".into()).retry_after(), None);
    }

    #[test]
    fn test_error_display() {
        let err = VaryError::Api {
            status: 404,
            message: "Not found".into(),
        };
        assert_eq!(err.to_string(), "API error: 404 - Not found");

        let err = VaryError::SourceNotFound("missing/cat.png".into());
        assert_eq!(err.to_string(), "source image not found: missing/cat.png");
    }

    #[test]
    fn test_parse_retry_after() {
        let mut headers = HeaderMap::new();
        assert_eq!(parse_retry_after(&headers), None);

        headers.insert(RETRY_AFTER, HeaderValue::from_static("20"));
        assert_eq!(parse_retry_after(&headers), Some(20));

        headers.insert(
            RETRY_AFTER,
            HeaderValue::from_static("Wed, 21 Oct 2015 07:28:00 GMT"),
        );
        assert_eq!(parse_retry_after(&headers), None);
    }

    #[test]
    fn test_sanitize_extracts_openai_message() {
        let body = r#"{"error":{"message":"Invalid image: must be a valid PNG file","type":"invalid_request_error"}}"#;
        assert_eq!(
            sanitize_error_message(body),
            "Invalid image: must be a valid PNG file"
        );
    }

    #[test]
    fn test_sanitize_redacts_keys() {
        let body = "Incorrect API key provided: sk-abcdef1234567890 check it";
        let clean = sanitize_error_message(body);
        assert!(!clean.contains("abcdef"));
        assert!(clean.contains("sk-***"));
    }

    #[test]
    fn test_sanitize_redacts_keys_inside_punctuation() {
        assert_eq!(
            sanitize_error_message("bad key 'sk-abcdef1234567890'"),
            "bad key 'sk-***'"
        );
        assert_eq!(
            sanitize_error_message("bad key\nsk-abcdef1234567890"),
            "bad key\nsk-***"
        );
        assert_eq!(
            sanitize_error_message(r#"{"error":{"message":"key=sk-abcdef1234567890"}}"#),
            "key=sk-***"
        );
        assert_eq!(
            sanitize_error_message("keys sk-proj-AbC_123 and sk-xyz789, both revoked"),
            "keys sk-*** and sk-***, both revoked"
        );
    }

    #[test]
    fn test_sanitize_leaves_lookalikes() {
        assert_eq!(sanitize_error_message("see task-list"), "see task-list");
        assert_eq!(sanitize_error_message("ends with sk-"), "ends with sk-");
    }

    #[test]
    fn test_sanitize_truncates() {
        let body = "x".repeat(2000);
        let clean = sanitize_error_message(&body);
        assert_eq!(clean.len(), MAX_ERROR_MESSAGE_LEN + 3);
        assert!(clean.ends_with("..."));
    }
}
