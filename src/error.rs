//! Error domain shared by every operation.
//!
//! Positive codes are HTTP status codes rejected by a fetch's acceptable
//! status codes. Negative codes are module discriminators. Zero is never used.
//! Transport-level failures are surfaced verbatim and carry no module code.

use std::path::PathBuf;

use thiserror::Error;

/// Terminal error of an operation, readable once the operation is finished.
#[derive(Debug, Error)]
pub enum OperationError {
    /// Network-level failure reported by the transport (DNS, TLS, reset, ...).
    #[error("network error fetching {url}: {source}")]
    Transport {
        /// The URL of the request that failed.
        url: String,
        /// The underlying transport error.
        #[source]
        source: reqwest::Error,
    },

    /// The transport gave up waiting for the server.
    #[error("timeout fetching {url}")]
    Timeout {
        /// The URL of the request that timed out.
        url: String,
    },

    /// The server kept redirecting past the redirect limit.
    #[error("too many redirects fetching {url} (limit {limit})")]
    TooManyRedirects {
        /// The last URL that was redirected.
        url: String,
        /// The redirect limit that was exceeded.
        limit: usize,
    },

    /// Response status code is outside the acceptable status codes.
    #[error("HTTP {status} fetching {url}")]
    HttpStatus {
        /// The URL that produced the status.
        url: String,
        /// The rejected HTTP status code.
        status: u16,
    },

    /// The response body grew past the maximum response size.
    #[error("response from {url} exceeds the {limit} byte limit")]
    ResponseTooLarge {
        /// The URL whose body was too large.
        url: String,
        /// The configured maximum response size in bytes.
        limit: u64,
    },

    /// Writing to or closing the response sink failed.
    #[error("output sink error for {target}: {source}")]
    OutputSink {
        /// Description of the sink (usually a file path).
        target: String,
        /// The underlying IO error.
        #[source]
        source: std::io::Error,
    },

    /// Response content type is not in the acceptable content types.
    #[error("unacceptable content type {content_type} from {url}")]
    BadContentType {
        /// The URL that produced the response.
        url: String,
        /// The rejected media type.
        content_type: String,
    },

    /// The operation was cancelled.
    #[error("operation cancelled")]
    Cancelled,

    /// No file extension is known for the response's media type.
    #[error(
        "unsupported media type {} from {url}",
        content_type.as_deref().unwrap_or("<none>")
    )]
    UnsupportedMediaType {
        /// The URL that produced the response.
        url: String,
        /// The declared media type, if any.
        content_type: Option<String>,
    },

    /// A lifecycle hook panicked before producing an outcome.
    #[error("operation hook failed: {message}")]
    Hook {
        /// The panic payload, when it was a string.
        message: String,
    },
}

impl OperationError {
    /// Code of [`OperationError::ResponseTooLarge`].
    pub const RESPONSE_TOO_LARGE: i32 = -1;
    /// Code of [`OperationError::OutputSink`].
    pub const OUTPUT_SINK: i32 = -2;
    /// Code of [`OperationError::BadContentType`].
    pub const BAD_CONTENT_TYPE: i32 = -3;
    /// Code of [`OperationError::Cancelled`].
    pub const CANCELLED: i32 = -4;
    /// Code of [`OperationError::UnsupportedMediaType`].
    pub const UNSUPPORTED_MEDIA_TYPE: i32 = -5;

    /// Returns the error code in the operation error domain.
    ///
    /// `None` for transport, timeout, redirect and hook failures.
    #[must_use]
    pub fn code(&self) -> Option<i32> {
        match self {
            Self::HttpStatus { status, .. } => Some(i32::from(*status)),
            Self::ResponseTooLarge { .. } => Some(Self::RESPONSE_TOO_LARGE),
            Self::OutputSink { .. } => Some(Self::OUTPUT_SINK),
            Self::BadContentType { .. } => Some(Self::BAD_CONTENT_TYPE),
            Self::Cancelled => Some(Self::CANCELLED),
            Self::UnsupportedMediaType { .. } => Some(Self::UNSUPPORTED_MEDIA_TYPE),
            Self::Transport { .. }
            | Self::Timeout { .. }
            | Self::TooManyRedirects { .. }
            | Self::Hook { .. } => None,
        }
    }

    /// Returns true for the user-cancelled discriminator.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled)
    }

    /// Creates a transport error, promoting transport timeouts to [`Self::Timeout`].
    pub fn transport(url: impl Into<String>, source: reqwest::Error) -> Self {
        if source.is_timeout() {
            Self::Timeout { url: url.into() }
        } else {
            Self::Transport {
                url: url.into(),
                source,
            }
        }
    }

    /// Creates an HTTP status error.
    pub fn http_status(url: impl Into<String>, status: u16) -> Self {
        Self::HttpStatus {
            url: url.into(),
            status,
        }
    }

    /// Creates a response-too-large error.
    pub fn response_too_large(url: impl Into<String>, limit: u64) -> Self {
        Self::ResponseTooLarge {
            url: url.into(),
            limit,
        }
    }

    /// Creates an output sink error for a file-backed sink.
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::OutputSink {
            target: path.into().display().to_string(),
            source,
        }
    }

    /// Creates an output sink error for an arbitrary sink description.
    pub fn sink(target: impl Into<String>, source: std::io::Error) -> Self {
        Self::OutputSink {
            target: target.into(),
            source,
        }
    }

    /// Creates a bad-content-type error.
    pub fn bad_content_type(url: impl Into<String>, content_type: impl Into<String>) -> Self {
        Self::BadContentType {
            url: url.into(),
            content_type: content_type.into(),
        }
    }

    /// Creates an unsupported-media-type error.
    pub fn unsupported_media_type(url: impl Into<String>, content_type: Option<&str>) -> Self {
        Self::UnsupportedMediaType {
            url: url.into(),
            content_type: content_type.map(str::to_string),
        }
    }

    /// Creates a hook failure from a caught panic payload.
    pub(crate) fn hook_panic(payload: &(dyn std::any::Any + Send)) -> Self {
        let message = payload
            .downcast_ref::<&str>()
            .map(|s| (*s).to_string())
            .or_else(|| payload.downcast_ref::<String>().cloned())
            .unwrap_or_else(|| "hook panicked".to_string());
        Self::Hook { message }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_http_status_code_is_positive_status() {
        let error = OperationError::http_status("https://example.com/v.mp4", 404);
        assert_eq!(error.code(), Some(404));
        let msg = error.to_string();
        assert!(msg.contains("404"), "Expected '404' in: {msg}");
        assert!(msg.contains("https://example.com/v.mp4"), "Expected URL in: {msg}");
    }

    #[test]
    fn test_module_codes_are_distinct_and_negative() {
        let codes = [
            OperationError::response_too_large("u", 1).code(),
            OperationError::sink("memory", std::io::Error::other("x")).code(),
            OperationError::bad_content_type("u", "text/html").code(),
            OperationError::Cancelled.code(),
            OperationError::unsupported_media_type("u", Some("text/html")).code(),
        ];
        let mut seen = Vec::new();
        for code in codes {
            let code = code.unwrap();
            assert!(code < 0, "module code must be negative: {code}");
            assert!(!seen.contains(&code), "duplicate code {code}");
            seen.push(code);
        }
    }

    #[test]
    fn test_hook_and_timeout_have_no_code() {
        assert_eq!(
            OperationError::Timeout {
                url: "u".to_string()
            }
            .code(),
            None
        );
        assert_eq!(
            OperationError::Hook {
                message: "boom".to_string()
            }
            .code(),
            None
        );
    }

    #[test]
    fn test_unsupported_media_type_display_without_type() {
        let error = OperationError::unsupported_media_type("https://example.com/x", None);
        assert!(error.to_string().contains("<none>"));
    }

    #[test]
    fn test_io_error_display_contains_path() {
        let io_error = std::io::Error::new(std::io::ErrorKind::PermissionDenied, "access denied");
        let error = OperationError::io(PathBuf::from("/tmp/video.mp4"), io_error);
        let msg = error.to_string();
        assert!(msg.contains("/tmp/video.mp4"), "Expected path in: {msg}");
        assert_eq!(error.code(), Some(OperationError::OUTPUT_SINK));
    }

    #[test]
    fn test_hook_panic_extracts_string_payloads() {
        let payload: Box<dyn std::any::Any + Send> = Box::new("static message");
        let error = OperationError::hook_panic(payload.as_ref());
        assert!(error.to_string().contains("static message"));

        let payload: Box<dyn std::any::Any + Send> = Box::new(String::from("owned message"));
        let error = OperationError::hook_panic(payload.as_ref());
        assert!(error.to_string().contains("owned message"));
    }
}
