//! Error types for DocScout

use crate::retry::FailureType;
use thiserror::Error;

/// Errors that can occur while discovering, fetching, or writing pages
#[derive(Debug, Error)]
pub enum ScrapeError {
    /// URL could not be parsed or has an unsupported scheme
    #[error("Invalid URL: {0}")]
    InvalidUrl(String),

    /// Failed to build HTTP client
    #[error("Failed to create HTTP client")]
    ClientBuildError(#[source] reqwest::Error),

    /// Request or body read timed out
    #[error("Request timed out")]
    Timeout,

    /// Failed to connect to server
    #[error("Failed to connect to server")]
    ConnectError(#[source] reqwest::Error),

    /// Server answered with a non-success status
    #[error("HTTP status {0}")]
    HttpStatus(u16),

    /// Response is binary and cannot be converted
    #[error("Binary content is not supported: {0}")]
    BinaryContent(String),

    /// Other request error
    #[error("Request failed: {0}")]
    RequestError(String),

    /// Rendering engine failure
    #[error("Render error: {0}")]
    Render(String),

    /// Selector/scope inference failure
    #[error("Inference error: {0}")]
    Inference(String),

    /// Every discovery strategy came back empty
    #[error("No URLs discovered for {0}")]
    NoUrlsDiscovered(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl ScrapeError {
    /// Create an error from a reqwest error
    pub fn from_reqwest(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            ScrapeError::Timeout
        } else if err.is_connect() {
            ScrapeError::ConnectError(err)
        } else if let Some(status) = err.status() {
            ScrapeError::HttpStatus(status.as_u16())
        } else {
            ScrapeError::RequestError(err.to_string())
        }
    }

    /// Classify the error for the retry state machine
    pub fn failure_type(&self) -> FailureType {
        match self {
            ScrapeError::Timeout | ScrapeError::ConnectError(_) => FailureType::Transient,
            ScrapeError::HttpStatus(code) => FailureType::from_status(*code),
            // includes bodies cut off mid-stream
            ScrapeError::RequestError(_) => FailureType::Transient,
            _ => FailureType::Permanent,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_messages() {
        assert_eq!(
            ScrapeError::InvalidUrl("ftp://x".to_string()).to_string(),
            "Invalid URL: ftp://x"
        );
        assert_eq!(ScrapeError::Timeout.to_string(), "Request timed out");
        assert_eq!(ScrapeError::HttpStatus(404).to_string(), "HTTP status 404");
        assert_eq!(
            ScrapeError::NoUrlsDiscovered("https://x.test/".to_string()).to_string(),
            "No URLs discovered for https://x.test/"
        );
    }

    #[test]
    fn test_failure_type_classification() {
        assert_eq!(ScrapeError::Timeout.failure_type(), FailureType::Transient);
        assert_eq!(
            ScrapeError::HttpStatus(503).failure_type(),
            FailureType::Transient
        );
        assert_eq!(
            ScrapeError::HttpStatus(404).failure_type(),
            FailureType::Permanent
        );
        assert_eq!(
            ScrapeError::HttpStatus(429).failure_type(),
            FailureType::RateLimited
        );
        assert_eq!(
            ScrapeError::BinaryContent("image/png".to_string()).failure_type(),
            FailureType::Permanent
        );
    }
}
