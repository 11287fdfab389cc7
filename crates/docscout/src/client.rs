//! HTTP client shared by every stage of a run
//!
//! A [`PageClient`] wraps one `reqwest::Client` built with the run's
//! user agent and timeouts. It is cheap to clone and is handed to
//! discovery strategies and crawl workers by value.

use crate::error::ScrapeError;
use crate::retry::{RetryDecision, RetryPolicy, RetryTracker};
use crate::DEFAULT_USER_AGENT;
use bytes::Bytes;
use futures::StreamExt;
use reqwest::header::{HeaderMap, HeaderValue, ACCEPT, CONTENT_TYPE, USER_AGENT};
use std::time::Duration;
use tracing::{debug, warn};

/// Binary content type prefixes
const BINARY_PREFIXES: &[&str] = &[
    "image/",
    "audio/",
    "video/",
    "application/octet-stream",
    "application/pdf",
    "application/zip",
    "application/x-tar",
    "application/x-rar",
    "application/x-7z",
    "application/vnd.ms-",
    "application/vnd.openxmlformats",
    "font/",
];

const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// Time to first response byte
const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Total time allowed for reading a body
const BODY_TIMEOUT: Duration = Duration::from_secs(30);

/// Client configuration
#[derive(Debug, Clone)]
pub struct ClientOptions {
    pub user_agent: Option<String>,
    pub connect_timeout: Duration,
    pub request_timeout: Duration,
    pub body_timeout: Duration,
    pub retry: RetryPolicy,
}

impl Default for ClientOptions {
    fn default() -> Self {
        Self {
            user_agent: None,
            connect_timeout: CONNECT_TIMEOUT,
            request_timeout: REQUEST_TIMEOUT,
            body_timeout: BODY_TIMEOUT,
            retry: RetryPolicy::default(),
        }
    }
}

/// A fetched text page
#[derive(Debug, Clone)]
pub struct FetchedPage {
    /// URL after redirects
    pub url: String,
    pub status_code: u16,
    pub content_type: Option<String>,
    pub body: String,
    /// Body read hit the time bound
    pub truncated: bool,
}

/// Raw bytes, for sitemaps and other non-page resources
#[derive(Debug, Clone)]
pub struct FetchedBytes {
    pub content_type: Option<String>,
    pub body: Bytes,
}

/// Shared HTTP client
#[derive(Debug, Clone)]
pub struct PageClient {
    http: reqwest::Client,
    options: ClientOptions,
}

impl PageClient {
    /// Build a client from options
    pub fn new(options: ClientOptions) -> Result<Self, ScrapeError> {
        let mut headers = HeaderMap::new();
        let user_agent = options.user_agent.as_deref().unwrap_or(DEFAULT_USER_AGENT);
        headers.insert(
            USER_AGENT,
            HeaderValue::from_str(user_agent)
                .unwrap_or_else(|_| HeaderValue::from_static(DEFAULT_USER_AGENT)),
        );
        headers.insert(
            ACCEPT,
            HeaderValue::from_static("text/html, text/markdown, text/plain, */*;q=0.8"),
        );

        let http = reqwest::Client::builder()
            .default_headers(headers)
            .connect_timeout(options.connect_timeout)
            .timeout(options.request_timeout)
            .build()
            .map_err(ScrapeError::ClientBuildError)?;

        Ok(Self { http, options })
    }

    /// Build a client with default options
    pub fn with_defaults() -> Result<Self, ScrapeError> {
        Self::new(ClientOptions::default())
    }

    /// The underlying reqwest client, for collaborators with their own request shapes
    pub fn http(&self) -> &reqwest::Client {
        &self.http
    }

    pub fn options(&self) -> &ClientOptions {
        &self.options
    }

    /// Single GET of a text page, no retry.
    ///
    /// Non-success statuses and binary content types are errors.
    pub async fn get_page(&self, url: &str) -> Result<FetchedPage, ScrapeError> {
        let response = self
            .http
            .get(url)
            .send()
            .await
            .map_err(ScrapeError::from_reqwest)?;

        let status = response.status();
        if !status.is_success() {
            return Err(ScrapeError::HttpStatus(status.as_u16()));
        }

        let final_url = response.url().to_string();
        let content_type = header_string(response.headers(), CONTENT_TYPE);
        if let Some(ref ct) = content_type {
            if is_binary_content_type(ct) {
                return Err(ScrapeError::BinaryContent(ct.clone()));
            }
        }

        let (body, truncated) = read_body_with_timeout(response, self.options.body_timeout).await?;
        Ok(FetchedPage {
            url: final_url,
            status_code: status.as_u16(),
            content_type,
            body: String::from_utf8_lossy(&body).into_owned(),
            truncated,
        })
    }

    /// GET with the retry state machine.
    ///
    /// Transient failures back off and retry; permanent ones (401, 403,
    /// 404, 410 and other client errors) give up at once.
    pub async fn fetch_with_retry(&self, url: &str) -> Result<FetchedPage, ScrapeError> {
        let mut tracker = RetryTracker::new(self.options.retry.clone());
        loop {
            tracker.begin_attempt();
            match self.get_page(url).await {
                Ok(page) => {
                    tracker.record_success();
                    return Ok(page);
                }
                Err(err) => match tracker.record_failure(err.failure_type()) {
                    RetryDecision::Retry { delay, attempt } => {
                        debug!(url, attempt, delay_ms = delay.as_millis() as u64, error = %err, "Retrying fetch");
                        tokio::time::sleep(delay).await;
                    }
                    RetryDecision::DoNotRetry { reason } => {
                        debug!(url, %reason, error = %err, "Giving up on fetch");
                        return Err(err);
                    }
                },
            }
        }
    }

    /// Single GET returning raw bytes
    pub async fn get_bytes(&self, url: &str) -> Result<FetchedBytes, ScrapeError> {
        let response = self
            .http
            .get(url)
            .send()
            .await
            .map_err(ScrapeError::from_reqwest)?;
        let status = response.status();
        if !status.is_success() {
            return Err(ScrapeError::HttpStatus(status.as_u16()));
        }
        let content_type = header_string(response.headers(), CONTENT_TYPE);
        let (body, _) = read_body_with_timeout(response, self.options.body_timeout).await?;
        Ok(FetchedBytes { content_type, body })
    }
}

fn header_string(headers: &HeaderMap, name: reqwest::header::HeaderName) -> Option<String> {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .map(|s| s.to_string())
}

/// Check if content type indicates binary content
pub fn is_binary_content_type(content_type: &str) -> bool {
    let ct_lower = content_type.to_lowercase();
    BINARY_PREFIXES
        .iter()
        .any(|prefix| ct_lower.starts_with(prefix))
}

/// Read response body with timeout, returning partial content if timeout occurs.
///
/// A stream error (connection reset, body shorter than its length) is a
/// request failure, so the retry loop sees it as transient.
async fn read_body_with_timeout(
    response: reqwest::Response,
    timeout: Duration,
) -> Result<(Bytes, bool), ScrapeError> {
    let mut body = Vec::new();
    let mut stream = response.bytes_stream();
    let deadline = tokio::time::Instant::now() + timeout;

    loop {
        tokio::select! {
            chunk = stream.next() => {
                match chunk {
                    Some(Ok(bytes)) => body.extend_from_slice(&bytes),
                    Some(Err(e)) => {
                        warn!(read = body.len(), "Error reading body chunk: {}", e);
                        return Err(ScrapeError::RequestError(format!("body read failed: {}", e)));
                    }
                    None => return Ok((Bytes::from(body), false)),
                }
            }
            _ = tokio::time::sleep_until(deadline) => {
                warn!("Body timeout reached, returning partial content");
                return Ok((Bytes::from(body), true));
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::{Read, Write};
    use std::net::TcpListener;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    const FULL_BODY: &str = "<html><body><main><h1>Complete</h1><p>every byte arrived</p></main></body></html>";

    /// Serves `cut` connections that promise 5000 bytes and hang up early,
    /// then complete responses
    fn cutoff_server(cut: usize) -> (String, Arc<AtomicUsize>) {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        let hits = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&hits);
        std::thread::spawn(move || {
            for stream in listener.incoming() {
                let Ok(mut stream) = stream else { break };
                let mut request = Vec::new();
                let mut buf = [0u8; 1024];
                while !request.windows(4).any(|w| w == b"\r\n\r\n") {
                    match stream.read(&mut buf) {
                        Ok(0) | Err(_) => break,
                        Ok(n) => request.extend_from_slice(&buf[..n]),
                    }
                }
                let n = counter.fetch_add(1, Ordering::SeqCst);
                let response = if n < cut {
                    "HTTP/1.1 200 OK\r\ncontent-type: text/html\r\ncontent-length: 5000\r\n\r\n\
                     <html><body><main><h1>Truncated</h1><p>only the first half"
                        .to_string()
                } else {
                    format!(
                        "HTTP/1.1 200 OK\r\ncontent-type: text/html\r\ncontent-length: {}\r\nconnection: close\r\n\r\n{}",
                        FULL_BODY.len(),
                        FULL_BODY
                    )
                };
                let _ = stream.write_all(response.as_bytes());
                let _ = stream.flush();
            }
        });
        (format!("http://{}/docs/page", addr), hits)
    }

    fn client(attempts: u32) -> PageClient {
        PageClient::new(ClientOptions {
            retry: RetryPolicy::immediate(attempts),
            ..Default::default()
        })
        .unwrap()
    }

    #[tokio::test]
    async fn test_short_body_is_request_error() {
        let (url, hits) = cutoff_server(usize::MAX);
        let err = client(1).get_page(&url).await.unwrap_err();
        assert!(matches!(err, ScrapeError::RequestError(_)), "got {err:?}");
        assert_eq!(err.failure_type(), crate::retry::FailureType::Transient);
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_reset_mid_body_is_retried() {
        let (url, hits) = cutoff_server(1);
        let page = client(3).fetch_with_retry(&url).await.unwrap();
        assert_eq!(hits.load(Ordering::SeqCst), 2);
        assert_eq!(page.body, FULL_BODY);
        assert!(!page.truncated);
    }

    #[test]
    fn test_is_binary_content_type() {
        assert!(is_binary_content_type("image/png"));
        assert!(is_binary_content_type("application/pdf"));
        assert!(is_binary_content_type("font/woff2"));
        assert!(is_binary_content_type("Application/Octet-Stream"));

        assert!(!is_binary_content_type("text/html; charset=utf-8"));
        assert!(!is_binary_content_type("text/markdown"));
        assert!(!is_binary_content_type("application/xml"));
        assert!(!is_binary_content_type("application/x-gzip"));
    }

    #[test]
    fn test_client_options_default() {
        let options = ClientOptions::default();
        assert!(options.user_agent.is_none());
        assert_eq!(options.retry.max_attempts(), 3);
        assert_eq!(options.body_timeout, BODY_TIMEOUT);
    }

    #[tokio::test]
    async fn test_client_builds_with_odd_user_agent() {
        let client = PageClient::new(ClientOptions {
            user_agent: Some("bad\nagent".to_string()),
            ..Default::default()
        });
        assert!(client.is_ok());
    }
}
