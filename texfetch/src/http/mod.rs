//! HTTP transport.
//!
//! The fetch worker issues one GET per attempt, optionally for a byte range
//! continuing from data it already holds. Status codes are passed through
//! untouched; interpreting 200/206/416 is the worker's job.

mod reqwest_client;

use std::fmt;
use std::time::Duration;

use bytes::Bytes;
use thiserror::Error;

use crate::BoxFuture;

pub use reqwest_client::ReqwestHttpClient;

/// Default user agent sent with every request.
pub const DEFAULT_USER_AGENT: &str = concat!("texfetch/", env!("CARGO_PKG_VERSION"));

/// Default whole-request timeout.
pub const DEFAULT_HTTP_TIMEOUT: Duration = Duration::from_secs(30);

/// Default connect timeout.
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// Default idle time before pooled connections are closed.
pub const DEFAULT_POOL_IDLE_TIMEOUT: Duration = Duration::from_secs(90);

/// Byte range of a GET. `length: None` means "to the end".
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ByteRange {
    pub offset: u64,
    pub length: Option<u64>,
}

impl ByteRange {
    pub fn new(offset: u64, length: u64) -> Self {
        Self {
            offset,
            length: Some(length),
        }
    }

    pub fn from_offset(offset: u64) -> Self {
        Self {
            offset,
            length: None,
        }
    }

    /// Value for the `Range` request header.
    pub fn header_value(&self) -> String {
        match self.length {
            Some(length) if length > 0 => {
                format!("bytes={}-{}", self.offset, self.offset + length - 1)
            }
            _ => format!("bytes={}-", self.offset),
        }
    }
}

impl fmt::Display for ByteRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.header_value())
    }
}

/// One GET request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpRequest {
    pub url: String,
    pub range: Option<ByteRange>,
}

impl HttpRequest {
    pub fn get(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            range: None,
        }
    }

    pub fn with_range(mut self, range: ByteRange) -> Self {
        self.range = Some(range);
        self
    }
}

/// Response status and body.
#[derive(Debug, Clone)]
pub struct HttpResponse {
    pub status: u16,
    pub body: Bytes,
}

impl HttpResponse {
    pub const OK: u16 = 200;
    pub const PARTIAL_CONTENT: u16 = 206;
    pub const RANGE_NOT_SATISFIABLE: u16 = 416;

    pub fn new(status: u16, body: impl Into<Bytes>) -> Self {
        Self {
            status,
            body: body.into(),
        }
    }

    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

/// Transport-level failures (no HTTP status available).
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum HttpError {
    #[error("failed to build HTTP client: {0}")]
    Client(String),

    #[error("request failed: {0}")]
    Request(String),

    #[error("request timed out")]
    Timeout,

    #[error("failed to read response body: {0}")]
    Body(String),
}

/// Settings for [`ReqwestHttpClient`].
#[derive(Debug, Clone)]
pub struct HttpClientConfig {
    pub user_agent: String,
    pub timeout: Duration,
    pub connect_timeout: Duration,
    pub pool_idle_timeout: Duration,
}

impl Default for HttpClientConfig {
    fn default() -> Self {
        Self {
            user_agent: DEFAULT_USER_AGENT.to_string(),
            timeout: DEFAULT_HTTP_TIMEOUT,
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            pool_idle_timeout: DEFAULT_POOL_IDLE_TIMEOUT,
        }
    }
}

impl HttpClientConfig {
    pub fn with_user_agent(mut self, user_agent: impl Into<String>) -> Self {
        self.user_agent = user_agent.into();
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}

/// Asynchronous GET client.
pub trait HttpClient: Send + Sync + 'static {
    fn get(&self, request: HttpRequest) -> BoxFuture<'_, Result<HttpResponse, HttpError>>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_range_header_closed() {
        assert_eq!(ByteRange::new(0, 600).header_value(), "bytes=0-599");
        assert_eq!(ByteRange::new(600, 7592).header_value(), "bytes=600-8191");
    }

    #[test]
    fn test_range_header_open() {
        assert_eq!(ByteRange::from_offset(2048).header_value(), "bytes=2048-");
        assert_eq!(ByteRange::new(10, 0).header_value(), "bytes=10-");
    }

    #[test]
    fn test_response_success() {
        assert!(HttpResponse::new(206, Vec::new()).is_success());
        assert!(!HttpResponse::new(416, Vec::new()).is_success());
    }
}
