//! Fetch manager errors.
//!
//! Per-image fetch failures never surface here; they are reported through
//! [`FetchOutcome::Failed`](crate::fetch::FetchOutcome::Failed). These errors
//! cover building the manager and rejecting malformed requests.

use thiserror::Error;

use crate::http::HttpError;

#[derive(Debug, Error)]
pub enum FetchError {
    /// Request failed structural validation.
    #[error("invalid fetch request: {0}")]
    InvalidRequest(String),

    /// Failed to create the HTTP client.
    #[error("HTTP client error: {0}")]
    HttpClient(#[from] HttpError),

    /// Failed to start the worker runtime.
    #[error("failed to start fetch runtime: {0}")]
    Runtime(#[source] std::io::Error),

    /// Invalid configuration.
    #[error("configuration error: {0}")]
    Config(String),
}
