//! `reqwest`-backed HTTP client.

use reqwest::header::RANGE;
use tracing::{debug, trace, warn};

use crate::http::{HttpClient, HttpClientConfig, HttpError, HttpRequest, HttpResponse};
use crate::BoxFuture;

/// Pooled async HTTP client.
///
/// Keeps connections to the texture origin warm across requests; the fetch
/// manager bounds how many GETs run at once, not this client.
#[derive(Clone)]
pub struct ReqwestHttpClient {
    client: reqwest::Client,
}

impl ReqwestHttpClient {
    pub fn new(config: &HttpClientConfig) -> Result<Self, HttpError> {
        let client = reqwest::Client::builder()
            .timeout(config.timeout)
            .connect_timeout(config.connect_timeout)
            .user_agent(config.user_agent.as_str())
            .pool_max_idle_per_host(32)
            .pool_idle_timeout(config.pool_idle_timeout)
            .tcp_keepalive(std::time::Duration::from_secs(30))
            .tcp_nodelay(true)
            .build()
            .map_err(|e| HttpError::Client(e.to_string()))?;

        Ok(Self { client })
    }

    /// Client with [`HttpClientConfig::default`] settings.
    pub fn with_defaults() -> Result<Self, HttpError> {
        Self::new(&HttpClientConfig::default())
    }
}

impl HttpClient for ReqwestHttpClient {
    fn get(&self, request: HttpRequest) -> BoxFuture<'_, Result<HttpResponse, HttpError>> {
        Box::pin(async move {
            trace!(url = %request.url, range = ?request.range, "HTTP GET starting");

            let mut builder = self.client.get(&request.url);
            if let Some(range) = request.range {
                builder = builder.header(RANGE, range.header_value());
            }

            let response = match builder.send().await {
                Ok(response) => response,
                Err(e) => {
                    warn!(
                        url = %request.url,
                        error = %e,
                        is_connect = e.is_connect(),
                        is_timeout = e.is_timeout(),
                        "HTTP request failed"
                    );
                    if e.is_timeout() {
                        return Err(HttpError::Timeout);
                    }
                    return Err(HttpError::Request(e.to_string()));
                }
            };

            let status = response.status().as_u16();
            let body = response.bytes().await.map_err(|e| {
                warn!(url = %request.url, error = %e, "failed to read response body");
                HttpError::Body(e.to_string())
            })?;

            debug!(url = %request.url, status, bytes = body.len(), "HTTP response received");
            Ok(HttpResponse { status, body })
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_client_builds_with_defaults() {
        assert!(ReqwestHttpClient::with_defaults().is_ok());
    }
}
