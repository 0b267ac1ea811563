//! HTTP client for fetching live state snapshots from the upstream feed.

use crate::bounds::GeographicBounds;
use async_trait::async_trait;
use reqwest::{
    header::{HeaderMap, HeaderValue, ACCEPT, CACHE_CONTROL},
    Client, StatusCode,
};
use serde_json::Value;
use std::time::Duration;
use thiserror::Error;

/// Default OpenSky REST API root.
pub const OPENSKY_API_URL: &str = "https://opensky-network.org/api";

#[derive(Debug, Error)]
pub enum ClientError {
    #[error("HTTP request failed: {0}")]
    Request(#[from] reqwest::Error),
    #[error("Server returned error status: {status}")]
    ServerError { status: StatusCode },
    #[error("Rate limited, retry after {retry_after:?}")]
    RateLimited { retry_after: Option<Duration> },
    #[error("Authentication failed")]
    AuthError,
    #[error("Invalid response")]
    InvalidResponse,
}

/// Source of raw state snapshots.
#[async_trait]
pub trait FeedClient: Send + Sync {
    /// Fetch the current snapshot. `None` means the feed's default (global) view.
    async fn fetch_snapshot(
        &self,
        token: &str,
        region: Option<GeographicBounds>,
    ) -> Result<Value, ClientError>;
}

/// Configuration for the feed client.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// API root, without trailing slash
    pub base_url: String,
    /// Request timeout
    pub timeout: Duration,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            base_url: OPENSKY_API_URL.to_string(),
            timeout: Duration::from_secs(30),
        }
    }
}

impl ClientConfig {
    /// Set the API root.
    pub fn with_base_url(mut self, url: String) -> Self {
        self.base_url = url;
        self
    }

    /// Set the request timeout.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}

/// Client for the OpenSky `states/all` endpoint.
#[derive(Debug)]
pub struct OpenSkyClient {
    client: Client,
    config: ClientConfig,
}

impl OpenSkyClient {
    pub fn new(config: ClientConfig) -> Result<Self, ClientError> {
        let mut headers = HeaderMap::new();
        headers.insert(ACCEPT, HeaderValue::from_static("application/json"));
        headers.insert(CACHE_CONTROL, HeaderValue::from_static("no-cache"));

        let client = Client::builder()
            .default_headers(headers)
            .user_agent(concat!("flightcast/", env!("CARGO_PKG_VERSION")))
            .timeout(config.timeout)
            .gzip(true)
            .brotli(true)
            .deflate(true)
            .build()?;

        Ok(Self { client, config })
    }

    fn states_url(&self) -> String {
        format!("{}/states/all", self.config.base_url)
    }
}

#[async_trait]
impl FeedClient for OpenSkyClient {
    async fn fetch_snapshot(
        &self,
        token: &str,
        region: Option<GeographicBounds>,
    ) -> Result<Value, ClientError> {
        let mut request = self.client.get(self.states_url());

        if let Some(bounds) = region {
            request = request.query(&bounds.query_params());
        }
        if !token.is_empty() {
            request = request.bearer_auth(token);
        }

        tracing::debug!("Fetching states, region={:?}", region);

        let response = request.send().await?;

        match response.status() {
            StatusCode::OK => response
                .json::<Value>()
                .await
                .map_err(|_| ClientError::InvalidResponse),
            StatusCode::TOO_MANY_REQUESTS => {
                let retry_after = response
                    .headers()
                    .get("x-rate-limit-retry-after-seconds")
                    .or_else(|| response.headers().get("retry-after"))
                    .and_then(|v| v.to_str().ok())
                    .and_then(|v| v.parse::<u64>().ok())
                    .map(Duration::from_secs);

                Err(ClientError::RateLimited { retry_after })
            }
            StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => Err(ClientError::AuthError),
            status => Err(ClientError::ServerError { status }),
        }
    }
}
