//! Bearer credentials for the upstream feed.

use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::Deserialize;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::Mutex;
use tokio::time::Instant;

/// Default OpenSky token endpoint.
pub const OPENSKY_TOKEN_URL: &str =
    "https://auth.opensky-network.org/auth/realms/opensky-network/protocol/openid-connect/token";

/// Tokens are refreshed this long before they actually expire.
const EXPIRY_MARGIN: Duration = Duration::from_secs(30);

#[derive(Debug, Error)]
pub enum AuthError {
    #[error("Token request failed: {0}")]
    Request(#[from] reqwest::Error),
    #[error("Token endpoint rejected credentials: {status}")]
    Rejected { status: StatusCode },
    #[error("Invalid token response")]
    InvalidResponse,
}

/// Source of bearer tokens for feed requests.
#[async_trait]
pub trait TokenProvider: Send + Sync {
    /// Return a token that is valid for at least a little while.
    async fn token(&self) -> Result<String, AuthError>;
}

/// A fixed token. An empty token means anonymous access.
#[derive(Debug, Clone, Default)]
pub struct StaticToken(pub String);

#[async_trait]
impl TokenProvider for StaticToken {
    async fn token(&self) -> Result<String, AuthError> {
        Ok(self.0.clone())
    }
}

/// Configuration for client-credentials authentication.
#[derive(Debug, Clone)]
pub struct OAuthConfig {
    pub client_id: String,
    pub client_secret: String,
    pub token_url: String,
    pub timeout: Duration,
}

impl OAuthConfig {
    pub fn new(client_id: String, client_secret: String) -> Self {
        Self {
            client_id,
            client_secret,
            token_url: OPENSKY_TOKEN_URL.to_string(),
            timeout: Duration::from_secs(30),
        }
    }

    pub fn with_token_url(mut self, url: String) -> Self {
        self.token_url = url;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    #[serde(default = "default_expires_in")]
    expires_in: u64,
}

fn default_expires_in() -> u64 {
    1800
}

#[derive(Debug, Clone)]
struct CachedToken {
    value: String,
    refresh_at: Instant,
}

/// OAuth2 client-credentials provider with a cached, single-flight refresh.
///
/// The cache lock is held across the refresh request, so callers arriving
/// while a refresh is running wait for it and reuse its token instead of
/// issuing their own.
pub struct OAuthTokenProvider {
    client: Client,
    config: OAuthConfig,
    cached: Mutex<Option<CachedToken>>,
}

impl std::fmt::Debug for OAuthTokenProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OAuthTokenProvider")
            .field("client_id", &self.config.client_id)
            .field("token_url", &self.config.token_url)
            .finish()
    }
}

impl OAuthTokenProvider {
    pub fn new(config: OAuthConfig) -> Result<Self, AuthError> {
        let client = Client::builder().timeout(config.timeout).build()?;

        Ok(Self {
            client,
            config,
            cached: Mutex::new(None),
        })
    }

    async fn refresh(&self) -> Result<CachedToken, AuthError> {
        tracing::debug!("Requesting access token from {}", self.config.token_url);

        let response = self
            .client
            .post(&self.config.token_url)
            .form(&[
                ("grant_type", "client_credentials"),
                ("client_id", self.config.client_id.as_str()),
                ("client_secret", self.config.client_secret.as_str()),
            ])
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            return Err(AuthError::Rejected { status });
        }

        let body: TokenResponse = response
            .json()
            .await
            .map_err(|_| AuthError::InvalidResponse)?;
        if body.access_token.is_empty() {
            return Err(AuthError::InvalidResponse);
        }

        let lifetime = Duration::from_secs(body.expires_in).saturating_sub(EXPIRY_MARGIN);
        tracing::info!("Access token refreshed, valid for {}s", body.expires_in);

        Ok(CachedToken {
            value: body.access_token,
            refresh_at: Instant::now() + lifetime,
        })
    }
}

#[async_trait]
impl TokenProvider for OAuthTokenProvider {
    async fn token(&self) -> Result<String, AuthError> {
        let mut cached = self.cached.lock().await;

        if let Some(token) = cached.as_ref() {
            if Instant::now() < token.refresh_at {
                return Ok(token.value.clone());
            }
        }

        // Failed refreshes leave the slot empty so the next caller retries.
        *cached = None;
        let fresh = self.refresh().await?;
        let value = fresh.value.clone();
        *cached = Some(fresh);
        Ok(value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::{TcpListener, TcpStream};

    /// Local token endpoint. Request `n` is answered with `statuses[n]`, or
    /// 200 and `tok-n` once the list runs out. Returns the URL and a request count.
    async fn token_endpoint(statuses: Vec<u16>) -> (String, Arc<AtomicUsize>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let url = format!("http://{}/token", listener.local_addr().unwrap());
        let requests = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&requests);

        tokio::spawn(async move {
            while let Ok((mut socket, _)) = listener.accept().await {
                let n = counter.fetch_add(1, Ordering::SeqCst);
                let status = statuses.get(n).copied().unwrap_or(200);
                tokio::spawn(async move {
                    read_request(&mut socket).await;
                    // Slow enough for concurrent callers to pile up.
                    tokio::time::sleep(Duration::from_millis(50)).await;

                    let body = format!(r#"{{"access_token":"tok-{}","expires_in":1800}}"#, n);
                    let response = format!(
                        "HTTP/1.1 {} {}\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
                        status,
                        if status == 200 { "OK" } else { "Error" },
                        body.len(),
                        body
                    );
                    let _ = socket.write_all(response.as_bytes()).await;
                    let _ = socket.shutdown().await;
                });
            }
        });

        (url, requests)
    }

    /// Consume headers and body so the client sees a clean response.
    async fn read_request(socket: &mut TcpStream) {
        let mut buf = Vec::new();
        let mut chunk = [0u8; 1024];
        loop {
            let n = socket.read(&mut chunk).await.unwrap_or(0);
            if n == 0 {
                return;
            }
            buf.extend_from_slice(&chunk[..n]);

            let text = String::from_utf8_lossy(&buf);
            if let Some(end) = text.find("\r\n\r\n") {
                let length = text[..end]
                    .lines()
                    .filter_map(|line| line.split_once(':'))
                    .find(|(name, _)| name.eq_ignore_ascii_case("content-length"))
                    .and_then(|(_, value)| value.trim().parse::<usize>().ok())
                    .unwrap_or(0);
                if buf.len() >= end + 4 + length {
                    return;
                }
            }
        }
    }

    fn provider_for(url: String) -> OAuthTokenProvider {
        let config = OAuthConfig::new("id".to_string(), "secret".to_string()).with_token_url(url);
        OAuthTokenProvider::new(config).unwrap()
    }

    #[tokio::test]
    async fn test_overlapping_callers_share_one_refresh() {
        let (url, requests) = token_endpoint(Vec::new()).await;
        let provider = provider_for(url);

        let (first, second) = tokio::join!(provider.token(), provider.token());
        assert_eq!(first.unwrap(), "tok-0");
        assert_eq!(second.unwrap(), "tok-0");
        assert_eq!(requests.load(Ordering::SeqCst), 1);

        // Cached until close to expiry.
        assert_eq!(provider.token().await.unwrap(), "tok-0");
        assert_eq!(requests.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_failed_refresh_is_retried() {
        let (url, requests) = token_endpoint(vec![500]).await;
        let provider = provider_for(url);

        match provider.token().await {
            Err(AuthError::Rejected { status }) => {
                assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR)
            }
            other => panic!("expected rejection, got {:?}", other),
        }
        assert!(provider.cached.lock().await.is_none());

        assert_eq!(provider.token().await.unwrap(), "tok-1");
        assert_eq!(requests.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_static_token() {
        let provider = StaticToken("abc".to_string());
        assert_eq!(provider.token().await.unwrap(), "abc");
    }

    #[test]
    fn test_token_response_default_expiry() {
        let body: TokenResponse = serde_json::from_str(r#"{"access_token":"t"}"#).unwrap();
        assert_eq!(body.access_token, "t");
        assert_eq!(body.expires_in, 1800);
    }

    #[test]
    fn test_oauth_config_builder() {
        let config = OAuthConfig::new("id".to_string(), "secret".to_string())
            .with_token_url("http://localhost/token".to_string())
            .with_timeout(Duration::from_secs(5));
        assert_eq!(config.token_url, "http://localhost/token");
        assert_eq!(config.timeout, Duration::from_secs(5));
    }
}
