//! HTTP client configuration and JSON response handling.
//!
//! The plugin lives for a single authorization decision, so the client is
//! tuned for a handful of sequential calls rather than connection reuse.

use crate::error::PlatformError;
use reqwest::{Client, ClientBuilder, Response};
use serde::de::DeserializeOwned;
use std::time::Duration;

/// Longest response body excerpt carried into a status error.
const MAX_ERROR_BODY: usize = 512;

/// HTTP client configuration.
#[derive(Debug, Clone)]
pub struct HttpConfig {
    /// Request timeout (default: 30s)
    pub timeout: Duration,
    /// Connection timeout (default: 10s)
    pub connect_timeout: Duration,
    /// User agent string
    pub user_agent: String,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(30),
            connect_timeout: Duration::from_secs(10),
            user_agent: format!("group-authz-plugin/{}", env!("CARGO_PKG_VERSION")),
        }
    }
}

/// Build a configured HTTP client.
///
/// # Errors
///
/// Returns an error if the client cannot be built (e.g., TLS initialization fails).
pub fn build_http_client(config: &HttpConfig) -> Result<Client, PlatformError> {
    let client = ClientBuilder::new()
        .timeout(config.timeout)
        .connect_timeout(config.connect_timeout)
        .user_agent(&config.user_agent)
        .use_rustls_tls()
        .build()?;
    Ok(client)
}

/// Decode a JSON body, turning non-success statuses into [`PlatformError::Status`].
///
/// # Errors
///
/// Returns a status error carrying a truncated body for non-2xx responses,
/// a transport error if the body cannot be read, or a serialization error
/// if it is not the expected JSON.
pub async fn read_json<T: DeserializeOwned>(response: Response) -> Result<T, PlatformError> {
    let status = response.status();
    let mut url = response.url().clone();
    url.set_query(None);

    let body = response.bytes().await?;
    if !status.is_success() {
        let text = String::from_utf8_lossy(&body);
        let message: String = text.chars().take(MAX_ERROR_BODY).collect();
        return Err(PlatformError::status(status.as_u16(), url.as_str(), message));
    }

    Ok(serde_json::from_slice(&body)?)
}
