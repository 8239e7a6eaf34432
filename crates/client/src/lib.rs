//! bitspy Client
//!
//! Thin HTTP client for the monitored node's RPC API.
//!
//! # Endpoints
//!
//! - `id()` → `POST /api/v0/id` → the node's peer id (used as a display label)
//! - `log_tail()` → `POST /api/v0/log/tail` → never-ending stream of log bytes

use std::pin::Pin;
use std::time::Duration;

use bytes::Bytes;
use futures::{Stream, StreamExt};
use serde::Deserialize;
use thiserror::Error;
use tracing::debug;

/// Default RPC API address of a local node.
pub const DEFAULT_API_URL: &str = "http://127.0.0.1:5001";

/// Timeout for one-shot requests. The log tail has none: it is meant to stay open.
const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, Error)]
pub enum ClientError {
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("{endpoint} returned HTTP {status}")]
    Status { endpoint: &'static str, status: u16 },

    #[error("invalid response from {endpoint}: {reason}")]
    InvalidResponse { endpoint: &'static str, reason: String },
}

pub type Result<T> = std::result::Result<T, ClientError>;

/// Raw log bytes, chunked however the transport delivers them.
pub type LogStream = Pin<Box<dyn Stream<Item = Result<Bytes>> + Send>>;

#[derive(Deserialize)]
struct IdResponse {
    #[serde(rename = "ID")]
    id: String,
}

/// Client for the monitored node.
#[derive(Debug, Clone)]
pub struct NodeClient {
    http: reqwest::Client,
    api_url: String,
}

impl NodeClient {
    /// Create a client for the node API at `api_url` (e.g. `http://127.0.0.1:5001`).
    pub fn new(api_url: impl Into<String>) -> Self {
        let api_url = api_url.into().trim_end_matches('/').to_string();
        Self {
            http: reqwest::Client::new(),
            api_url,
        }
    }

    pub fn api_url(&self) -> &str {
        &self.api_url
    }

    fn endpoint(&self, path: &str) -> String {
        format!("{}{}", self.api_url, path)
    }

    /// Look up the node's peer id.
    pub async fn id(&self) -> Result<String> {
        const ENDPOINT: &str = "/api/v0/id";
        let resp = self
            .http
            .post(self.endpoint(ENDPOINT))
            .timeout(REQUEST_TIMEOUT)
            .send()
            .await?;
        if !resp.status().is_success() {
            return Err(ClientError::Status {
                endpoint: ENDPOINT,
                status: resp.status().as_u16(),
            });
        }
        let body = resp.bytes().await?;
        let parsed: IdResponse =
            serde_json::from_slice(&body).map_err(|e| ClientError::InvalidResponse {
                endpoint: ENDPOINT,
                reason: e.to_string(),
            })?;
        debug!("Node identity: {}", parsed.id);
        Ok(parsed.id)
    }

    /// Open the node's event log tail.
    ///
    /// The returned stream ends when the node closes the response; callers
    /// are expected to reopen it.
    pub async fn log_tail(&self) -> Result<LogStream> {
        const ENDPOINT: &str = "/api/v0/log/tail";
        let resp = self.http.post(self.endpoint(ENDPOINT)).send().await?;
        if !resp.status().is_success() {
            return Err(ClientError::Status {
                endpoint: ENDPOINT,
                status: resp.status().as_u16(),
            });
        }
        debug!("Log tail opened at {}", self.api_url);
        Ok(Box::pin(resp.bytes_stream().map(|chunk| chunk.map_err(ClientError::from))))
    }
}

impl Default for NodeClient {
    fn default() -> Self {
        Self::new(DEFAULT_API_URL)
    }
}
