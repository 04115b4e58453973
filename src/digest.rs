use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use reqwest::{Client, StatusCode, Url};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;
use tracing::{debug, info, warn};

use crate::config::Config;
use crate::model::{ContentBlock, LayoutConfig};

/// Payload handed to the digest service when a session is finalized.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DigestRequest {
    pub title: String,
    pub content_blocks: Vec<ContentBlock>,
    pub layout_config: LayoutConfig,
    pub styling_options: Map<String, Value>,
    pub status: String,
}

/// Reference to a digest created by the service.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DigestRef {
    pub id: String,
}

#[async_trait]
pub trait DigestService: Send + Sync {
    async fn create_digest(&self, request: &DigestRequest) -> Result<DigestRef>;
}

/// HTTP client for the digest service (`POST v1/digests`).
#[derive(Clone)]
pub struct DigestClient {
    http: Client,
    base_url: Url,
    token: String,
}

impl fmt::Debug for DigestClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DigestClient")
            .field("base_url", &self.base_url)
            .finish_non_exhaustive()
    }
}

impl DigestClient {
    pub fn new(base_url: Url, token: String) -> Result<Self> {
        let http = Client::builder()
            .user_agent(concat!("digest-builder/", env!("CARGO_PKG_VERSION")))
            .build()
            .context("failed to build HTTP client")?;
        Ok(Self {
            http,
            base_url,
            token,
        })
    }

    pub fn from_config(cfg: &Config) -> Result<Self> {
        let base_url = Url::parse(&cfg.digest.base_url).context("invalid digest.base_url")?;
        Self::new(base_url, cfg.digest.token.clone())
    }

    pub fn build_request(&self, request: &DigestRequest) -> Result<reqwest::Request> {
        let endpoint = self
            .base_url
            .join("v1/digests")
            .context("invalid digest base URL")?;
        self.http
            .post(endpoint)
            .header("Authorization", format!("Bearer {}", self.token))
            .header("Content-Type", "application/json")
            .json(request)
            .build()
            .context("failed to build digest request")
    }
}

#[async_trait]
impl DigestService for DigestClient {
    async fn create_digest(&self, request: &DigestRequest) -> Result<DigestRef> {
        let http_request = self.build_request(request)?;
        debug!(
            url = %http_request.url(),
            blocks = request.content_blocks.len(),
            "sending digest request"
        );

        let res = self
            .http
            .execute(http_request)
            .await
            .context("failed to reach digest service")?;

        if res.status() == StatusCode::TOO_MANY_REQUESTS {
            let body = res.text().await.unwrap_or_default();
            warn!("rate limited by digest service: {}", body);
            return Err(anyhow!("received 429 from digest service: {}", body));
        }
        if !res.status().is_success() {
            let status = res.status();
            let body = res.text().await.unwrap_or_default();
            warn!(%status, "digest service error: {}", body);
            return Err(anyhow!("digest service error {}: {}", status, body));
        }

        let body = res
            .text()
            .await
            .context("failed to read digest service response")?;
        let digest: DigestRef =
            serde_json::from_str(&body).context("invalid digest service response JSON")?;
        if digest.id.trim().is_empty() {
            return Err(anyhow!("digest service returned an empty id"));
        }
        info!(digest_id = %digest.id, "digest created");
        Ok(digest)
    }
}
