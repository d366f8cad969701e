//! Knowledge-base retrieval via an HTTP sidecar.
//!
//! Service and pricing reference material is indexed by a small retrieval
//! sidecar on port 3003. Lookups are best-effort: when the sidecar is down
//! the agent simply answers without supporting passages.

use serde::Deserialize;
use tracing::{debug, warn};

use crate::config::KnowledgeConfig;

/// HTTP connect timeout for the reqwest client.
const CONNECT_TIMEOUT_SECS: u64 = 5;

/// HTTP request timeout for retrieval calls.
const REQUEST_TIMEOUT_SECS: u64 = 15;

/// Errors from the knowledge sidecar.
#[derive(Debug, thiserror::Error)]
pub enum KnowledgeError {
    /// HTTP request to the sidecar failed.
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),
}

/// A retrieved passage with its relevance score.
#[derive(Debug, Clone, Deserialize)]
pub struct KnowledgePassage {
    /// Source document title.
    pub title: String,

    /// Passage text.
    pub content: String,

    /// Relevance score in `[0, 1]`, higher is better.
    pub score: f32,
}

/// Response envelope from the sidecar HTTP API.
#[derive(Deserialize)]
struct BridgeResponse<T> {
    #[allow(dead_code)]
    success: bool,
    data: Option<T>,
}

/// Client for the knowledge retrieval sidecar.
pub struct KnowledgeClient {
    client: reqwest::Client,
    base_url: String,
    top_k: u32,
    relevance_threshold: f32,
}

impl KnowledgeClient {
    /// Create a client from the knowledge section of the configuration.
    pub fn new(config: &KnowledgeConfig) -> Self {
        let client = reqwest::Client::builder()
            .connect_timeout(std::time::Duration::from_secs(CONNECT_TIMEOUT_SECS))
            .timeout(std::time::Duration::from_secs(REQUEST_TIMEOUT_SECS))
            .build()
            .unwrap_or_else(|e| {
                warn!(error = %e, "failed to build HTTP client with timeouts, using default");
                reqwest::Client::default()
            });
        Self {
            client,
            base_url: config.base_url.clone(),
            top_k: config.top_k,
            relevance_threshold: config.relevance_threshold,
        }
    }

    /// Retrieve the most relevant passages for a free-text query.
    ///
    /// Results below the configured relevance threshold are dropped, so the
    /// returned list may be shorter than `top_k` or empty.
    ///
    /// # Errors
    ///
    /// Returns an error if the sidecar is unreachable or replies with a
    /// malformed body.
    pub async fn search(&self, query: &str) -> Result<Vec<KnowledgePassage>, KnowledgeError> {
        let url = format!("{}/search", self.base_url);
        let body = serde_json::json!({ "query": query, "top_k": self.top_k });
        let resp = self.client.post(&url).json(&body).send().await?;
        if !resp.status().is_success() {
            debug!(status = %resp.status(), "knowledge search returned non-200");
            return Ok(Vec::new());
        }
        let body: BridgeResponse<Vec<KnowledgePassage>> = resp.json().await?;
        let mut passages = body.data.unwrap_or_default();
        passages.retain(|p| p.score >= self.relevance_threshold);
        Ok(passages)
    }
}
