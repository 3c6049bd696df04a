//! HTTP client for the DocChat service.
//!
//! All endpoints live under one configurable base URL. The streaming ask
//! endpoint is consumed by the orchestrator's transport task; the rest are
//! simple request/response calls.

use crate::model::{AskRequest, FinalFrame};
use anyhow::{Context, Result};
use serde::Deserialize;

#[derive(Debug, Clone)]
pub struct ApiClient {
    http: reqwest::Client,
    base_url: String,
}

#[derive(Debug, Default, Deserialize)]
struct DocsResponse {
    #[serde(default)]
    docs: Vec<String>,
}

impl ApiClient {
    pub fn new(base_url: &str, user_agent: &str) -> Result<Self> {
        let http = reqwest::Client::builder()
            .user_agent(user_agent.to_string())
            .build()
            .context("build HTTP client")?;
        Ok(Self {
            http,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// List the documents available on the server. An empty or malformed
    /// list is tolerated; the UI shows "no documents".
    pub async fn list_docs(&self) -> Result<Vec<String>> {
        let response = self
            .http
            .get(format!("{}/api/docs", self.base_url))
            .send()
            .await
            .context("request /api/docs")?
            .error_for_status()
            .context("list documents")?;
        let docs: DocsResponse = response.json().await.unwrap_or_default();
        Ok(docs.docs)
    }

    /// Quick reachability probe against the service.
    pub async fn health(&self) -> Result<()> {
        self.http
            .get(format!("{}/health", self.base_url))
            .send()
            .await
            .context("request /health")?
            .error_for_status()
            .context("service unhealthy")?;
        Ok(())
    }

    /// One-shot ask without streaming, used by `--json` mode. Pipeline
    /// failures come back as HTTP errors from this endpoint.
    pub async fn ask(&self, request: &AskRequest) -> Result<FinalFrame> {
        let response = self
            .http
            .post(format!("{}/api/ask", self.base_url))
            .json(request)
            .send()
            .await
            .context("request /api/ask")?
            .error_for_status()
            .context("ask failed")?;
        response.json().await.context("decode ask response")
    }

    /// Open the live event stream for one run.
    pub async fn open_stream(&self, request: &AskRequest) -> Result<reqwest::Response> {
        let response = self
            .http
            .get(format!("{}/api/ask/stream", self.base_url))
            .query(&[
                ("question", request.question.as_str()),
                ("doc_id", request.doc_id.as_str()),
            ])
            .query(&[("top_k_sources", request.top_k_sources)])
            .header(reqwest::header::ACCEPT, "text/event-stream")
            .send()
            .await
            .context("request /api/ask/stream")?;
        response.error_for_status().context("open ask stream")
    }
}
