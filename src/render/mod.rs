//! Sandboxed render service client
//!
//! Ordinary render failures come back as `RenderOutcome { success: false }`.
//! Only transport or service faults are `Err`.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;

/// Everything the renderer needs for one candidate.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RenderRequest {
    pub code: String,
    pub scene_name: String,
    pub upload_target: String,
    pub resolution: String,
    pub aspect_ratio: String,
    #[serde(rename = "duration")]
    pub duration_secs: u32,
    pub style: String,
    pub verbose: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RenderOutcome {
    pub success: bool,
    #[serde(default)]
    pub logs: Option<String>,
    #[serde(default)]
    pub stderr: Option<String>,
    #[serde(default)]
    pub error: Option<String>,
}

impl RenderOutcome {
    pub fn succeeded(logs: impl Into<String>) -> Self {
        Self {
            success: true,
            logs: Some(logs.into()),
            ..Self::default()
        }
    }

    pub fn failed(error: impl Into<String>, stderr: Option<String>) -> Self {
        Self {
            success: false,
            error: Some(error.into()),
            stderr,
            ..Self::default()
        }
    }
}

/// Infrastructure-level render faults.
#[derive(Debug, Error)]
pub enum RenderError {
    #[error("render request failed: {0}")]
    Request(#[from] reqwest::Error),
    #[error("render service error ({status}): {body}")]
    Service { status: u16, body: String },
    #[error("render service returned an unreadable body: {0}")]
    Decode(String),
}

#[async_trait]
pub trait RenderExecutor: Send + Sync {
    async fn render(&self, request: &RenderRequest) -> Result<RenderOutcome, RenderError>;
}

/// Renderer reached over HTTP (a web function that runs Manim in isolation and
/// uploads the artifact to `upload_target`).
pub struct HttpRenderExecutor {
    client: reqwest::Client,
    endpoint: String,
    token: Option<String>,
}

impl HttpRenderExecutor {
    pub fn new(
        endpoint: impl Into<String>,
        token: Option<String>,
        connect_timeout: Duration,
    ) -> Result<Self, RenderError> {
        let client = reqwest::Client::builder()
            .connect_timeout(connect_timeout)
            .build()?;
        Ok(Self::with_client(client, endpoint, token))
    }

    /// Reuse an existing client (shared connection pool).
    pub fn with_client(
        client: reqwest::Client,
        endpoint: impl Into<String>,
        token: Option<String>,
    ) -> Self {
        Self {
            client,
            endpoint: endpoint.into(),
            token: token.filter(|t| !t.trim().is_empty()),
        }
    }
}

#[async_trait]
impl RenderExecutor for HttpRenderExecutor {
    async fn render(&self, request: &RenderRequest) -> Result<RenderOutcome, RenderError> {
        let mut builder = self.client.post(&self.endpoint).json(request);
        if let Some(token) = &self.token {
            builder = builder.bearer_auth(token);
        }
        let response = builder.send().await?;
        let status = response.status();
        let body = response.text().await?;
        if !status.is_success() {
            return Err(RenderError::Service {
                status: status.as_u16(),
                body: crate::util::truncate(&body, 500),
            });
        }
        parse_outcome(&body)
    }
}

fn parse_outcome(body: &str) -> Result<RenderOutcome, RenderError> {
    serde_json::from_str(body).map_err(|e| RenderError::Decode(e.to_string()))
}
