use super::models::{ApiFlavor, Model, Usage};
use crate::util::truncate;
use async_trait::async_trait;
use serde::Serialize;
use std::time::Duration;
use thiserror::Error;

const OPENAI_BASE_URL: &str = "https://api.openai.com/v1";

/// Rate limit retry configuration
const MAX_RETRIES: u32 = 3;
const INITIAL_BACKOFF_MS: u64 = 2000; // 2 seconds
const BACKOFF_MULTIPLIER: u64 = 2; // Exponential backoff

/// One completion request: a system prompt and a user prompt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompletionRequest {
    pub system: String,
    pub user: String,
}

impl CompletionRequest {
    pub fn new(system: impl Into<String>, user: impl Into<String>) -> Self {
        Self {
            system: system.into(),
            user: user.into(),
        }
    }
}

/// Raw provider reply. The text payload is located later by the extractor chain.
#[derive(Debug, Clone)]
pub struct CompletionResponse {
    pub body: serde_json::Value,
    pub model: String,
    pub usage: Option<Usage>,
}

impl CompletionResponse {
    pub fn from_body(body: serde_json::Value, model: impl Into<String>) -> Self {
        let usage = Usage::from_body(&body);
        Self {
            body,
            model: model.into(),
            usage,
        }
    }
}

#[derive(Debug, Error)]
pub enum ProviderError {
    #[error("no API key configured (set OPENAI_API_KEY)")]
    MissingApiKey,
    #[error("HTTP request failed: {0}")]
    Request(#[from] reqwest::Error),
    #[error("provider API error ({status}): {body}")]
    Api { status: u16, body: String },
    #[error("rate limited after {0} retries")]
    RateLimited(u32),
    #[error("failed to parse provider response: {0}")]
    Parse(String),
    #[error("{0}")]
    Other(String),
}

/// Text-completion seam shared by the enhancer, generator and fixer.
#[async_trait]
pub trait CompletionProvider: Send + Sync {
    async fn complete(&self, request: &CompletionRequest)
        -> Result<CompletionResponse, ProviderError>;
}

#[derive(Debug, Clone)]
pub struct OpenAiSettings {
    pub api_key: Option<String>,
    pub base_url: String,
    pub primary_model: String,
    pub fallback_model: String,
    pub connect_timeout: Duration,
}

impl Default for OpenAiSettings {
    fn default() -> Self {
        Self {
            api_key: None,
            base_url: OPENAI_BASE_URL.to_string(),
            primary_model: Model::Primary.default_id().to_string(),
            fallback_model: Model::Fallback.default_id().to_string(),
            connect_timeout: Duration::from_secs(10),
        }
    }
}

/// OpenAI-backed provider: primary model through the Responses API, falling
/// back to the chat model through Chat Completions when the primary route fails.
pub struct OpenAiProvider {
    client: reqwest::Client,
    settings: OpenAiSettings,
}

#[derive(Serialize)]
struct Message<'a> {
    role: &'static str,
    content: &'a str,
}

#[derive(Serialize)]
struct ResponsesRequest<'a> {
    model: &'a str,
    input: Vec<Message<'a>>,
    text: serde_json::Value,
    reasoning: serde_json::Value,
    store: bool,
}

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<Message<'a>>,
    temperature: f32,
    top_p: f32,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_tokens: Option<u32>,
}

impl OpenAiProvider {
    pub fn new(settings: OpenAiSettings) -> Result<Self, ProviderError> {
        let client = reqwest::Client::builder()
            .connect_timeout(settings.connect_timeout)
            .build()?;
        Ok(Self { client, settings })
    }

    fn model_id(&self, model: Model) -> &str {
        match model {
            Model::Primary => &self.settings.primary_model,
            Model::Fallback => &self.settings.fallback_model,
        }
    }

    fn request_body(&self, model: Model, request: &CompletionRequest) -> serde_json::Result<serde_json::Value> {
        let messages = vec![
            Message {
                role: "system",
                content: &request.system,
            },
            Message {
                role: "user",
                content: &request.user,
            },
        ];
        let model_id = self.model_id(model);
        match model.api() {
            ApiFlavor::Responses => serde_json::to_value(ResponsesRequest {
                model: model_id,
                input: messages,
                text: serde_json::json!({"format": {"type": "text"}, "verbosity": "medium"}),
                reasoning: serde_json::json!({"effort": "medium"}),
                store: false,
            }),
            ApiFlavor::ChatCompletions => serde_json::to_value(ChatRequest {
                model: model_id,
                messages,
                temperature: 0.3,
                top_p: 0.9,
                max_tokens: model.max_tokens(),
            }),
        }
    }

    fn endpoint(&self, model: Model) -> String {
        let base = self.settings.base_url.trim_end_matches('/');
        match model.api() {
            ApiFlavor::Responses => format!("{}/responses", base),
            ApiFlavor::ChatCompletions => format!("{}/chat/completions", base),
        }
    }

    /// Call one model route, retrying rate limits with exponential backoff.
    async fn call_model(
        &self,
        model: Model,
        request: &CompletionRequest,
    ) -> Result<CompletionResponse, ProviderError> {
        let api_key = self
            .settings
            .api_key
            .as_deref()
            .filter(|k| !k.trim().is_empty())
            .ok_or(ProviderError::MissingApiKey)?;
        let body = self
            .request_body(model, request)
            .map_err(|e| ProviderError::Parse(e.to_string()))?;
        let url = self.endpoint(model);

        let mut retry_count = 0;
        loop {
            let response = self
                .client
                .post(&url)
                .bearer_auth(api_key)
                .json(&body)
                .send()
                .await?;

            let status = response.status();
            let text = response.text().await?;

            if status.is_success() {
                let parsed: serde_json::Value = serde_json::from_str(&text).map_err(|e| {
                    ProviderError::Parse(format!("{}: {}", e, truncate(&text, 200)))
                })?;
                return Ok(CompletionResponse::from_body(parsed, self.model_id(model)));
            }

            if status.as_u16() == 429 {
                if retry_count >= MAX_RETRIES {
                    return Err(ProviderError::RateLimited(retry_count));
                }
                retry_count += 1;
                let retry_after = parse_retry_after(&text).unwrap_or_else(|| {
                    (INITIAL_BACKOFF_MS * BACKOFF_MULTIPLIER.pow(retry_count - 1)) / 1000
                });
                tracing::warn!(
                    model = self.model_id(model),
                    retry_after,
                    retry_count,
                    "completion provider rate limited; backing off"
                );
                tokio::time::sleep(Duration::from_secs(retry_after)).await;
                continue;
            }

            return Err(ProviderError::Api {
                status: status.as_u16(),
                body: truncate(&text, 200),
            });
        }
    }
}

#[async_trait]
impl CompletionProvider for OpenAiProvider {
    async fn complete(
        &self,
        request: &CompletionRequest,
    ) -> Result<CompletionResponse, ProviderError> {
        match self.call_model(Model::Primary, request).await {
            Ok(response) => Ok(response),
            Err(ProviderError::MissingApiKey) => Err(ProviderError::MissingApiKey),
            Err(err) => {
                tracing::warn!(
                    error = %err,
                    primary = self.model_id(Model::Primary),
                    fallback = self.model_id(Model::Fallback),
                    "primary model unavailable, falling back"
                );
                self.call_model(Model::Fallback, request).await
            }
        }
    }
}

/// Extract retry-after hint from a rate-limit response body (if present)
fn parse_retry_after(text: &str) -> Option<u64> {
    let text_lower = text.to_lowercase();
    let pos = text_lower.find("try again in").or_else(|| text_lower.find("retry"))?;
    let after = &text_lower[pos..];
    for word in after.split_whitespace().skip(1).take(5) {
        let digits: String = word.chars().take_while(|c| c.is_ascii_digit()).collect();
        if let Ok(secs) = digits.parse::<u64>() {
            if secs > 0 && secs < 300 {
                return Some(secs);
            }
        }
    }
    None
}
