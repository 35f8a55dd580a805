//! Anthropic Messages API provider
//!
//! Retries 429 and 5xx responses with exponential backoff, honoring
//! `retry-after` when the server sends it.

use async_trait::async_trait;
use drover_core::{DroverError, Result};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::time::Duration;

use crate::provider::{ContentBlock, Message, ModelProvider, ModelRequest, ModelResponse, Usage};
use crate::schema::ToolDefinition;

const ANTHROPIC_API_URL: &str = "https://api.anthropic.com/v1/messages";
const ANTHROPIC_VERSION: &str = "2023-06-01";

// Retry configuration
const MAX_RETRIES: u32 = 4;
const INITIAL_BACKOFF_SECS: u64 = 5;
const MAX_BACKOFF_SECS: u64 = 120;
const REQUEST_TIMEOUT_SECS: u64 = 300;

/// Read the API key through `lookup` (normally the process environment)
pub fn api_key_from<F>(lookup: F) -> Result<String>
where
    F: Fn(&str) -> Option<String>,
{
    lookup("ANTHROPIC_API_KEY")
        .map(|k| k.trim().to_string())
        .filter(|k| !k.is_empty())
        .ok_or_else(|| {
            DroverError::Auth(
                "No authentication found. Set ANTHROPIC_API_KEY=sk-ant-api03-...".to_string(),
            )
        })
}

#[derive(Debug, Serialize)]
struct MessagesRequest<'a> {
    model: &'a str,
    max_tokens: usize,
    #[serde(skip_serializing_if = "is_blank")]
    system: &'a str,
    messages: &'a [Message],
    #[serde(skip_serializing_if = "has_no_tools")]
    tools: &'a [ToolDefinition],
}

fn is_blank(s: &&str) -> bool {
    s.is_empty()
}

fn has_no_tools(tools: &&[ToolDefinition]) -> bool {
    tools.is_empty()
}

#[derive(Debug, Deserialize)]
struct MessagesResponse {
    content: Vec<Value>,
    #[serde(default)]
    usage: Option<Usage>,
}

impl MessagesResponse {
    // Block types other than text and tool_use (e.g. thinking) are skipped
    fn into_model_response(self) -> ModelResponse {
        let content = self
            .content
            .into_iter()
            .filter_map(|v| serde_json::from_value::<ContentBlock>(v).ok())
            .filter(|b| !matches!(b, ContentBlock::ToolResult { .. }))
            .collect();
        ModelResponse {
            content,
            usage: self.usage,
        }
    }
}

/// [`ModelProvider`] backed by the Anthropic Messages API
#[derive(Debug, Clone)]
pub struct AnthropicProvider {
    http: reqwest::Client,
    api_key: String,
    model: String,
    api_url: String,
}

impl AnthropicProvider {
    pub fn new(api_key: impl Into<String>, model: impl Into<String>) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(REQUEST_TIMEOUT_SECS))
            .build()
            .map_err(|e| DroverError::Network(format!("Failed to build HTTP client: {}", e)))?;

        Ok(Self {
            http,
            api_key: api_key.into(),
            model: model.into(),
            api_url: ANTHROPIC_API_URL.to_string(),
        })
    }

    /// Build from `ANTHROPIC_API_KEY`
    pub fn from_env(model: impl Into<String>) -> Result<Self> {
        let key = api_key_from(|k| std::env::var(k).ok())?;
        Self::new(key, model)
    }

    /// Point at a different endpoint (proxies, tests)
    pub fn with_api_url(mut self, url: impl Into<String>) -> Self {
        self.api_url = url.into();
        self
    }

    pub fn model(&self) -> &str {
        &self.model
    }
}

#[async_trait]
impl ModelProvider for AnthropicProvider {
    async fn complete(&self, request: ModelRequest) -> Result<ModelResponse> {
        let body = MessagesRequest {
            model: &self.model,
            max_tokens: request.max_tokens,
            system: &request.system,
            messages: &request.messages,
            tools: &request.tools,
        };

        let mut retries = 0;
        let mut backoff_secs = INITIAL_BACKOFF_SECS;

        loop {
            tracing::debug!(
                "Sending request to Anthropic API ({} messages, attempt {})",
                request.messages.len(),
                retries + 1
            );

            let response = self
                .http
                .post(&self.api_url)
                .header("x-api-key", &self.api_key)
                .header("anthropic-version", ANTHROPIC_VERSION)
                .header("content-type", "application/json")
                .json(&body)
                .send()
                .await
                .map_err(|e| DroverError::Api(format!("Failed to send request: {}", e)))?;

            let status = response.status();

            if status.as_u16() == 429 || status.is_server_error() {
                retries += 1;
                let retry_after = response
                    .headers()
                    .get("retry-after")
                    .and_then(|v| v.to_str().ok())
                    .and_then(|s| s.parse::<u64>().ok());
                let error_text = response
                    .text()
                    .await
                    .unwrap_or_else(|_| "Unknown".to_string());

                if retries > MAX_RETRIES {
                    return Err(if status.as_u16() == 429 {
                        DroverError::ApiLimit(format!(
                            "Rate limit exceeded after {} retries. Last error: {}",
                            MAX_RETRIES, error_text
                        ))
                    } else {
                        DroverError::Api(format!(
                            "Anthropic API error {} after {} retries: {}",
                            status, MAX_RETRIES, error_text
                        ))
                    });
                }

                let wait_secs = retry_after.unwrap_or(backoff_secs).min(MAX_BACKOFF_SECS);
                tracing::warn!(
                    "Anthropic API returned {}. Waiting {} seconds before retry {}/{}",
                    status,
                    wait_secs,
                    retries,
                    MAX_RETRIES
                );
                tokio::time::sleep(Duration::from_secs(wait_secs)).await;
                backoff_secs = (backoff_secs * 2).min(MAX_BACKOFF_SECS);
                continue;
            }

            if !status.is_success() {
                let error_text = response
                    .text()
                    .await
                    .unwrap_or_else(|_| "Unknown".to_string());
                return Err(match status.as_u16() {
                    401 | 403 => DroverError::Auth(format!(
                        "Anthropic API rejected credentials ({}): {}",
                        status, error_text
                    )),
                    _ => DroverError::Api(format!(
                        "Anthropic API error {}: {}",
                        status, error_text
                    )),
                });
            }

            let parsed: MessagesResponse = response
                .json()
                .await
                .map_err(|e| DroverError::Api(format!("Failed to parse response: {}", e)))?;
            let parsed = parsed.into_model_response();

            if let Some(usage) = parsed.usage {
                tracing::debug!(
                    "Model response: {} blocks, {} input tokens, {} output tokens",
                    parsed.content.len(),
                    usage.input_tokens,
                    usage.output_tokens
                );
            }

            return Ok(parsed);
        }
    }

    fn name(&self) -> &str {
        &self.model
    }
}
