//! LLM client for post-transcription enhancement.

use crate::config::RetrySettings;
use crate::error::{PipelineError, Result};
use crate::retry::{default_classify, run_within_budget};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::debug;

/// Seam for the enhancement model.
#[async_trait]
pub trait LlmClient: Send + Sync {
    /// One prompt in, the model's text out.
    async fn complete(&self, prompt: &str) -> Result<String>;
}

#[derive(Debug, Serialize)]
struct LlmRequest<'a> {
    model: &'a str,
    messages: Vec<LlmMessage<'a>>,
}

#[derive(Debug, Serialize)]
struct LlmMessage<'a> {
    role: &'static str,
    content: &'a str,
}

#[derive(Debug, Deserialize)]
struct LlmResponse {
    result: Option<LlmResult>,
    response: Option<String>,
}

#[derive(Debug, Deserialize)]
struct LlmResult {
    response: String,
}

/// HTTP chat-style client.
pub struct HttpLlmClient {
    client: reqwest::Client,
    base_url: String,
    token: String,
    model: String,
    retry: RetrySettings,
}

impl HttpLlmClient {
    pub fn new(
        base_url: impl Into<String>,
        token: impl Into<String>,
        model: impl Into<String>,
        retry: RetrySettings,
    ) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
            token: token.into(),
            model: model.into(),
            retry,
        }
    }

    async fn call(&self, prompt: &str) -> Result<String> {
        let request = LlmRequest {
            model: &self.model,
            messages: vec![LlmMessage {
                role: "user",
                content: prompt,
            }],
        };

        let response = self
            .client
            .post(format!("{}/chat", self.base_url))
            .header("Authorization", format!("Bearer {}", self.token))
            .json(&request)
            .send()
            .await
            .map_err(|e| PipelineError::TransientIo(format!("llm request failed: {e}")))?;

        let status = response.status();
        debug!(%status, "llm response");

        if status.as_u16() == 429 {
            let retry_after = response
                .headers()
                .get("retry-after")
                .and_then(|v| v.to_str().ok())
                .and_then(|v| v.parse().ok())
                .map(Duration::from_secs)
                .unwrap_or(Duration::from_secs(10));
            return Err(PipelineError::RateLimited { retry_after });
        }

        let body = response.text().await.unwrap_or_default();
        if status.is_server_error() {
            return Err(PipelineError::TransientIo(format!(
                "llm unavailable ({status}): {body}"
            )));
        }
        if !status.is_success() {
            return Err(PipelineError::Encoding(format!(
                "llm returned {status}: {body}"
            )));
        }

        let parsed: LlmResponse = serde_json::from_str(&body)
            .map_err(|e| PipelineError::Encoding(format!("unexpected llm response: {e}")))?;
        parsed
            .result
            .map(|r| r.response)
            .or(parsed.response)
            .ok_or_else(|| PipelineError::Encoding("llm response carried no text".to_string()))
    }
}

#[async_trait]
impl LlmClient for HttpLlmClient {
    async fn complete(&self, prompt: &str) -> Result<String> {
        run_within_budget(|| self.call(prompt), default_classify, &self.retry).await
    }
}
