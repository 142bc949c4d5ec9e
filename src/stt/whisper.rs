//! Plain speech backend: a transcript string, no word timings.

use super::{SpeechToText, SttOptions, SttResult};
use crate::config::{RetrySettings, SttModel};
use crate::error::{PipelineError, Result};
use crate::retry::{default_classify, run_within_budget};
use async_trait::async_trait;
use serde::Deserialize;
use std::time::Duration;
use tracing::debug;

#[derive(Debug, Deserialize)]
struct WhisperResponse {
    result: Option<WhisperResult>,
    text: Option<String>,
}

#[derive(Debug, Deserialize)]
struct WhisperResult {
    text: String,
}

/// Client for a Whisper-style engine returning `{ text }`.
pub struct WhisperClient {
    client: reqwest::Client,
    base_url: String,
    token: String,
    retry: RetrySettings,
}

impl WhisperClient {
    pub fn new(base_url: impl Into<String>, token: impl Into<String>, retry: RetrySettings) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
            token: token.into(),
            retry,
        }
    }

    async fn call(&self, audio: &[u8], options: &SttOptions) -> Result<String> {
        let mut url = format!("{}/{}", self.base_url, SttModel::Whisper.model_id());
        if let Some(lang) = &options.language {
            url.push_str("?language=");
            url.push_str(lang);
        }

        let response = self
            .client
            .post(&url)
            .header("Authorization", format!("Bearer {}", self.token))
            .header("Content-Type", "application/octet-stream")
            .body(audio.to_vec())
            .send()
            .await
            .map_err(|e| PipelineError::TransientIo(format!("stt request failed: {e}")))?;

        let status = response.status();
        debug!(%status, "whisper response");

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
                "stt unavailable ({status}): {body}"
            )));
        }
        if !status.is_success() {
            return Err(PipelineError::SttDecode(format!(
                "stt returned {status}: {body}"
            )));
        }
        Ok(body)
    }
}

#[async_trait]
impl SpeechToText for WhisperClient {
    async fn transcribe(&self, audio: Vec<u8>, options: &SttOptions) -> Result<SttResult> {
        let body = run_within_budget(
            || self.call(&audio, options),
            default_classify,
            &self.retry,
        )
        .await?;

        let response: WhisperResponse = serde_json::from_str(&body)
            .map_err(|e| PipelineError::SttDecode(format!("unrecognized response: {e}")))?;
        let text = response
            .result
            .map(|r| r.text)
            .or(response.text)
            .ok_or_else(|| PipelineError::SttDecode("response carried no text".to_string()))?;

        Ok(SttResult {
            text: text.trim().to_string(),
            words: Vec::new(),
            metadata: None,
        })
    }

    fn name(&self) -> &'static str {
        "whisper"
    }
}
