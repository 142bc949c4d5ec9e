//! Typed client for the external FFmpeg transcoder worker.
//!
//! Two operations: `/encode` re-encodes one file into an uploaded rendition,
//! `/chunk` splits one file into N uploaded pieces. Both run under the retry
//! driver; the response classification follows the worker's contract: 429
//! honors `retryAfter`, 503 and container-disconnect bodies are transient,
//! a 2xx with `success:false` is a functional failure and never retried.

use crate::config::{AudioCodec, RetrySettings};
use crate::error::{PipelineError, Result};
use crate::retry::{default_classify, run_within_budget};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::debug;

const DEFAULT_RETRY_AFTER: Duration = Duration::from_secs(10);

/// Body markers the worker emits when its container went away mid-job.
const TRANSIENT_BODY_MARKERS: &[&str] =
    &["Container suddenly disconnected", "Container not available"];

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EncodeRequest {
    pub audio_url: String,
    pub upload_url: String,
    pub output_format: AudioCodec,
    pub bitrate: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub channels: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sample_rate: Option<u32>,
}

/// Result of a single-file encode.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct EncodeOutput {
    pub duration_secs: f64,
    pub size_bytes: u64,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ChunkUpload {
    pub index: usize,
    pub r2_key: String,
    pub upload_url: String,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ChunkRequest {
    pub audio_url: String,
    pub chunk_upload_urls: Vec<ChunkUpload>,
    pub chunk_duration: u32,
    pub overlap_duration: u32,
    pub duration: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub output_format: Option<AudioCodec>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub bitrate: Option<u32>,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChunkedPiece {
    pub index: usize,
    pub r2_key: String,
}

/// Seam for the media worker; the HTTP client is the production impl.
#[async_trait]
pub trait Transcoder: Send + Sync {
    async fn encode(&self, request: &EncodeRequest) -> Result<EncodeOutput>;
    async fn chunk(&self, request: &ChunkRequest) -> Result<Vec<ChunkedPiece>>;
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct EncodeResponse {
    success: bool,
    metadata: Option<EncodeMetadata>,
    error: Option<String>,
}

#[derive(Debug, Deserialize)]
struct EncodeMetadata {
    duration: f64,
    size: u64,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ChunkResponse {
    success: bool,
    #[serde(default)]
    chunks: Vec<ChunkedPiece>,
    error: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RateLimitBody {
    retry_after: Option<u64>,
}

/// HTTP client for the transcoder worker.
pub struct HttpTranscoderClient {
    client: reqwest::Client,
    base_url: String,
    retry: RetrySettings,
}

impl HttpTranscoderClient {
    pub fn new(base_url: impl Into<String>, retry: RetrySettings) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
            retry,
        }
    }

    /// POST one request and classify the response into the error taxonomy.
    async fn post<B: Serialize>(&self, path: &str, body: &B) -> Result<String> {
        let url = format!("{}{}", self.base_url, path);
        let response = self
            .client
            .post(&url)
            .json(body)
            .send()
            .await
            .map_err(|e| PipelineError::TransientIo(format!("transcoder request failed: {e}")))?;

        let status = response.status();
        debug!(%status, path, "transcoder response");

        if status.as_u16() == 429 {
            let retry_after = response
                .json::<RateLimitBody>()
                .await
                .ok()
                .and_then(|b| b.retry_after)
                .map(Duration::from_secs)
                .unwrap_or(DEFAULT_RETRY_AFTER);
            return Err(PipelineError::RateLimited { retry_after });
        }

        let body = response.text().await.unwrap_or_default();

        if status.is_success() {
            return Ok(body);
        }

        let container_gone = TRANSIENT_BODY_MARKERS.iter().any(|m| body.contains(m));
        if status.as_u16() == 503 || container_gone {
            return Err(PipelineError::TransientIo(format!(
                "transcoder unavailable ({status}): {body}"
            )));
        }

        Err(PipelineError::Encoding(format!(
            "transcoder returned {status}: {body}"
        )))
    }
}

#[async_trait]
impl Transcoder for HttpTranscoderClient {
    async fn encode(&self, request: &EncodeRequest) -> Result<EncodeOutput> {
        let body = run_within_budget(
            || self.post("/encode", request),
            default_classify,
            &self.retry,
        )
        .await?;

        let response: EncodeResponse = serde_json::from_str(&body)
            .map_err(|e| PipelineError::Encoding(format!("unexpected encode response: {e}")))?;
        if !response.success {
            return Err(PipelineError::Encoding(
                response.error.unwrap_or_else(|| "encode failed".to_string()),
            ));
        }
        let metadata = response.metadata.ok_or_else(|| {
            PipelineError::Encoding("encode succeeded without metadata".to_string())
        })?;
        Ok(EncodeOutput {
            duration_secs: metadata.duration,
            size_bytes: metadata.size,
        })
    }

    async fn chunk(&self, request: &ChunkRequest) -> Result<Vec<ChunkedPiece>> {
        let body = run_within_budget(
            || self.post("/chunk", request),
            default_classify,
            &self.retry,
        )
        .await?;

        let response: ChunkResponse = serde_json::from_str(&body)
            .map_err(|e| PipelineError::Encoding(format!("unexpected chunk response: {e}")))?;
        if !response.success {
            return Err(PipelineError::Encoding(
                response.error.unwrap_or_else(|| "chunking failed".to_string()),
            ));
        }
        if response.chunks.len() != request.chunk_upload_urls.len() {
            return Err(PipelineError::Encoding(format!(
                "chunking returned {} pieces, expected {}",
                response.chunks.len(),
                request.chunk_upload_urls.len()
            )));
        }
        Ok(response.chunks)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_encode_request_wire_shape() {
        let request = EncodeRequest {
            audio_url: "https://store/in".to_string(),
            upload_url: "https://store/out".to_string(),
            output_format: AudioCodec::Opus,
            bitrate: 24,
            channels: Some(1),
            sample_rate: Some(16_000),
        };

        let json = serde_json::to_value(&request).unwrap();
        assert_eq!(json["audioUrl"], "https://store/in");
        assert_eq!(json["outputFormat"], "opus");
        assert_eq!(json["bitrate"], 24);
        assert_eq!(json["channels"], 1);
        assert_eq!(json["sampleRate"], 16_000);
    }

    #[test]
    fn test_optional_fields_omitted() {
        let request = EncodeRequest {
            audio_url: "a".to_string(),
            upload_url: "b".to_string(),
            output_format: AudioCodec::Mp3,
            bitrate: 128,
            channels: None,
            sample_rate: None,
        };
        let json = serde_json::to_value(&request).unwrap();
        assert!(json.get("channels").is_none());
        assert!(json.get("sampleRate").is_none());
    }

    #[test]
    fn test_chunk_request_wire_shape() {
        let request = ChunkRequest {
            audio_url: "https://store/in".to_string(),
            chunk_upload_urls: vec![ChunkUpload {
                index: 0,
                r2_key: "chunks/ep/a.ogg".to_string(),
                upload_url: "https://store/up".to_string(),
            }],
            chunk_duration: 60,
            overlap_duration: 2,
            duration: 75.0,
            output_format: None,
            bitrate: None,
        };

        let json = serde_json::to_value(&request).unwrap();
        assert_eq!(json["chunkUploadUrls"][0]["r2Key"], "chunks/ep/a.ogg");
        assert_eq!(json["chunkDuration"], 60);
        assert_eq!(json["overlapDuration"], 2);
        assert_eq!(json["duration"], 75.0);
    }

    #[test]
    fn test_chunk_response_parsing() {
        let response: ChunkResponse = serde_json::from_str(
            r#"{"success":true,"chunks":[{"index":0,"r2Key":"chunks/ep/a.ogg"}]}"#,
        )
        .unwrap();
        assert!(response.success);
        assert_eq!(response.chunks[0].r2_key, "chunks/ep/a.ogg");
    }
}
