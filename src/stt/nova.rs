//! Structured speech backend: word timings, paragraphs, speakers, topics.

use super::{SpeechToText, SttOptions, SttResult};
use crate::config::{RetrySettings, SttModel};
use crate::error::{PipelineError, Result};
use crate::retry::{default_classify, run_within_budget};
use crate::transcript::{ChunkMetadata, Paragraph, WordTiming};
use async_trait::async_trait;
use serde::Deserialize;
use std::time::Duration;
use tracing::debug;

#[derive(Debug, Deserialize)]
struct NovaResponse {
    results: Option<NovaResults>,
}

#[derive(Debug, Deserialize)]
struct NovaResults {
    #[serde(default)]
    channels: Vec<NovaChannel>,
    summary: Option<NovaSummary>,
    topics: Option<NovaTopics>,
}

#[derive(Debug, Deserialize)]
struct NovaChannel {
    #[serde(default)]
    alternatives: Vec<NovaAlternative>,
    detected_language: Option<String>,
}

#[derive(Debug, Deserialize)]
struct NovaAlternative {
    transcript: String,
    #[serde(default)]
    words: Vec<NovaWord>,
    paragraphs: Option<NovaParagraphs>,
}

#[derive(Debug, Deserialize)]
struct NovaWord {
    word: String,
    start: f64,
    end: f64,
    speaker: Option<u32>,
    punctuated_word: Option<String>,
}

#[derive(Debug, Deserialize)]
struct NovaParagraphs {
    #[serde(default)]
    paragraphs: Vec<NovaParagraph>,
}

#[derive(Debug, Deserialize)]
struct NovaParagraph {
    #[serde(default)]
    sentences: Vec<NovaSentence>,
    start: f64,
    end: f64,
    speaker: Option<u32>,
}

#[derive(Debug, Deserialize)]
struct NovaSentence {
    text: String,
}

#[derive(Debug, Deserialize)]
struct NovaSummary {
    short: Option<String>,
}

#[derive(Debug, Deserialize)]
struct NovaTopics {
    #[serde(default)]
    segments: Vec<NovaTopicSegment>,
}

#[derive(Debug, Deserialize)]
struct NovaTopicSegment {
    #[serde(default)]
    topics: Vec<NovaTopic>,
}

#[derive(Debug, Deserialize)]
struct NovaTopic {
    topic: String,
}

/// Client for a Nova-style engine with diarization and word timings.
pub struct NovaClient {
    client: reqwest::Client,
    base_url: String,
    token: String,
    retry: RetrySettings,
}

impl NovaClient {
    pub fn new(base_url: impl Into<String>, token: impl Into<String>, retry: RetrySettings) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
            token: token.into(),
            retry,
        }
    }

    async fn call(&self, audio: &[u8], options: &SttOptions) -> Result<String> {
        let mut url = format!(
            "{}/{}?diarize=true&punctuate=true&paragraphs=true",
            self.base_url,
            SttModel::Nova3.model_id()
        );
        if let Some(lang) = &options.language {
            url.push_str("&language=");
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
        debug!(%status, "nova response");

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

    fn normalize(body: &str) -> Result<SttResult> {
        let response: NovaResponse = serde_json::from_str(body)
            .map_err(|e| PipelineError::SttDecode(format!("unrecognized response: {e}")))?;

        let results = response
            .results
            .ok_or_else(|| PipelineError::SttDecode("response carried no results".to_string()))?;
        let channel = results
            .channels
            .into_iter()
            .next()
            .ok_or_else(|| PipelineError::SttDecode("response carried no channels".to_string()))?;
        let detected_language = channel.detected_language;
        let alternative = channel
            .alternatives
            .into_iter()
            .next()
            .ok_or_else(|| {
                PipelineError::SttDecode("response carried no alternatives".to_string())
            })?;

        let mut speakers: Vec<u32> = Vec::new();
        let words: Vec<WordTiming> = alternative
            .words
            .iter()
            .map(|w| {
                if let Some(speaker) = w.speaker {
                    if !speakers.contains(&speaker) {
                        speakers.push(speaker);
                    }
                }
                WordTiming {
                    word: w.punctuated_word.clone().unwrap_or_else(|| w.word.clone()),
                    start: w.start,
                    end: w.end,
                }
            })
            .collect();

        let paragraphs: Vec<Paragraph> = alternative
            .paragraphs
            .map(|p| {
                p.paragraphs
                    .into_iter()
                    .map(|p| Paragraph {
                        text: p
                            .sentences
                            .iter()
                            .map(|s| s.text.as_str())
                            .collect::<Vec<_>>()
                            .join(" "),
                        start: p.start,
                        end: p.end,
                        speaker: p.speaker,
                    })
                    .collect()
            })
            .unwrap_or_default();

        let keywords: Vec<String> = results
            .topics
            .map(|t| {
                t.segments
                    .into_iter()
                    .flat_map(|s| s.topics.into_iter().map(|t| t.topic))
                    .collect()
            })
            .unwrap_or_default();

        Ok(SttResult {
            text: alternative.transcript.trim().to_string(),
            words,
            metadata: Some(ChunkMetadata {
                speakers,
                paragraphs,
                keywords,
                summary: results.summary.and_then(|s| s.short),
                language: detected_language,
            }),
        })
    }
}

#[async_trait]
impl SpeechToText for NovaClient {
    async fn transcribe(&self, audio: Vec<u8>, options: &SttOptions) -> Result<SttResult> {
        let body = run_within_budget(
            || self.call(&audio, options),
            default_classify,
            &self.retry,
        )
        .await?;
        Self::normalize(&body)
    }

    fn name(&self) -> &'static str {
        "nova-3"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const STRUCTURED: &str = r#"{
        "results": {
            "channels": [{
                "detected_language": "en",
                "alternatives": [{
                    "transcript": "hello there friend",
                    "words": [
                        {"word": "hello", "start": 0.1, "end": 0.5, "speaker": 0, "punctuated_word": "Hello"},
                        {"word": "there", "start": 0.6, "end": 0.9, "speaker": 0},
                        {"word": "friend", "start": 1.2, "end": 1.7, "speaker": 1}
                    ],
                    "paragraphs": {
                        "paragraphs": [
                            {"sentences": [{"text": "Hello there."}], "start": 0.1, "end": 0.9, "speaker": 0},
                            {"sentences": [{"text": "Friend."}], "start": 1.2, "end": 1.7, "speaker": 1}
                        ]
                    }
                }]
            }],
            "summary": {"short": "A greeting."},
            "topics": {"segments": [{"topics": [{"topic": "greetings"}]}]}
        }
    }"#;

    #[test]
    fn test_normalize_structured_response() {
        let result = NovaClient::normalize(STRUCTURED).unwrap();

        assert_eq!(result.text, "hello there friend");
        assert_eq!(result.words.len(), 3);
        assert_eq!(result.words[0].word, "Hello");
        assert_eq!(result.words[1].word, "there");

        let metadata = result.metadata.unwrap();
        assert_eq!(metadata.speakers, vec![0, 1]);
        assert_eq!(metadata.paragraphs.len(), 2);
        assert_eq!(metadata.paragraphs[0].text, "Hello there.");
        assert_eq!(metadata.paragraphs[1].speaker, Some(1));
        assert_eq!(metadata.keywords, vec!["greetings".to_string()]);
        assert_eq!(metadata.summary.as_deref(), Some("A greeting."));
        assert_eq!(metadata.language.as_deref(), Some("en"));
    }

    #[test]
    fn test_unknown_shape_is_decode_error() {
        let err = NovaClient::normalize(r#"{"transcription": "flat"}"#).unwrap_err();
        assert!(matches!(err, PipelineError::SttDecode(_)));

        let err = NovaClient::normalize(r#"{"results": {"channels": []}}"#).unwrap_err();
        assert!(matches!(err, PipelineError::SttDecode(_)));

        let err = NovaClient::normalize("not json").unwrap_err();
        assert!(matches!(err, PipelineError::SttDecode(_)));
    }

    #[test]
    fn test_normalize_without_optional_features() {
        let body = r#"{
            "results": {
                "channels": [{
                    "alternatives": [{"transcript": "bare", "words": []}]
                }]
            }
        }"#;
        let result = NovaClient::normalize(body).unwrap();
        assert_eq!(result.text, "bare");
        assert!(result.words.is_empty());
        let metadata = result.metadata.unwrap();
        assert!(metadata.paragraphs.is_empty());
        assert!(metadata.summary.is_none());
    }
}
