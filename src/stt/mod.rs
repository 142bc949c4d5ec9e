pub mod nova;
pub mod whisper;

pub use nova::NovaClient;
pub use whisper::WhisperClient;

use crate::config::{RetrySettings, ServiceConfig, SttModel};
use crate::error::Result;
use crate::transcript::{ChunkMetadata, WordTiming};
use async_trait::async_trait;
use std::sync::Arc;

/// Options for one chunk transcription.
#[derive(Debug, Clone, Default)]
pub struct SttOptions {
    /// Source language hint (ISO 639-1).
    pub language: Option<String>,
}

/// Normalized speech-engine output for one chunk.
///
/// Word timings are relative to the submitted chunk; callers offset them to
/// absolute source time. Plain backends leave `words` empty and `metadata`
/// unset.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SttResult {
    pub text: String,
    pub words: Vec<WordTiming>,
    pub metadata: Option<ChunkMetadata>,
}

/// Trait for speech-to-text backends.
#[async_trait]
pub trait SpeechToText: Send + Sync {
    /// Transcribe one chunk of audio.
    async fn transcribe(&self, audio: Vec<u8>, options: &SttOptions) -> Result<SttResult>;

    /// Backend name for display.
    fn name(&self) -> &'static str;
}

/// Build the client for the configured model.
pub fn create_client(
    model: SttModel,
    services: &ServiceConfig,
    retry: RetrySettings,
) -> Result<Arc<dyn SpeechToText>> {
    let (url, token) = services.require_stt()?;
    Ok(match model {
        SttModel::Whisper => Arc::new(WhisperClient::new(url, token, retry)),
        SttModel::Nova3 => Arc::new(NovaClient::new(url, token, retry)),
    })
}
