use crate::error::{PipelineError, Result};
use crate::workflow::StepPolicy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::sync::OnceLock;
use std::time::Duration;

/// Codecs supported for renditions and intermediate chunks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AudioCodec {
    Mp3,
    Opus,
}

impl AudioCodec {
    pub fn extension(&self) -> &'static str {
        match self {
            AudioCodec::Mp3 => "mp3",
            AudioCodec::Opus => "opus",
        }
    }

    pub fn content_type(&self) -> &'static str {
        match self {
            AudioCodec::Mp3 => "audio/mpeg",
            AudioCodec::Opus => "audio/ogg",
        }
    }
}

impl std::fmt::Display for AudioCodec {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AudioCodec::Mp3 => write!(f, "mp3"),
            AudioCodec::Opus => write!(f, "opus"),
        }
    }
}

impl std::str::FromStr for AudioCodec {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "mp3" => Ok(AudioCodec::Mp3),
            "opus" => Ok(AudioCodec::Opus),
            _ => Err(format!("Unknown codec: {}. Use 'mp3' or 'opus'", s)),
        }
    }
}

fn format_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"^(mp3|opus)_([0-9]+)$").expect("valid regex"))
}

/// One requested output rendition, parsed from a `codec_bitrate` string.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct EncodingFormat {
    pub codec: AudioCodec,
    pub bitrate_kbps: u32,
}

impl EncodingFormat {
    /// Label used as the key in `episode.encoded_audio_urls`, e.g. `mp3_128kbps`.
    pub fn rendition_label(&self) -> String {
        format!("{}_{}kbps", self.codec, self.bitrate_kbps)
    }
}

impl std::fmt::Display for EncodingFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}_{}", self.codec, self.bitrate_kbps)
    }
}

impl std::str::FromStr for EncodingFormat {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        let caps = format_pattern()
            .captures(s)
            .ok_or_else(|| format!("Invalid encoding format: '{}'. Expected e.g. 'mp3_128'", s))?;
        let codec: AudioCodec = caps[1].parse()?;
        let bitrate_kbps: u32 = caps[2]
            .parse()
            .map_err(|_| format!("Invalid bitrate in '{}'", s))?;
        if bitrate_kbps == 0 {
            return Err(format!("Bitrate must be positive in '{}'", s));
        }
        Ok(EncodingFormat { codec, bitrate_kbps })
    }
}

impl TryFrom<String> for EncodingFormat {
    type Error = String;

    fn try_from(s: String) -> std::result::Result<Self, Self::Error> {
        s.parse()
    }
}

impl From<EncodingFormat> for String {
    fn from(f: EncodingFormat) -> Self {
        f.to_string()
    }
}

/// Speech-to-text engine selection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum SttModel {
    /// Plain-text backend; returns a transcript with no word timings.
    #[default]
    Whisper,
    /// Structured backend with word timings, paragraphs, and speakers.
    Nova3,
}

impl SttModel {
    /// The structured backend produces word timings and rich metadata.
    pub fn is_structured(&self) -> bool {
        matches!(self, SttModel::Nova3)
    }

    /// Model identifier sent to the speech engine.
    pub fn model_id(&self) -> &'static str {
        match self {
            SttModel::Whisper => "@cf/openai/whisper",
            SttModel::Nova3 => "@cf/deepgram/nova-3",
        }
    }
}

impl std::fmt::Display for SttModel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SttModel::Whisper => write!(f, "whisper"),
            SttModel::Nova3 => write!(f, "nova-3"),
        }
    }
}

impl std::str::FromStr for SttModel {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "whisper" | "@cf/openai/whisper" => Ok(SttModel::Whisper),
            "nova-3" | "nova3" | "@cf/deepgram/nova-3" => Ok(SttModel::Nova3),
            _ => Err(format!("Unknown STT model: '{}'", s)),
        }
    }
}

/// Tunables for the retry/backoff driver. Never hard-coded at call sites.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct RetrySettings {
    /// Maximum wall-clock time one retried operation may consume, in seconds.
    pub budget_secs: u64,
    /// First backoff delay, in seconds.
    pub base_delay_secs: u64,
    /// Backoff ceiling, in seconds.
    pub max_delay_secs: u64,
}

impl Default for RetrySettings {
    fn default() -> Self {
        Self {
            budget_secs: 3600,
            base_delay_secs: 10,
            max_delay_secs: 300,
        }
    }
}

impl RetrySettings {
    pub fn budget(&self) -> Duration {
        Duration::from_secs(self.budget_secs)
    }

    pub fn base_delay(&self) -> Duration {
        Duration::from_secs(self.base_delay_secs)
    }

    pub fn max_delay(&self) -> Duration {
        Duration::from_secs(self.max_delay_secs)
    }
}

fn policy(retries: u32, delay_secs: u64, exponential: bool, timeout_secs: u64) -> StepPolicy {
    StepPolicy {
        retries,
        delay: Duration::from_secs(delay_secs),
        exponential,
        timeout: Duration::from_secs(timeout_secs),
    }
}

/// Per-step kernel policies, defaulting to the pipeline's standard schedule.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StepSchedule {
    pub initialize: StepPolicy,
    pub encode_for_processing: StepPolicy,
    pub prepare_and_chunk: StepPolicy,
    pub transcribe: StepPolicy,
    pub enhance: StepPolicy,
    pub final_encode: StepPolicy,
    pub update_episode: StepPolicy,
    pub cleanup: StepPolicy,
    pub finalize: StepPolicy,
}

impl Default for StepSchedule {
    fn default() -> Self {
        Self {
            initialize: policy(0, 0, false, 30),
            encode_for_processing: policy(2, 5, false, 600),
            prepare_and_chunk: policy(3, 10, true, 720),
            transcribe: policy(2, 10, true, 1200),
            enhance: policy(2, 10, true, 600),
            final_encode: policy(3, 10, true, 900),
            update_episode: policy(2, 5, false, 300),
            cleanup: policy(1, 2, false, 60),
            finalize: policy(2, 2, false, 300),
        }
    }
}

/// Configuration for one pipeline run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineConfig {
    /// Nominal chunk length submitted to the speech engine, in seconds.
    pub chunk_duration_secs: u32,
    /// Overlap carried into the next chunk, in seconds.
    pub overlap_duration_secs: u32,
    /// Requested output renditions.
    pub encoding_formats: Vec<EncodingFormat>,
    /// Speech-to-text engine.
    pub stt_model: SttModel,
    /// Source language hint for the speech engine.
    pub stt_language: Option<String>,
    /// Force the structured chunking profile (600s chunks, 30s overlap).
    pub use_structured_stt_features: bool,
    /// Codec for the intermediate chunk objects.
    pub chunk_codec: AudioCodec,
    /// Run the enhancement step when an LLM is configured.
    pub enhance: bool,
    #[serde(default)]
    pub retry: RetrySettings,
    #[serde(default)]
    pub schedule: StepSchedule,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            chunk_duration_secs: 60,
            overlap_duration_secs: 2,
            encoding_formats: vec![EncodingFormat {
                codec: AudioCodec::Mp3,
                bitrate_kbps: 128,
            }],
            stt_model: SttModel::default(),
            stt_language: None,
            use_structured_stt_features: false,
            chunk_codec: AudioCodec::Opus,
            enhance: true,
            retry: RetrySettings::default(),
            schedule: StepSchedule::default(),
        }
    }
}

impl PipelineConfig {
    /// Resolve the chunking profile once, at initialization time.
    ///
    /// The structured profile is forced to 600s/30s; downstream steps read
    /// the resolved values and never re-derive them.
    pub fn effective(&self) -> Self {
        let mut resolved = self.clone();
        if self.use_structured_stt_features {
            resolved.chunk_duration_secs = 600;
            resolved.overlap_duration_secs = 30;
        }
        resolved
    }

    pub fn validate(&self) -> Result<()> {
        if self.chunk_duration_secs == 0 {
            return Err(PipelineError::Config(
                "chunk_duration_secs must be greater than 0".to_string(),
            ));
        }
        if self.overlap_duration_secs >= self.chunk_duration_secs {
            return Err(PipelineError::Config(format!(
                "overlap_duration_secs ({}) must be less than chunk_duration_secs ({})",
                self.overlap_duration_secs, self.chunk_duration_secs
            )));
        }
        if self.encoding_formats.is_empty() {
            return Err(PipelineError::Config(
                "At least one encoding format is required".to_string(),
            ));
        }
        if self.use_structured_stt_features && !self.stt_model.is_structured() {
            return Err(PipelineError::Config(format!(
                "Structured STT features require a structured model, got '{}'",
                self.stt_model
            )));
        }
        Ok(())
    }

    pub fn chunk_duration(&self) -> Duration {
        Duration::from_secs(u64::from(self.chunk_duration_secs))
    }

    pub fn overlap_duration(&self) -> Duration {
        Duration::from_secs(u64::from(self.overlap_duration_secs))
    }
}

/// Object-store endpoint and signing credentials.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// Public endpoint presigned URLs are rooted at, e.g. `https://media.example.com`.
    pub endpoint: Option<String>,
    pub access_key_id: Option<String>,
    pub secret_access_key: Option<String>,
    /// Presigned-URL lifetime, in seconds.
    pub presign_ttl_secs: u64,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            endpoint: None,
            access_key_id: None,
            secret_access_key: None,
            presign_ttl_secs: 3600,
        }
    }
}

/// Endpoints and credentials for the external collaborators.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ServiceConfig {
    /// Base URL of the FFmpeg transcoder worker.
    pub transcoder_url: Option<String>,
    /// Base URL of the speech-to-text engine.
    pub stt_url: Option<String>,
    pub stt_token: Option<String>,
    /// Base URL of the enhancement LLM; enhancement is skipped when unset.
    pub llm_url: Option<String>,
    pub llm_token: Option<String>,
    pub llm_model: Option<String>,
    pub storage: StorageConfig,
}

impl ServiceConfig {
    pub fn load() -> Result<Self> {
        let mut config = Self::default();

        // Load from config file if it exists
        if let Some(config_path) = Self::config_file_path() {
            if config_path.exists() {
                let contents = std::fs::read_to_string(&config_path)?;
                config = toml::from_str(&contents)
                    .map_err(|e| PipelineError::Config(format!("Bad config file: {e}")))?;
            }
        }

        // Override with environment variables
        if let Ok(url) = std::env::var("PODPIPE_TRANSCODER_URL") {
            config.transcoder_url = Some(url);
        }
        if let Ok(url) = std::env::var("PODPIPE_STT_URL") {
            config.stt_url = Some(url);
        }
        if let Ok(token) = std::env::var("PODPIPE_STT_TOKEN") {
            config.stt_token = Some(token);
        }
        if let Ok(url) = std::env::var("PODPIPE_LLM_URL") {
            config.llm_url = Some(url);
        }
        if let Ok(token) = std::env::var("PODPIPE_LLM_TOKEN") {
            config.llm_token = Some(token);
        }
        if let Ok(model) = std::env::var("PODPIPE_LLM_MODEL") {
            config.llm_model = Some(model);
        }
        if let Ok(endpoint) = std::env::var("PODPIPE_STORAGE_ENDPOINT") {
            config.storage.endpoint = Some(endpoint);
        }
        if let Ok(key) = std::env::var("PODPIPE_ACCESS_KEY_ID") {
            config.storage.access_key_id = Some(key);
        }
        if let Ok(secret) = std::env::var("PODPIPE_SECRET_ACCESS_KEY") {
            config.storage.secret_access_key = Some(secret);
        }

        Ok(config)
    }

    pub fn require_transcoder_url(&self) -> Result<&str> {
        self.transcoder_url.as_deref().ok_or_else(|| {
            PipelineError::Config(
                "Transcoder URL not set. Set PODPIPE_TRANSCODER_URL.".to_string(),
            )
        })
    }

    pub fn require_stt(&self) -> Result<(&str, &str)> {
        let url = self.stt_url.as_deref().ok_or_else(|| {
            PipelineError::Config("STT URL not set. Set PODPIPE_STT_URL.".to_string())
        })?;
        let token = self.stt_token.as_deref().ok_or_else(|| {
            PipelineError::Config("STT token not set. Set PODPIPE_STT_TOKEN.".to_string())
        })?;
        Ok((url, token))
    }

    fn config_file_path() -> Option<PathBuf> {
        dirs::config_dir().map(|p| p.join("podpipe").join("config.toml"))
    }
}
