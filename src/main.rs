use anyhow::{Context, Result};
use async_trait::async_trait;
use clap::Parser;
use indicatif::{ProgressBar, ProgressStyle};
use podpipe::config::{EncodingFormat, PipelineConfig, ServiceConfig, SttModel};
use podpipe::enhance::{Enhancer, HttpLlmClient};
use podpipe::pipeline::{EpisodeRef, Pipeline, RunSummary};
use podpipe::signing::UrlSigner;
use podpipe::store::{
    FsObjectStore, JsonEpisodeStore, JsonTaskStore, StatusUpdate, Task, TaskStatus, TaskStore,
};
use podpipe::stt;
use podpipe::transcoder::HttpTranscoderClient;
use podpipe::workflow::JsonStepLog;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{error, info, Level};
use tracing_subscriber::FmtSubscriber;
use uuid::Uuid;

#[derive(Parser)]
#[command(name = "podpipe")]
#[command(version, about = "Durable podcast audio-processing pipeline")]
#[command(
    long_about = "Process one podcast episode: encode renditions, transcribe in \
                  parallel chunks, merge the transcript, and update the episode record."
)]
struct Cli {
    /// Episode identifier
    episode_id: Uuid,

    /// Object-store key of the source audio (an r2:// prefix is accepted)
    #[arg(short, long)]
    input_key: String,

    /// Output renditions, e.g. mp3_128,opus_64
    #[arg(short, long, default_value = "mp3_128", value_delimiter = ',')]
    formats: Vec<EncodingFormat>,

    /// Speech-to-text model: whisper, nova-3
    #[arg(long, default_value = "whisper")]
    stt_model: SttModel,

    /// Source language hint (ISO 639-1)
    #[arg(long)]
    language: Option<String>,

    /// Use the structured STT profile (forces 600s chunks, 30s overlap)
    #[arg(long)]
    structured: bool,

    /// Chunk duration in seconds
    #[arg(long, default_value = "60")]
    chunk_duration: u32,

    /// Chunk overlap in seconds
    #[arg(long, default_value = "2")]
    overlap_duration: u32,

    /// Directory for local object/task/episode stores and step logs
    #[arg(long, default_value = ".podpipe")]
    data_dir: PathBuf,

    /// Resume an earlier run by its workflow id
    #[arg(long)]
    resume: Option<Uuid>,

    /// Skip the enhancement step
    #[arg(long)]
    no_enhance: bool,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,

    /// Suppress the progress bar
    #[arg(short, long)]
    quiet: bool,
}

fn init_logging(verbose: bool) {
    let level = if verbose { Level::DEBUG } else { Level::INFO };

    FmtSubscriber::builder()
        .with_max_level(level)
        .with_target(false)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false)
        .compact()
        .init();
}

/// Task-store decorator that mirrors progress updates onto a terminal bar.
struct ProgressBarTasks {
    inner: Arc<dyn TaskStore>,
    bar: ProgressBar,
}

impl ProgressBarTasks {
    fn new(inner: Arc<dyn TaskStore>, quiet: bool) -> Self {
        let bar = if quiet {
            ProgressBar::hidden()
        } else {
            let bar = ProgressBar::new(100);
            bar.set_style(
                ProgressStyle::default_bar()
                    .template("{spinner:.green} [{bar:40.cyan/blue}] {pos:>3}% {msg}")
                    .unwrap_or_else(|_| ProgressStyle::default_bar())
                    .progress_chars("#>-"),
            );
            bar
        };
        Self { inner, bar }
    }
}

#[async_trait]
impl TaskStore for ProgressBarTasks {
    async fn create(
        &self,
        kind: &str,
        payload: serde_json::Value,
        owner_id: Option<String>,
    ) -> podpipe::Result<Uuid> {
        self.inner.create(kind, payload, owner_id).await
    }

    async fn get(&self, id: Uuid) -> podpipe::Result<Task> {
        self.inner.get(id).await
    }

    async fn update_status(
        &self,
        id: Uuid,
        status: TaskStatus,
        update: StatusUpdate,
    ) -> podpipe::Result<()> {
        if let Some(message) = &update.message {
            self.bar.set_message(message.clone());
        }
        self.inner.update_status(id, status, update).await
    }

    async fn update_progress(
        &self,
        id: Uuid,
        percent: u8,
        message: Option<String>,
    ) -> podpipe::Result<()> {
        self.bar.set_position(u64::from(percent));
        if let Some(message) = &message {
            self.bar.set_message(message.clone());
        }
        self.inner.update_progress(id, percent, message).await
    }

    async fn update_step(&self, id: Uuid, step: &str, percent: Option<u8>) -> podpipe::Result<()> {
        if let Some(percent) = percent {
            self.bar.set_position(u64::from(percent));
        }
        self.inner.update_step(id, step, percent).await
    }
}

fn print_summary(summary: &RunSummary) {
    println!();
    println!("  Episode:     {}", summary.episode_id);
    println!("  Workflow:    {}", summary.workflow_id);
    println!("  Task:        {}", summary.task_id);
    println!("  Transcript:  {}", summary.transcript_key);
    println!(
        "  Words:       {} across {} chunks",
        summary.total_words, summary.total_chunks
    );
    println!("  Renditions:  {}", summary.renditions);
    if summary.enhanced {
        println!("  Enhanced:    yes");
    }
    println!();
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    init_logging(cli.verbose);

    let services = ServiceConfig::load().context("Failed to load configuration")?;
    let transcoder_url = services
        .require_transcoder_url()
        .context("Transcoder is not configured")?
        .to_string();

    let config = PipelineConfig {
        chunk_duration_secs: cli.chunk_duration,
        overlap_duration_secs: cli.overlap_duration,
        encoding_formats: cli.formats.clone(),
        stt_model: cli.stt_model,
        stt_language: cli.language.clone(),
        use_structured_stt_features: cli.structured,
        enhance: !cli.no_enhance,
        ..Default::default()
    };
    config.validate().context("Configuration validation failed")?;

    let signer =
        UrlSigner::from_config(&services.storage).context("Object storage is not configured")?;
    let stt_client = stt::create_client(config.stt_model, &services, config.retry)
        .context("Speech-to-text is not configured")?;
    let transcoder = Arc::new(HttpTranscoderClient::new(transcoder_url, config.retry));

    let llm = match (&services.llm_url, &services.llm_token, &services.llm_model) {
        (Some(url), Some(token), Some(model)) if !cli.no_enhance => Some(Arc::new(
            HttpLlmClient::new(url.clone(), token.clone(), model.clone(), config.retry),
        )
            as Arc<dyn podpipe::enhance::LlmClient>),
        _ => None,
    };

    let objects = Arc::new(FsObjectStore::new(cli.data_dir.join("objects")));
    let tasks: Arc<dyn TaskStore> = Arc::new(ProgressBarTasks::new(
        Arc::new(JsonTaskStore::new(cli.data_dir.join("tasks.json"))),
        cli.quiet,
    ));
    let episodes = Arc::new(JsonEpisodeStore::new(cli.data_dir.join("episodes.json")));
    let step_log = Arc::new(JsonStepLog::new(cli.data_dir.join("workflows")));

    let cancelled = Arc::new(AtomicBool::new(false));
    {
        let cancelled = cancelled.clone();
        ctrlc::set_handler(move || {
            eprintln!("\nCancelling at the next step boundary...");
            cancelled.store(true, Ordering::Relaxed);
        })
        .context("Failed to install Ctrl+C handler")?;
    }

    let pipeline = Pipeline::new(
        objects,
        tasks,
        episodes,
        transcoder,
        stt_client,
        Enhancer::new(llm),
        signer,
        step_log,
        config,
    )
    .with_cancellation(cancelled);

    let workflow_id = cli.resume.unwrap_or_else(Uuid::new_v4);
    let episode = EpisodeRef {
        episode_id: cli.episode_id,
        input_audio_key: cli.input_key.clone(),
    };

    info!(
        workflow = %workflow_id,
        episode = %cli.episode_id,
        resumed = cli.resume.is_some(),
        "starting pipeline"
    );

    match pipeline.run(episode, workflow_id, None).await {
        Ok(summary) => {
            if !cli.quiet {
                print_summary(&summary);
            }
            Ok(())
        }
        Err(e) => {
            error!("pipeline failed: {e}");
            eprintln!("Resume this run with: podpipe {} -i {} --resume {workflow_id}", cli.episode_id, cli.input_key);
            Err(e.into())
        }
    }
}
