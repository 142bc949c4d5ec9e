//! The ordered pipeline for one episode.
//!
//! Nine durable steps, each persisted by the step kernel so a restarted run
//! resumes where it left off:
//!
//! 1. `initialize`: resolve config, create the task, build the workflow state
//! 2. `encode-for-processing`: low-bitrate mono copy for chunking and STT
//! 3. `prepare-and-chunk`: plan chunk slots, have the transcoder upload them
//! 4. `transcribe`: fan out chunk transcriptions, tolerate partial failure
//! 5. `enhance`: optional metadata pass, never fails the run
//! 6. `final-encode`: all renditions concurrently, all must succeed
//! 7. `update-episode`: rendition keys and keywords onto the episode
//! 8. `cleanup`: delete intermediate objects
//! 9. `finalize`: plain transcript object, episode transcript key, task done
//!
//! Failure at any step marks the task `failed` with a structured result and
//! re-raises so the host records the run as failed.

use crate::chunking::{self, PlannedChunk};
use crate::config::{AudioCodec, EncodingFormat, PipelineConfig};
use crate::enhance::{EnhancedTranscript, Enhancer};
use crate::error::{PipelineError, Result};
use crate::keys;
use crate::progress::ProgressReporter;
use crate::signing::{SignOp, UrlSigner};
use crate::store::{EpisodePatch, EpisodeStore, ObjectStore, StatusUpdate, TaskStatus, TaskStore};
use crate::stt::{SpeechToText, SttOptions, SttResult};
use crate::transcoder::{ChunkRequest, ChunkUpload, EncodeRequest, Transcoder};
use crate::transcript::{merge_chunks, TranscribedChunk};
use crate::workflow::{StepKernel, StepLog};
use chrono::{DateTime, Utc};
use futures::stream::{FuturesUnordered, StreamExt};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::Semaphore;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Chunk transcriptions in flight at once.
const CHUNK_CONCURRENCY: usize = 3;

/// Bitrate of the processing copy, kbps.
const PROCESSING_BITRATE: u32 = 24;
/// Sample rate of the processing copy, Hz.
const PROCESSING_SAMPLE_RATE: u32 = 16_000;

/// The episode being processed; immutable for the duration of one run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EpisodeRef {
    pub episode_id: Uuid,
    /// May carry an `r2://` prefix; stripped at initialization.
    pub input_audio_key: String,
}

/// Persisted output of `initialize`; read-only once written.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowState {
    pub workflow_id: Uuid,
    pub episode: EpisodeRef,
    /// Resolved config: the structured profile is already applied.
    pub config: PipelineConfig,
    pub started_at: DateTime<Utc>,
    pub task_id: Uuid,
    /// Transient preview of the input; only the key is authoritative.
    pub preview_url: String,
}

/// Output of `encode-for-processing`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EncodedAudio {
    pub key: String,
    pub duration_secs: f64,
    /// Transient view; regenerated from `key` whenever needed.
    pub presigned_url: String,
}

/// Output of `transcribe`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TranscriptionOutcome {
    /// Successful chunk transcriptions, sorted by index.
    pub chunks: Vec<TranscribedChunk>,
    pub planned_chunks: usize,
    pub failed_chunks: usize,
    /// Raw per-chunk dump in the object store.
    pub dump_key: String,
}

/// Output of `enhance`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EnhanceOutcome {
    pub enhanced: Option<EnhancedTranscript>,
    pub artifact_key: Option<String>,
}

/// One produced rendition.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EncodingRendition {
    pub codec: AudioCodec,
    pub bitrate_kbps: u32,
    pub key: String,
    pub size_bytes: u64,
    pub duration_secs: f64,
}

/// Output of `update-episode`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EpisodeUpdateSummary {
    pub encoded_audio_urls: BTreeMap<String, String>,
    pub keywords: Vec<String>,
}

/// Output of `cleanup`.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct CleanupReport {
    pub deleted: usize,
}

/// Output of `finalize` and of the whole run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunSummary {
    pub workflow_id: Uuid,
    pub episode_id: Uuid,
    pub task_id: Uuid,
    pub transcript_key: String,
    pub total_words: usize,
    pub total_chunks: usize,
    pub renditions: usize,
    pub enhanced: bool,
}

/// The pipeline driver and its collaborators.
pub struct Pipeline {
    objects: Arc<dyn ObjectStore>,
    tasks: Arc<dyn TaskStore>,
    episodes: Arc<dyn EpisodeStore>,
    transcoder: Arc<dyn Transcoder>,
    stt: Arc<dyn SpeechToText>,
    enhancer: Enhancer,
    signer: UrlSigner,
    step_log: Arc<dyn StepLog>,
    config: PipelineConfig,
    cancelled: Arc<AtomicBool>,
}

impl Pipeline {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        objects: Arc<dyn ObjectStore>,
        tasks: Arc<dyn TaskStore>,
        episodes: Arc<dyn EpisodeStore>,
        transcoder: Arc<dyn Transcoder>,
        stt: Arc<dyn SpeechToText>,
        enhancer: Enhancer,
        signer: UrlSigner,
        step_log: Arc<dyn StepLog>,
        config: PipelineConfig,
    ) -> Self {
        Self {
            objects,
            tasks,
            episodes,
            transcoder,
            stt,
            enhancer,
            signer,
            step_log,
            config,
            cancelled: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Observe an external cancellation flag at suspension points.
    pub fn with_cancellation(mut self, cancelled: Arc<AtomicBool>) -> Self {
        self.cancelled = cancelled;
        self
    }

    /// Run (or resume) the pipeline for one episode.
    ///
    /// `task_override` attaches the run to an existing task instead of
    /// creating one.
    pub async fn run(
        &self,
        episode: EpisodeRef,
        workflow_id: Uuid,
        task_override: Option<Uuid>,
    ) -> Result<RunSummary> {
        let kernel = StepKernel::new(workflow_id, self.step_log.clone());
        let mut active_task = task_override;

        match self.run_steps(&kernel, episode, &mut active_task).await {
            Ok(summary) => {
                info!(
                    workflow = %summary.workflow_id,
                    words = summary.total_words,
                    renditions = summary.renditions,
                    "pipeline run complete"
                );
                Ok(summary)
            }
            Err(error) => {
                self.record_failure(active_task, &error).await;
                Err(error)
            }
        }
    }

    async fn run_steps(
        &self,
        kernel: &StepKernel,
        episode: EpisodeRef,
        active_task: &mut Option<Uuid>,
    ) -> Result<RunSummary> {
        let workflow_id = kernel.workflow_id();
        let schedule = self.config.schedule.clone();
        let task_override = *active_task;

        // ── 1. initialize ────────────────────────────────────────────────
        let state: WorkflowState = kernel
            .run("initialize", &schedule.initialize, || {
                let episode = episode.clone();
                async move {
                    self.config.validate()?;
                    let input_audio_key = keys::strip_scheme(&episode.input_audio_key).to_string();
                    let task_id = match task_override {
                        Some(id) => id,
                        None => {
                            self.tasks
                                .create(
                                    "process-episode",
                                    serde_json::json!({
                                        "episodeId": episode.episode_id,
                                        "workflowId": workflow_id,
                                        "inputAudioKey": input_audio_key.clone(),
                                    }),
                                    None,
                                )
                                .await?
                        }
                    };
                    let preview_url = self.signer.presign(SignOp::Get, &input_audio_key, None)?;
                    Ok(WorkflowState {
                        workflow_id,
                        episode: EpisodeRef {
                            episode_id: episode.episode_id,
                            input_audio_key,
                        },
                        config: self.config.effective(),
                        started_at: Utc::now(),
                        task_id,
                        preview_url,
                    })
                }
            })
            .await?;

        let config = state.config.clone();
        let episode_id = state.episode.episode_id;

        // A fully finalized workflow replays without touching task state.
        let task_id = if kernel.is_completed("finalize").await.unwrap_or(false) {
            state.task_id
        } else {
            self.processing_task(&state, task_override).await
        };
        *active_task = Some(task_id);
        let reporter = ProgressReporter::new(self.tasks.clone(), task_id);
        reporter.step("initialize", 5, Some("pipeline started")).await;
        self.check_cancelled()?;

        // ── 2. encode-for-processing ─────────────────────────────────────
        reporter
            .step("encode-for-processing", 10, Some("encoding processing copy"))
            .await;
        // Key allocated once per invocation so kernel retries reuse it; a
        // replayed step returns its persisted key instead.
        let fresh_processing_key = keys::processing_copy(episode_id);
        let encoded: EncodedAudio = kernel
            .run("encode-for-processing", &schedule.encode_for_processing, || {
                let input_key = state.episode.input_audio_key.clone();
                let key = fresh_processing_key.clone();
                async move {
                    let request = EncodeRequest {
                        audio_url: self.signer.presign(SignOp::Get, &input_key, None)?,
                        upload_url: self.signer.presign(
                            SignOp::Put,
                            &key,
                            Some(AudioCodec::Opus.content_type()),
                        )?,
                        output_format: AudioCodec::Opus,
                        bitrate: PROCESSING_BITRATE,
                        channels: Some(1),
                        sample_rate: Some(PROCESSING_SAMPLE_RATE),
                    };
                    let output = self.transcoder.encode(&request).await?;
                    let presigned_url = self.signer.presign(SignOp::Get, &key, None)?;
                    Ok(EncodedAudio {
                        key,
                        duration_secs: output.duration_secs,
                        presigned_url,
                    })
                }
            })
            .await?;
        self.check_cancelled()?;

        // ── 3. prepare-and-chunk ─────────────────────────────────────────
        reporter
            .step("prepare-and-chunk", 25, Some("splitting audio into chunks"))
            .await;
        let fresh_plan: Vec<PlannedChunk> = chunking::plan_chunks(
            encoded.duration_secs,
            config.chunk_duration_secs,
            config.overlap_duration_secs,
        )
        .iter()
        .map(|slot| PlannedChunk {
            index: slot.index,
            key: keys::chunk(episode_id, config.chunk_codec),
            start_secs: slot.start_secs,
            end_secs: slot.end_secs,
        })
        .collect();
        let plan: Vec<PlannedChunk> = kernel
            .run("prepare-and-chunk", &schedule.prepare_and_chunk, || {
                let encoded = encoded.clone();
                let config = config.clone();
                let planned = fresh_plan.clone();
                async move {
                    if planned.is_empty() {
                        return Err(PipelineError::Encoding(
                            "source audio has no duration".to_string(),
                        ));
                    }

                    let chunk_upload_urls = planned
                        .iter()
                        .map(|chunk| {
                            Ok(ChunkUpload {
                                index: chunk.index,
                                r2_key: chunk.key.clone(),
                                upload_url: self.signer.presign(
                                    SignOp::Put,
                                    &chunk.key,
                                    Some(config.chunk_codec.content_type()),
                                )?,
                            })
                        })
                        .collect::<Result<Vec<_>>>()?;

                    let request = ChunkRequest {
                        audio_url: self.signer.presign(SignOp::Get, &encoded.key, None)?,
                        chunk_upload_urls,
                        chunk_duration: config.chunk_duration_secs,
                        overlap_duration: config.overlap_duration_secs,
                        duration: encoded.duration_secs,
                        output_format: Some(config.chunk_codec),
                        bitrate: None,
                    };
                    let pieces = self.transcoder.chunk(&request).await?;

                    for chunk in &planned {
                        if !pieces.iter().any(|p| p.index == chunk.index) {
                            return Err(PipelineError::Encoding(format!(
                                "transcoder did not return chunk {}",
                                chunk.index
                            )));
                        }
                    }
                    debug!(chunks = planned.len(), "chunk plan uploaded");
                    Ok(planned)
                }
            })
            .await?;
        self.check_cancelled()?;

        // ── 4. transcribe ────────────────────────────────────────────────
        reporter
            .step("transcribe", 30, Some("transcribing chunks"))
            .await;
        let outcome: TranscriptionOutcome = kernel
            .run("transcribe", &schedule.transcribe, || {
                let plan = plan.clone();
                let config = config.clone();
                let reporter = &reporter;
                async move {
                    self.transcribe_chunks(workflow_id, episode_id, &plan, &config, reporter)
                        .await
                }
            })
            .await?;
        self.check_cancelled()?;

        // ── 5. enhance ───────────────────────────────────────────────────
        reporter.step("enhance", 75, Some("enhancing transcript")).await;
        let fresh_enhanced_key = keys::enhanced_transcript(episode_id);
        let enhanced: EnhanceOutcome = kernel
            .run("enhance", &schedule.enhance, || {
                let outcome = outcome.clone();
                let config = config.clone();
                let duration = encoded.duration_secs;
                let artifact_key = fresh_enhanced_key.clone();
                async move {
                    if !config.enhance {
                        return Ok(EnhanceOutcome::default());
                    }
                    let bundle = merge_chunks(&outcome.chunks, config.overlap_duration_secs);
                    let Some(enhanced) = self
                        .enhancer
                        .enhance(&bundle, &outcome.chunks, duration)
                        .await
                    else {
                        return Ok(EnhanceOutcome::default());
                    };
                    if enhanced.is_empty() {
                        return Ok(EnhanceOutcome::default());
                    }

                    let bytes = serde_json::to_vec_pretty(&enhanced)?;
                    // Enhancement never fails the run, artifact write included.
                    let artifact_key = match self
                        .objects
                        .put(&artifact_key, bytes, Some("application/json"))
                        .await
                    {
                        Ok(()) => Some(artifact_key),
                        Err(e) => {
                            warn!("enhanced transcript write failed: {e}");
                            None
                        }
                    };
                    Ok(EnhanceOutcome {
                        enhanced: Some(enhanced),
                        artifact_key,
                    })
                }
            })
            .await?;
        self.check_cancelled()?;

        // ── 6. final-encode ──────────────────────────────────────────────
        reporter
            .step("final-encode", 80, Some("encoding renditions"))
            .await;
        let renditions: Vec<EncodingRendition> = kernel
            .run("final-encode", &schedule.final_encode, || {
                let formats = config.encoding_formats.clone();
                let input_key = state.episode.input_audio_key.clone();
                async move {
                    let mut encodes = FuturesUnordered::new();
                    for format in formats {
                        let input_key = input_key.clone();
                        encodes.push(async move {
                            let key = keys::rendition(episode_id, &format);
                            let request = EncodeRequest {
                                audio_url: self.signer.presign(SignOp::Get, &input_key, None)?,
                                upload_url: self.signer.presign(
                                    SignOp::Put,
                                    &key,
                                    Some(format.codec.content_type()),
                                )?,
                                output_format: format.codec,
                                bitrate: format.bitrate_kbps,
                                channels: None,
                                sample_rate: None,
                            };
                            let output = self.transcoder.encode(&request).await?;
                            Ok::<_, PipelineError>(EncodingRendition {
                                codec: format.codec,
                                bitrate_kbps: format.bitrate_kbps,
                                key,
                                size_bytes: output.size_bytes,
                                duration_secs: output.duration_secs,
                            })
                        });
                    }

                    // All renditions must succeed.
                    let mut renditions = Vec::new();
                    while let Some(result) = encodes.next().await {
                        renditions.push(result?);
                    }
                    renditions.sort_by(|a, b| a.key.cmp(&b.key));
                    Ok(renditions)
                }
            })
            .await?;
        self.check_cancelled()?;

        // ── 7. update-episode ────────────────────────────────────────────
        reporter
            .step("update-episode", 90, Some("updating episode record"))
            .await;
        let _update: EpisodeUpdateSummary = kernel
            .run("update-episode", &schedule.update_episode, || {
                let renditions = renditions.clone();
                let enhanced = enhanced.clone();
                async move {
                    let encoded_audio_urls: BTreeMap<String, String> = renditions
                        .iter()
                        .map(|r| {
                            let format = EncodingFormat {
                                codec: r.codec,
                                bitrate_kbps: r.bitrate_kbps,
                            };
                            (format.rendition_label(), r.key.clone())
                        })
                        .collect();
                    let keywords = enhanced
                        .enhanced
                        .as_ref()
                        .map(|e| e.keywords.clone())
                        .filter(|k| !k.is_empty());

                    self.episodes
                        .update(
                            episode_id,
                            EpisodePatch {
                                transcript_url: None,
                                encoded_audio_urls: Some(encoded_audio_urls.clone()),
                                keywords: keywords.clone(),
                            },
                        )
                        .await?;
                    Ok(EpisodeUpdateSummary {
                        encoded_audio_urls,
                        keywords: keywords.unwrap_or_default(),
                    })
                }
            })
            .await?;
        self.check_cancelled()?;

        // ── 8. cleanup ───────────────────────────────────────────────────
        reporter
            .step("cleanup", 95, Some("deleting intermediate objects"))
            .await;
        let _cleanup: CleanupReport = kernel
            .run("cleanup", &schedule.cleanup, || {
                let mut keys: Vec<String> = vec![encoded.key.clone()];
                keys.extend(plan.iter().map(|c| c.key.clone()));
                async move {
                    let mut deleted = 0usize;
                    for key in &keys {
                        match self.objects.delete(key).await {
                            Ok(()) => deleted += 1,
                            Err(e) => warn!(key = %key, "intermediate delete failed: {e}"),
                        }
                    }
                    debug!(deleted, "intermediate objects removed");
                    Ok(CleanupReport { deleted })
                }
            })
            .await?;

        // ── 9. finalize ──────────────────────────────────────────────────
        let fresh_transcript_key = keys::transcript(episode_id);
        let summary: RunSummary = kernel
            .run("finalize", &schedule.finalize, || {
                let outcome = outcome.clone();
                let enhanced = enhanced.clone();
                let renditions_count = renditions.len();
                let config = config.clone();
                let transcript_key = fresh_transcript_key.clone();
                async move {
                    let bundle = merge_chunks(&outcome.chunks, config.overlap_duration_secs);
                    self.objects
                        .put(
                            &transcript_key,
                            bundle.text.clone().into_bytes(),
                            Some("text/plain"),
                        )
                        .await?;
                    self.episodes
                        .update(
                            episode_id,
                            EpisodePatch {
                                transcript_url: Some(transcript_key.clone()),
                                ..Default::default()
                            },
                        )
                        .await?;

                    let completed_at = Utc::now();
                    let mut result = serde_json::json!({
                        "success": true,
                        "episodeId": episode_id,
                        "workflowId": workflow_id,
                        "completedAt": completed_at.to_rfc3339(),
                        "encoding": { "formats": renditions_count },
                        "processing": {
                            "totalWords": bundle.total_words,
                            "totalChunks": outcome.chunks.len(),
                            "textLength": bundle.text.len(),
                        },
                    });
                    if let Some(e) = &enhanced.enhanced {
                        result["enhanced"] = serde_json::json!({
                            "keywords": e.keywords.len(),
                            "chapters": e.chapters.len(),
                            "summary": e.summary.is_some(),
                            "transcriptKey": enhanced.artifact_key.clone(),
                        });
                    }

                    self.tasks
                        .update_status(
                            task_id,
                            TaskStatus::Done,
                            StatusUpdate {
                                message: Some("processing complete".to_string()),
                                result: Some(result),
                                step: Some("finalize".to_string()),
                            },
                        )
                        .await?;

                    Ok(RunSummary {
                        workflow_id,
                        episode_id,
                        task_id,
                        transcript_key,
                        total_words: bundle.total_words,
                        total_chunks: outcome.chunks.len(),
                        renditions: renditions_count,
                        enhanced: enhanced.enhanced.is_some(),
                    })
                }
            })
            .await?;

        Ok(summary)
    }

    /// Fan out chunk transcriptions with bounded concurrency.
    ///
    /// Per-chunk failures are recorded; the step succeeds while at least one
    /// chunk comes back.
    async fn transcribe_chunks(
        &self,
        workflow_id: Uuid,
        episode_id: Uuid,
        plan: &[PlannedChunk],
        config: &PipelineConfig,
        reporter: &ProgressReporter,
    ) -> Result<TranscriptionOutcome> {
        let total = plan.len();
        let semaphore = Arc::new(Semaphore::new(CHUNK_CONCURRENCY));
        let options = SttOptions {
            language: config.stt_language.clone(),
        };
        let chunk_duration = f64::from(config.chunk_duration_secs);

        let mut transcriptions = FuturesUnordered::new();
        for chunk in plan.iter().cloned() {
            let semaphore = semaphore.clone();
            let options = options.clone();
            let stt = self.stt.clone();
            let objects = self.objects.clone();
            let cancelled = self.cancelled.clone();
            transcriptions.push(async move {
                let _permit = semaphore.acquire().await.expect("semaphore closed");
                if cancelled.load(Ordering::Relaxed) {
                    return (chunk, Err(PipelineError::Cancelled));
                }
                let result = async {
                    let audio = objects.get(&chunk.key).await?;
                    stt.transcribe(audio, &options).await
                }
                .await;
                (chunk, result)
            });
        }

        let mut chunks: Vec<TranscribedChunk> = Vec::with_capacity(total);
        let mut failures: Vec<String> = Vec::new();
        let mut done = 0usize;

        while let Some((chunk, result)) = transcriptions.next().await {
            done += 1;
            let percent = 30 + (45 * done / total.max(1)) as u8;
            match result {
                Ok(stt_result) => {
                    chunks.push(to_transcribed_chunk(stt_result, &chunk, chunk_duration));
                    let message = format!("transcribed chunk {}/{}", done, total);
                    reporter.step("transcribe", percent, Some(message.as_str())).await;
                }
                Err(e) => {
                    warn!(index = chunk.index, "chunk transcription failed: {e}");
                    failures.push(format!("chunk {}: {e}", chunk.index));
                }
            }
        }

        if chunks.is_empty() {
            return Err(PipelineError::AllChunksFailed {
                total,
                detail: failures.join("; "),
            });
        }
        chunks.sort_by_key(|c| c.index);

        let dump_key = keys::chunk_transcriptions(episode_id, workflow_id);
        self.objects
            .put(
                &dump_key,
                serde_json::to_vec_pretty(&chunks)?,
                Some("application/json"),
            )
            .await?;

        info!(
            succeeded = chunks.len(),
            failed = failures.len(),
            "chunk transcription complete"
        );
        Ok(TranscriptionOutcome {
            planned_chunks: total,
            failed_chunks: failures.len(),
            chunks,
            dump_key,
        })
    }

    /// Move the task to `processing`, falling back to a replacement task
    /// when the persisted one is already terminal (a resumed run after a
    /// recorded failure).
    async fn processing_task(&self, state: &WorkflowState, task_override: Option<Uuid>) -> Uuid {
        let update = || StatusUpdate {
            message: Some("processing started".to_string()),
            result: None,
            step: Some("initialize".to_string()),
        };
        let task_id = task_override.unwrap_or(state.task_id);
        match self
            .tasks
            .update_status(task_id, TaskStatus::Processing, update())
            .await
        {
            Ok(()) => task_id,
            Err(e) => {
                warn!("task {task_id} cannot enter processing: {e}; creating a replacement");
                match self
                    .tasks
                    .create(
                        "process-episode",
                        serde_json::json!({
                            "episodeId": state.episode.episode_id,
                            "workflowId": state.workflow_id,
                            "resumedFrom": task_id,
                        }),
                        None,
                    )
                    .await
                {
                    Ok(replacement) => {
                        if let Err(e) = self
                            .tasks
                            .update_status(replacement, TaskStatus::Processing, update())
                            .await
                        {
                            warn!("replacement task {replacement} write failed: {e}");
                        }
                        replacement
                    }
                    Err(e) => {
                        warn!("replacement task creation failed: {e}");
                        task_id
                    }
                }
            }
        }
    }

    /// Mark the task failed with the structured failure result.
    async fn record_failure(&self, task_id: Option<Uuid>, error: &PipelineError) {
        let Some(task_id) = task_id else {
            warn!("run failed before a task existed: {error}");
            return;
        };
        let step = error.step_name().unwrap_or("initialize").to_string();
        let root = error.root_cause();
        let result = serde_json::json!({
            "status": "failed",
            "error": format!("Failed at step {step}: {root}"),
            "step": step.clone(),
            "timestamp": Utc::now().to_rfc3339(),
            "originalError": root.to_string(),
        });
        let update = StatusUpdate {
            message: Some(format!("Failed at step {step}")),
            result: Some(result),
            step: Some(step),
        };
        if let Err(e) = self
            .tasks
            .update_status(task_id, TaskStatus::Failed, update)
            .await
        {
            warn!("failure write for task {task_id} failed: {e}");
        }
    }

    fn check_cancelled(&self) -> Result<()> {
        if self.cancelled.load(Ordering::Relaxed) {
            return Err(PipelineError::Cancelled);
        }
        Ok(())
    }
}

/// Offset an engine result to absolute source time for one chunk slot.
fn to_transcribed_chunk(
    result: SttResult,
    chunk: &PlannedChunk,
    chunk_duration_secs: f64,
) -> TranscribedChunk {
    let start_secs = chunk.index as f64 * chunk_duration_secs;
    let words = result
        .words
        .into_iter()
        .map(|w| crate::transcript::WordTiming {
            word: w.word,
            start: w.start + start_secs,
            end: w.end + start_secs,
        })
        .collect();
    let metadata = result.metadata.map(|mut m| {
        for p in &mut m.paragraphs {
            p.start += start_secs;
            p.end += start_secs;
        }
        m
    });
    TranscribedChunk {
        index: chunk.index,
        start_secs,
        end_secs: chunk.end_secs,
        text: result.text,
        words,
        metadata,
    }
}
