//! Generation orchestrator.
//!
//! Streaming is attempted first; the orchestrator absorbs every streaming
//! failure by retrying through whole-file generation, so a caller sees an
//! error only when both paths fail. The streaming-unsupported sentinel is
//! distinguished from other failures only for logging; both fall back.

use std::pin::Pin;

use async_trait::async_trait;
use futures_core::Stream;
use futures_util::StreamExt;
use thiserror::Error;
use tracing::{debug, info, warn};

use speech_core::{AudioChunk, AudioFormat, StreamMetadata};

use crate::consumer::{BufferedFallback, StreamConsumer};
use crate::sink::MediaSink;

#[derive(Debug, Error)]
pub enum BackendError {
    #[error("streaming is not supported for this request")]
    StreamingUnsupported,

    #[error("generation failed: {0}")]
    Failed(String),
}

impl BackendError {
    pub fn is_streaming_unsupported(&self) -> bool {
        matches!(self, BackendError::StreamingUnsupported)
    }
}

pub type BackendChunkStream = Pin<Box<dyn Stream<Item = Result<AudioChunk, BackendError>> + Send>>;

/// Whole-file generation result, the fallback side of the backend.
#[derive(Debug, Clone)]
pub struct GeneratedAudio {
    pub bytes: Vec<u8>,
    pub duration_seconds: f32,
    pub audio_format: AudioFormat,
    pub provider_id: String,
}

/// The two generation paths a scene can be served through.
#[async_trait]
pub trait GenerationBackend: Send + Sync {
    async fn generate(
        &self,
        story_id: &str,
        scene_number: u32,
    ) -> Result<GeneratedAudio, BackendError>;

    async fn generate_stream(
        &self,
        story_id: &str,
        scene_number: u32,
    ) -> Result<(StreamMetadata, BackendChunkStream), BackendError>;
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Progress {
    Indeterminate,
    Ratio(f32),
}

/// Result shape shared by both paths; callers cannot tell which one served
/// the request.
#[derive(Debug, Clone, PartialEq)]
pub struct NarrationResult {
    pub duration_seconds: f32,
    pub provider_id: String,
    pub audio_format: AudioFormat,
}

/// How the audio reached the caller.
#[derive(Debug)]
pub enum PlaybackDelivery {
    /// Chunks were appended to the media sink as they arrived.
    Incremental,
    /// The complete audio, to be decoded as one unit.
    WholeBuffer(Vec<u8>),
}

#[derive(Debug)]
pub struct NarrationOutcome {
    pub result: NarrationResult,
    pub delivery: PlaybackDelivery,
}

#[derive(Debug, Error)]
pub enum OrchestratorError {
    #[error("narration failed on both paths: streaming: {streaming}; fallback: {fallback}")]
    BothPathsFailed {
        streaming: String,
        fallback: BackendError,
    },
}

type ProgressFn = Box<dyn Fn(Progress) + Send + Sync>;

pub struct Orchestrator<B: GenerationBackend> {
    backend: B,
    on_progress: Option<ProgressFn>,
}

impl<B: GenerationBackend> Orchestrator<B> {
    pub fn new(backend: B) -> Self {
        Self {
            backend,
            on_progress: None,
        }
    }

    pub fn with_progress(mut self, f: impl Fn(Progress) + Send + Sync + 'static) -> Self {
        self.on_progress = Some(Box::new(f));
        self
    }

    fn report(&self, progress: Progress) {
        if let Some(f) = &self.on_progress {
            f(progress);
        }
    }

    fn chunk_progress(received: u64, total: Option<u64>) -> Progress {
        match total {
            Some(total) if total > 0 => Progress::Ratio(received as f32 / total as f32),
            _ => Progress::Indeterminate,
        }
    }

    /// Narrate one scene: stream if possible, fall back to whole-file
    /// generation otherwise. Errors surface only when both paths fail.
    pub async fn narrate<S: MediaSink>(
        &self,
        story_id: &str,
        scene_number: u32,
        consumer: &mut StreamConsumer<S>,
    ) -> Result<NarrationOutcome, OrchestratorError> {
        let streaming_cause = match self
            .try_streaming(story_id, scene_number, consumer)
            .await
        {
            Ok(outcome) => return Ok(outcome),
            Err(cause) => cause,
        };

        if streaming_cause.silent {
            debug!(story_id, scene_number, "streaming unsupported, falling back");
        } else {
            warn!(
                story_id,
                scene_number,
                cause = %streaming_cause.message,
                "streaming failed, falling back to whole-file generation"
            );
        }
        // A partial stream may have left the consumer mid-session.
        consumer.reset().await;
        self.report(Progress::Indeterminate);

        match self.backend.generate(story_id, scene_number).await {
            Ok(audio) => {
                info!(story_id, scene_number, "scene narrated via fallback path");
                Ok(NarrationOutcome {
                    result: NarrationResult {
                        duration_seconds: audio.duration_seconds,
                        provider_id: audio.provider_id,
                        audio_format: audio.audio_format,
                    },
                    delivery: PlaybackDelivery::WholeBuffer(audio.bytes),
                })
            }
            Err(fallback) => Err(OrchestratorError::BothPathsFailed {
                streaming: streaming_cause.message,
                fallback,
            }),
        }
    }

    async fn try_streaming<S: MediaSink>(
        &self,
        story_id: &str,
        scene_number: u32,
        consumer: &mut StreamConsumer<S>,
    ) -> Result<NarrationOutcome, StreamingCause> {
        let (metadata, mut chunks) = self
            .backend
            .generate_stream(story_id, scene_number)
            .await
            .map_err(StreamingCause::from_backend)?;

        let total = metadata.total_chunks;
        self.report(Self::chunk_progress(0, total));

        // A sink without incremental support for this mime type is not a
        // failure: keep the stream, buffer it, decode once at the end.
        let incremental = match consumer
            .initialize(metadata.audio_format.mime_type())
            .await
        {
            Ok(()) => true,
            Err(e) if e.is_unsupported_format() => {
                debug!(
                    mime_type = metadata.audio_format.mime_type(),
                    "no incremental sink support, buffering whole stream"
                );
                false
            }
            Err(e) => return Err(StreamingCause::failure(e.to_string())),
        };

        let mut buffered = BufferedFallback::new();
        let mut received: u64 = 0;
        while let Some(item) = chunks.next().await {
            let chunk = item.map_err(|e| StreamingCause::failure(e.to_string()))?;
            received += 1;
            self.report(Self::chunk_progress(received, total));
            if incremental {
                consumer
                    .add_chunk(chunk.payload)
                    .await
                    .map_err(|e| StreamingCause::failure(e.to_string()))?;
            } else {
                buffered.add_chunk(chunk.payload);
            }
            if chunk.is_last {
                break;
            }
        }

        let result = NarrationResult {
            duration_seconds: metadata.estimated_duration_seconds,
            provider_id: metadata.provider_id,
            audio_format: metadata.audio_format,
        };

        if incremental {
            consumer
                .finalize()
                .await
                .map_err(|e| StreamingCause::failure(e.to_string()))?;
            info!(story_id, scene_number, "scene narrated via streaming path");
            Ok(NarrationOutcome {
                result,
                delivery: PlaybackDelivery::Incremental,
            })
        } else {
            info!(
                story_id,
                scene_number, "scene narrated via buffered stream (non-incremental sink)"
            );
            Ok(NarrationOutcome {
                result,
                delivery: PlaybackDelivery::WholeBuffer(buffered.finish()),
            })
        }
    }
}

/// Why the streaming path did not produce a result.
struct StreamingCause {
    message: String,
    /// Unsupported-streaming is the expected sentinel, logged quietly.
    silent: bool,
}

impl StreamingCause {
    fn from_backend(e: BackendError) -> Self {
        Self {
            silent: e.is_streaming_unsupported(),
            message: e.to_string(),
        }
    }

    fn failure(message: String) -> Self {
        Self {
            message,
            silent: false,
        }
    }
}
