//! Stream relay: provider chunks out to the wire, full audio into the store.
//!
//! Each chunk is forwarded to the transport the moment the adapter produces
//! it and appended to an in-memory accumulator in the same breath — two
//! consumers of one producer, never reordered relative to each other. Once
//! the stream completes the transport closes and a detached task persists
//! the accumulated audio off the response path. A stream that fails or loses
//! its client mid-flight persists nothing: the record is only ever written
//! for a complete, uncorrupted stream.

use std::sync::atomic::Ordering;
use std::sync::Arc;

use axum::{
    body::Body,
    extract::{Path, State},
    http::header,
    response::Response,
};
use chrono::Utc;
use futures_util::StreamExt;
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tracing::{debug, error, info, warn};

use speech_core::{wav, AudioChunkStream, AudioFormat, StreamMetadata, SynthError, VoiceSettings, WireFrame};

use crate::error::ApiError;
use crate::store::{AudioStore, SceneAudioRecord, SceneAudioRecords};
use crate::validation::{validate_scene_request, validate_scene_text};
use crate::AppState;

/// Everything the relay needs once the response has been handed back.
struct RelayContext {
    story_id: String,
    scene_number: u32,
    metadata: StreamMetadata,
    settings: VoiceSettings,
    store: Arc<dyn AudioStore>,
    records: Arc<dyn SceneAudioRecords>,
}

pub async fn stream_scene_audio(
    State(state): State<AppState>,
    Path((story_id, scene_number)): Path<(String, u32)>,
) -> Result<Response, ApiError> {
    state.request_count.fetch_add(1, Ordering::Relaxed);
    validate_scene_request(&story_id, scene_number)?;

    let text = state
        .scenes
        .scene_text(&story_id, scene_number)
        .await
        .map_err(|e| ApiError::InternalError(format!("story service: {e}")))?
        .ok_or_else(|| {
            ApiError::NotFound(format!("no scene {scene_number} in story {story_id}"))
        })?;
    validate_scene_text(&text)?;

    let settings = state.settings.for_story(&story_id).await;
    let (metadata, chunks) = match state
        .provider
        .generate_stream(&text, &settings.voice)
        .await
    {
        Ok(stream) => stream,
        Err(SynthError::UnsupportedStreaming) => return Err(ApiError::StreamingUnsupported),
        Err(e) => return Err(ApiError::Synthesis(e.to_string())),
    };

    info!(
        story_id,
        scene_number,
        provider = %metadata.provider_id,
        "streaming scene narration"
    );

    let ctx = RelayContext {
        story_id,
        scene_number,
        metadata: metadata.clone(),
        settings,
        store: state.store.clone(),
        records: state.records.clone(),
    };

    let (tx, rx) = mpsc::channel::<Result<String, std::convert::Infallible>>(
        state.config.stream_channel_capacity,
    );
    tokio::spawn(run_relay(tx, metadata, chunks, ctx));

    let response = Response::builder()
        .header(header::CONTENT_TYPE, "application/x-ndjson")
        .body(Body::from_stream(ReceiverStream::new(rx)))
        .map_err(|e| ApiError::InternalError(format!("response build: {e}")))?;
    Ok(response)
}

/// Forward frames to the transport while accumulating the full audio.
///
/// A failed send means the client went away; that is benign here — the relay
/// drops the partial accumulator and returns without touching the store.
async fn run_relay(
    tx: mpsc::Sender<Result<String, std::convert::Infallible>>,
    metadata: StreamMetadata,
    mut chunks: AudioChunkStream,
    ctx: RelayContext,
) {
    if tx
        .send(Ok(WireFrame::metadata(metadata).to_line()))
        .await
        .is_err()
    {
        debug!("client disconnected before metadata, nothing persisted");
        return;
    }

    let mut accumulated: Vec<u8> = Vec::new();
    while let Some(item) = chunks.next().await {
        match item {
            Ok(chunk) => {
                let line = WireFrame::audio(&chunk).to_line();
                if tx.send(Ok(line)).await.is_err() {
                    debug!(
                        story_id = %ctx.story_id,
                        scene_number = ctx.scene_number,
                        "client disconnected mid-stream, discarding partial audio"
                    );
                    return;
                }
                accumulated.extend_from_slice(&chunk.payload);
                if chunk.is_last {
                    break;
                }
            }
            Err(e) => {
                warn!(
                    story_id = %ctx.story_id,
                    scene_number = ctx.scene_number,
                    "provider stream failed mid-flight: {e}"
                );
                let _ = tx.send(Ok(WireFrame::error(e.to_string()).to_line())).await;
                return;
            }
        }
    }

    // Close the transport before persistence so client latency never waits
    // on the store.
    drop(tx);

    if accumulated.is_empty() {
        warn!(
            story_id = %ctx.story_id,
            scene_number = ctx.scene_number,
            "stream produced no audio, nothing to persist"
        );
        return;
    }

    // Detached: the record write happens outside the request's cancellation
    // scope, with its own error boundary.
    tokio::spawn(persist_scene_audio(ctx, accumulated));
}

async fn persist_scene_audio(ctx: RelayContext, bytes: Vec<u8>) {
    let file_size_bytes = bytes.len() as u64;
    let duration_seconds = reconstructed_duration(&ctx.metadata, &bytes);

    let location = match ctx.store.upload(bytes).await {
        Ok(location) => location,
        Err(e) => {
            // Playback already succeeded; the scene simply regenerates on the
            // next request since no record was saved.
            error!(
                story_id = %ctx.story_id,
                scene_number = ctx.scene_number,
                "audio upload failed after stream completion: {e}"
            );
            return;
        }
    };

    let record = SceneAudioRecord {
        story_id: ctx.story_id.clone(),
        scene_number: ctx.scene_number,
        audio_location: location,
        file_size_bytes,
        duration_seconds,
        provider_id: ctx.metadata.provider_id.clone(),
        voice_id: ctx.settings.voice.id.clone(),
        voice_name: ctx.settings.voice.name.clone(),
        generated_at: Utc::now(),
    };

    match ctx.records.upsert(record).await {
        Ok(()) => info!(
            story_id = %ctx.story_id,
            scene_number = ctx.scene_number,
            file_size_bytes,
            "scene audio persisted"
        ),
        Err(e) => error!(
            story_id = %ctx.story_id,
            scene_number = ctx.scene_number,
            "scene audio record upsert failed: {e}"
        ),
    }
}

/// Best duration available for the reconstituted audio: exact from the bytes
/// where the format allows, the provider's estimate otherwise.
fn reconstructed_duration(metadata: &StreamMetadata, bytes: &[u8]) -> f32 {
    if metadata.audio_format == AudioFormat::Wav {
        if let Ok(secs) = wav::wav_duration_seconds(bytes) {
            return secs;
        }
    }
    if let Some(spec) = metadata.pcm_spec {
        return spec.duration_of(bytes.len());
    }
    metadata.estimated_duration_seconds
}
