use std::pin::Pin;

use async_trait::async_trait;
use futures_core::Stream;
use serde::{Deserialize, Serialize};

use crate::chunk::{AudioChunk, AudioFormat, StreamMetadata};
use crate::error::SynthError;

/// Ordered chunk sequence produced by a streaming synthesis call.
pub type AudioChunkStream = Pin<Box<dyn Stream<Item = Result<AudioChunk, SynthError>> + Send>>;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Voice {
    pub id: String,
    pub name: String,
}

/// Whole-file synthesis result.
#[derive(Debug, Clone)]
pub struct SynthesizedAudio {
    pub bytes: Vec<u8>,
    pub duration_seconds: f32,
    pub format: AudioFormat,
}

/// Capability interface over one speech provider, selected at construction.
///
/// `generate_stream` fails with [`SynthError::UnsupportedStreaming`] when the
/// provider cannot stream; callers fall back to `generate`, the adapter never
/// retries internally.
#[async_trait]
pub trait SpeechProvider: Send + Sync {
    fn id(&self) -> &str;

    fn supports_streaming(&self) -> bool;

    /// Synchronous whole-file contract: the complete encoded buffer plus its
    /// playback duration.
    async fn generate(&self, text: &str, voice: &Voice) -> Result<SynthesizedAudio, SynthError>;

    /// Streaming contract: metadata first, then an ordered chunk sequence
    /// ending with `is_last`.
    async fn generate_stream(
        &self,
        text: &str,
        voice: &Voice,
    ) -> Result<(StreamMetadata, AudioChunkStream), SynthError>;
}
