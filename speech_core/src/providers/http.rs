//! HTTP-backed speech provider.
//!
//! Wraps a remote synthesis API: one POST for the whole-file contract, a
//! chunked response body re-framed through [`ChunkFramer`] for the streaming
//! contract. Streaming capability is fixed at construction; a provider built
//! without it answers `generate_stream` with `UnsupportedStreaming` and
//! nothing else.

use anyhow::Context;
use async_trait::async_trait;
use futures_util::StreamExt;
use serde::Serialize;

use crate::chunk::{AudioFormat, PcmSpec, StreamMetadata};
use crate::chunker::ChunkFramer;
use crate::error::SynthError;
use crate::provider::{AudioChunkStream, SpeechProvider, SynthesizedAudio, Voice};
use crate::wav;

/// Response header carrying the provider's own duration measurement.
const DURATION_HEADER: &str = "x-audio-duration";
/// Rough narration speed used when the provider reports no duration.
const ESTIMATED_CHARS_PER_SECOND: f32 = 15.0;

#[derive(Serialize)]
struct SpeechRequest<'a> {
    input: &'a str,
    voice: &'a str,
    format: AudioFormat,
}

pub struct HttpSpeechProvider {
    client: reqwest::Client,
    base_url: String,
    api_key: String,
    provider_id: String,
    streaming: bool,
    format: AudioFormat,
    pcm_spec: Option<PcmSpec>,
    chunk_bytes: usize,
}

impl HttpSpeechProvider {
    pub fn new(
        base_url: impl Into<String>,
        api_key: impl Into<String>,
        provider_id: impl Into<String>,
        streaming: bool,
    ) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: base_url.into(),
            api_key: api_key.into(),
            provider_id: provider_id.into(),
            streaming,
            format: AudioFormat::Wav,
            pcm_spec: None,
            chunk_bytes: ChunkFramer::DEFAULT_CHUNK_BYTES,
        }
    }

    /// Read endpoint and credentials from `SPEECH_API_URL` / `SPEECH_API_KEY`.
    pub fn from_env(provider_id: impl Into<String>, streaming: bool) -> anyhow::Result<Self> {
        let base_url =
            std::env::var("SPEECH_API_URL").context("SPEECH_API_URL must be set")?;
        let api_key =
            std::env::var("SPEECH_API_KEY").context("SPEECH_API_KEY must be set")?;
        Ok(Self::new(base_url, api_key, provider_id, streaming))
    }

    pub fn with_format(mut self, format: AudioFormat, pcm_spec: Option<PcmSpec>) -> Self {
        self.format = format;
        self.pcm_spec = pcm_spec;
        self
    }

    pub fn with_chunk_bytes(mut self, chunk_bytes: usize) -> Self {
        self.chunk_bytes = chunk_bytes.max(1);
        self
    }

    fn header_duration(headers: &reqwest::header::HeaderMap) -> Option<f32> {
        headers
            .get(DURATION_HEADER)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.parse::<f32>().ok())
    }

    fn estimate_duration(&self, text: &str, headers: &reqwest::header::HeaderMap) -> f32 {
        Self::header_duration(headers)
            .unwrap_or_else(|| text.chars().count() as f32 / ESTIMATED_CHARS_PER_SECOND)
    }

    fn duration_of_buffer(
        &self,
        bytes: &[u8],
        headers: &reqwest::header::HeaderMap,
    ) -> Result<f32, SynthError> {
        if let Some(secs) = Self::header_duration(headers) {
            return Ok(secs);
        }
        match self.format {
            AudioFormat::Wav => wav::wav_duration_seconds(bytes)
                .map_err(|e| SynthError::BadAudio(e.to_string())),
            _ => self
                .pcm_spec
                .map(|spec| spec.duration_of(bytes.len()))
                .ok_or_else(|| {
                    SynthError::BadAudio("no duration header and no PCM layout to derive one".into())
                }),
        }
    }
}

#[async_trait]
impl SpeechProvider for HttpSpeechProvider {
    fn id(&self) -> &str {
        &self.provider_id
    }

    fn supports_streaming(&self) -> bool {
        self.streaming
    }

    async fn generate(&self, text: &str, voice: &Voice) -> Result<SynthesizedAudio, SynthError> {
        let url = format!("{}/v1/speech", self.base_url);
        let response = self
            .client
            .post(&url)
            .bearer_auth(&self.api_key)
            .json(&SpeechRequest {
                input: text,
                voice: &voice.id,
                format: self.format,
            })
            .send()
            .await
            .and_then(|r| r.error_for_status())
            .map_err(|e| SynthError::Upstream(e.to_string()))?;

        let headers = response.headers().clone();
        let bytes = response
            .bytes()
            .await
            .map_err(|e| SynthError::Upstream(e.to_string()))?;
        if bytes.is_empty() {
            return Err(SynthError::BadAudio("provider returned empty audio".into()));
        }

        let duration_seconds = self.duration_of_buffer(&bytes, &headers)?;
        Ok(SynthesizedAudio {
            bytes: bytes.to_vec(),
            duration_seconds,
            format: self.format,
        })
    }

    async fn generate_stream(
        &self,
        text: &str,
        voice: &Voice,
    ) -> Result<(StreamMetadata, AudioChunkStream), SynthError> {
        if !self.streaming {
            return Err(SynthError::UnsupportedStreaming);
        }

        let url = format!("{}/v1/speech/stream", self.base_url);
        let response = self
            .client
            .post(&url)
            .bearer_auth(&self.api_key)
            .json(&SpeechRequest {
                input: text,
                voice: &voice.id,
                format: self.format,
            })
            .send()
            .await
            .and_then(|r| r.error_for_status())
            .map_err(|e| SynthError::Upstream(e.to_string()))?;

        let total_chunks = response
            .content_length()
            .filter(|len| *len > 0)
            .map(|len| len.div_ceil(self.chunk_bytes as u64));
        let metadata = StreamMetadata {
            estimated_duration_seconds: self.estimate_duration(text, response.headers()),
            audio_format: self.format,
            total_chunks,
            provider_id: self.provider_id.clone(),
            pcm_spec: self.pcm_spec,
        };

        let mut framer = ChunkFramer::new(self.format, self.chunk_bytes);
        let mut body = response.bytes_stream();
        let stream = async_stream::try_stream! {
            while let Some(part) = body.next().await {
                let part = part.map_err(|e| SynthError::Upstream(e.to_string()))?;
                for chunk in framer.push(&part) {
                    yield chunk;
                }
            }
            if let Some(last) = framer.finish() {
                yield last;
            }
        };

        Ok((metadata, Box::pin(stream)))
    }
}
