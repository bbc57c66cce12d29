//! HTTP implementation of [`GenerationBackend`] against the relay server.
//!
//! The streaming call reads the relay's newline-delimited JSON body; byte
//! chunks off the socket need not align with line boundaries, so lines are
//! reassembled from a carry buffer before parsing.

use async_trait::async_trait;
use futures_util::StreamExt;
use reqwest::StatusCode;
use serde::Deserialize;
use tracing::debug;

use speech_core::{AudioFormat, StreamMetadata, WireFrame};

use crate::orchestrator::{BackendChunkStream, BackendError, GeneratedAudio, GenerationBackend};

pub struct RemoteBackend {
    client: reqwest::Client,
    base_url: String,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct RetrievalResponse {
    exists: bool,
    audio_url: Option<String>,
    #[allow(dead_code)]
    file_size: Option<u64>,
    duration: Option<f32>,
    provider: Option<String>,
    #[allow(dead_code)]
    voice: Option<VoiceRef>,
}

#[derive(Deserialize)]
struct VoiceRef {
    #[allow(dead_code)]
    id: String,
    #[allow(dead_code)]
    name: String,
}

impl RemoteBackend {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: base_url.into(),
        }
    }

    fn scene_url(&self, story_id: &str, scene_number: u32) -> String {
        format!(
            "{}/stories/{}/scenes/{}/audio",
            self.base_url, story_id, scene_number
        )
    }

    fn sniff_format(bytes: &[u8]) -> AudioFormat {
        if bytes.starts_with(b"RIFF") {
            AudioFormat::Wav
        } else {
            AudioFormat::Mp3
        }
    }
}

/// Drain one complete line (including its newline) from the carry buffer.
fn take_line(carry: &mut Vec<u8>) -> Option<Vec<u8>> {
    let pos = carry.iter().position(|&b| b == b'\n')?;
    Some(carry.drain(..=pos).collect())
}

fn parse_frame(line: &[u8]) -> Result<WireFrame, BackendError> {
    let text = std::str::from_utf8(line)
        .map_err(|e| BackendError::Failed(format!("non-UTF-8 wire line: {e}")))?;
    WireFrame::parse_line(text).map_err(|e| BackendError::Failed(e.to_string()))
}

#[async_trait]
impl GenerationBackend for RemoteBackend {
    async fn generate(
        &self,
        story_id: &str,
        scene_number: u32,
    ) -> Result<GeneratedAudio, BackendError> {
        let url = format!("{}?generate=true", self.scene_url(story_id, scene_number));
        let record: RetrievalResponse = self
            .client
            .get(&url)
            .send()
            .await
            .and_then(|r| r.error_for_status())
            .map_err(|e| BackendError::Failed(e.to_string()))?
            .json()
            .await
            .map_err(|e| BackendError::Failed(e.to_string()))?;

        if !record.exists {
            return Err(BackendError::Failed(
                "server reported no audio after inline generation".into(),
            ));
        }
        let audio_url = record
            .audio_url
            .ok_or_else(|| BackendError::Failed("record is missing its audio URL".into()))?;

        let bytes = self
            .client
            .get(&audio_url)
            .send()
            .await
            .and_then(|r| r.error_for_status())
            .map_err(|e| BackendError::Failed(e.to_string()))?
            .bytes()
            .await
            .map_err(|e| BackendError::Failed(e.to_string()))?;

        Ok(GeneratedAudio {
            audio_format: Self::sniff_format(&bytes),
            bytes: bytes.to_vec(),
            duration_seconds: record.duration.unwrap_or(0.0),
            provider_id: record.provider.unwrap_or_default(),
        })
    }

    async fn generate_stream(
        &self,
        story_id: &str,
        scene_number: u32,
    ) -> Result<(StreamMetadata, BackendChunkStream), BackendError> {
        let url = format!("{}/stream", self.scene_url(story_id, scene_number));
        let response = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(|e| BackendError::Failed(e.to_string()))?;

        // The relay's specific sentinel for a provider that cannot stream.
        if response.status() == StatusCode::NOT_IMPLEMENTED {
            return Err(BackendError::StreamingUnsupported);
        }
        let response = response
            .error_for_status()
            .map_err(|e| BackendError::Failed(e.to_string()))?;

        let mut body = response.bytes_stream();
        let mut carry: Vec<u8> = Vec::new();

        // The metadata frame is always first on the wire; read it eagerly so
        // the caller has it before any chunk.
        let metadata = loop {
            if let Some(line) = take_line(&mut carry) {
                match parse_frame(&line)? {
                    WireFrame::Metadata { metadata } => break metadata,
                    WireFrame::Error { message } => return Err(BackendError::Failed(message)),
                    WireFrame::Audio { .. } => {
                        return Err(BackendError::Failed(
                            "audio frame arrived before metadata".into(),
                        ))
                    }
                }
            }
            match body.next().await {
                Some(Ok(part)) => carry.extend_from_slice(&part),
                Some(Err(e)) => return Err(BackendError::Failed(e.to_string())),
                None => {
                    return Err(BackendError::Failed(
                        "stream ended before metadata frame".into(),
                    ))
                }
            }
        };
        debug!(
            story_id,
            scene_number,
            provider = %metadata.provider_id,
            "stream metadata received"
        );

        let chunks = async_stream::try_stream! {
            loop {
                while let Some(line) = take_line(&mut carry) {
                    if line.iter().all(u8::is_ascii_whitespace) {
                        continue;
                    }
                    match parse_frame(&line)? {
                        frame @ WireFrame::Audio { .. } => {
                            let chunk = frame
                                .into_chunk()
                                .map_err(|e| BackendError::Failed(e.to_string()))?;
                            if let Some(chunk) = chunk {
                                yield chunk;
                            }
                        }
                        WireFrame::Error { message } => {
                            Err(BackendError::Failed(message))?;
                        }
                        // A repeated metadata frame is protocol noise; skip it.
                        WireFrame::Metadata { .. } => {}
                    }
                }
                match body.next().await {
                    Some(Ok(part)) => carry.extend_from_slice(&part),
                    Some(Err(e)) => Err(BackendError::Failed(e.to_string()))?,
                    None => break,
                }
            }
        };

        Ok((metadata, Box::pin(chunks)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn take_line_splits_on_newline_only() {
        let mut carry = b"{\"a\":1}\n{\"b\":".to_vec();
        assert_eq!(take_line(&mut carry).unwrap(), b"{\"a\":1}\n".to_vec());
        assert!(take_line(&mut carry).is_none());
        carry.extend_from_slice(b"2}\n");
        assert_eq!(take_line(&mut carry).unwrap(), b"{\"b\":2}\n".to_vec());
        assert!(carry.is_empty());
    }

    #[test]
    fn sniff_format_recognizes_riff() {
        assert_eq!(
            RemoteBackend::sniff_format(b"RIFF\x10\x00\x00\x00WAVE"),
            AudioFormat::Wav
        );
        assert_eq!(RemoteBackend::sniff_format(b"\xffID3"), AudioFormat::Mp3);
    }
}
