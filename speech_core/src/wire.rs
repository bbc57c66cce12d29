//! Newline-delimited JSON wire protocol.
//!
//! The relay writes one frame per line: a single `metadata` frame first,
//! then `audio` frames in chunk order. A stream that dies mid-flight is
//! closed with a final `error` frame. The client parses the same frames
//! back; chunk payloads travel as base64.

use base64::{engine::general_purpose::STANDARD, Engine as _};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::chunk::{AudioChunk, AudioFormat, StreamMetadata};

#[derive(Debug, Error)]
pub enum WireError {
    #[error("malformed wire frame: {0}")]
    Malformed(#[from] serde_json::Error),

    #[error("invalid chunk payload: {0}")]
    Payload(#[from] base64::DecodeError),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum WireFrame {
    Metadata {
        metadata: StreamMetadata,
    },
    Audio {
        index: u64,
        #[serde(rename = "isLast")]
        is_last: bool,
        data: String,
        format: AudioFormat,
    },
    Error {
        message: String,
    },
}

impl WireFrame {
    pub fn metadata(metadata: StreamMetadata) -> Self {
        WireFrame::Metadata { metadata }
    }

    pub fn audio(chunk: &AudioChunk) -> Self {
        WireFrame::Audio {
            index: chunk.index,
            is_last: chunk.is_last,
            data: STANDARD.encode(&chunk.payload),
            format: chunk.format,
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        WireFrame::Error {
            message: message.into(),
        }
    }

    /// Serialize to a single newline-terminated wire line.
    pub fn to_line(&self) -> String {
        // Serialization of these frames cannot fail: no non-string map keys.
        let mut line = serde_json::to_string(self).expect("wire frame serialization");
        line.push('\n');
        line
    }

    pub fn parse_line(line: &str) -> Result<Self, WireError> {
        Ok(serde_json::from_str(line.trim_end())?)
    }

    /// Decode an `audio` frame back into its chunk; `None` for other kinds.
    pub fn into_chunk(self) -> Result<Option<AudioChunk>, WireError> {
        match self {
            WireFrame::Audio {
                index,
                is_last,
                data,
                format,
            } => Ok(Some(AudioChunk {
                index,
                payload: STANDARD.decode(data.as_bytes())?,
                is_last,
                format,
            })),
            _ => Ok(None),
        }
    }
}
