use serde::{Deserialize, Serialize};

/// Encoded audio container/codec carried by a stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AudioFormat {
    Wav,
    Mp3,
    Pcm16,
}

impl AudioFormat {
    pub fn mime_type(&self) -> &'static str {
        match self {
            AudioFormat::Wav => "audio/wav",
            AudioFormat::Mp3 => "audio/mpeg",
            AudioFormat::Pcm16 => "audio/pcm",
        }
    }
}

/// Raw PCM layout, needed to derive durations for headerless formats.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PcmSpec {
    pub sample_rate: u32,
    pub channels: u16,
    pub bits_per_sample: u16,
}

impl PcmSpec {
    pub fn bytes_per_second(&self) -> u32 {
        self.sample_rate * self.channels as u32 * (self.bits_per_sample as u32 / 8)
    }

    /// Playback duration of `byte_len` bytes of PCM in this layout.
    pub fn duration_of(&self, byte_len: usize) -> f32 {
        let rate = self.bytes_per_second();
        if rate == 0 {
            return 0.0;
        }
        byte_len as f32 / rate as f32
    }
}

/// A bounded fragment of encoded audio plus its sequence index.
///
/// Produced once by the adapter, consumed once by the relay (forward +
/// accumulate) and once by the client queue, then discarded.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AudioChunk {
    pub index: u64,
    pub payload: Vec<u8>,
    pub is_last: bool,
    pub format: AudioFormat,
}

/// Emitted exactly once, before any [`AudioChunk`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StreamMetadata {
    pub estimated_duration_seconds: f32,
    pub audio_format: AudioFormat,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub total_chunks: Option<u64>,
    pub provider_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pcm_spec: Option<PcmSpec>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pcm_duration() {
        let spec = PcmSpec {
            sample_rate: 22050,
            channels: 1,
            bits_per_sample: 16,
        };
        assert_eq!(spec.bytes_per_second(), 44100);
        let secs = spec.duration_of(44100);
        assert!((secs - 1.0).abs() < f32::EPSILON);
    }

    #[test]
    fn metadata_serializes_camel_case() {
        let meta = StreamMetadata {
            estimated_duration_seconds: 3.5,
            audio_format: AudioFormat::Wav,
            total_chunks: Some(7),
            provider_id: "narrator-v1".into(),
            pcm_spec: None,
        };
        let json = serde_json::to_value(&meta).unwrap();
        assert_eq!(json["estimatedDurationSeconds"], 3.5);
        assert_eq!(json["audioFormat"], "wav");
        assert_eq!(json["totalChunks"], 7);
        assert!(json.get("pcmSpec").is_none());
    }
}
