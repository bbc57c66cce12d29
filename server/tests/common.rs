//! Common utilities for integration tests

use std::sync::atomic::AtomicU64;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use axum::Router;

use server::config::ServerConfig;
use server::store::{
    AudioStore, MemoryAudioStore, MemoryRecordStore, SceneAudioRecord, SceneAudioRecords,
};
use server::AppState;
use speech_core::{
    AudioChunk, AudioChunkStream, AudioFormat, PcmSpec, SpeechProvider, StreamMetadata,
    SynthError, SynthesizedAudio, Voice, VoiceSettings, VoiceSettingsCache,
};
use story_core::{SceneTextSource, StoryError};

pub const TEST_PCM_SPEC: PcmSpec = PcmSpec {
    sample_rate: 22050,
    channels: 1,
    bits_per_sample: 16,
};

pub const WHOLE_FILE_BYTES: usize = 256;
pub const WHOLE_FILE_DURATION: f32 = 4.25;

/// How a scripted provider behaves on the streaming path.
#[derive(Clone)]
pub enum StreamScript {
    Unsupported,
    Chunks(Vec<Vec<u8>>),
    /// Yield this many chunks of the payload list, then fail.
    FailAfter(usize, Vec<Vec<u8>>),
}

pub struct ScriptedProvider {
    script: StreamScript,
}

impl ScriptedProvider {
    pub fn new(script: StreamScript) -> Self {
        Self { script }
    }

    fn chunk(index: usize, payload: Vec<u8>, is_last: bool) -> AudioChunk {
        AudioChunk {
            index: index as u64,
            payload,
            is_last,
            format: AudioFormat::Pcm16,
        }
    }

    fn metadata(total_chunks: Option<u64>) -> StreamMetadata {
        StreamMetadata {
            estimated_duration_seconds: 3.0,
            audio_format: AudioFormat::Pcm16,
            total_chunks,
            provider_id: "scripted".into(),
            pcm_spec: Some(TEST_PCM_SPEC),
        }
    }
}

#[async_trait]
impl SpeechProvider for ScriptedProvider {
    fn id(&self) -> &str {
        "scripted"
    }

    fn supports_streaming(&self) -> bool {
        !matches!(self.script, StreamScript::Unsupported)
    }

    async fn generate(
        &self,
        _text: &str,
        _voice: &Voice,
    ) -> Result<SynthesizedAudio, SynthError> {
        Ok(SynthesizedAudio {
            bytes: vec![7u8; WHOLE_FILE_BYTES],
            duration_seconds: WHOLE_FILE_DURATION,
            format: AudioFormat::Pcm16,
        })
    }

    async fn generate_stream(
        &self,
        _text: &str,
        _voice: &Voice,
    ) -> Result<(StreamMetadata, AudioChunkStream), SynthError> {
        match &self.script {
            StreamScript::Unsupported => Err(SynthError::UnsupportedStreaming),
            StreamScript::Chunks(payloads) => {
                let last = payloads.len().saturating_sub(1);
                let items: Vec<Result<AudioChunk, SynthError>> = payloads
                    .iter()
                    .enumerate()
                    .map(|(i, p)| Ok(Self::chunk(i, p.clone(), i == last)))
                    .collect();
                Ok((
                    Self::metadata(Some(payloads.len() as u64)),
                    Box::pin(futures_util::stream::iter(items)),
                ))
            }
            StreamScript::FailAfter(count, payloads) => {
                let mut items: Vec<Result<AudioChunk, SynthError>> = payloads
                    .iter()
                    .take(*count)
                    .enumerate()
                    .map(|(i, p)| Ok(Self::chunk(i, p.clone(), false)))
                    .collect();
                items.push(Err(SynthError::Upstream(
                    "synthetic mid-stream failure".into(),
                )));
                Ok((
                    Self::metadata(None),
                    Box::pin(futures_util::stream::iter(items)),
                ))
            }
        }
    }
}

/// In-memory text source: story `s1` has scenes 1..=5.
pub struct StaticScenes;

#[async_trait]
impl SceneTextSource for StaticScenes {
    async fn scene_text(
        &self,
        story_id: &str,
        scene_number: u32,
    ) -> Result<Option<String>, StoryError> {
        if story_id == "s1" && (1..=5).contains(&scene_number) {
            Ok(Some(format!(
                "Scene {scene_number}: the lighthouse keeper counted the waves."
            )))
        } else {
            Ok(None)
        }
    }
}

pub struct TestHarness {
    pub app: Router,
    pub records: Arc<MemoryRecordStore>,
    pub store: Arc<MemoryAudioStore>,
}

/// Build the real application router around scripted collaborators.
pub fn create_test_harness(provider: ScriptedProvider) -> TestHarness {
    let store = Arc::new(MemoryAudioStore::new("http://blobs.test"));
    let records = Arc::new(MemoryRecordStore::new());

    let settings = VoiceSettingsCache::new(
        VoiceSettings {
            provider_id: "scripted".into(),
            voice: Voice {
                id: "aria".into(),
                name: "Aria".into(),
            },
        },
        8,
        Duration::from_secs(3600),
    );

    let config = ServerConfig {
        stream_channel_capacity: 4,
        ..ServerConfig::default()
    };

    let state = AppState {
        provider: Arc::new(provider),
        scenes: Arc::new(StaticScenes),
        store: store.clone() as Arc<dyn AudioStore>,
        records: records.clone() as Arc<dyn SceneAudioRecords>,
        settings: Arc::new(settings),
        request_count: Arc::new(AtomicU64::new(0)),
        config,
    };

    TestHarness {
        app: server::app(state),
        records,
        store,
    }
}

/// Persistence is detached from the response path, so tests poll for it.
pub async fn wait_for_record(
    records: &MemoryRecordStore,
    story_id: &str,
    scene_number: u32,
) -> Option<SceneAudioRecord> {
    for _ in 0..200 {
        if let Some(record) = records.get(story_id, scene_number).await.unwrap() {
            return Some(record);
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    None
}
