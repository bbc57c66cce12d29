pub mod chunk;
pub mod chunker;
pub mod error;
pub mod provider;
pub mod providers;
pub mod settings;
pub mod wav;
pub mod wire;

pub use chunk::{AudioChunk, AudioFormat, PcmSpec, StreamMetadata};
pub use chunker::ChunkFramer;
pub use error::SynthError;
pub use provider::{AudioChunkStream, SpeechProvider, SynthesizedAudio, Voice};
pub use settings::{VoiceSettings, VoiceSettingsCache};
pub use wire::WireFrame;
