pub mod consumer;
pub mod orchestrator;
pub mod remote;
pub mod sink;

pub use consumer::{BufferedFallback, ConsumerState, StreamConsumer, AUTO_PLAY_THRESHOLD_SECS};
pub use orchestrator::{
    BackendChunkStream, BackendError, GeneratedAudio, GenerationBackend, NarrationOutcome,
    NarrationResult, Orchestrator, OrchestratorError, PlaybackDelivery, Progress,
};
pub use remote::RemoteBackend;
pub use sink::{MediaSink, PlaybackError};
