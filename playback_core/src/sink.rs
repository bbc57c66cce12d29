use async_trait::async_trait;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum PlaybackError {
    #[error("no incremental buffering support for mime type {0}")]
    UnsupportedFormat(String),

    #[error("media sink failed: {0}")]
    Sink(String),

    #[error("consumer is not initialized")]
    NotInitialized,

    #[error("stream failed: {0}")]
    Stream(String),
}

impl PlaybackError {
    pub fn is_unsupported_format(&self) -> bool {
        matches!(self, PlaybackError::UnsupportedFormat(_))
    }
}

/// The platform's incremental media-buffering primitive.
///
/// `append` hands the sink exactly one chunk and resolves only once the sink
/// has fully integrated it, returning the playback seconds that chunk added.
/// Implementations may assume appends never overlap; [`super::StreamConsumer`]
/// guarantees it and a sink is free to fail hard if the guarantee is broken.
#[async_trait]
pub trait MediaSink: Send + 'static {
    fn supports(&self, mime_type: &str) -> bool;

    /// Open the sink for a stream of the given mime type. Must fail with
    /// [`PlaybackError::UnsupportedFormat`] when `supports` is false.
    fn open(&mut self, mime_type: &str) -> Result<(), PlaybackError>;

    async fn append(&mut self, chunk: Vec<u8>) -> Result<f32, PlaybackError>;

    fn play(&mut self) -> Result<(), PlaybackError>;

    /// Signal that no further chunks will arrive.
    async fn end_of_stream(&mut self) -> Result<(), PlaybackError>;

    /// Release the sink and revoke any associated handle. Must be safe to
    /// call in any state, including before `open`.
    fn teardown(&mut self);
}
