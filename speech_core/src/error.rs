use thiserror::Error;

/// Adapter-level synthesis errors.
///
/// The adapter performs no retries: provider failures surface as
/// [`SynthError::Upstream`] and `UnsupportedStreaming` tells the caller to
/// fall back to whole-file generation rather than retry the stream.
#[derive(Debug, Error)]
pub enum SynthError {
    #[error("provider does not support streaming synthesis")]
    UnsupportedStreaming,

    #[error("upstream generation failed: {0}")]
    Upstream(String),

    #[error("provider returned malformed audio: {0}")]
    BadAudio(String),
}

impl SynthError {
    pub fn is_unsupported_streaming(&self) -> bool {
        matches!(self, SynthError::UnsupportedStreaming)
    }
}
