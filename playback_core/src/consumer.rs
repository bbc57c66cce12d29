//! Client-side stream consumer.
//!
//! Chunks arriving off the wire are queued FIFO and drained into the media
//! sink one at a time. The `appending` flag is set before a chunk is handed
//! to the sink and cleared only when the sink reports the chunk fully
//! integrated, so two appends can never be in flight together — overlapping
//! appends corrupt sink state irrecoverably. Playback auto-starts once
//! enough audio is buffered to ride out provider jitter.

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{Mutex, Notify};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::sink::{MediaSink, PlaybackError};

/// Buffered playback seconds required before auto-start.
pub const AUTO_PLAY_THRESHOLD_SECS: f32 = 2.0;

/// Finalize runs once near stream end, so a short polling interval is fine.
const FINALIZE_POLL_INTERVAL: Duration = Duration::from_millis(25);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConsumerState {
    Idle,
    Initializing,
    Buffering,
    Ready,
    Playing,
    Ended,
    Error,
}

/// Ephemeral playback session state: created on stream start, destroyed on
/// reset or teardown.
struct Inner {
    queue: VecDeque<Vec<u8>>,
    appending: bool,
    state: ConsumerState,
    buffered_seconds: f32,
    playhead_seconds: f32,
    volume: f32,
    rate: f32,
}

impl Inner {
    fn new() -> Self {
        Self {
            queue: VecDeque::new(),
            appending: false,
            state: ConsumerState::Idle,
            buffered_seconds: 0.0,
            playhead_seconds: 0.0,
            volume: 1.0,
            rate: 1.0,
        }
    }
}

struct Shared<S> {
    // Lock order: `sink` before `inner`, never the other way around.
    sink: Mutex<S>,
    inner: Mutex<Inner>,
    notify: Notify,
}

pub struct StreamConsumer<S: MediaSink> {
    shared: Arc<Shared<S>>,
    drain: Option<JoinHandle<()>>,
}

impl<S: MediaSink> StreamConsumer<S> {
    pub fn new(sink: S) -> Self {
        Self {
            shared: Arc::new(Shared {
                sink: Mutex::new(sink),
                inner: Mutex::new(Inner::new()),
                notify: Notify::new(),
            }),
            drain: None,
        }
    }

    /// Open the sink for `mime_type` and start the drain task.
    ///
    /// Fails fast with [`PlaybackError::UnsupportedFormat`] when the platform
    /// has no incremental buffering primitive for that mime type; the
    /// orchestrator treats that as a signal to take the non-incremental path
    /// rather than as a request failure.
    pub async fn initialize(&mut self, mime_type: &str) -> Result<(), PlaybackError> {
        {
            let mut inner = self.shared.inner.lock().await;
            if inner.state != ConsumerState::Idle {
                return Err(PlaybackError::Sink(
                    "initialize called on an active session".into(),
                ));
            }
            inner.state = ConsumerState::Initializing;
        }

        let mut sink = self.shared.sink.lock().await;
        if !sink.supports(mime_type) {
            self.shared.inner.lock().await.state = ConsumerState::Idle;
            return Err(PlaybackError::UnsupportedFormat(mime_type.into()));
        }
        if let Err(e) = sink.open(mime_type) {
            let mut inner = self.shared.inner.lock().await;
            inner.state = if e.is_unsupported_format() {
                ConsumerState::Idle
            } else {
                ConsumerState::Error
            };
            return Err(e);
        }
        drop(sink);

        self.shared.inner.lock().await.state = ConsumerState::Buffering;
        let shared = self.shared.clone();
        self.drain = Some(tokio::spawn(drain_loop(shared)));
        debug!(mime_type, "stream consumer initialized");
        Ok(())
    }

    /// Queue one chunk for the sink. Returns immediately; the drain task
    /// appends it once the sink is free.
    pub async fn add_chunk(&self, bytes: Vec<u8>) -> Result<(), PlaybackError> {
        let mut inner = self.shared.inner.lock().await;
        match inner.state {
            ConsumerState::Buffering | ConsumerState::Ready | ConsumerState::Playing => {
                inner.queue.push_back(bytes);
                self.shared.notify.notify_one();
                Ok(())
            }
            ConsumerState::Idle | ConsumerState::Initializing => Err(PlaybackError::NotInitialized),
            ConsumerState::Ended => Err(PlaybackError::Sink("chunk after end of stream".into())),
            ConsumerState::Error => Err(PlaybackError::Sink("consumer is in error state".into())),
        }
    }

    /// Wait for the queue to empty and the sink to go idle, then signal
    /// end-of-stream exactly once.
    pub async fn finalize(&mut self) -> Result<(), PlaybackError> {
        loop {
            {
                let inner = self.shared.inner.lock().await;
                match inner.state {
                    ConsumerState::Ended => return Ok(()),
                    ConsumerState::Error => {
                        return Err(PlaybackError::Sink("stream failed before finalize".into()))
                    }
                    ConsumerState::Idle | ConsumerState::Initializing => {
                        return Err(PlaybackError::NotInitialized)
                    }
                    _ => {}
                }
                if inner.queue.is_empty() && !inner.appending {
                    break;
                }
            }
            tokio::time::sleep(FINALIZE_POLL_INTERVAL).await;
        }

        let mut sink = self.shared.sink.lock().await;
        let result = sink.end_of_stream().await;
        let mut inner = self.shared.inner.lock().await;
        match result {
            Ok(()) => inner.state = ConsumerState::Ended,
            Err(e) => {
                inner.state = ConsumerState::Error;
                return Err(e);
            }
        }
        drop(inner);
        drop(sink);

        // Wake the drain task so it observes Ended and exits.
        self.shared.notify.notify_one();
        if let Some(handle) = self.drain.take() {
            let _ = handle.await;
        }
        Ok(())
    }

    /// Tear everything down. Safe from any state, including mid-stream:
    /// aborts the drain task, releases the sink and its handle, clears the
    /// queue and flags.
    pub async fn reset(&mut self) {
        if let Some(handle) = self.drain.take() {
            handle.abort();
        }
        let mut sink = self.shared.sink.lock().await;
        sink.teardown();
        *self.shared.inner.lock().await = Inner::new();
        debug!("stream consumer reset");
    }

    pub async fn state(&self) -> ConsumerState {
        self.shared.inner.lock().await.state
    }

    /// Enough audio integrated for playback to run.
    pub async fn is_ready(&self) -> bool {
        matches!(
            self.shared.inner.lock().await.state,
            ConsumerState::Ready | ConsumerState::Playing
        )
    }

    pub async fn buffered_seconds(&self) -> f32 {
        self.shared.inner.lock().await.buffered_seconds
    }

    pub async fn pending_chunks(&self) -> usize {
        self.shared.inner.lock().await.queue.len()
    }

    pub async fn set_volume(&self, volume: f32) {
        self.shared.inner.lock().await.volume = volume.clamp(0.0, 1.0);
    }

    pub async fn volume(&self) -> f32 {
        self.shared.inner.lock().await.volume
    }

    pub async fn set_playback_rate(&self, rate: f32) {
        self.shared.inner.lock().await.rate = rate.clamp(0.25, 4.0);
    }

    pub async fn playback_rate(&self) -> f32 {
        self.shared.inner.lock().await.rate
    }

    /// Record the sink's reported playback position.
    pub async fn note_playhead(&self, seconds: f32) {
        self.shared.inner.lock().await.playhead_seconds = seconds.max(0.0);
    }

    pub async fn playhead_seconds(&self) -> f32 {
        self.shared.inner.lock().await.playhead_seconds
    }
}

impl<S: MediaSink> Drop for StreamConsumer<S> {
    fn drop(&mut self) {
        if let Some(handle) = self.drain.take() {
            handle.abort();
        }
    }
}

async fn drain_loop<S: MediaSink>(shared: Arc<Shared<S>>) {
    loop {
        let chunk = {
            let mut inner = shared.inner.lock().await;
            match inner.state {
                ConsumerState::Idle
                | ConsumerState::Ended
                | ConsumerState::Error => return,
                _ => {}
            }
            if inner.appending {
                None
            } else if let Some(chunk) = inner.queue.pop_front() {
                inner.appending = true;
                Some(chunk)
            } else {
                None
            }
        };

        let Some(chunk) = chunk else {
            shared.notify.notified().await;
            continue;
        };

        let mut sink = shared.sink.lock().await;
        let appended = sink.append(chunk).await;
        let mut inner = shared.inner.lock().await;
        inner.appending = false;
        match appended {
            Ok(seconds) => {
                inner.buffered_seconds += seconds;
                if inner.state == ConsumerState::Buffering
                    && inner.buffered_seconds >= AUTO_PLAY_THRESHOLD_SECS
                {
                    inner.state = ConsumerState::Ready;
                    match sink.play() {
                        Ok(()) => inner.state = ConsumerState::Playing,
                        Err(e) => {
                            warn!("auto-start failed: {e}");
                            inner.state = ConsumerState::Error;
                        }
                    }
                }
            }
            Err(e) => {
                warn!("sink rejected chunk: {e}");
                inner.state = ConsumerState::Error;
            }
        }
    }
}

/// Non-incremental fallback: buffer every chunk and decode as one unit only
/// after the stream ends. Same input ordering, higher latency, no
/// backpressure concerns.
#[derive(Default)]
pub struct BufferedFallback {
    chunks: Vec<Vec<u8>>,
}

impl BufferedFallback {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_chunk(&mut self, bytes: Vec<u8>) {
        self.chunks.push(bytes);
    }

    pub fn chunk_count(&self) -> usize {
        self.chunks.len()
    }

    /// The complete audio in arrival order, ready for one-shot decode.
    pub fn finish(self) -> Vec<u8> {
        let total = self.chunks.iter().map(Vec::len).sum();
        let mut out = Vec::with_capacity(total);
        for chunk in self.chunks {
            out.extend_from_slice(&chunk);
        }
        out
    }
}
