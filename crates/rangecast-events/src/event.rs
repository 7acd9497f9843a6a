#![forbid(unsafe_code)]

/// Snapshot carried by every chunk delivery notification.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Progress {
    /// Chunks appended to the sink so far.
    pub loaded_count: usize,
    pub total_chunks: usize,
    /// Highest chunk index appended so far.
    pub current_chunk: usize,
    pub is_buffering: bool,
}

/// Events emitted by a streaming session.
#[derive(Debug, Clone, PartialEq)]
pub enum StreamEvent {
    /// Content length probed and sink opened.
    Opened {
        content_length: u64,
        total_chunks: usize,
    },
    /// A chunk was appended to the sink.
    ChunkLoaded(Progress),
    /// A chunk fetch or delivery failed terminally for this scheduling pass.
    ChunkFailed { index: usize, error: String },
    /// A seek invalidated in-flight fetches and re-seeded from `target`.
    SeekReseeded { target: usize, cancelled: Vec<usize> },
    BufferingStarted,
    PlaybackResumed,
    /// End-of-stream was signalled to the sink.
    EndOfStream,
    Disposed,
}

impl From<Progress> for StreamEvent {
    fn from(progress: Progress) -> Self {
        Self::ChunkLoaded(progress)
    }
}
