#![forbid(unsafe_code)]

//! Chunked byte-range streaming into an append-only media sink.
//!
//! A [`StreamSession`] probes the content length of a remote resource,
//! partitions it into fixed-size chunks, and keeps a window of chunks ahead
//! of playback flowing into a [`MediaSink`]. Seeks, stalls, and resumes from
//! the host player reshape the window; fetches made obsolete by a seek are
//! cancelled and their late results discarded.
//!
//! ```no_run
//! use rangecast_stream::{MemorySink, StreamConfig, StreamSession};
//! use url::Url;
//!
//! # async fn demo() -> Result<(), Box<dyn std::error::Error>> {
//! let config = StreamConfig::new(Url::parse("https://cdn.example/video.mp4")?);
//! let session = StreamSession::open_http(MemorySink::new(), config).await?;
//! let mut events = session.events();
//! while let Ok(event) = events.recv().await {
//!     println!("{event:?}");
//! }
//! # Ok(())
//! # }
//! ```

mod config;
mod error;
mod internal;
mod layout;
mod scheduler;
mod session;
mod sink;
mod source;

pub use config::{
    DEFAULT_BUFFER_AHEAD, DEFAULT_CHUNK_SIZE, DEFAULT_INITIAL_BUFFER_SIZE, FormatDescriptor,
    SinkRetry, StreamConfig,
};
pub use error::{FetchError, ProbeError, SessionError, SessionResult, SinkError};
pub use layout::{ChunkIndex, ChunkLayout};
pub use rangecast_events::{EventBus, Progress, StreamEvent};
pub use scheduler::{ChunkScheduler, Epoch, PlaybackState, SeekPlan};
pub use session::{PlaybackEvent, SessionSnapshot, StreamSession};
pub use sink::{AppendAck, MediaSink, MemorySink, Segment};
pub use source::{HttpRangeSource, RangeSource};
