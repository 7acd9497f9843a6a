use std::{fmt, time::Duration};

use rangecast_events::EventBus;
use rangecast_net::{Headers, NetOptions, RetryPolicy};
use tokio_util::sync::CancellationToken;
use url::Url;

use crate::error::SessionError;

pub const DEFAULT_CHUNK_SIZE: u64 = 1_048_576;
pub const DEFAULT_BUFFER_AHEAD: usize = 3;
pub const DEFAULT_INITIAL_BUFFER_SIZE: usize = 2;

/// MIME type and codec string handed to the sink when it is opened.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FormatDescriptor(String);

impl FormatDescriptor {
    pub fn new<S: Into<String>>(mime: S) -> Self {
        Self(mime.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for FormatDescriptor {
    /// Fragmented MP4 with H.264 baseline video and AAC-LC audio.
    fn default() -> Self {
        Self::new(r#"video/mp4; codecs="avc1.42E01E, mp4a.40.2""#)
    }
}

impl fmt::Display for FormatDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Policy for a sink that reports itself busy.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SinkRetry {
    /// Fixed delay before re-offering a chunk to a busy sink.
    pub delay: Duration,
    /// Re-offers per chunk before it is abandoned for the current pass.
    pub max_retries: u32,
    /// Re-checks of a busy sink before giving up on end-of-stream.
    pub max_end_of_stream_checks: u32,
}

impl Default for SinkRetry {
    fn default() -> Self {
        Self {
            delay: Duration::from_millis(100),
            max_retries: 1,
            max_end_of_stream_checks: 50,
        }
    }
}

/// Configuration for a streaming session.
///
/// Used with `StreamSession::open(source, sink, config)`.
#[derive(Clone, Debug)]
pub struct StreamConfig {
    /// Media resource locator.
    pub src: Url,
    /// Bytes per chunk. Must be non-zero.
    pub chunk_size: u64,
    /// Chunks kept ahead of the furthest delivered chunk.
    pub buffer_ahead: usize,
    /// Chunks requested right after the sink opens.
    pub initial_buffer_size: usize,
    /// Format announced to the sink.
    pub format: FormatDescriptor,
    pub sink_retry: SinkRetry,
    /// Additional HTTP headers to include in all requests.
    pub headers: Option<Headers>,
    /// Network configuration. Defaults to no transport retries, so a failed
    /// chunk read is reported once and left to the scheduler.
    pub net: NetOptions,
    /// Parent cancellation token. Cancelling it disposes the session.
    pub cancel: Option<CancellationToken>,
    /// Event bus (optional - if not provided, one is created internally).
    pub bus: Option<EventBus>,
    /// Event bus channel capacity (used when `bus` is not provided).
    pub event_channel_capacity: usize,
    /// Capacity of the playback command channel.
    pub command_channel_capacity: usize,
}

impl StreamConfig {
    #[must_use]
    pub fn new(src: Url) -> Self {
        Self {
            src,
            chunk_size: DEFAULT_CHUNK_SIZE,
            buffer_ahead: DEFAULT_BUFFER_AHEAD,
            initial_buffer_size: DEFAULT_INITIAL_BUFFER_SIZE,
            format: FormatDescriptor::default(),
            sink_retry: SinkRetry::default(),
            headers: None,
            net: NetOptions {
                retry_policy: RetryPolicy::none(),
                ..NetOptions::default()
            },
            cancel: None,
            bus: None,
            event_channel_capacity: 32,
            command_channel_capacity: 16,
        }
    }

    #[must_use]
    pub fn with_chunk_size(mut self, chunk_size: u64) -> Self {
        self.chunk_size = chunk_size;
        self
    }

    #[must_use]
    pub fn with_buffer_ahead(mut self, buffer_ahead: usize) -> Self {
        self.buffer_ahead = buffer_ahead;
        self
    }

    #[must_use]
    pub fn with_initial_buffer_size(mut self, initial_buffer_size: usize) -> Self {
        self.initial_buffer_size = initial_buffer_size;
        self
    }

    #[must_use]
    pub fn with_format(mut self, format: FormatDescriptor) -> Self {
        self.format = format;
        self
    }

    #[must_use]
    pub fn with_sink_retry(mut self, sink_retry: SinkRetry) -> Self {
        self.sink_retry = sink_retry;
        self
    }

    /// Set additional HTTP headers for all requests.
    #[must_use]
    pub fn with_headers(mut self, headers: Headers) -> Self {
        self.headers = Some(headers);
        self
    }

    #[must_use]
    pub fn with_net(mut self, net: NetOptions) -> Self {
        self.net = net;
        self
    }

    /// Set cancellation token.
    #[must_use]
    pub fn with_cancel(mut self, cancel: CancellationToken) -> Self {
        self.cancel = Some(cancel);
        self
    }

    /// Set event bus.
    ///
    /// Subscribe before opening the session to observe `Opened`.
    #[must_use]
    pub fn with_events(mut self, bus: EventBus) -> Self {
        self.bus = Some(bus);
        self
    }

    #[must_use]
    pub fn with_event_channel_capacity(mut self, capacity: usize) -> Self {
        self.event_channel_capacity = capacity;
        self
    }

    #[must_use]
    pub fn with_command_channel_capacity(mut self, capacity: usize) -> Self {
        self.command_channel_capacity = capacity;
        self
    }

    /// Reject values that would make the scheduler inert.
    pub fn validate(&self) -> Result<(), SessionError> {
        if self.chunk_size == 0 {
            return Err(SessionError::InvalidConfig("chunk_size must be non-zero".into()));
        }
        if self.buffer_ahead == 0 {
            return Err(SessionError::InvalidConfig(
                "buffer_ahead must be non-zero".into(),
            ));
        }
        if self.initial_buffer_size == 0 {
            return Err(SessionError::InvalidConfig(
                "initial_buffer_size must be non-zero".into(),
            ));
        }
        if self.command_channel_capacity == 0 {
            return Err(SessionError::InvalidConfig(
                "command_channel_capacity must be non-zero".into(),
            ));
        }
        Ok(())
    }
}
