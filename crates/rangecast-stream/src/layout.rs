#![forbid(unsafe_code)]

use std::{ops::Range, time::Duration};

/// Position of a chunk within the content, `0..total_chunks`.
pub type ChunkIndex = usize;

/// Partition of a probed content length into fixed-size chunks.
///
/// Built once from a successful probe; immutable afterwards.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChunkLayout {
    content_length: u64,
    chunk_size: u64,
    total_chunks: usize,
}

impl ChunkLayout {
    /// `chunk_size` must be non-zero (enforced by `StreamConfig::validate`).
    #[must_use]
    pub fn new(content_length: u64, chunk_size: u64) -> Self {
        let chunk_size = chunk_size.max(1);
        let total = content_length.div_ceil(chunk_size);
        Self {
            content_length,
            chunk_size,
            total_chunks: usize::try_from(total).unwrap_or(usize::MAX),
        }
    }

    pub fn content_length(&self) -> u64 {
        self.content_length
    }

    pub fn chunk_size(&self) -> u64 {
        self.chunk_size
    }

    pub fn total_chunks(&self) -> usize {
        self.total_chunks
    }

    /// Half-open byte range of chunk `index`; `None` past the last chunk.
    ///
    /// The last chunk is truncated to the content length.
    pub fn byte_range(&self, index: ChunkIndex) -> Option<Range<u64>> {
        if index >= self.total_chunks {
            return None;
        }
        let start = (index as u64).saturating_mul(self.chunk_size);
        let end = start.saturating_add(self.chunk_size).min(self.content_length);
        Some(start..end)
    }

    /// Estimated chunk for playback position `position` of a `duration`-long asset.
    ///
    /// Assumes constant bitrate: `floor(position / duration * total_chunks)`,
    /// clamped to the last chunk. Returns `None` for empty content or an
    /// unknown (zero) duration.
    pub fn seek_target(&self, position: Duration, duration: Duration) -> Option<ChunkIndex> {
        if self.total_chunks == 0 || duration.is_zero() {
            return None;
        }
        let ratio = position.as_secs_f64() / duration.as_secs_f64();
        let estimated = (ratio * self.total_chunks as f64).floor();
        let last = self.total_chunks - 1;
        if estimated >= last as f64 {
            return Some(last);
        }
        Some(estimated.max(0.0) as ChunkIndex)
    }
}
