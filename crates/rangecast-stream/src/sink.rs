#![forbid(unsafe_code)]

//! Append-only media sink.
//!
//! [`MediaSink`] is the consumer side of a session: it is opened once with a
//! [`FormatDescriptor`], receives [`Segment`]s, and is told when the stream
//! ends. [`MemorySink`] is an in-memory implementation backed by
//! `rangemap::RangeSet`.

use std::{
    collections::{BTreeMap, HashMap, HashSet},
    ops::Range,
    sync::Arc,
};

use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::Mutex;
use rangemap::RangeSet;

use crate::{config::FormatDescriptor, error::SinkError, layout::ChunkIndex};

/// One chunk's bytes, ready for the sink.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Segment {
    pub index: ChunkIndex,
    /// Absolute byte range within the content.
    pub range: Range<u64>,
    pub data: Bytes,
}

/// Sink response to an append.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AppendAck {
    Accepted,
    /// Sink is processing a previous append; offer the segment again later.
    Busy,
}

/// Consumer of delivered chunks.
///
/// Segments may arrive in any order. A sink only needs to tolerate
/// out-of-order appends and report which byte ranges it holds.
#[async_trait]
pub trait MediaSink: Send + 'static {
    /// Prepare the sink for `format`. Called exactly once, before any append.
    async fn open(&mut self, format: &FormatDescriptor) -> Result<(), SinkError>;

    /// Sink is still processing a previous append.
    fn is_updating(&self) -> bool;

    async fn append(&mut self, segment: Segment) -> Result<AppendAck, SinkError>;

    /// No more segments will follow.
    async fn end_of_stream(&mut self) -> Result<(), SinkError>;

    /// Byte ranges currently held, merged.
    fn buffered(&self) -> Vec<Range<u64>>;
}

#[derive(Default)]
struct MemoryInner {
    format: Option<FormatDescriptor>,
    coverage: RangeSet<u64>,
    segments: BTreeMap<u64, Bytes>,
    appended: Vec<ChunkIndex>,
    attempts: HashMap<ChunkIndex, u32>,
    busy_checks: u32,
    busy_after_append: u32,
    busy_appends: HashMap<ChunkIndex, u32>,
    rejected: HashSet<ChunkIndex>,
    end_of_stream_calls: u32,
}

/// In-memory sink. Clones share state, so a test can keep a handle while the
/// session owns another.
#[derive(Clone, Default)]
pub struct MemorySink {
    inner: Arc<Mutex<MemoryInner>>,
}

impl MemorySink {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Next `count` calls to [`MediaSink::is_updating`] report busy.
    pub fn set_busy_checks(&self, count: u32) {
        self.inner.lock().busy_checks = count;
    }

    /// After every accepted append, the next `count` calls to
    /// [`MediaSink::is_updating`] report busy.
    pub fn set_busy_after_append(&self, count: u32) {
        self.inner.lock().busy_after_append = count;
    }

    /// Next `count` appends of chunk `index` are answered with [`AppendAck::Busy`].
    pub fn set_busy_for(&self, index: ChunkIndex, count: u32) {
        self.inner.lock().busy_appends.insert(index, count);
    }

    /// Answer every append of chunk `index` with [`SinkError::AppendRejected`].
    pub fn set_reject_for(&self, index: ChunkIndex) {
        self.inner.lock().rejected.insert(index);
    }

    pub fn format(&self) -> Option<FormatDescriptor> {
        self.inner.lock().format.clone()
    }

    /// Chunk indices in the order they were accepted.
    pub fn appended(&self) -> Vec<ChunkIndex> {
        self.inner.lock().appended.clone()
    }

    /// Append calls made for `index`, accepted or not.
    pub fn attempts(&self, index: ChunkIndex) -> u32 {
        self.inner.lock().attempts.get(&index).copied().unwrap_or(0)
    }

    pub fn end_of_stream_calls(&self) -> u32 {
        self.inner.lock().end_of_stream_calls
    }

    pub fn is_ended(&self) -> bool {
        self.end_of_stream_calls() > 0
    }

    /// Concatenation of the contiguous prefix held by the sink.
    pub fn contiguous_bytes(&self) -> Vec<u8> {
        let inner = self.inner.lock();
        let mut out = Vec::new();
        let mut next = 0u64;
        for (&start, data) in &inner.segments {
            if start != next {
                break;
            }
            out.extend_from_slice(data);
            next = start + data.len() as u64;
        }
        out
    }
}

#[async_trait]
impl MediaSink for MemorySink {
    async fn open(&mut self, format: &FormatDescriptor) -> Result<(), SinkError> {
        self.inner.lock().format = Some(format.clone());
        Ok(())
    }

    fn is_updating(&self) -> bool {
        let mut inner = self.inner.lock();
        if inner.busy_checks > 0 {
            inner.busy_checks -= 1;
            return true;
        }
        false
    }

    async fn append(&mut self, segment: Segment) -> Result<AppendAck, SinkError> {
        let mut inner = self.inner.lock();
        if inner.format.is_none() {
            return Err(SinkError::NotOpen);
        }
        if inner.end_of_stream_calls > 0 {
            return Err(SinkError::AlreadyEnded);
        }
        *inner.attempts.entry(segment.index).or_default() += 1;
        if inner.rejected.contains(&segment.index) {
            return Err(SinkError::AppendRejected(format!(
                "chunk {} refused",
                segment.index
            )));
        }
        if let Some(remaining) = inner.busy_appends.get_mut(&segment.index)
            && *remaining > 0
        {
            *remaining -= 1;
            return Ok(AppendAck::Busy);
        }
        if !segment.range.is_empty() {
            inner.coverage.insert(segment.range.clone());
        }
        inner.segments.insert(segment.range.start, segment.data);
        inner.appended.push(segment.index);
        inner.busy_checks = inner.busy_after_append;
        Ok(AppendAck::Accepted)
    }

    async fn end_of_stream(&mut self) -> Result<(), SinkError> {
        let mut inner = self.inner.lock();
        if inner.format.is_none() {
            return Err(SinkError::NotOpen);
        }
        inner.end_of_stream_calls += 1;
        if inner.end_of_stream_calls > 1 {
            return Err(SinkError::AlreadyEnded);
        }
        Ok(())
    }

    fn buffered(&self) -> Vec<Range<u64>> {
        self.inner.lock().coverage.iter().cloned().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn segment(index: ChunkIndex, range: Range<u64>) -> Segment {
        let len = usize::try_from(range.end - range.start).unwrap();
        Segment {
            index,
            range,
            data: Bytes::from(vec![index as u8; len]),
        }
    }

    async fn opened() -> MemorySink {
        let mut sink = MemorySink::new();
        sink.open(&FormatDescriptor::default()).await.unwrap();
        sink
    }

    #[tokio::test]
    async fn append_before_open_fails() {
        let mut sink = MemorySink::new();
        assert_eq!(
            sink.append(segment(0, 0..4)).await,
            Err(SinkError::NotOpen)
        );
    }

    #[tokio::test]
    async fn out_of_order_appends_merge_coverage() {
        let mut sink = opened().await;
        sink.append(segment(2, 8..12)).await.unwrap();
        sink.append(segment(0, 0..4)).await.unwrap();
        assert_eq!(sink.buffered(), vec![0..4, 8..12]);

        sink.append(segment(1, 4..8)).await.unwrap();
        assert_eq!(sink.buffered(), vec![0..12]);
        assert_eq!(sink.appended(), vec![2, 0, 1]);
        assert_eq!(sink.contiguous_bytes().len(), 12);
    }

    #[tokio::test]
    async fn scripted_busy_append() {
        let mut sink = opened().await;
        sink.set_busy_for(3, 1);
        assert_eq!(
            sink.append(segment(3, 0..4)).await,
            Ok(AppendAck::Busy)
        );
        assert_eq!(
            sink.append(segment(3, 0..4)).await,
            Ok(AppendAck::Accepted)
        );
        assert_eq!(sink.attempts(3), 2);
    }

    #[tokio::test]
    async fn rejected_chunk_is_not_recorded() {
        let mut sink = opened().await;
        sink.set_reject_for(1);
        assert!(matches!(
            sink.append(segment(1, 4..8)).await,
            Err(SinkError::AppendRejected(_))
        ));
        assert_eq!(sink.append(segment(0, 0..4)).await, Ok(AppendAck::Accepted));
        assert_eq!(sink.appended(), vec![0]);
        assert_eq!(sink.buffered(), vec![0..4]);
        assert_eq!(sink.attempts(1), 1);
    }

    #[tokio::test]
    async fn scripted_busy_checks() {
        let sink = opened().await;
        sink.set_busy_checks(2);
        assert!(sink.is_updating());
        assert!(sink.is_updating());
        assert!(!sink.is_updating());
    }

    #[tokio::test]
    async fn updating_after_append() {
        let mut sink = opened().await;
        sink.set_busy_after_append(1);
        assert!(!sink.is_updating());
        sink.append(segment(0, 0..4)).await.unwrap();
        assert!(sink.is_updating());
        assert!(!sink.is_updating());
    }

    #[tokio::test]
    async fn end_of_stream_twice_is_an_error() {
        let mut sink = opened().await;
        sink.end_of_stream().await.unwrap();
        assert_eq!(sink.end_of_stream().await, Err(SinkError::AlreadyEnded));
        assert_eq!(sink.end_of_stream_calls(), 2);
        assert_eq!(
            sink.append(segment(0, 0..4)).await,
            Err(SinkError::AlreadyEnded)
        );
    }
}
