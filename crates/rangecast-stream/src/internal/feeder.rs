#![forbid(unsafe_code)]

use std::{ops::Range, time::Duration};

use rangemap::RangeSet;
use tracing::trace;

use crate::{
    config::{FormatDescriptor, SinkRetry},
    error::SinkError,
    sink::{AppendAck, MediaSink, Segment},
};

/// Result of offering a segment to the sink.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Delivery {
    Appended,
    Busy,
}

/// Result of asking the sink to end the stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Finish {
    Ended,
    Busy,
}

/// Shared "delivery" abstraction: fetched segment → busy check → `append`.
///
/// Owns the sink and guarantees end-of-stream is signalled at most once.
pub(crate) struct SinkFeeder {
    sink: Box<dyn MediaSink>,
    retry: SinkRetry,
    ended: bool,
}

impl SinkFeeder {
    pub fn new(sink: Box<dyn MediaSink>, retry: SinkRetry) -> Self {
        Self {
            sink,
            retry,
            ended: false,
        }
    }

    pub async fn open(&mut self, format: &FormatDescriptor) -> Result<(), SinkError> {
        self.sink.open(format).await
    }

    pub fn retry_delay(&self) -> Duration {
        self.retry.delay
    }

    /// Whether a chunk already offered `attempt` times may be offered again.
    pub fn may_retry(&self, attempt: u32) -> bool {
        attempt < self.retry.max_retries
    }

    pub fn may_recheck_end(&self, checks: u32) -> bool {
        checks < self.retry.max_end_of_stream_checks
    }

    pub fn is_ended(&self) -> bool {
        self.ended
    }

    pub async fn offer(&mut self, segment: &Segment) -> Result<Delivery, SinkError> {
        if self.ended {
            return Err(SinkError::AlreadyEnded);
        }
        if self.sink.is_updating() {
            trace!(index = segment.index, "sink busy before append");
            return Ok(Delivery::Busy);
        }
        match self.sink.append(segment.clone()).await? {
            AppendAck::Accepted => Ok(Delivery::Appended),
            AppendAck::Busy => {
                trace!(index = segment.index, "sink refused append while busy");
                Ok(Delivery::Busy)
            }
        }
    }

    pub async fn finish(&mut self) -> Result<Finish, SinkError> {
        if self.ended {
            return Err(SinkError::AlreadyEnded);
        }
        if self.sink.is_updating() {
            return Ok(Finish::Busy);
        }
        self.sink.end_of_stream().await?;
        self.ended = true;
        Ok(Finish::Ended)
    }

    /// The sink holds every byte of `range`.
    pub fn covers(&self, range: &Range<u64>) -> bool {
        if range.is_empty() {
            return true;
        }
        let held: RangeSet<u64> = self
            .sink
            .buffered()
            .into_iter()
            .filter(|r| !r.is_empty())
            .collect();
        held.gaps(range).next().is_none()
    }
}

#[cfg(test)]
mod tests {
    use bytes::Bytes;
    use rstest::*;

    use super::*;
    use crate::sink::MemorySink;

    fn segment(index: usize, range: Range<u64>) -> Segment {
        Segment {
            index,
            data: Bytes::from(vec![0u8; (range.end - range.start) as usize]),
            range,
        }
    }

    async fn feeder(sink: &MemorySink) -> SinkFeeder {
        let mut feeder = SinkFeeder::new(Box::new(sink.clone()), SinkRetry::default());
        feeder.open(&FormatDescriptor::default()).await.unwrap();
        feeder
    }

    #[tokio::test]
    async fn busy_sink_is_not_appended_to() {
        let sink = MemorySink::new();
        let mut feeder = feeder(&sink).await;
        sink.set_busy_checks(1);

        assert_eq!(feeder.offer(&segment(0, 0..4)).await, Ok(Delivery::Busy));
        assert_eq!(sink.attempts(0), 0);
        assert_eq!(feeder.offer(&segment(0, 0..4)).await, Ok(Delivery::Appended));
    }

    #[tokio::test]
    async fn busy_ack_is_reported() {
        let sink = MemorySink::new();
        let mut feeder = feeder(&sink).await;
        sink.set_busy_for(0, 1);
        assert_eq!(feeder.offer(&segment(0, 0..4)).await, Ok(Delivery::Busy));
        assert_eq!(sink.attempts(0), 1);
    }

    #[tokio::test]
    async fn end_of_stream_once() {
        let sink = MemorySink::new();
        let mut feeder = feeder(&sink).await;

        sink.set_busy_checks(1);
        assert_eq!(feeder.finish().await, Ok(Finish::Busy));
        assert!(!feeder.is_ended());

        assert_eq!(feeder.finish().await, Ok(Finish::Ended));
        assert_eq!(feeder.finish().await, Err(SinkError::AlreadyEnded));
        assert_eq!(sink.end_of_stream_calls(), 1);
        assert_eq!(
            feeder.offer(&segment(0, 0..4)).await,
            Err(SinkError::AlreadyEnded)
        );
    }

    #[rstest]
    #[case::exact(0..4, true)]
    #[case::inside(1..3, true)]
    #[case::spans_gap(2..10, false)]
    #[case::outside(12..16, false)]
    #[case::empty(5..5, true)]
    #[tokio::test]
    async fn coverage_requires_full_containment(#[case] range: Range<u64>, #[case] expected: bool) {
        let sink = MemorySink::new();
        let mut feeder = feeder(&sink).await;
        feeder.offer(&segment(0, 0..4)).await.unwrap();
        feeder.offer(&segment(2, 8..12)).await.unwrap();

        assert_eq!(feeder.covers(&range), expected);
    }

    #[test]
    fn retry_budget() {
        let feeder = SinkFeeder::new(Box::new(MemorySink::new()), SinkRetry::default());
        assert!(feeder.may_retry(0));
        assert!(!feeder.may_retry(1));
        assert!(feeder.may_recheck_end(49));
        assert!(!feeder.may_recheck_end(50));
        assert_eq!(feeder.retry_delay(), Duration::from_millis(100));
    }
}
