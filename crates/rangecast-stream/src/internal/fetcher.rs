#![forbid(unsafe_code)]

use std::{ops::Range, sync::Arc};

use bytes::Bytes;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::trace;
use url::Url;

use crate::{
    error::FetchError,
    layout::{ChunkIndex, ChunkLayout},
    scheduler::Epoch,
    source::RangeSource,
};

/// Settlement of one chunk read, tagged with the epoch it was issued under.
#[derive(Debug)]
pub(crate) struct FetchOutcome {
    pub index: ChunkIndex,
    pub epoch: Epoch,
    pub range: Range<u64>,
    pub result: Result<Bytes, FetchError>,
}

/// Shared "fetch" abstraction: chunk index → `read_range` → settlement message.
///
/// Every fetch runs as its own task and reports back over `tx`, so the
/// session actor stays the only owner of scheduling state.
pub(crate) struct ChunkFetcher<M> {
    source: Arc<dyn RangeSource>,
    locator: Url,
    layout: ChunkLayout,
    tx: mpsc::UnboundedSender<M>,
}

impl<M> ChunkFetcher<M>
where
    M: From<FetchOutcome> + Send + 'static,
{
    pub fn new(
        source: Arc<dyn RangeSource>,
        locator: Url,
        layout: ChunkLayout,
        tx: mpsc::UnboundedSender<M>,
    ) -> Self {
        Self {
            source,
            locator,
            layout,
            tx,
        }
    }

    /// Spawn the read for chunk `index` under `cancel`.
    ///
    /// Indices past the last chunk are ignored.
    pub fn spawn(&self, index: ChunkIndex, epoch: Epoch, cancel: CancellationToken) {
        let Some(range) = self.layout.byte_range(index) else {
            return;
        };
        let source = Arc::clone(&self.source);
        let locator = self.locator.clone();
        let tx = self.tx.clone();

        tokio::spawn(async move {
            trace!(index, epoch, start = range.start, end = range.end, "chunk fetch started");
            let result = tokio::select! {
                biased;
                () = cancel.cancelled() => Err(FetchError::Cancelled),
                result = source.read_range(&locator, range.clone(), &cancel) => result,
            };
            // The actor may already be gone; nothing left to report to.
            let _ = tx.send(M::from(FetchOutcome {
                index,
                epoch,
                range,
                result,
            }));
        });
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use async_trait::async_trait;

    use super::*;
    use crate::error::ProbeError;

    struct SlowSource;

    #[async_trait]
    impl RangeSource for SlowSource {
        async fn probe_length(&self, _locator: &Url) -> Result<u64, ProbeError> {
            Ok(10)
        }

        async fn read_range(
            &self,
            _locator: &Url,
            range: Range<u64>,
            _cancel: &CancellationToken,
        ) -> Result<Bytes, FetchError> {
            if range.start > 0 {
                tokio::time::sleep(Duration::from_secs(60)).await;
            }
            Ok(Bytes::from(vec![0u8; (range.end - range.start) as usize]))
        }
    }

    fn fetcher() -> (
        ChunkFetcher<FetchOutcome>,
        mpsc::UnboundedReceiver<FetchOutcome>,
    ) {
        let (tx, rx) = mpsc::unbounded_channel();
        let fetcher = ChunkFetcher::new(
            Arc::new(SlowSource),
            Url::parse("mem://video").unwrap(),
            ChunkLayout::new(10, 4),
            tx,
        );
        (fetcher, rx)
    }

    #[tokio::test]
    async fn reports_settlement_with_epoch() {
        let (fetcher, mut rx) = fetcher();
        fetcher.spawn(0, 7, CancellationToken::new());

        let outcome = rx.recv().await.unwrap();
        assert_eq!(outcome.index, 0);
        assert_eq!(outcome.epoch, 7);
        assert_eq!(outcome.range, 0..4);
        assert_eq!(outcome.result.unwrap().len(), 4);
    }

    #[tokio::test]
    async fn cancellation_settles_as_cancelled() {
        let (fetcher, mut rx) = fetcher();
        let cancel = CancellationToken::new();
        fetcher.spawn(2, 0, cancel.clone());
        cancel.cancel();

        let outcome = rx.recv().await.unwrap();
        assert_eq!(outcome.index, 2);
        assert_eq!(outcome.range, 8..10);
        assert_eq!(outcome.result, Err(FetchError::Cancelled));
    }

    #[tokio::test]
    async fn out_of_range_index_is_ignored() {
        let (fetcher, mut rx) = fetcher();
        fetcher.spawn(3, 0, CancellationToken::new());
        drop(fetcher);
        assert!(rx.recv().await.is_none());
    }
}
