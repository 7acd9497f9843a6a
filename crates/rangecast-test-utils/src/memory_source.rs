//! In-memory [`RangeSource`] with gating and failure injection.

use std::{
    collections::{HashMap, HashSet},
    ops::Range,
    sync::{
        Arc,
        atomic::{AtomicBool, AtomicUsize, Ordering},
    },
};

use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::Mutex;
use rangecast_stream::{FetchError, ProbeError, RangeSource};
use tokio::sync::Notify;
use tokio_util::sync::CancellationToken;
use url::Url;

#[derive(Default)]
struct Inner {
    data: Bytes,
    probe_error: Mutex<Option<ProbeError>>,
    failures: Mutex<HashMap<u64, FetchError>>,
    gated: AtomicBool,
    released: Mutex<HashSet<u64>>,
    notify: Notify,
    requests: Mutex<Vec<Range<u64>>>,
    in_flight: AtomicUsize,
    probe_calls: AtomicUsize,
}

/// Range source over a byte buffer. Clones share state.
///
/// When gated, a read blocks until its start offset is released, which lets
/// tests hold chunks "in flight" deterministically.
#[derive(Clone, Default)]
pub struct MemoryRangeSource {
    inner: Arc<Inner>,
}

impl MemoryRangeSource {
    pub fn new(data: Bytes) -> Self {
        Self {
            inner: Arc::new(Inner {
                data,
                ..Inner::default()
            }),
        }
    }

    /// Hold every read until [`release`](Self::release)d.
    #[must_use]
    pub fn gated(self) -> Self {
        self.inner.gated.store(true, Ordering::SeqCst);
        self
    }

    /// Fail probes with `error`.
    #[must_use]
    pub fn with_probe_error(self, error: ProbeError) -> Self {
        *self.inner.probe_error.lock() = Some(error);
        self
    }

    /// Fail the next read starting at `start` with `error`.
    pub fn fail_at(&self, start: u64, error: FetchError) {
        self.inner.failures.lock().insert(start, error);
    }

    /// Let the next read starting at `start` complete. Each release admits one read.
    pub fn release(&self, start: u64) {
        self.inner.released.lock().insert(start);
        self.inner.notify.notify_waiters();
    }

    /// Ranges requested so far, in arrival order.
    pub fn requests(&self) -> Vec<Range<u64>> {
        self.inner.requests.lock().clone()
    }

    /// Reads currently blocked or running. Dropped reads are not counted.
    pub fn in_flight(&self) -> usize {
        self.inner.in_flight.load(Ordering::SeqCst)
    }

    pub fn probe_calls(&self) -> usize {
        self.inner.probe_calls.load(Ordering::SeqCst)
    }

    /// Admit a read at `start`, consuming its release.
    fn admit(&self, start: u64) -> bool {
        !self.inner.gated.load(Ordering::SeqCst) || self.inner.released.lock().remove(&start)
    }
}

#[async_trait]
impl RangeSource for MemoryRangeSource {
    async fn probe_length(&self, _locator: &Url) -> Result<u64, ProbeError> {
        self.inner.probe_calls.fetch_add(1, Ordering::SeqCst);
        if let Some(error) = self.inner.probe_error.lock().clone() {
            return Err(error);
        }
        Ok(self.inner.data.len() as u64)
    }

    async fn read_range(
        &self,
        _locator: &Url,
        range: Range<u64>,
        cancel: &CancellationToken,
    ) -> Result<Bytes, FetchError> {
        self.inner.requests.lock().push(range.clone());
        let _guard = InFlight::enter(&self.inner.in_flight);

        loop {
            let notified = self.inner.notify.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();
            if self.admit(range.start) {
                break;
            }
            tokio::select! {
                () = cancel.cancelled() => return Err(FetchError::Cancelled),
                () = notified.as_mut() => {}
            }
        }
        if cancel.is_cancelled() {
            return Err(FetchError::Cancelled);
        }

        if let Some(error) = self.inner.failures.lock().remove(&range.start) {
            return Err(error);
        }
        let len = self.inner.data.len() as u64;
        let start = range.start.min(len) as usize;
        let end = range.end.min(len) as usize;
        Ok(self.inner.data.slice(start..end))
    }
}

struct InFlight<'a>(&'a AtomicUsize);

impl<'a> InFlight<'a> {
    fn enter(counter: &'a AtomicUsize) -> Self {
        counter.fetch_add(1, Ordering::SeqCst);
        Self(counter)
    }
}

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}
