#![forbid(unsafe_code)]

use std::ops::Range;

use async_trait::async_trait;
use bytes::{Bytes, BytesMut};
use futures::StreamExt;
use rangecast_net::{
    DefaultRetryPolicy, Headers, HttpClient, Net, NetError, NetExt, NetOptions, RangeSpec,
    RetryNet,
};
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace};
use url::Url;

use crate::error::{FetchError, ProbeError};

/// Random-access byte source addressed by a locator.
#[async_trait]
pub trait RangeSource: Send + Sync + 'static {
    /// Total content length in bytes.
    async fn probe_length(&self, locator: &Url) -> Result<u64, ProbeError>;

    /// Bytes of the half-open `range`.
    ///
    /// Must return [`FetchError::Cancelled`] promptly once `cancel` fires.
    async fn read_range(
        &self,
        locator: &Url,
        range: Range<u64>,
        cancel: &CancellationToken,
    ) -> Result<Bytes, FetchError>;
}

/// [`RangeSource`] over HTTP byte-range requests.
pub struct HttpRangeSource<N = RetryNet<HttpClient, DefaultRetryPolicy>> {
    net: N,
    headers: Option<Headers>,
}

impl HttpRangeSource {
    /// Build a `reqwest`-backed source with the retry policy from `options`.
    pub fn new(options: NetOptions, headers: Option<Headers>) -> Result<Self, NetError> {
        let retry = options.retry_policy.clone();
        let client = HttpClient::new(options)?;
        Ok(Self::with_net(client.with_retry(retry), headers))
    }
}

impl<N: Net> HttpRangeSource<N> {
    pub fn with_net(net: N, headers: Option<Headers>) -> Self {
        Self { net, headers }
    }

    /// `Content-Range: bytes 0-0/<total>` → `total`.
    fn parse_content_range_total(value: &str) -> Option<u64> {
        let (_, total) = value.trim().rsplit_once('/')?;
        total.trim().parse().ok()
    }

    fn content_length(headers: &Headers) -> Option<u64> {
        headers
            .get_ignore_case("content-length")
            .and_then(|v| v.trim().parse().ok())
    }
}

#[async_trait]
impl<N: Net + 'static> RangeSource for HttpRangeSource<N> {
    async fn probe_length(&self, locator: &Url) -> Result<u64, ProbeError> {
        let headers = self.net.head(locator.clone(), self.headers.clone()).await?;
        if let Some(length) = Self::content_length(&headers) {
            debug!(%locator, length, "probed content length via HEAD");
            return Ok(length);
        }

        trace!(%locator, "HEAD carried no Content-Length, probing with a one-byte range");
        let headers = self
            .net
            .head_range(
                locator.clone(),
                RangeSpec::new(0, Some(0)),
                self.headers.clone(),
            )
            .await?;
        let length = headers
            .get_ignore_case("content-range")
            .and_then(Self::parse_content_range_total)
            .ok_or(ProbeError::LengthUnknown)?;
        debug!(%locator, length, "probed content length via Content-Range");
        Ok(length)
    }

    async fn read_range(
        &self,
        locator: &Url,
        range: Range<u64>,
        cancel: &CancellationToken,
    ) -> Result<Bytes, FetchError> {
        let expected = range.end.saturating_sub(range.start);
        if expected == 0 {
            return Ok(Bytes::new());
        }
        let requested = RangeSpec::new(range.start, Some(range.end - 1));

        let mut stream = tokio::select! {
            biased;
            () = cancel.cancelled() => return Err(FetchError::Cancelled),
            stream = self.net.get_range(locator.clone(), requested, self.headers.clone()) => stream?,
        };

        let mut buf = BytesMut::with_capacity(usize::try_from(expected).unwrap_or(0));
        loop {
            let chunk = tokio::select! {
                biased;
                () = cancel.cancelled() => return Err(FetchError::Cancelled),
                next = stream.next() => next,
            };
            match chunk {
                Some(bytes) => buf.extend_from_slice(&bytes?),
                None => break,
            }
            // An origin that ignored `Range` sends the whole asset; stop reading.
            if buf.len() as u64 > expected {
                return Err(FetchError::UnexpectedLength {
                    expected,
                    actual: buf.len() as u64,
                });
            }
        }

        let actual = buf.len() as u64;
        if actual != expected {
            return Err(FetchError::UnexpectedLength { expected, actual });
        }
        Ok(buf.freeze())
    }
}
