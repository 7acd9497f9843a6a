use async_trait::async_trait;
use bytes::Bytes;
use futures::TryStreamExt;
use reqwest::{Client, RequestBuilder, Response, StatusCode};
use tracing::trace;
use url::Url;

use crate::{
    ByteStream,
    error::{NetError, NetResult},
    traits::Net,
    types::{Headers, NetOptions, RangeSpec},
};

#[derive(Clone, Debug)]
pub struct HttpClient {
    inner: Client,
    options: NetOptions,
}

impl HttpClient {
    /// # Errors
    ///
    /// Returns [`NetError`] if the underlying `reqwest::Client` cannot be built
    /// (e.g. TLS backend initialisation failure).
    pub fn new(options: NetOptions) -> NetResult<Self> {
        let inner = Client::builder()
            .pool_max_idle_per_host(options.pool_max_idle_per_host)
            .build()
            .map_err(|e| NetError::http(format!("failed to build HTTP client: {e}")))?;
        Ok(Self { inner, options })
    }

    fn apply_headers(mut req: RequestBuilder, headers: Option<Headers>) -> RequestBuilder {
        if let Some(headers) = headers {
            for (k, v) in headers.iter() {
                req = req.header(k, v);
            }
        }
        req
    }

    fn check_status(url: &Url, resp: &Response, ranged: bool) -> NetResult<()> {
        let status = resp.status();
        if status.is_success() || (ranged && status == StatusCode::PARTIAL_CONTENT) {
            return Ok(());
        }
        Err(NetError::http_status(status.as_u16(), url.to_string()))
    }

    fn collect_headers(resp: &Response) -> Headers {
        let mut out = Headers::new();
        for (name, value) in resp.headers() {
            if let Ok(v) = value.to_str() {
                out.insert(name.as_str(), v);
            }
        }
        out
    }
}

#[async_trait]
impl Net for HttpClient {
    async fn get_bytes(&self, url: Url, headers: Option<Headers>) -> Result<Bytes, NetError> {
        let req = Self::apply_headers(self.inner.get(url.clone()), headers)
            .timeout(self.options.request_timeout);

        let resp = req.send().await?;
        Self::check_status(&url, &resp, false)?;

        Ok(resp.bytes().await?)
    }

    async fn get_range(
        &self,
        url: Url,
        range: RangeSpec,
        headers: Option<Headers>,
    ) -> Result<ByteStream, NetError> {
        trace!(%url, range = %range.to_header_value(), "get_range");
        let req = self
            .inner
            .get(url.clone())
            .header(reqwest::header::RANGE, range.to_header_value());
        // No timeout for the body: a chunk read is bounded by cancellation only.
        let req = Self::apply_headers(req, headers);

        let resp = req.send().await?;
        Self::check_status(&url, &resp, true)?;

        let stream = resp.bytes_stream().map_err(NetError::from);
        Ok(Box::pin(stream))
    }

    async fn head(&self, url: Url, headers: Option<Headers>) -> Result<Headers, NetError> {
        let req = Self::apply_headers(self.inner.head(url.clone()), headers)
            .timeout(self.options.request_timeout);

        let resp = req.send().await?;
        Self::check_status(&url, &resp, false)?;

        Ok(Self::collect_headers(&resp))
    }

    async fn head_range(
        &self,
        url: Url,
        range: RangeSpec,
        headers: Option<Headers>,
    ) -> Result<Headers, NetError> {
        let req = self
            .inner
            .get(url.clone())
            .header(reqwest::header::RANGE, range.to_header_value());
        let req = Self::apply_headers(req, headers).timeout(self.options.request_timeout);

        let resp = req.send().await?;
        Self::check_status(&url, &resp, true)?;

        Ok(Self::collect_headers(&resp))
    }
}
