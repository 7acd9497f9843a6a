//! Shared async HTTP test server helpers.

use std::{sync::Arc, time::Duration};

use axum::{
    Router,
    body::Body,
    extract::State,
    http::{HeaderMap, StatusCode, header},
    response::{IntoResponse, Response},
    routing::get,
};
use bytes::Bytes;
use parking_lot::Mutex;
use tokio::net::TcpListener;
use url::Url;

/// Lightweight HTTP test server wrapper.
pub struct TestHttpServer {
    base_url: Url,
    shutdown_tx: Option<tokio::sync::oneshot::Sender<()>>,
}

impl TestHttpServer {
    /// Spawn `router` on a random localhost port.
    ///
    /// # Panics
    ///
    /// Panics if listener bind or URL parsing fails.
    pub async fn new(router: Router) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0")
            .await
            .expect("bind test HTTP listener");
        let addr = listener
            .local_addr()
            .expect("read test listener local addr");

        let (shutdown_tx, shutdown_rx) = tokio::sync::oneshot::channel();
        let server = axum::serve(listener, router).with_graceful_shutdown(async {
            shutdown_rx.await.ok();
        });

        tokio::spawn(async move {
            server.await.expect("run test HTTP server");
        });

        Self {
            base_url: Url::parse(&format!("http://{addr}")).expect("parse base URL"),
            shutdown_tx: Some(shutdown_tx),
        }
    }

    /// Join path to server base URL.
    ///
    /// # Panics
    ///
    /// Panics if URL join fails.
    #[must_use]
    pub fn url(&self, path: &str) -> Url {
        self.base_url.join(path).expect("join server URL path")
    }
}

impl Drop for TestHttpServer {
    fn drop(&mut self) {
        if let Some(shutdown_tx) = self.shutdown_tx.take() {
            let _ = shutdown_tx.send(());
        }
    }
}

/// Byte-range media endpoint with scriptable misbehaviour.
#[derive(Clone)]
pub struct MediaRoute {
    body: Bytes,
    head_length: bool,
    range_status: Option<StatusCode>,
    delay: Duration,
    ranges: Arc<Mutex<Vec<String>>>,
}

impl MediaRoute {
    pub fn new(body: Bytes) -> Self {
        Self {
            body,
            head_length: true,
            range_status: None,
            delay: Duration::ZERO,
            ranges: Arc::default(),
        }
    }

    /// Answer `HEAD` without `Content-Length`.
    #[must_use]
    pub fn without_head_length(mut self) -> Self {
        self.head_length = false;
        self
    }

    /// Answer every ranged `GET` with `status`.
    #[must_use]
    pub fn with_range_status(mut self, status: StatusCode) -> Self {
        self.range_status = Some(status);
        self
    }

    /// Delay every `GET` response by `delay`.
    #[must_use]
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    /// `Range` header values seen so far, in arrival order.
    pub fn ranges(&self) -> Vec<String> {
        self.ranges.lock().clone()
    }

    /// Router serving this media at `path`.
    pub fn router(&self, path: &str) -> Router {
        Router::new()
            .route(path, get(media_get).head(media_head))
            .with_state(self.clone())
    }

    fn parse_range(&self, headers: &HeaderMap) -> Option<(u64, u64)> {
        let value = headers.get(header::RANGE)?.to_str().ok()?;
        let (start, end) = value.strip_prefix("bytes=")?.split_once('-')?;
        let start = start.parse().ok()?;
        let last = (self.body.len() as u64).saturating_sub(1);
        let end = if end.is_empty() {
            last
        } else {
            end.parse::<u64>().ok()?.min(last)
        };
        Some((start, end))
    }
}

async fn media_head(State(route): State<MediaRoute>) -> Response {
    if route.head_length {
        let mut headers = HeaderMap::new();
        headers.insert(header::CONTENT_LENGTH, route.body.len().into());
        headers.insert(header::ACCEPT_RANGES, "bytes".parse().unwrap());
        return (headers, ()).into_response();
    }
    // A streamed body has no known size, so no Content-Length is emitted.
    let empty = futures::stream::empty::<Result<Bytes, std::io::Error>>();
    Response::new(Body::from_stream(empty))
}

async fn media_get(State(route): State<MediaRoute>, headers: HeaderMap) -> Response {
    if !route.delay.is_zero() {
        tokio::time::sleep(route.delay).await;
    }
    if let Some(value) = headers.get(header::RANGE).and_then(|v| v.to_str().ok()) {
        route.ranges.lock().push(value.to_string());
    }
    let total = route.body.len();

    let Some((start, end)) = route.parse_range(&headers) else {
        return (StatusCode::OK, route.body.clone()).into_response();
    };
    if let Some(status) = route.range_status {
        return status.into_response();
    }
    if start > end || start >= total as u64 {
        let mut out = HeaderMap::new();
        out.insert(
            header::CONTENT_RANGE,
            format!("bytes */{total}").parse().unwrap(),
        );
        return (StatusCode::RANGE_NOT_SATISFIABLE, out).into_response();
    }

    let mut out = HeaderMap::new();
    out.insert(
        header::CONTENT_RANGE,
        format!("bytes {start}-{end}/{total}").parse().unwrap(),
    );
    let slice = route.body.slice(start as usize..=end as usize);
    (StatusCode::PARTIAL_CONTENT, out, slice).into_response()
}
